use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::thread::sleep;
use std::time::Duration;

static INIT_ONCE: std::sync::Once = std::sync::Once::new();
pub fn init_tracing_once() {
    INIT_ONCE.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}

// -------- environment overrides --------

/// Parse `name` from the environment. Unset or blank yields `None`; an unparsable
/// value is logged and ignored.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("{name} is set but cannot be parsed: {raw:?}; ignoring");
            None
        }
    }
}

pub fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

pub fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => None,
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!("{name} is set but is not a boolean: {other:?}; ignoring");
            None
        }
    }
}

// -------- file ops with backoff --------

/// Transient/retriable I/O errors: sharing and lock violations from AV/backup
/// filter drivers, interrupted calls, and busy devices.
fn is_retriable_io_error(e: &io::Error) -> bool {
    if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) {
        return true;
    }
    // Windows: 5 access denied (AV/share), 32 sharing violation, 33 lock violation,
    // 1224 user-mapped section open. Unix: 16 EBUSY, 26 ETXTBSY.
    matches!(e.raw_os_error(), Some(5) | Some(32) | Some(33) | Some(1224) | Some(16) | Some(26))
}

fn with_backoff<T>(tries: usize, delay_ms: u64, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut last_err: Option<io::Error> = None;
    for i in 0..tries.max(1) {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_retriable_io_error(&e) => {
                last_err = Some(e);
                sleep(Duration::from_millis(delay_ms.saturating_mul((i + 1) as u64)));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "retries exhausted")))
}

/// Open a file for reading; `Ok(None)` when it does not exist.
pub fn read_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<Option<Vec<u8>>> {
    match with_backoff(tries, delay_ms, || fs::read(path)) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a file; `Ok(false)` when it did not exist.
pub fn remove_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<bool> {
    match with_backoff(tries, delay_ms, || fs::remove_file(path)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Write `bytes` to `tmp`, flush and fsync it, then move it over `dest`.
/// A reader sees either the old or the new content, never a partial file.
pub fn write_file_synced(tmp: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = tmp.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = with_backoff(20, 50, || File::create(tmp))?;
    f.write_all(bytes)?;
    f.flush()?;
    f.sync_all()?;
    drop(f);
    replace_file_atomic_backoff(tmp, dest)
}

/// Replace `dest` with `tmp`. Rename first (atomic on the same filesystem); if that
/// keeps failing (e.g. sharing violations), fall back to remove + rename, then copy.
pub fn replace_file_atomic_backoff(tmp: &Path, dest: &Path) -> io::Result<()> {
    let tries = 20usize;
    let delay_ms = 50u64;
    if with_backoff(tries, delay_ms, || fs::rename(tmp, dest)).is_ok() {
        return Ok(());
    }
    remove_with_backoff(dest, tries, delay_ms)?;
    match with_backoff(tries, delay_ms, || fs::rename(tmp, dest)) {
        Ok(()) => Ok(()),
        Err(_) => {
            with_backoff(tries, delay_ms, || fs::copy(tmp, dest))?;
            remove_with_backoff(tmp, tries, delay_ms)?;
            Ok(())
        }
    }
}
