use crate::fetch::RetryPolicy;
use crate::hierarchy::OrphanPolicy;
use crate::store::DEFAULT_MAX_RECORD_BYTES;
use crate::util::{env_bool, env_parse, env_secs};
use std::path::PathBuf;
use std::time::Duration;

/// Tuning for the worker, the chunk store and the progress monitor, with
/// builder chaining and environment overrides.
#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub api_attempts: u32,              // calls per page, including the first
    pub retry_delay: Duration,          // pause between attempts
    pub progress_interval: Duration,    // min spacing of in-list progress writes
    pub max_stall: Duration,            // no progress for longer => stalled
    pub max_job_duration: Duration,     // running for longer => exceeded max time
    pub max_start_delay: Duration,      // still Starting after this => not started
    pub max_job_starts: u32,            // pickups allowed before giving up
    pub max_chunk_bytes: usize,         // per stored chunk
    pub max_payload_bytes: usize,       // total stored payload per user
    pub orphan_policy: OrphanPolicy,
    pub compress: bool,                 // zstd the payload before chunking
    pub store_dir: Option<PathBuf>,     // FileStore root; None => in-memory
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            api_attempts: 3,
            retry_delay: Duration::ZERO,
            progress_interval: Duration::from_secs(5),
            max_stall: Duration::from_secs(300),
            max_job_duration: Duration::from_secs(3600),
            max_start_delay: Duration::from_secs(120),
            max_job_starts: 3,
            max_chunk_bytes: DEFAULT_MAX_RECORD_BYTES,
            max_payload_bytes: 32 * DEFAULT_MAX_RECORD_BYTES,
            orphan_policy: OrphanPolicy::Flag,
            compress: true,
            store_dir: None,
        }
    }
}

impl ExportOptions {
    /// Defaults overlaid with `TASKVAULT_*` environment variables:
    /// - TASKVAULT_API_ATTEMPTS, TASKVAULT_RETRY_DELAY_SECS, TASKVAULT_PROGRESS_INTERVAL_SECS
    /// - TASKVAULT_MAX_STALL_SECS, TASKVAULT_MAX_JOB_SECS, TASKVAULT_MAX_START_DELAY_SECS
    /// - TASKVAULT_MAX_JOB_STARTS, TASKVAULT_MAX_CHUNK_BYTES, TASKVAULT_MAX_PAYLOAD_BYTES
    /// - TASKVAULT_REMOVE_ORPHANS, TASKVAULT_COMPRESS, TASKVAULT_STORE_DIR
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = env_parse("TASKVAULT_API_ATTEMPTS") { self = self.with_api_attempts(n); }
        if let Some(d) = env_secs("TASKVAULT_RETRY_DELAY_SECS") { self.retry_delay = d; }
        if let Some(d) = env_secs("TASKVAULT_PROGRESS_INTERVAL_SECS") { self.progress_interval = d; }
        if let Some(d) = env_secs("TASKVAULT_MAX_STALL_SECS") { self.max_stall = d; }
        if let Some(d) = env_secs("TASKVAULT_MAX_JOB_SECS") { self.max_job_duration = d; }
        if let Some(d) = env_secs("TASKVAULT_MAX_START_DELAY_SECS") { self.max_start_delay = d; }
        if let Some(n) = env_parse("TASKVAULT_MAX_JOB_STARTS") { self.max_job_starts = n; }
        if let Some(n) = env_parse("TASKVAULT_MAX_CHUNK_BYTES") { self = self.with_max_chunk_bytes(n); }
        if let Some(n) = env_parse("TASKVAULT_MAX_PAYLOAD_BYTES") { self.max_payload_bytes = n; }
        if let Some(yes) = env_bool("TASKVAULT_REMOVE_ORPHANS") {
            self.orphan_policy = if yes { OrphanPolicy::Remove } else { OrphanPolicy::Flag };
        }
        if let Some(yes) = env_bool("TASKVAULT_COMPRESS") { self.compress = yes; }
        if let Ok(dir) = std::env::var("TASKVAULT_STORE_DIR") {
            if !dir.trim().is_empty() {
                self.store_dir = Some(PathBuf::from(dir.trim()));
            }
        }
        self
    }

    pub fn with_api_attempts(mut self, n: u32) -> Self {
        self.api_attempts = n.max(1);
        self
    }
    pub fn with_retry_delay(mut self, d: Duration) -> Self {
        self.retry_delay = d;
        self
    }
    pub fn with_progress_interval(mut self, d: Duration) -> Self {
        self.progress_interval = d;
        self
    }
    pub fn with_max_stall(mut self, d: Duration) -> Self {
        self.max_stall = d;
        self
    }
    pub fn with_max_job_duration(mut self, d: Duration) -> Self {
        self.max_job_duration = d;
        self
    }
    pub fn with_max_start_delay(mut self, d: Duration) -> Self {
        self.max_start_delay = d;
        self
    }
    pub fn with_max_job_starts(mut self, n: u32) -> Self {
        self.max_job_starts = n;
        self
    }
    pub fn with_max_chunk_bytes(mut self, bytes: usize) -> Self {
        self.max_chunk_bytes = bytes.max(1);
        self
    }
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }
    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }
    pub fn with_compression(mut self, yes: bool) -> Self {
        self.compress = yes;
        self
    }
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.api_attempts, self.retry_delay)
    }
}
