//! Cursor-paginated page walking with a bounded per-page retry budget.
//!
//! Every page (including the first, fetched with no cursor) gets a fresh budget of
//! `RetryPolicy::attempts` calls. Only `FetchError::Transient` is retried; any other
//! error, or the last transient error once the budget is spent, is returned to the
//! caller and ends the walk.

use anyhow::Result;
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// One page of results plus the cursor for the next page, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next_cursor: None }
    }
    pub fn more(items: Vec<T>, cursor: impl Into<String>) -> Self {
        Self { items, next_cursor: Some(cursor.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or API hiccup; worth another attempt.
    #[error("{0}")]
    Transient(String),

    /// The remote side refuses further work today; retrying cannot help.
    #[error("daily limit exceeded: {0}")]
    QuotaExceeded(String),

    /// Anything else that must not be retried.
    #[error("{0}")]
    Fatal(String),

    #[error("{what}: giving up after {attempts} attempts: {last}")]
    Exhausted { what: String, attempts: u32, last: String },
}

impl FetchError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed per page, including the first.
    pub attempts: u32,
    /// Fixed pause between a failed call and the next attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, delay: Duration::ZERO }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts: attempts.max(1), delay }
    }

    /// Run `op` until it succeeds, fails non-transiently, or the budget is spent.
    /// `on_retry(attempts_left, &err)` runs after each failed attempt that will be
    /// retried; an error from it stops the loop and is returned as is.
    pub fn run<T, F, R>(&self, what: &str, mut op: F, mut on_retry: R) -> Result<T, FetchError>
    where
        F: FnMut() -> Result<T, FetchError>,
        R: FnMut(u32, &FetchError) -> Result<(), FetchError>,
    {
        let attempts = self.attempts.max(1);
        let mut left = attempts;
        loop {
            left -= 1;
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => {
                    error!("{what}: {e} (not retried)");
                    return Err(e);
                }
                Err(e) if left == 0 => {
                    error!("{what}: {e}; giving up after {attempts} attempts");
                    return Err(FetchError::Exhausted {
                        what: what.to_string(),
                        attempts,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("{what}: {e}; {left} attempts remaining");
                    on_retry(left, &e)?;
                    if !self.delay.is_zero() {
                        sleep(self.delay);
                    }
                }
            }
        }
    }
}

/// Told about each failed attempt that is about to be retried. An error from
/// `retrying` ends the call with that error.
pub trait RetryObserver {
    fn retrying(&mut self, _attempts_left: u32, _err: &FetchError) -> Result<()> {
        Ok(())
    }
}

impl RetryObserver for () {}

/// Receives pages as they arrive.
pub trait PageSink<T>: RetryObserver {
    fn page(&mut self, items: Vec<T>) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PagedFetcher {
    policy: RetryPolicy,
}

impl PagedFetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// A single call under the retry budget.
    pub fn call<R, F, O>(&self, what: &str, op: F, observer: &mut O) -> Result<R>
    where
        F: FnMut() -> Result<R, FetchError>,
        O: RetryObserver + ?Sized,
    {
        // An observer failure (e.g. a lost heartbeat write) ends the call with the
        // observer's own error.
        let mut observer_err: Option<anyhow::Error> = None;
        let res = self.policy.run(what, op, |left, e| {
            observer.retrying(left, e).map_err(|err| {
                let msg = format!("{err:#}");
                observer_err = Some(err);
                FetchError::Fatal(msg)
            })
        });
        res.map_err(|e| observer_err.take().unwrap_or_else(|| e.into()))
    }

    /// Walk every page and return the flattened items in original order.
    pub fn fetch_all<T, F, O>(&self, what: &str, mut fetch: F, observer: &mut O) -> Result<Vec<T>>
    where
        F: FnMut(Option<&str>) -> Result<Page<T>, FetchError>,
        O: RetryObserver + ?Sized,
    {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self.call(what, || fetch(cursor.as_deref()), &mut *observer)?;
            pages += 1;
            out.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!("{what}: {} items over {pages} pages", out.len());
        Ok(out)
    }

    /// Walk every page, handing each one to `sink` before fetching the next.
    /// Returns the number of items delivered.
    pub fn for_each_page<T, F, S>(&self, what: &str, mut fetch: F, sink: &mut S) -> Result<usize>
    where
        F: FnMut(Option<&str>) -> Result<Page<T>, FetchError>,
        S: PageSink<T> + ?Sized,
    {
        let mut cursor: Option<String> = None;
        let mut delivered = 0usize;
        let mut pages = 0usize;
        loop {
            let page = self.call(what, || fetch(cursor.as_deref()), &mut *sink)?;
            pages += 1;
            delivered += page.items.len();
            sink.page(page.items)?;
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!("{what}: {delivered} items over {pages} pages");
        Ok(delivered)
    }
}
