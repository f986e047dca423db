//! The background export worker and the persisted job record it drives.
//!
//! Flow of one run:
//! - pickup guard (terminal / still running / stalled and restartable)
//! - Initialising: user + credential checks, connect, probe
//! - Building: lists, then items per list through the hierarchy pass
//! - serialize, replace the stored chunks, Completed
//!
//! Every persisted write goes through `JobStore::save`, which refuses to overwrite
//! a record that changed underneath the worker. A refused save means the job was
//! superseded by a newer request; the worker stops without further writes.

use crate::api::{ApiConnector, CredentialProvider, TaskApi};
use crate::chunks::ChunkStore;
use crate::codec;
use crate::config::ExportOptions;
use crate::date::{elapsed_since, format_elapsed, format_summary_time, Clock, SystemClock};
use crate::error::JobFailure;
use crate::fetch::{FetchError, PageSink, PagedFetcher, RetryObserver};
use crate::hierarchy::{HierarchyBuilder, HierarchyStats};
use crate::model::{Item, JobRecord, JobStatus, TaskList, TaskLists};
use crate::notify::{LogNotifier, Notifier};
use crate::store::{RecordStore, StoreError};
use crate::util::init_tracing_once;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

pub const JOB_NAMESPACE: &str = "jobs";

const MSG_BAD_USER: &str = "Problem with user details. Please restart.";
const MSG_NO_CREDENTIALS: &str = "Problem with user credentials. Please restart.";
const MSG_INVALID_CREDENTIALS: &str = "Invalid credentials. Please restart and re-authenticate.";

/// True when `err` was caused by a refused versioned write.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    err.chain().any(|c| matches!(c.downcast_ref::<StoreError>(), Some(StoreError::Conflict { .. })))
}

/// One JSON record per user under `jobs/<user>`.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn RecordStore>,
}

impl JobStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    fn key(user: &str) -> String {
        format!("{JOB_NAMESPACE}/{}", urlencoding::encode(user))
    }

    pub fn load(&self, user: &str) -> Result<Option<JobRecord>> {
        let key = Self::key(user);
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        let job = serde_json::from_slice(&bytes).with_context(|| format!("parse job record {key}"))?;
        Ok(Some(job))
    }

    /// Write a new job, superseding whatever was stored for the user. The revision
    /// continues from the old record so its worker's next save is refused.
    pub fn create(&self, job: &mut JobRecord) -> Result<()> {
        let prev = self.load(&job.user).unwrap_or_else(|e| {
            warn!("replacing unreadable job record for {}: {e:#}", job.user);
            None
        });
        job.revision = prev.map(|p| p.revision + 1).unwrap_or(0);
        self.put(job)
    }

    /// Versioned write: refused with `StoreError::Conflict` when the stored record is
    /// not the revision (and job) this writer last saw.
    pub fn save(&self, job: &mut JobRecord) -> Result<()> {
        let key = Self::key(&job.user);
        let current = self.load(&job.user)?;
        match current {
            Some(cur) if cur.revision == job.revision && cur.job_id == job.job_id => {}
            Some(cur) => {
                return Err(StoreError::Conflict { key, expected: job.revision, found: cur.revision }.into());
            }
            None => return Err(StoreError::Conflict { key, expected: job.revision, found: 0 }.into()),
        }
        job.revision += 1;
        if let Err(e) = self.put(job) {
            job.revision -= 1;
            return Err(e);
        }
        Ok(())
    }

    fn put(&self, job: &JobRecord) -> Result<()> {
        let bytes = serde_json::to_vec(job).context("serialize job record")?;
        self.store.put(&Self::key(&job.user), &bytes)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No job record exists for the user.
    NoRecord,
    AlreadyFinished(JobStatus),
    /// Another worker updated the record recently.
    AlreadyRunning,
    /// Stalled, and restarted too many times already.
    GaveUp,
    Completed { restarted: bool, items: u64, lists: usize },
    Failed { restarted: bool, failure: JobFailure },
    /// A newer job replaced this one mid-run.
    Superseded,
}

/// Persists progress for the job being run. In-list counts are throttled to
/// `interval`; everything else is written immediately.
struct Progress<'a> {
    jobs: &'a JobStore,
    clock: &'a dyn Clock,
    job: &'a mut JobRecord,
    interval: Duration,
    last_write: OffsetDateTime,
}

impl<'a> Progress<'a> {
    fn new(jobs: &'a JobStore, clock: &'a dyn Clock, job: &'a mut JobRecord, interval: Duration) -> Self {
        let last_write = job.last_progress_at;
        Self { jobs, clock, job, interval, last_write }
    }

    fn save(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.job.last_progress_at = now;
        self.jobs.save(self.job)?;
        self.last_write = now;
        Ok(())
    }

    fn status(&mut self, status: JobStatus, message: &str) -> Result<()> {
        self.job.advance(status, self.clock.now())?;
        self.job.message = message.to_string();
        self.save()
    }

    fn message(&mut self, message: String) -> Result<()> {
        self.job.message = message;
        self.save()
    }

    fn list_progress(&mut self, fetched: u64) -> Result<()> {
        self.job.current_list_progress = fetched;
        if elapsed_since(self.clock.now(), self.last_write) >= self.interval {
            self.save()?;
        }
        Ok(())
    }

    fn commit_list(&mut self, fetched: u64) -> Result<()> {
        self.job.total_progress += fetched;
        self.job.current_list_progress = 0;
        self.job.list_count += 1;
        self.job.items_per_list.push(fetched);
        self.save()
    }
}

impl RetryObserver for Progress<'_> {
    fn retrying(&mut self, attempts_left: u32, err: &FetchError) -> Result<()> {
        debug!("heartbeat after failed call ({attempts_left} attempts left): {err}");
        self.save()
    }
}

/// Receives one list's pages: annotates depth, accumulates items, reports counts.
struct ItemSink<'p, 'a> {
    progress: &'p mut Progress<'a>,
    builder: &'p mut HierarchyBuilder,
    stats: HierarchyStats,
    items: Vec<Item>,
    fetched: u64,
}

impl RetryObserver for ItemSink<'_, '_> {
    fn retrying(&mut self, attempts_left: u32, err: &FetchError) -> Result<()> {
        self.progress.retrying(attempts_left, err)
    }
}

impl PageSink<Item> for ItemSink<'_, '_> {
    fn page(&mut self, mut items: Vec<Item>) -> Result<()> {
        self.fetched += items.len() as u64;
        self.builder.annotate_page(&mut items, &mut self.stats);
        self.items.append(&mut items);
        self.progress.list_progress(self.fetched)
    }
}

pub struct ExportJob {
    jobs: JobStore,
    chunks: ChunkStore,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn ApiConnector>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    options: ExportOptions,
}

impl ExportJob {
    pub fn new(
        store: Arc<dyn RecordStore>,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn ApiConnector>,
        options: ExportOptions,
    ) -> Self {
        let chunks = ChunkStore::new(store.clone(), options.max_chunk_bytes, options.max_payload_bytes);
        Self {
            jobs: JobStore::new(store),
            chunks,
            credentials,
            connector,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            options,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Pick up and run the user's job to completion or failure. `Err` is returned
    /// only when the outcome itself could not be recorded.
    pub fn run(&self, user: &str) -> Result<RunOutcome> {
        init_tracing_once();
        let Some(mut job) = self.jobs.load(user)? else {
            warn!("no export job found for {user}");
            return Ok(RunOutcome::NoRecord);
        };
        let now = self.clock.now();

        let restarted = match job.status {
            s if s.is_terminal() => {
                info!("job {} already finished with status {s:?}; nothing to do", job.job_id);
                return Ok(RunOutcome::AlreadyFinished(s));
            }
            JobStatus::Starting => false,
            s => {
                let idle = elapsed_since(now, job.last_progress_at);
                if idle < self.options.max_stall {
                    info!(
                        "job {} is {s:?} with progress {} seconds ago; assuming another worker is active",
                        job.job_id,
                        idle.as_secs()
                    );
                    return Ok(RunOutcome::AlreadyRunning);
                }
                if job.start_count >= self.options.max_job_starts {
                    error!("job {} stalled after {} starts; giving up", job.job_id, job.start_count);
                    let failure = JobFailure::System(format!(
                        "job was restarted too many times ({} starts); status was {s:?}, progress = {}",
                        job.start_count,
                        job.progress()
                    ));
                    job.fail(&failure.user_message(), now);
                    return match self.jobs.save(&mut job) {
                        Ok(()) => {
                            self.notify(&job);
                            Ok(RunOutcome::GaveUp)
                        }
                        Err(e) if is_conflict(&e) => Ok(RunOutcome::Superseded),
                        Err(e) => Err(e.context("recording abandoned job")),
                    };
                }
                warn!(
                    "job {} stalled in {s:?} ({} seconds since progress); restarting (start {})",
                    job.job_id,
                    idle.as_secs(),
                    job.start_count + 1
                );
                job.reset_for_restart(now);
                true
            }
        };

        match self.execute(&mut job) {
            Ok(()) => {
                self.notify(&job);
                Ok(RunOutcome::Completed { restarted, items: job.total_progress, lists: job.list_count as usize })
            }
            Err(e) if is_conflict(&e) => {
                warn!("job {} was superseded; stopping: {e:#}", job.job_id);
                Ok(RunOutcome::Superseded)
            }
            Err(e) => {
                let failure = JobFailure::classify(&e);
                error!(user = %job.user, job = %job.job_id, "export failed: {e:#}");
                job.fail(&failure.user_message(), self.clock.now());
                match self.jobs.save(&mut job) {
                    Ok(()) => {
                        self.notify(&job);
                        Ok(RunOutcome::Failed { restarted, failure })
                    }
                    Err(e) if is_conflict(&e) => Ok(RunOutcome::Superseded),
                    Err(e) => Err(e.context("recording job failure")),
                }
            }
        }
    }

    /// Summary line plus a best-effort notice for a job that has just been stored
    /// in a terminal state. A failing notifier is only logged.
    fn notify(&self, job: &JobRecord) {
        let sent = if job.status == JobStatus::Completed {
            info!(user = %job.user, job = %job.job_id, "{}", job.message);
            self.notifier.job_completed(job)
        } else {
            error!(
                user = %job.user,
                job = %job.job_id,
                "job ended in error: {}",
                job.error_message.as_deref().unwrap_or_default()
            );
            self.notifier.job_failed(job)
        };
        if let Err(e) = sent {
            warn!("{:?} notice for {} failed: {e:#}", job.status, job.user);
        }
    }

    fn execute(&self, job: &mut JobRecord) -> Result<()> {
        let started = self.clock.now();
        job.begin(started)?;
        let filters = job.filters;
        let user = job.user.clone();
        let mut progress = Progress::new(&self.jobs, self.clock.as_ref(), job, self.options.progress_interval);
        progress.save()?;

        if user.trim().is_empty() {
            return Err(JobFailure::Precondition(MSG_BAD_USER.to_string()).into());
        }
        let creds = match self.credentials.credentials(&user) {
            Ok(Some(c)) => c,
            Ok(None) => return Err(JobFailure::Precondition(MSG_NO_CREDENTIALS.to_string()).into()),
            Err(e) => {
                warn!("credential lookup for {user} failed: {e:#}");
                return Err(JobFailure::Precondition(MSG_NO_CREDENTIALS.to_string()).into());
            }
        };
        if creds.invalid {
            return Err(JobFailure::Precondition(MSG_INVALID_CREDENTIALS.to_string()).into());
        }

        progress.message("Connecting to server ...".to_string())?;
        let api: Box<dyn TaskApi> = self.connector.connect(&creds).context("connecting to task server")?;
        let fetcher = PagedFetcher::new(self.options.retry_policy());
        fetcher
            .call("connection probe", || api.list_lists(None), &mut progress)
            .context("testing connection to task server")?;

        progress.status(JobStatus::Building, "Retrieving tasks from server ...")?;
        let infos = fetcher
            .fetch_all("task lists", |cursor| api.list_lists(cursor), &mut progress)
            .context("retrieving task lists")?;
        info!("{user}: {} task lists to retrieve", infos.len());

        let mut builder = HierarchyBuilder::new(self.options.orphan_policy);
        let mut totals = HierarchyStats::default();
        let mut lists = Vec::with_capacity(infos.len());
        for (n, info) in infos.iter().enumerate() {
            progress.job.message = format!("Retrieving list {} of {}: {}", n + 1, infos.len(), info.title);
            builder.reset();
            let mut sink = ItemSink {
                progress: &mut progress,
                builder: &mut builder,
                stats: HierarchyStats::default(),
                items: Vec::new(),
                fetched: 0,
            };
            let what = format!("tasks in list {:?}", info.title);
            fetcher
                .for_each_page(&what, |cursor| api.list_items(&info.id, cursor, &filters), &mut sink)
                .with_context(|| format!("retrieving {what}"))?;
            let ItemSink { stats, items, fetched, .. } = sink;
            progress.commit_list(fetched)?;

            debug!(
                "list {:?}: {fetched} fetched, {} kept, depths {:?}",
                info.title,
                items.len(),
                stats.depth_histogram()
            );
            if stats.orphaned_inactive + stats.invalid_visible + stats.removed > 0 {
                info!(
                    "list {:?}: {} inactive orphans, {} invalid visible, {} removed",
                    info.title, stats.orphaned_inactive, stats.invalid_visible, stats.removed
                );
            }
            totals.merge(&stats);
            lists.push(TaskList { id: info.id.clone(), title: info.title.clone(), items });
        }

        let result = TaskLists { user: user.clone(), captured_at: started, lists };
        let payload = codec::encode(&result, self.options.compress)?;
        progress.message(format!("Storing {} tasks ...", result.item_count()))?;
        let chunk_count = self.chunks.write(&user, &payload).context("storing export result")?;

        let summary = format!(
            "Retrieved {} items from {} lists at {}",
            progress.job.total_progress,
            progress.job.list_count,
            format_summary_time(started)
        );
        progress.job.complete(summary, self.clock.now())?;
        progress.save()?;
        info!(
            "{user}: stored {} bytes in {chunk_count} chunks; {} invalid, {} removed; took {}",
            payload.len(),
            totals.invalid_visible,
            totals.removed,
            format_elapsed(elapsed_since(self.clock.now(), started))
        );
        Ok(())
    }
}
