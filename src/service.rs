//! Request-side facade: create jobs, poll them, read the stored result.

use crate::api::{ApiConnector, CredentialProvider};
use crate::chunks::ChunkStore;
use crate::codec;
use crate::config::ExportOptions;
use crate::date::{Clock, SystemClock};
use crate::formats::{render, ExportFormat, RenderOptions};
use crate::job::{ExportJob, JobStore};
use crate::model::{ItemFilters, JobId, JobRecord, TaskLists};
use crate::monitor::{ProgressMonitor, ProgressView};
use crate::store::{FileStore, MemoryStore, RecordStore, DEFAULT_MAX_RECORD_BYTES};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub struct BackupService {
    store: Arc<dyn RecordStore>,
    jobs: JobStore,
    chunks: ChunkStore,
    monitor: ProgressMonitor,
    clock: Arc<dyn Clock>,
    options: ExportOptions,
}

impl BackupService {
    pub fn new(store: Arc<dyn RecordStore>, options: ExportOptions) -> Self {
        let chunks = ChunkStore::new(store.clone(), options.max_chunk_bytes, options.max_payload_bytes);
        Self {
            jobs: JobStore::new(store.clone()),
            chunks,
            monitor: ProgressMonitor::from_options(&options),
            clock: Arc::new(SystemClock),
            store,
            options,
        }
    }

    /// `FileStore` under `options.store_dir`, or an in-memory store when unset. The
    /// record limit is the default cap, raised to fit `max_chunk_bytes`.
    pub fn open(options: ExportOptions) -> Result<Self> {
        let record_limit = options.max_chunk_bytes.max(DEFAULT_MAX_RECORD_BYTES);
        let store: Arc<dyn RecordStore> = match &options.store_dir {
            Some(dir) => Arc::new(
                FileStore::open(dir, record_limit)
                    .with_context(|| format!("open record store at {}", dir.display()))?,
            ),
            None => Arc::new(MemoryStore::new(record_limit)),
        };
        Ok(Self::new(store, options))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    /// Chunk size actually used for stored results.
    pub fn chunk_bytes(&self) -> usize {
        self.chunks.max_chunk_bytes()
    }

    /// Create (or supersede) the user's job in `Starting`.
    pub fn start_job(&self, user: &str, filters: ItemFilters) -> Result<JobId> {
        let mut job = JobRecord::new(user, filters, self.clock.now());
        self.jobs.create(&mut job).with_context(|| format!("creating export job for {user}"))?;
        info!("created export job {} for {user} ({filters:?})", job.job_id);
        Ok(job.job_id)
    }

    pub fn job(&self, user: &str) -> Result<Option<JobRecord>> {
        self.jobs.load(user)
    }

    /// `None` when the user has no job.
    pub fn get_progress(&self, user: &str) -> Result<Option<ProgressView>> {
        Ok(self.jobs.load(user)?.map(|job| self.monitor.evaluate(&job, self.clock.now())))
    }

    pub fn get_result(&self, user: &str) -> Result<TaskLists> {
        let payload = self.chunks.read(user).with_context(|| format!("reading stored result for {user}"))?;
        codec::decode(&payload)
    }

    pub fn export(&self, user: &str, format: ExportFormat, opts: RenderOptions) -> Result<String> {
        let lists = self.get_result(user)?;
        render(&lists, format, opts)
    }

    /// A worker sharing this service's store, clock and options.
    pub fn worker(&self, credentials: Arc<dyn CredentialProvider>, connector: Arc<dyn ApiConnector>) -> ExportJob {
        ExportJob::new(self.store.clone(), credentials, connector, self.options.clone()).with_clock(self.clock.clone())
    }
}
