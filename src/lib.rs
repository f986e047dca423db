mod api;
mod chunks;
mod codec;
mod config;
mod date;
mod error;
mod fetch;
mod formats;
mod google;
mod hierarchy;
mod job;
mod model;
mod monitor;
mod notify;
mod progress;
mod service;
mod store;
mod util;

pub use crate::config::ExportOptions;
pub use crate::service::BackupService;

pub use crate::model::{
    Item, ItemFilters, ItemStatus, JobId, JobRecord, JobStatus, ListInfo, TaskList, TaskLists, DEPTH_INVALID,
    DEPTH_ORPHAN_INACTIVE,
};

// pipeline pieces
pub use crate::fetch::{FetchError, Page, PageSink, PagedFetcher, RetryObserver, RetryPolicy};
pub use crate::hierarchy::{HierarchyBuilder, HierarchyStats, OrphanPolicy};
pub use crate::chunks::{chunk_count, ChunkError, ChunkStore};
pub use crate::job::{is_conflict, ExportJob, JobStore, RunOutcome};
pub use crate::monitor::{DisplayStatus, ProgressMonitor, ProgressView};
pub use crate::error::JobFailure;

// seams
pub use crate::api::{
    paginate, ApiConnector, CredentialProvider, Credentials, EnvTokenCredentials, FixtureApi, FixtureConnector,
    StaticCredentials, TaskApi,
};
pub use crate::google::{GoogleConnector, GoogleTasksApi};
pub use crate::notify::{LogNotifier, Notifier};
pub use crate::store::{FileStore, MemoryStore, RecordStore, StoreError, DEFAULT_MAX_RECORD_BYTES};
pub use crate::date::{Clock, SystemClock};

// read path
pub use crate::codec::{decode as decode_result, encode as encode_result};
pub use crate::formats::{render, ExportFormat, RenderOptions};

pub use crate::progress::JobSpinner;
pub use crate::util::init_tracing_once;
