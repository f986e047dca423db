#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskvault::{
    ApiConnector, BackupService, Clock, Credentials, ExportJob, ExportOptions, FetchError, FixtureApi, Item,
    ItemFilters, JobRecord, ListInfo, MemoryStore, Notifier, Page, RecordStore, StaticCredentials, StoreError,
    TaskApi, TaskList,
};
use time::macros::datetime;
use time::OffsetDateTime;

pub const USER: &str = "alice@example.com";

/// Saturday 28 Jan 2012, 07:30 UTC.
pub const T0: OffsetDateTime = datetime!(2012-01-28 07:30:00 UTC);

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn at(t: OffsetDateTime) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(t) })
    }
    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock();
        *now += d;
    }
    pub fn set(&self, t: OffsetDateTime) {
        *self.now.lock() = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

/// `FixtureApi` plus a script of per-call failures. Each call pops one entry;
/// `Some(err)` fails that call, `None` (or an empty script) passes through.
#[derive(Clone)]
pub struct ScriptedApi {
    inner: FixtureApi,
    script: Arc<Mutex<VecDeque<Option<FetchError>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedApi {
    pub fn new(inner: FixtureApi) -> Self {
        Self { inner, script: Arc::new(Mutex::new(VecDeque::new())), calls: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn then_fail(self, err: FetchError) -> Self {
        self.script.lock().push_back(Some(err));
        self
    }

    pub fn then_pass(self) -> Self {
        self.script.lock().push_back(None);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }
}

impl TaskApi for ScriptedApi {
    fn list_lists(&self, cursor: Option<&str>) -> Result<Page<ListInfo>, FetchError> {
        self.next()?;
        self.inner.list_lists(cursor)
    }

    fn list_items(&self, list_id: &str, cursor: Option<&str>, filters: &ItemFilters) -> Result<Page<Item>, FetchError> {
        self.next()?;
        self.inner.list_items(list_id, cursor, filters)
    }
}

impl ApiConnector for ScriptedApi {
    fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn TaskApi>, FetchError> {
        Ok(Box::new(self.clone()))
    }
}

/// Memory store that keeps a copy of every job record written.
#[derive(Default)]
pub struct ObservingStore {
    inner: MemoryStore,
    job_writes: Mutex<Vec<JobRecord>>,
}

impl ObservingStore {
    pub fn job_writes(&self) -> Vec<JobRecord> {
        self.job_writes.lock().clone()
    }
}

impl RecordStore for ObservingStore {
    fn max_record_bytes(&self) -> usize {
        self.inner.max_record_bytes()
    }
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(key, value)?;
        if key.starts_with("jobs/") {
            if let Ok(job) = serde_json::from_slice::<JobRecord>(value) {
                self.job_writes.lock().push(job);
            }
        }
        Ok(())
    }
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }
    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys_with_prefix(prefix)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn job_completed(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.seen.lock().push(format!("{}: {}", job.user, job.message));
        Ok(())
    }

    fn job_failed(&self, job: &JobRecord) -> anyhow::Result<()> {
        let err = job.error_message.clone().unwrap_or_default();
        self.seen.lock().push(format!("{}: failed: {err}", job.user));
        Ok(())
    }
}

/// Every delivery fails; counts the attempts.
#[derive(Default)]
pub struct FailingNotifier {
    pub attempts: AtomicUsize,
}

impl Notifier for FailingNotifier {
    fn job_completed(&self, _job: &JobRecord) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("mail relay refused the message")
    }

    fn job_failed(&self, _job: &JobRecord) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("mail relay refused the message")
    }
}

pub fn creds_for(user: &str) -> StaticCredentials {
    StaticCredentials::new().with_user(user, Credentials::bearer("token"))
}

pub fn root(id: &str) -> Item {
    Item::new(id, format!("task {id}"))
}

pub fn child(id: &str, parent: &str) -> Item {
    Item::new(id, format!("task {id}")).with_parent(parent)
}

pub fn list(id: &str, title: &str, items: Vec<Item>) -> TaskList {
    TaskList { id: id.to_string(), title: title.to_string(), items }
}

/// Options for fast, deterministic runs: no retry pause, every in-list count persisted.
pub fn test_options() -> ExportOptions {
    ExportOptions::default().with_retry_delay(Duration::ZERO).with_progress_interval(Duration::ZERO)
}

pub struct Harness {
    pub service: BackupService,
    pub worker: ExportJob,
    pub store: Arc<ObservingStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(api: &ScriptedApi, credentials: StaticCredentials, options: ExportOptions) -> Harness {
    let store = Arc::new(ObservingStore::default());
    let clock = ManualClock::at(T0);
    let notifier = Arc::new(RecordingNotifier::default());
    let service = BackupService::new(store.clone(), options).with_clock(clock.clone());
    let worker = service.worker(Arc::new(credentials), Arc::new(api.clone())).with_notifier(notifier.clone());
    Harness { service, worker, store, clock, notifier }
}
