//! Task data and the persisted job record shared by the worker and the read path.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Depth given to a deleted/hidden item whose parent is not on the current path.
pub const DEPTH_ORPHAN_INACTIVE: i32 = -1;
/// Depth given to a visible item whose parent could not be found.
pub const DEPTH_INVALID: i32 = -99;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    #[serde(rename = "needsAction", alias = "incomplete")]
    Incomplete,
    #[serde(rename = "completed", alias = "complete")]
    Complete,
}

/// A single task as returned by the remote API, plus the annotations added by
/// the hierarchy pass (`depth`, `parent_is_active`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default, rename = "parent", alias = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub due: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub updated: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub completed: Option<OffsetDateTime>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub depth: i32,
    #[serde(default)]
    pub parent_is_active: bool,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: ItemStatus::Incomplete,
            parent_id: None,
            due: None,
            updated: None,
            completed: None,
            deleted: false,
            hidden: false,
            notes: None,
            depth: 0,
            parent_is_active: false,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
    pub fn completed_at(mut self, at: OffsetDateTime) -> Self {
        self.status = ItemStatus::Complete;
        self.completed = Some(at);
        self
    }

    /// Neither deleted nor hidden.
    #[inline]
    pub fn is_active(&self) -> bool {
        !(self.deleted || self.hidden)
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.depth == DEPTH_INVALID
    }
}

/// Metadata for one list, as enumerated by the first level of pages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// The structure that gets serialized, chunked and stored for a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskLists {
    pub user: String,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub lists: Vec<TaskList>,
}

impl TaskLists {
    pub fn item_count(&self) -> usize {
        self.lists.iter().map(|l| l.items.len()).sum()
    }
}

/// Which remote items are requested. Fixed when the job is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilters {
    #[serde(default)]
    pub include_completed: bool,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub include_hidden: bool,
}

impl ItemFilters {
    pub fn all() -> Self {
        Self { include_completed: true, include_deleted: true, include_hidden: true }
    }

    /// Whether an item passes these filters (used by in-process API backends).
    pub fn admits(&self, item: &Item) -> bool {
        (self.include_completed || item.status != ItemStatus::Complete)
            && (self.include_deleted || !item.deleted)
            && (self.include_hidden || !item.hidden)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Starting,
    Initialising,
    Building,
    Completed,
    Error,
}

impl JobStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Starting => 0,
            JobStatus::Initialising => 1,
            JobStatus::Building => 2,
            JobStatus::Completed | JobStatus::Error => 3,
        }
    }

    /// Forward-only, with Error reachable from every non-terminal state.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Error => true,
            JobStatus::Completed => self == JobStatus::Building,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Starting => "Starting",
            JobStatus::Initialising => "Initialising",
            JobStatus::Building => "Building",
            JobStatus::Completed => "Export completed",
            JobStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(user: &str, created_at: OffsetDateTime) -> Self {
        JobId(format!("{user}:{}", created_at.unix_timestamp_nanos()))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One export job per user. Written only by the worker executing it; read by
/// any number of pollers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub user: String,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_progress_at: OffsetDateTime,
    pub total_progress: u64,
    pub current_list_progress: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub filters: ItemFilters,
    pub start_count: u32,
    #[serde(default)]
    pub list_count: u64,
    #[serde(default)]
    pub items_per_list: Vec<u64>,
    /// Bumped on every persisted write; see `JobStore::save`.
    #[serde(default)]
    pub revision: u64,
}

impl JobRecord {
    pub fn new(user: &str, filters: ItemFilters, now: OffsetDateTime) -> Self {
        Self {
            job_id: JobId::new(user, now),
            user: user.to_string(),
            status: JobStatus::Starting,
            created_at: now,
            started_at: None,
            last_progress_at: now,
            total_progress: 0,
            current_list_progress: 0,
            message: String::new(),
            error_message: None,
            filters,
            start_count: 0,
            list_count: 0,
            items_per_list: Vec::new(),
            revision: 0,
        }
    }

    /// Progress shown to the user: committed lists plus the list in flight.
    #[inline]
    pub fn progress(&self) -> u64 {
        self.total_progress + self.current_list_progress
    }

    pub fn advance(&mut self, next: JobStatus, now: OffsetDateTime) -> Result<()> {
        if !self.status.can_advance_to(next) {
            bail!("illegal job transition {:?} -> {:?}", self.status, next);
        }
        self.status = next;
        self.last_progress_at = now;
        Ok(())
    }

    /// Worker pickup: Starting -> Initialising.
    pub fn begin(&mut self, now: OffsetDateTime) -> Result<()> {
        self.advance(JobStatus::Initialising, now)?;
        self.start_count += 1;
        self.started_at = Some(now);
        self.message = "Validating background job ...".to_string();
        Ok(())
    }

    /// Puts a stalled, non-terminal job back to Starting so a new run can pick it up.
    /// Progress counters belong to a single run and are cleared.
    pub fn reset_for_restart(&mut self, now: OffsetDateTime) {
        self.status = JobStatus::Starting;
        self.total_progress = 0;
        self.current_list_progress = 0;
        self.list_count = 0;
        self.items_per_list.clear();
        self.message.clear();
        self.last_progress_at = now;
    }

    /// Moves to Error, clears `message`, and appends to any existing error text.
    pub fn fail(&mut self, error: &str, now: OffsetDateTime) {
        self.status = JobStatus::Error;
        self.message.clear();
        self.error_message = Some(match self.error_message.take() {
            Some(prev) if !prev.is_empty() => format!("{prev}; {error}"),
            _ => error.to_string(),
        });
        self.last_progress_at = now;
    }

    pub fn complete(&mut self, summary: String, now: OffsetDateTime) -> Result<()> {
        self.advance(JobStatus::Completed, now)?;
        self.current_list_progress = 0;
        self.message = summary;
        Ok(())
    }
}
