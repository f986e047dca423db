//! Read-side view of a job record: display progress plus stall and timeout flags.
//! Evaluation is a pure function of the record and `now`; nothing is written.

use crate::config::ExportOptions;
use crate::date::elapsed_since;
use crate::model::{JobRecord, JobStatus};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayStatus {
    /// Stored status, passed through.
    Job(JobStatus),
    /// Running, but no progress for longer than `max_stall`.
    Stalled,
    /// Running for longer than `max_job_duration`.
    ExceededMaxTime,
    /// Never picked up within `max_start_delay`.
    NotStarted,
}

impl DisplayStatus {
    /// Terminal or flagged: a poller can stop.
    pub fn is_final(self) -> bool {
        match self {
            DisplayStatus::Job(s) => s.is_terminal(),
            _ => true,
        }
    }
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::Job(s) => write!(f, "{s}"),
            DisplayStatus::Stalled => f.write_str("Stalled"),
            DisplayStatus::ExceededMaxTime => f.write_str("Exceeded maximum run time"),
            DisplayStatus::NotStarted => f.write_str("Not started"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressView {
    pub status: DisplayStatus,
    pub job_status: JobStatus,
    /// `totalProgress + currentListProgress`
    pub progress: u64,
    pub message: String,
    pub error_message: Option<String>,
    /// For flagged views: "Status was <status>, progress = <n>"
    pub detail: Option<String>,
    pub elapsed_since_start: Option<Duration>,
    pub elapsed_since_progress: Option<Duration>,
    pub start_count: u32,
    pub list_count: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct ProgressMonitor {
    pub max_stall: Duration,
    pub max_job_duration: Duration,
    pub max_start_delay: Duration,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::from_options(&ExportOptions::default())
    }
}

impl ProgressMonitor {
    pub fn from_options(opts: &ExportOptions) -> Self {
        Self {
            max_stall: opts.max_stall,
            max_job_duration: opts.max_job_duration,
            max_start_delay: opts.max_start_delay,
        }
    }

    pub fn evaluate(&self, job: &JobRecord, now: OffsetDateTime) -> ProgressView {
        let mut view = ProgressView {
            status: DisplayStatus::Job(job.status),
            job_status: job.status,
            progress: job.progress(),
            message: job.message.clone(),
            error_message: job.error_message.clone(),
            detail: None,
            elapsed_since_start: None,
            elapsed_since_progress: None,
            start_count: job.start_count,
            list_count: job.list_count,
        };
        if job.status.is_terminal() {
            return view;
        }

        let since_start = job.started_at.map(|t| elapsed_since(now, t));
        let since_progress = elapsed_since(now, job.last_progress_at);
        view.elapsed_since_start = since_start;
        view.elapsed_since_progress = Some(since_progress);

        let flagged = if since_start.is_some_and(|d| d > self.max_job_duration) {
            Some(DisplayStatus::ExceededMaxTime)
        } else if since_progress > self.max_stall {
            Some(DisplayStatus::Stalled)
        } else if job.status == JobStatus::Starting && elapsed_since(now, job.created_at) > self.max_start_delay {
            Some(DisplayStatus::NotStarted)
        } else {
            None
        };
        if let Some(status) = flagged {
            tracing::warn!(
                "job {} flagged {status:?}: {} seconds since progress",
                job.job_id,
                since_progress.as_secs()
            );
            view.status = status;
            view.detail = Some(format!("Status was {}, progress = {}", job.status, job.progress()));
        }
        view
    }
}
