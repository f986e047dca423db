use crate::model::JobRecord;
use anyhow::Result;
use tracing::{info, warn};

/// Told once when a job reaches a terminal state. Failures are logged by the
/// caller and never affect the job.
pub trait Notifier: Send + Sync {
    fn job_completed(&self, job: &JobRecord) -> Result<()>;
    /// `job.error_message` carries the category and detail.
    fn job_failed(&self, job: &JobRecord) -> Result<()>;
}

/// Writes the outcome to the log instead of delivering it anywhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn job_completed(&self, job: &JobRecord) -> Result<()> {
        info!(user = %job.user, job = %job.job_id, "export ready: {}", job.message);
        Ok(())
    }

    fn job_failed(&self, job: &JobRecord) -> Result<()> {
        warn!(
            user = %job.user,
            job = %job.job_id,
            "export failed: {}",
            job.error_message.as_deref().unwrap_or_default()
        );
        Ok(())
    }
}
