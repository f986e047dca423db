use crate::chunks::ChunkError;
use crate::fetch::FetchError;
use crate::store::StoreError;
use thiserror::Error;

/// Why a job ended in `Error`. The display text is what lands in `errorMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    /// Missing user, missing or invalid credentials. Never retried.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The remote API kept failing after the per-page retry budget.
    #[error("Server error: {0}")]
    Transient(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The serialized result does not fit the storage footprint.
    #[error("Too much data: {0}")]
    Capacity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("System error: {0}")]
    System(String),
}

impl JobFailure {
    pub fn category(&self) -> &'static str {
        match self {
            JobFailure::Precondition(_) => "Precondition failed",
            JobFailure::Transient(_) => "Server error",
            JobFailure::QuotaExceeded(_) => "Quota exceeded",
            JobFailure::Capacity(_) => "Too much data",
            JobFailure::Storage(_) => "Storage error",
            JobFailure::System(_) => "System error",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            JobFailure::Precondition(d)
            | JobFailure::Transient(d)
            | JobFailure::QuotaExceeded(d)
            | JobFailure::Capacity(d)
            | JobFailure::Storage(d)
            | JobFailure::System(d) => d,
        }
    }

    /// `"<category>: <detail>"`, as stored in the job record.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Map an error from anywhere in the run onto the failure taxonomy, using the
    /// first typed cause found in the chain.
    pub fn classify(err: &anyhow::Error) -> JobFailure {
        for cause in err.chain() {
            if let Some(f) = cause.downcast_ref::<JobFailure>() {
                return f.clone();
            }
            if let Some(f) = cause.downcast_ref::<FetchError>() {
                return match f {
                    FetchError::QuotaExceeded(_) => JobFailure::QuotaExceeded(f.to_string()),
                    FetchError::Transient(_) | FetchError::Exhausted { .. } => JobFailure::Transient(f.to_string()),
                    FetchError::Fatal(_) => JobFailure::System(f.to_string()),
                };
            }
            if let Some(c) = cause.downcast_ref::<ChunkError>() {
                return match c {
                    ChunkError::PayloadTooLarge { .. } => JobFailure::Capacity(c.to_string()),
                    _ => JobFailure::Storage(c.to_string()),
                };
            }
            if let Some(s) = cause.downcast_ref::<StoreError>() {
                return match s {
                    StoreError::RecordTooLarge { .. } => JobFailure::Capacity(s.to_string()),
                    _ => JobFailure::Storage(s.to_string()),
                };
            }
        }
        JobFailure::System(format!("{err:#}"))
    }
}
