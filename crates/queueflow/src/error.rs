use thiserror::Error;

/// Rejections raised while turning a job description into a storable job.
/// Nothing is written to the store when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobInputError {
    #[error("invalid job JSON: {0}")]
    InvalidJson(String),

    #[error("job must include a non-empty \"command\"")]
    MissingCommand,

    #[error("invalid job id {0:?}: use 1-128 characters from [A-Za-z0-9._-], not starting with '.'")]
    InvalidId(String),

    #[error("{field} must be >= 0, got {value}")]
    Negative { field: &'static str, value: i64 },

    #[error("invalid run_at {0:?}: expected RFC 3339 or \"now\"")]
    InvalidRunAt(String),

    #[error("jobs enter 'processing' only by being claimed")]
    ProcessingNotAllowed,

    #[error("job {0:?} is being processed; resubmit it once it finishes")]
    InProgress(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} {value:?}")]
pub struct ParseStateError {
    pub kind: &'static str,
    pub value: String,
}
