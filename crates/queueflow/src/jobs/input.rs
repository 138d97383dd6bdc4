use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::JobInputError;
use crate::jobs::model::{JobState, NewJob};

const MAX_ID_LEN: usize = 128;

/// A job description as submitted by a client, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobInput {
    pub id: Option<String>,
    pub command: Option<String>,
    pub max_retries: Option<i64>,
    pub priority: Option<i64>,
    pub timeout_seconds: Option<i64>,
    pub run_at: Option<String>,
}

/// Values used when neither the payload nor an override sets a field.
#[derive(Debug, Clone)]
pub struct SubmitDefaults {
    pub max_retries: i32,
    pub priority: i32,
    pub timeout_seconds: i64,
}

impl Default for SubmitDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            priority: 100,
            timeout_seconds: 0,
        }
    }
}

impl JobInput {
    pub fn from_json(raw: &str) -> Result<Self, JobInputError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| JobInputError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, JobInputError> {
        if !value.is_object() {
            return Err(JobInputError::InvalidJson(
                "expected a JSON object like {\"command\":\"echo hi\"}".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| JobInputError::InvalidJson(e.to_string()))
    }

    /// Fields set here win over fields already in `self`.
    pub fn merge(mut self, overrides: JobInput) -> Self {
        self.id = overrides.id.or(self.id);
        self.command = overrides.command.or(self.command);
        self.max_retries = overrides.max_retries.or(self.max_retries);
        self.priority = overrides.priority.or(self.priority);
        self.timeout_seconds = overrides.timeout_seconds.or(self.timeout_seconds);
        self.run_at = overrides.run_at.or(self.run_at);
        self
    }

    /// Validate and build a fresh `pending` job. Submitting an id that
    /// already exists re-queues it from scratch.
    pub fn into_new_job(self, defaults: &SubmitDefaults) -> Result<NewJob, JobInputError> {
        let command = self
            .command
            .filter(|c| !c.trim().is_empty())
            .ok_or(JobInputError::MissingCommand)?;

        let mut job = NewJob::new(command);

        if let Some(id) = self.id {
            validate_id(&id)?;
            job.id = id;
        }

        job.max_retries = non_negative_i32("max_retries", self.max_retries, defaults.max_retries)?;
        job.priority = self
            .priority
            .map(|p| p.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
            .unwrap_or(defaults.priority);
        job.timeout_seconds = match self.timeout_seconds {
            Some(t) if t < 0 => {
                return Err(JobInputError::Negative {
                    field: "timeout_seconds",
                    value: t,
                })
            }
            Some(t) => t,
            None => defaults.timeout_seconds,
        };

        if let Some(raw) = self.run_at {
            job.run_at = parse_run_at(&raw)?;
        }

        Ok(job)
    }
}

fn non_negative_i32(
    field: &'static str,
    value: Option<i64>,
    default: i32,
) -> Result<i32, JobInputError> {
    match value {
        None => Ok(default),
        Some(v) if v < 0 => Err(JobInputError::Negative { field, value: v }),
        Some(v) => Ok(i32::try_from(v).unwrap_or(i32::MAX)),
    }
}

/// `now` (any case) or an RFC 3339 timestamp.
pub fn parse_run_at(raw: &str) -> Result<DateTime<Utc>, JobInputError> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| JobInputError::InvalidRunAt(raw.to_string()))
}

/// Ids double as log file names, so keep them to a path-safe alphabet.
pub fn validate_id(id: &str) -> Result<(), JobInputError> {
    let ok = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(JobInputError::InvalidId(id.to_string()))
    }
}

/// Checks every `NewJob` passes before it reaches the store.
pub fn validate_new_job(job: &NewJob) -> Result<(), JobInputError> {
    if job.command.trim().is_empty() {
        return Err(JobInputError::MissingCommand);
    }
    validate_id(&job.id)?;
    if job.state == JobState::Processing {
        return Err(JobInputError::ProcessingNotAllowed);
    }
    for (field, value) in [
        ("attempts", job.attempts as i64),
        ("max_retries", job.max_retries as i64),
        ("timeout_seconds", job.timeout_seconds),
    ] {
        if value < 0 {
            return Err(JobInputError::Negative { field, value });
        }
    }
    Ok(())
}
