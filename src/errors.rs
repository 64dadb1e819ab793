use thiserror::Error;

use crate::wire::Stage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenError {
    #[error("validation failed: {0}")] Validation(String),
    #[error("prompt limit reached: {remaining} remaining, {required} required. Upgrade to Pro to continue")]
    QuotaExceeded { remaining: i64, required: i64 },
    #[error("permission denied: {0}")] Permission(String),
    #[error("cannot generate {stage}: missing {}", missing.join(", "))]
    MissingPrerequisite { stage: Stage, missing: Vec<&'static str> },
    #[error("{} generation returned empty content", stage.display_name())]
    EmptyContent { stage: Stage },
    #[error("request timed out after {secs}s. The server may be busy, try again")]
    Timeout { secs: u64 },
    #[error("backend error: {0}")] Transient(String),
    #[error("generation cancelled")] Cancelled,
}

const NON_RETRYABLE_MARKERS: &[&str] = &["limit reached", "validation", "permission", "cannot generate"];

impl GenError {
    /// Classify an error message coming back from the backend.
    ///
    /// The hosted backend only reports plain text, so this is the single
    /// place where message text turns into a typed error.
    pub fn from_remote_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("limit reached") {
            return GenError::QuotaExceeded { remaining: 0, required: 1 };
        }
        if lower.contains("permission") || lower.contains("unauthorized") {
            return GenError::Permission(message.to_string());
        }
        if NON_RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
            return GenError::Validation(message.to_string());
        }
        GenError::Transient(message.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GenError::Timeout { .. } | GenError::Transient(_))
    }
}

impl From<reqwest::Error> for GenError {
    fn from(e: reqwest::Error) -> Self {
        // the client's own limit is not on the error, so no duration here
        if e.is_timeout() {
            let url = e.url().map(|u| u.as_str().to_string()).unwrap_or_default();
            GenError::Transient(format!("request timed out {url}").trim_end().to_string())
        } else {
            GenError::Transient(e.to_string())
        }
    }
}
