// src/error.rs
//! Error taxonomy for the ingestion pipeline.
//!
//! Item-scoped errors (`Fetch`, `Parse`, `Validation`, `UpstreamApi`,
//! `Persistence`) are caught at the item boundary and never escape a batch.
//! `SignatureMismatch` and `Configuration` abort the whole request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Network failure or timeout while fetching a source page or image.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Malformed markup, XML, or JSON.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Required canonical fields missing after extraction. The field
    /// cannot be called `source`; thiserror reserves that name for the
    /// error cause.
    #[error("record for {record_source} is missing required fields: {missing}")]
    Validation {
        record_source: String,
        missing: String,
    },

    /// Inbound webhook payload failed HMAC verification. Non-retryable.
    #[error("webhook signature mismatch")]
    SignatureMismatch,

    /// Video metadata API failure; the item is skipped.
    #[error("upstream video API error: {0}")]
    UpstreamApi(String),

    /// Insert/update failure at the persistence collaborator.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Missing required secret or key. No safe partial behavior exists,
    /// so this fails the whole operation.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IngestError {
    pub fn fetch(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: err.to_string(),
        }
    }

    /// Whether this error may escape the per-item boundary and abort the
    /// surrounding request.
    pub fn aborts_operation(&self) -> bool {
        matches!(self, Self::SignatureMismatch | Self::Configuration(_))
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_scoped_errors_do_not_abort() {
        assert!(!IngestError::Parse("bad xml".into()).aborts_operation());
        assert!(!IngestError::fetch("https://x", "timeout").aborts_operation());
        assert!(!IngestError::Persistence("dup key".into()).aborts_operation());
    }

    #[test]
    fn validation_error_names_the_record_source() {
        let e = IngestError::Validation {
            record_source: "https://x.example/post".into(),
            missing: "title, byline".into(),
        };
        assert!(e.to_string().contains("https://x.example/post"));
        assert!(e.to_string().contains("title, byline"));
        assert!(!e.aborts_operation());
    }

    #[test]
    fn fatal_errors_abort() {
        assert!(IngestError::SignatureMismatch.aborts_operation());
        assert!(IngestError::Configuration("no secret".into()).aborts_operation());
    }
}
