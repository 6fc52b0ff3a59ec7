use thiserror::Error;

/// Failures raised by external service adapters.
///
/// Transient variants are retried per stage policy before the document is
/// marked failed; permanent variants fail the document immediately.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The service could not be reached or returned a server error
    #[error("{service} unavailable: {reason}")]
    ServiceUnavailable { service: String, reason: String },

    /// The service rejected the call due to rate limiting (HTTP 429)
    #[error("rate limited by {service}")]
    RateLimited { service: String },

    /// The requested resource does not exist (e.g., no open-access PDF)
    #[error("not found: {0}")]
    NotFound(String),

    /// The service response could not be interpreted
    #[error("parse failure: {0}")]
    Parse(String),

    /// Local filesystem failure while storing a stage artifact
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    pub fn unavailable(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn rate_limited(service: impl Into<String>) -> Self {
        Self::RateLimited {
            service: service.into(),
        }
    }

    /// Whether the failure is worth an immediate retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. } | Self::RateLimited { .. }
        )
    }

    /// Short tag recorded in the document's last_error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::Parse(_) => "parse_error",
            Self::Io(_) => "io",
        }
    }
}

/// Failures raised by the document store.
///
/// `Consistency` is never expected in normal operation; it indicates a
/// corrupted store file and aborts the run before any stage executes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input to a store call (e.g., empty document id)
    #[error("validation: {0}")]
    Validation(String),

    /// A store invariant does not hold (e.g., done status without artifact)
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// No document with the given id
    #[error("unknown document: {0}")]
    UnknownDocument(String),

    /// No stage slot with the given name on the document
    #[error("unknown stage '{stage}' for document {id}")]
    UnknownStage { id: String, stage: String },

    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization: {0}")]
    Serde(#[from] serde_json::Error),
}
