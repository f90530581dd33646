/// Shared error type covering every failure mode a supervisor can surface.
///
/// The five kinds here are the full error taxonomy: callers map `NotFound`,
/// `Validation`, and `Conflict` to their matching HTTP status directly;
/// `ExternalFailure` and `Fatal` both surface as 5xx but are kept distinct
/// because only `Fatal` (a store I/O failure) taints the current operation
/// without touching in-memory state.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external failure: {0}")]
    ExternalFailure(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalFailure(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// A short machine-readable tag for each kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Conflict(_) => "conflict",
            Error::ExternalFailure(_) => "external_failure",
            Error::Fatal(_) => "fatal",
            Error::Io(_) => "fatal",
            Error::Json(_) => "fatal",
            Error::Provider { .. } => "external_failure",
        }
    }
}
