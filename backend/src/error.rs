use thiserror::Error;

/// Error taxonomy: kinds, not transport-level status codes.
/// RPC/HTTP layers map these onto their own status vocabularies at the edge.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid request at {field}: {reason}")]
    InvalidRequest { field: String, reason: String },

    #[error("no slot capacity within horizon")]
    NoCapacity,

    #[error("slot {0} is disabled")]
    Disabled(String),

    #[error("preferred time is outside business hours")]
    OutsideBusinessHours,

    #[error("admission reserved but event log append failed: {0}")]
    AdmissionFailed(String),

    #[error("transient downstream failure: {0}")]
    TransientDownstream(String),

    #[error("event decode failed: {0}")]
    DataCorrupted(String),

    #[error("unrecoverable downstream error, halting consumption: {0}")]
    FatalDownstream(String),
}

impl AppError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::InvalidRequest {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that should be retried with backoff rather than surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientDownstream(_))
    }
}
