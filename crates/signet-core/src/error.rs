//! Workflow error taxonomy.

use signet_otp::OtpError;
use signet_storage::StoreError;
use thiserror::Error;

/// Errors surfaced by workflow operations.
///
/// `NotFound` deliberately covers both truly-absent records and records the
/// caller may not know exist (unresolvable access tokens); `Forbidden` is
/// reserved for callers who legitimately hold a reference but lack the right
/// to act.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("not found")]
    NotFound,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("verification failed")]
    VerificationFailed,
    #[error("rate limited, retry later")]
    RateLimited,
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => FlowError::NotFound,
            StoreError::AlreadyExists => {
                FlowError::ValidationFailed("duplicate record".to_string())
            }
            // Unretried conflicts mean the caller raced something it
            // shouldn't have; surface as contention.
            StoreError::Conflict => {
                FlowError::UpstreamFailure("storage contention".to_string())
            }
            StoreError::Backend(msg) => FlowError::UpstreamFailure(msg),
        }
    }
}

impl From<crate::ObjectError> for FlowError {
    fn from(err: crate::ObjectError) -> Self {
        match err {
            crate::ObjectError::NotFound(key) => {
                FlowError::UpstreamFailure(format!("missing object {}", key))
            }
            crate::ObjectError::Backend(msg) => FlowError::UpstreamFailure(msg),
        }
    }
}

impl From<OtpError> for FlowError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::InvalidPhone(msg) => FlowError::ValidationFailed(msg),
            OtpError::RateLimited => FlowError::RateLimited,
            OtpError::CodeRejected => FlowError::VerificationFailed,
            OtpError::GrantInvalid | OtpError::GrantExpired => {
                FlowError::Forbidden("invalid or expired access grant".to_string())
            }
            OtpError::Provider(msg) => FlowError::UpstreamFailure(msg),
        }
    }
}
