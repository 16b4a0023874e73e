//! Phone verification (OTP) gate for envelope access.
//!
//! Two verification purposes share the same machinery: filling signature
//! fields when a signer carries a phone-2FA requirement, and gaining access
//! to a completed document. Code delivery and checking go through an
//! [`SmsProvider`]; a successful document-access check mints a signed,
//! time-limited [`AccessGrant`] instead of mutating signer state.
//!
//! The gate never touches storage. Callers append the trail entries for
//! successful verifications; a rejected code leaves no trace.

use thiserror::Error;

mod gate;
mod grant;
mod phone;
mod provider;
mod rate_limit;

pub use gate::{OtpGate, Purpose, PROVIDER_TIMEOUT};
pub use grant::{AccessGrant, AccessGrantIssuer, GRANT_TTL_HOURS};
pub use phone::{mask_phone, normalize_phone};
pub use provider::{MockSmsProvider, SmsProvider};
pub use rate_limit::FixedWindowLimiter;

/// Errors from the verification gate.
#[derive(Debug, Error)]
pub enum OtpError {
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
    #[error("too many verification attempts, retry later")]
    RateLimited,
    #[error("verification code rejected")]
    CodeRejected,
    #[error("access grant is malformed or has a bad signature")]
    GrantInvalid,
    #[error("access grant has expired")]
    GrantExpired,
    #[error("sms provider failure: {0}")]
    Provider(String),
}
