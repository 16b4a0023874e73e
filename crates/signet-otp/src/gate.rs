//! The verification gate: rate limiting, provider calls, grant minting.

use crate::{
    AccessGrant, AccessGrantIssuer, FixedWindowLimiter, OtpError, SmsProvider, normalize_phone,
};
use chrono::{Duration, Utc};
use signet_storage::{EnvelopeId, SignerId};
use std::sync::Arc;

/// Upper bound on any single provider call. A hung SMS backend must not
/// stall a signing session indefinitely.
pub const PROVIDER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

const SEND_LIMIT: u32 = 3;
const CHECK_LIMIT: u32 = 5;
const WINDOW_MINUTES: i64 = 10;

/// Why a verification is happening. Keyed into the rate limiter and
/// recorded in trail details by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    FieldVerification,
    DocumentAccess,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Purpose::FieldVerification => "field_verification",
            Purpose::DocumentAccess => "document_access",
        };
        write!(f, "{}", s)
    }
}

/// Phone verification gate over a provider, a rate limiter per purpose and
/// an access-grant issuer.
pub struct OtpGate {
    provider: Arc<dyn SmsProvider>,
    sends: FixedWindowLimiter,
    checks: FixedWindowLimiter,
    issuer: AccessGrantIssuer,
}

impl OtpGate {
    pub fn new(provider: Arc<dyn SmsProvider>) -> Self {
        Self {
            provider,
            sends: FixedWindowLimiter::new(SEND_LIMIT, Duration::minutes(WINDOW_MINUTES)),
            checks: FixedWindowLimiter::new(CHECK_LIMIT, Duration::minutes(WINDOW_MINUTES)),
            issuer: AccessGrantIssuer::new(),
        }
    }

    /// Ask the provider to send a code to `phone` for `purpose`.
    ///
    /// Rate limited per (purpose, normalized phone). The limiter is charged
    /// before the provider call so abandoned sends still count.
    pub async fn request_challenge(&self, purpose: Purpose, phone: &str) -> Result<(), OtpError> {
        let phone = normalize_phone(phone)?;
        if !self.sends.check(&format!("{}:{}", purpose, phone)) {
            return Err(OtpError::RateLimited);
        }

        tokio::time::timeout(PROVIDER_TIMEOUT, self.provider.send_code(&phone))
            .await
            .map_err(|_| OtpError::Provider("send timed out".to_string()))?
    }

    /// Check a submitted code. A wrong code is [`OtpError::CodeRejected`];
    /// callers treat that as a verification failure with no side effects.
    pub async fn check_challenge(
        &self,
        purpose: Purpose,
        phone: &str,
        code: &str,
    ) -> Result<(), OtpError> {
        let phone = normalize_phone(phone)?;
        if !self.checks.check(&format!("{}:{}", purpose, phone)) {
            return Err(OtpError::RateLimited);
        }

        let ok = tokio::time::timeout(PROVIDER_TIMEOUT, self.provider.check_code(&phone, code))
            .await
            .map_err(|_| OtpError::Provider("check timed out".to_string()))??;

        if ok {
            Ok(())
        } else {
            tracing::debug!(purpose = %purpose, "verification code rejected");
            Err(OtpError::CodeRejected)
        }
    }

    /// Mint a document-access grant after a successful check.
    pub fn issue_grant(
        &self,
        envelope_id: EnvelopeId,
        signer_id: Option<SignerId>,
    ) -> Result<String, OtpError> {
        self.issuer.issue(envelope_id, signer_id, Utc::now())
    }

    /// Verify a previously minted grant token.
    pub fn verify_grant(&self, token: &str) -> Result<AccessGrant, OtpError> {
        self.issuer.verify(token, Utc::now())
    }
}
