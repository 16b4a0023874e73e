//! Signed, time-limited access grants for completed documents.
//!
//! A grant is minted after a successful document-access phone verification.
//! The token is self-contained: a JSON payload plus an Ed25519 signature,
//! both hex encoded, joined by a dot. Verification needs no storage lookup,
//! only the issuer's key.

use crate::OtpError;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use signet_storage::{EnvelopeId, SignerId};

/// How long a minted grant stays valid.
pub const GRANT_TTL_HOURS: i64 = 24;

fn grant_ttl() -> Duration {
    Duration::hours(GRANT_TTL_HOURS)
}

/// What a grant authorizes: read access to one envelope's document, in the
/// capacity of one signer when minted for a signer link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub envelope_id: EnvelopeId,
    pub signer_id: Option<SignerId>,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies grants with a per-process Ed25519 key.
///
/// The key is ephemeral: restarting the process invalidates outstanding
/// grants, which only forces a re-verification.
pub struct AccessGrantIssuer {
    key: SigningKey,
}

impl AccessGrantIssuer {
    pub fn new() -> Self {
        Self {
            key: SigningKey::generate(&mut rand_core::OsRng),
        }
    }

    /// Mint a token for an envelope, valid for [`GRANT_TTL_HOURS`] from `now`.
    pub fn issue(
        &self,
        envelope_id: EnvelopeId,
        signer_id: Option<SignerId>,
        now: DateTime<Utc>,
    ) -> Result<String, OtpError> {
        let grant = AccessGrant {
            envelope_id,
            signer_id,
            expires_at: now + grant_ttl(),
        };
        let payload = serde_json::to_vec(&grant)
            .map_err(|e| OtpError::Provider(format!("grant encode: {}", e)))?;
        let signature = self.key.sign(&payload);
        Ok(format!(
            "{}.{}",
            hex::encode(&payload),
            hex::encode(signature.to_bytes())
        ))
    }

    /// Verify a token's signature and expiry, returning the grant inside.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessGrant, OtpError> {
        let (payload_hex, sig_hex) = token.split_once('.').ok_or(OtpError::GrantInvalid)?;
        let payload = hex::decode(payload_hex).map_err(|_| OtpError::GrantInvalid)?;
        let sig_bytes = hex::decode(sig_hex).map_err(|_| OtpError::GrantInvalid)?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| OtpError::GrantInvalid)?;

        self.key
            .verifying_key()
            .verify(&payload, &signature)
            .map_err(|_| OtpError::GrantInvalid)?;

        let grant: AccessGrant =
            serde_json::from_slice(&payload).map_err(|_| OtpError::GrantInvalid)?;
        if grant.expires_at <= now {
            return Err(OtpError::GrantExpired);
        }
        Ok(grant)
    }
}

impl Default for AccessGrantIssuer {
    fn default() -> Self {
        Self::new()
    }
}
