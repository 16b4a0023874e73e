//! Storage abstraction for signet.
//!
//! Backend crates (e.g., signet-store-memory) implement the [`Store`] trait so
//! the workflow engine doesn't depend on any specific database engine or
//! schema details. Envelope/signer/field statuses live here because every
//! backend must persist them; the transition *rules* live in signet-core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod store;
pub use store::Store;
#[cfg(feature = "test-support")]
pub use store::MockStore;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Strongly-typed identifiers (avoid mixing raw UUIDs arbitrarily).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(pub Uuid);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerId(pub Uuid);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub Uuid);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditEntryId(pub Uuid);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for SignerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall status of an envelope (signature request).
///
/// `Draft` is initial; `Completed`, `Expired` and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeStatus {
    Draft,
    Pending,
    Completed,
    Expired,
    Cancelled,
}

impl EnvelopeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnvelopeStatus::Completed | EnvelopeStatus::Expired | EnvelopeStatus::Cancelled
        )
    }
}

impl std::fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvelopeStatus::Draft => "draft",
            EnvelopeStatus::Pending => "pending",
            EnvelopeStatus::Completed => "completed",
            EnvelopeStatus::Expired => "expired",
            EnvelopeStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EnvelopeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EnvelopeStatus::Draft),
            "pending" => Ok(EnvelopeStatus::Pending),
            "completed" => Ok(EnvelopeStatus::Completed),
            "expired" => Ok(EnvelopeStatus::Expired),
            "cancelled" => Ok(EnvelopeStatus::Cancelled),
            _ => Err(format!("Unknown envelope status: {}", s)),
        }
    }
}

/// Progress of an individual signer.
///
/// `Verified` only occurs for signers with a phone-2FA requirement;
/// `Signed` and `Declined` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignerStatus {
    Pending,
    Viewed,
    Verified,
    Signed,
    Declined,
}

impl SignerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignerStatus::Signed | SignerStatus::Declined)
    }

    /// Whether the signer has opened the envelope at least once.
    pub fn has_viewed(&self) -> bool {
        !matches!(self, SignerStatus::Pending)
    }
}

impl std::fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignerStatus::Pending => "pending",
            SignerStatus::Viewed => "viewed",
            SignerStatus::Verified => "verified",
            SignerStatus::Signed => "signed",
            SignerStatus::Declined => "declined",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SignerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SignerStatus::Pending),
            "viewed" => Ok(SignerStatus::Viewed),
            "verified" => Ok(SignerStatus::Verified),
            "signed" => Ok(SignerStatus::Signed),
            "declined" => Ok(SignerStatus::Declined),
            _ => Err(format!("Unknown signer status: {}", s)),
        }
    }
}

/// Kind of fillable element bound to a signer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Signature,
    Initials,
    Date,
    Text,
    Checkbox,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldKind::Signature => "signature",
            FieldKind::Initials => "initials",
            FieldKind::Date => "date",
            FieldKind::Text => "text",
            FieldKind::Checkbox => "checkbox",
        };
        write!(f, "{}", s)
    }
}

/// What a signer's decline does to the rest of the envelope.
///
/// Per-envelope configuration, not a hidden behavior: either sibling signers
/// keep going, or the decline cancels the whole envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeclinePolicy {
    #[default]
    SiblingsContinue,
    CancelEnvelope,
}

/// Envelope record: one signature request wrapping one document.
///
/// `version` is an optimistic concurrency token bumped by every
/// envelope-scoped mutation (status changes, signer transitions, field
/// writes). `slug` is the public routing key and is immutable once issued.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub owner_id: UserId,
    pub owner_email: String,
    pub name: String,
    pub slug: String,
    pub status: EnvelopeStatus,
    pub version: i64,
    pub sequential: bool,
    pub decline_policy: DeclinePolicy,
    pub expires_at: Option<DateTime<Utc>>,
    pub document_key: String,
    pub preview_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Signer record: one invited party.
#[derive(Clone, Debug)]
pub struct Signer {
    pub id: SignerId,
    pub envelope_id: EnvelopeId,
    /// Position in the sequential signing order; unique within an envelope.
    pub order: i32,
    pub name: String,
    pub email: String,
    /// Display color, assigned from a fixed palette among co-signers.
    pub color: String,
    /// Opaque capability token; unique across all envelopes.
    pub token: String,
    pub status: SignerStatus,
    pub require_phone_2fa: bool,
    pub phone_verified: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field record: one fillable element, owned by exactly one signer.
#[derive(Clone, Debug)]
pub struct Field {
    pub id: FieldId,
    pub envelope_id: EnvelopeId,
    pub signer_id: SignerId,
    pub kind: FieldKind,
    pub page: i32,
    pub x: f64,
    pub y: f64,
    pub required: bool,
    pub value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit fact. Entries are append-only while the envelope lives;
/// they are removed only by the envelope's hard purge.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub envelope_id: EnvelopeId,
    pub signer_id: Option<SignerId>,
    /// Dotted action tag, e.g. "signer.signed" (vocabulary in signet-audit).
    pub action: String,
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Parameters for appending an audit entry; id and timestamp are assigned
/// by the backend at append time.
#[derive(Clone, Debug)]
pub struct NewAuditEntry {
    pub envelope_id: EnvelopeId,
    pub signer_id: Option<SignerId>,
    pub action: String,
    pub detail: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Parameters for creating an envelope (always created in `Draft`).
#[derive(Clone, Debug)]
pub struct CreateEnvelopeParams {
    pub owner_id: UserId,
    pub owner_email: String,
    pub name: String,
    pub slug: String,
    pub sequential: bool,
    pub decline_policy: DeclinePolicy,
    pub expires_at: Option<DateTime<Utc>>,
    pub document_key: String,
    pub preview_key: Option<String>,
}

/// Parameters for adding a signer to an envelope.
#[derive(Clone, Debug)]
pub struct AddSignerParams {
    pub envelope_id: EnvelopeId,
    pub order: i32,
    pub name: String,
    pub email: String,
    pub color: String,
    pub token: String,
    pub require_phone_2fa: bool,
}

/// Parameters for creating a field.
#[derive(Clone, Debug)]
pub struct CreateFieldParams {
    pub envelope_id: EnvelopeId,
    pub signer_id: SignerId,
    pub kind: FieldKind,
    pub page: i32,
    pub x: f64,
    pub y: f64,
    pub required: bool,
}

/// Parameters for the idempotent `pending → viewed` signer transition.
#[derive(Clone, Debug)]
pub struct MarkViewedParams {
    pub signer_id: SignerId,
    pub viewed_at: DateTime<Utc>,
    pub audit: NewAuditEntry,
}

/// Parameters for recording phone verification on a signer.
#[derive(Clone, Debug)]
pub struct MarkVerifiedParams {
    pub signer_id: SignerId,
    pub audit: NewAuditEntry,
}

/// Parameters for the optimistic signing transaction.
///
/// `expected_version` must match the envelope's current version or the call
/// fails with [`StoreError::Conflict`]; the caller re-reads and re-derives.
/// When `complete_envelope` is set the envelope is flipped
/// `Pending → Completed` and `completed_audit` is appended, all in the same
/// transaction as the signer update.
#[derive(Clone, Debug)]
pub struct ApplySignedParams {
    pub envelope_id: EnvelopeId,
    pub expected_version: i64,
    pub signer_id: SignerId,
    pub signed_at: DateTime<Utc>,
    pub audit: NewAuditEntry,
    pub complete_envelope: bool,
    pub completed_audit: Option<NewAuditEntry>,
}

/// Parameters for declining. `cancel_envelope` carries the envelope's
/// decline policy decision (computed by the caller) into the transaction.
#[derive(Clone, Debug)]
pub struct DeclineParams {
    pub signer_id: SignerId,
    pub reason: Option<String>,
    pub audit: NewAuditEntry,
    pub cancel_envelope: bool,
    pub cancelled_audit: Option<NewAuditEntry>,
}
