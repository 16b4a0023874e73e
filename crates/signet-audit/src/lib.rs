//! Audit trail vocabulary for signet.
//!
//! This crate defines the action tags recorded against an envelope, a builder
//! for new trail entries, and [`replay`] — re-derivation of envelope and
//! signer statuses from the ordered entry sequence. The trail is the source
//! of truth for "who did what when"; the status columns on envelope/signer
//! records are a cached projection of the trail's terminal facts, and
//! [`replay`] is how the two are checked against each other.

use serde::{Deserialize, Serialize};
use signet_storage::{AuditEntry, EnvelopeId, EnvelopeStatus, NewAuditEntry, SignerId, SignerStatus};
use std::collections::HashMap;
use thiserror::Error;

/// Actions recorded in the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Envelope transitions
    EnvelopeSent,
    EnvelopeCompleted,
    EnvelopeExpired,
    EnvelopeCancelled,

    // Envelope side-channel mutations
    EnvelopeRenamed,
    EnvelopeDueDateChanged,

    // Signer transitions
    SignerViewed,
    SignerPhoneVerified,
    SignerSigned,
    SignerDeclined,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::EnvelopeSent => "envelope.sent",
            AuditAction::EnvelopeCompleted => "envelope.completed",
            AuditAction::EnvelopeExpired => "envelope.expired",
            AuditAction::EnvelopeCancelled => "envelope.cancelled",
            AuditAction::EnvelopeRenamed => "envelope.renamed",
            AuditAction::EnvelopeDueDateChanged => "envelope.due_date_changed",
            AuditAction::SignerViewed => "signer.viewed",
            AuditAction::SignerPhoneVerified => "signer.phone_verified",
            AuditAction::SignerSigned => "signer.signed",
            AuditAction::SignerDeclined => "signer.declined",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "envelope.sent" => Ok(AuditAction::EnvelopeSent),
            "envelope.completed" => Ok(AuditAction::EnvelopeCompleted),
            "envelope.expired" => Ok(AuditAction::EnvelopeExpired),
            "envelope.cancelled" => Ok(AuditAction::EnvelopeCancelled),
            "envelope.renamed" => Ok(AuditAction::EnvelopeRenamed),
            "envelope.due_date_changed" => Ok(AuditAction::EnvelopeDueDateChanged),
            "signer.viewed" => Ok(AuditAction::SignerViewed),
            "signer.phone_verified" => Ok(AuditAction::SignerPhoneVerified),
            "signer.signed" => Ok(AuditAction::SignerSigned),
            "signer.declined" => Ok(AuditAction::SignerDeclined),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// Request metadata captured alongside an entry when available.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// Builder for new audit entries.
pub struct AuditEntryBuilder {
    envelope_id: EnvelopeId,
    signer_id: Option<SignerId>,
    action: AuditAction,
    detail: serde_json::Value,
    ip: Option<String>,
    user_agent: Option<String>,
}

/// Start building an entry for an envelope.
pub fn entry(envelope_id: EnvelopeId, action: AuditAction) -> AuditEntryBuilder {
    AuditEntryBuilder {
        envelope_id,
        signer_id: None,
        action,
        detail: serde_json::Value::Null,
        ip: None,
        user_agent: None,
    }
}

impl AuditEntryBuilder {
    pub fn signer_id(mut self, signer_id: SignerId) -> Self {
        self.signer_id = Some(signer_id);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn context(mut self, ctx: &RequestContext) -> Self {
        self.ip = ctx.ip.clone();
        self.user_agent = ctx.user_agent.clone();
        self
    }

    pub fn build(self) -> NewAuditEntry {
        NewAuditEntry {
            envelope_id: self.envelope_id,
            signer_id: self.signer_id,
            action: self.action.to_string(),
            detail: self.detail,
            ip: self.ip,
            user_agent: self.user_agent,
        }
    }
}

/// Error from trail re-derivation.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown action tag in trail: {0}")]
    UnknownAction(String),
    #[error("entry {0} has an action requiring a signer reference but carries none")]
    MissingSigner(usize),
}

/// Statuses re-derived from an envelope's ordered trail.
#[derive(Clone, Debug)]
pub struct ReplayedState {
    pub envelope: EnvelopeStatus,
    signers: HashMap<SignerId, SignerStatus>,
}

impl ReplayedState {
    /// Status of a signer according to the trail. Signers that never acted
    /// have no entries and are still `Pending`.
    pub fn signer(&self, id: &SignerId) -> SignerStatus {
        self.signers.get(id).copied().unwrap_or(SignerStatus::Pending)
    }
}

/// Fold an envelope's ordered audit entries into envelope and signer
/// statuses.
///
/// The result must equal the stored statuses at every point in time; a
/// mismatch means the cached projection has drifted from the trail.
/// `signer.phone_verified` entries only promote a signer when the challenge
/// purpose was field verification — document-access grants don't change
/// signer state.
pub fn replay(entries: &[AuditEntry]) -> Result<ReplayedState, ReplayError> {
    let mut envelope = EnvelopeStatus::Draft;
    let mut signers: HashMap<SignerId, SignerStatus> = HashMap::new();

    for (i, e) in entries.iter().enumerate() {
        let action: AuditAction = e
            .action
            .parse()
            .map_err(|_| ReplayError::UnknownAction(e.action.clone()))?;

        match action {
            AuditAction::EnvelopeSent => envelope = EnvelopeStatus::Pending,
            AuditAction::EnvelopeCompleted => envelope = EnvelopeStatus::Completed,
            AuditAction::EnvelopeExpired => envelope = EnvelopeStatus::Expired,
            AuditAction::EnvelopeCancelled => envelope = EnvelopeStatus::Cancelled,
            AuditAction::EnvelopeRenamed | AuditAction::EnvelopeDueDateChanged => {}

            AuditAction::SignerViewed => {
                let id = e.signer_id.ok_or(ReplayError::MissingSigner(i))?;
                signers.entry(id).or_insert(SignerStatus::Viewed);
            }
            AuditAction::SignerPhoneVerified => {
                let id = e.signer_id.ok_or(ReplayError::MissingSigner(i))?;
                let field_verification = e
                    .detail
                    .get("purpose")
                    .and_then(|p| p.as_str())
                    .map(|p| p == "field_verification")
                    .unwrap_or(false);
                if field_verification {
                    let status = signers.entry(id).or_insert(SignerStatus::Viewed);
                    if !status.is_terminal() {
                        *status = SignerStatus::Verified;
                    }
                }
            }
            AuditAction::SignerSigned => {
                let id = e.signer_id.ok_or(ReplayError::MissingSigner(i))?;
                signers.insert(id, SignerStatus::Signed);
            }
            AuditAction::SignerDeclined => {
                let id = e.signer_id.ok_or(ReplayError::MissingSigner(i))?;
                signers.insert(id, SignerStatus::Declined);
            }
        }
    }

    Ok(ReplayedState { envelope, signers })
}
