//! The Store trait that backends implement.

use crate::*;

/// The storage trait the workflow engine depends on.
///
/// Backends must enforce unique constraints on (envelope slug),
/// (signer token) and (envelope, signer order), and must execute each of the
/// composite operations below as a single atomic read-modify-write.
///
/// Every composite operation that carries a [`NewAuditEntry`] appends it in
/// the same transaction as the mutation: a status transition that cannot be
/// recorded in the trail must not happen, so an audit-append failure fails
/// the whole call.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ───────────────────────────────────── Envelopes ──────────────────────────────────────

    /// Create a new envelope in `Draft` (fails `AlreadyExists` on slug clash).
    async fn create_envelope(&self, params: &CreateEnvelopeParams)
        -> Result<Envelope, StoreError>;

    /// Get envelope by ID.
    async fn get_envelope(&self, id: &EnvelopeId) -> Result<Envelope, StoreError>;

    /// Get envelope by its public slug.
    async fn get_envelope_by_slug(&self, slug: &str) -> Result<Envelope, StoreError>;

    /// List all envelopes belonging to an owner, newest first.
    async fn list_envelopes_for_owner(&self, owner: &UserId)
        -> Result<Vec<Envelope>, StoreError>;

    /// Conditional status transition with its audit entry.
    ///
    /// Applies `from → to` only when the current status equals `from`;
    /// returns whether the transition (and audit append) fired. Concurrent
    /// callers racing on the same transition produce exactly one entry.
    async fn update_envelope_status(
        &self,
        id: &EnvelopeId,
        from: EnvelopeStatus,
        to: EnvelopeStatus,
        audit: NewAuditEntry,
    ) -> Result<bool, StoreError>;

    /// Rename an envelope (side-channel mutation, always audited).
    async fn rename_envelope(
        &self,
        id: &EnvelopeId,
        name: &str,
        audit: NewAuditEntry,
    ) -> Result<(), StoreError>;

    /// Set or clear the expiry instant (side-channel mutation, always audited).
    async fn set_envelope_expiry(
        &self,
        id: &EnvelopeId,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
        audit: NewAuditEntry,
    ) -> Result<(), StoreError>;

    /// Hard purge: audit entries, fields and signers are removed before the
    /// envelope itself (referential order matters for stores without
    /// cascading delete).
    async fn delete_envelope(&self, id: &EnvelopeId) -> Result<(), StoreError>;

    // ───────────────────────────────────── Signers ────────────────────────────────────────

    /// Add a signer (fails `AlreadyExists` on a token or order clash).
    async fn add_signer(&self, params: &AddSignerParams) -> Result<Signer, StoreError>;

    /// Get signer by ID.
    async fn get_signer(&self, id: &SignerId) -> Result<Signer, StoreError>;

    /// Resolve an opaque access token to exactly one signer.
    async fn get_signer_by_token(&self, token: &str) -> Result<Signer, StoreError>;

    /// List an envelope's signers in ascending order.
    async fn list_signers(&self, envelope_id: &EnvelopeId) -> Result<Vec<Signer>, StoreError>;

    /// Idempotent `Pending → Viewed`; returns whether it fired. The audit
    /// entry is appended only when it does.
    async fn mark_signer_viewed(&self, params: &MarkViewedParams) -> Result<bool, StoreError>;

    /// Idempotent phone-verification: sets `phone_verified` and promotes
    /// `Viewed → Verified`; returns whether it fired.
    async fn mark_signer_verified(&self, params: &MarkVerifiedParams)
        -> Result<bool, StoreError>;

    /// Optimistic signing transaction; see [`ApplySignedParams`].
    async fn apply_signed(&self, params: &ApplySignedParams) -> Result<(), StoreError>;

    /// Decline a signer; fires only when the signer is non-terminal.
    /// May cancel the envelope in the same transaction (decline policy).
    async fn decline_signer(&self, params: &DeclineParams) -> Result<bool, StoreError>;

    // ───────────────────────────────────── Fields ─────────────────────────────────────────

    /// Create a field bound to a signer.
    async fn create_field(&self, params: &CreateFieldParams) -> Result<Field, StoreError>;

    /// Get field by ID.
    async fn get_field(&self, id: &FieldId) -> Result<Field, StoreError>;

    /// List all fields of an envelope.
    async fn list_fields(&self, envelope_id: &EnvelopeId) -> Result<Vec<Field>, StoreError>;

    /// List a signer's fields.
    async fn list_fields_for_signer(&self, signer_id: &SignerId)
        -> Result<Vec<Field>, StoreError>;

    /// Write a field value. Bumps the envelope version so an in-flight
    /// signing transaction observes the write and retries.
    async fn set_field_value(&self, id: &FieldId, value: &str) -> Result<(), StoreError>;

    // ───────────────────────────────────── Audit trail ────────────────────────────────────

    /// Append a standalone audit entry (used by the OTP gate; state
    /// transitions carry their entries inside the composite operations).
    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<AuditEntry, StoreError>;

    /// The canonical history: all entries for an envelope, timestamp ascending.
    async fn list_audit(&self, envelope_id: &EnvelopeId) -> Result<Vec<AuditEntry>, StoreError>;
}
