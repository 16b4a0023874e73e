//! Owner-facing envelope operations.

use crate::{generate_slug, generate_token, pick_color, FlowError, SignFlow};
use chrono::{DateTime, Duration, Utc};
use signet_audit::{entry, replay, AuditAction, RequestContext};
use signet_events::NotificationKind;
use signet_storage::{
    AddSignerParams, AuditEntry, CreateEnvelopeParams, CreateFieldParams, DeclinePolicy, Envelope,
    EnvelopeId, EnvelopeStatus, Field, FieldKind, Signer, SignerId, UserId,
};

/// Presigned download URLs stay valid this long.
const DOWNLOAD_URL_TTL_SECS: u64 = 600;

/// Inputs for creating an envelope. The document lands in object storage
/// under a key derived from the generated slug.
#[derive(Debug)]
pub struct CreateEnvelopeRequest {
    pub owner_email: String,
    pub name: String,
    pub document: Vec<u8>,
    pub sequential: bool,
    pub decline_policy: DeclinePolicy,
    /// Explicit due date; when absent the configured default lifetime
    /// applies.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Inputs for adding a signer to a draft.
#[derive(Debug)]
pub struct AddSignerRequest {
    pub name: String,
    pub email: String,
    /// Position in the signing order; defaults to the next free slot.
    pub order: Option<i32>,
    pub require_phone_2fa: bool,
}

/// Inputs for placing a field on a draft's document.
#[derive(Debug)]
pub struct AddFieldRequest {
    pub signer_id: SignerId,
    pub kind: FieldKind,
    pub page: i32,
    /// Position as fractions of the page size, in `0.0..=1.0`.
    pub x: f64,
    pub y: f64,
    pub required: bool,
}

impl SignFlow {
    // ───────────────────────────────────── Drafting ───────────────────────────────────────

    pub async fn create_envelope(
        &self,
        owner: UserId,
        req: CreateEnvelopeRequest,
    ) -> Result<Envelope, FlowError> {
        if req.name.trim().is_empty() {
            return Err(FlowError::ValidationFailed("name must not be empty".to_string()));
        }
        if req.document.is_empty() {
            return Err(FlowError::ValidationFailed("document must not be empty".to_string()));
        }
        if !req.owner_email.contains('@') {
            return Err(FlowError::ValidationFailed("owner email is invalid".to_string()));
        }
        if let Some(at) = req.expires_at {
            if at <= Utc::now() {
                return Err(FlowError::ValidationFailed(
                    "due date must be in the future".to_string(),
                ));
            }
        }

        let slug = generate_slug(&req.name);
        let document_key = format!("documents/{}.pdf", slug);
        self.objects.put(&document_key, req.document).await?;

        let expires_at = req.expires_at.or_else(|| {
            self.config
                .default_expiry_days
                .map(|days| Utc::now() + Duration::days(days))
        });

        let envelope = self
            .store
            .create_envelope(&CreateEnvelopeParams {
                owner_id: owner,
                owner_email: req.owner_email,
                name: req.name.trim().to_string(),
                slug,
                sequential: req.sequential,
                decline_policy: req.decline_policy,
                expires_at,
                document_key,
                preview_key: None,
            })
            .await?;

        tracing::info!(envelope_id = %envelope.id, slug = %envelope.slug, "envelope created");
        Ok(envelope)
    }

    pub async fn add_signer(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
        req: AddSignerRequest,
    ) -> Result<Signer, FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;
        if envelope.status != EnvelopeStatus::Draft {
            return Err(FlowError::InvalidState(
                "signers can only be added to a draft".to_string(),
            ));
        }
        if req.name.trim().is_empty() {
            return Err(FlowError::ValidationFailed("signer name must not be empty".to_string()));
        }
        if !req.email.contains('@') {
            return Err(FlowError::ValidationFailed("signer email is invalid".to_string()));
        }

        let siblings = self.store.list_signers(&envelope_id).await?;
        if siblings.iter().any(|s| s.email == req.email) {
            return Err(FlowError::ValidationFailed(
                "signer email already on this envelope".to_string(),
            ));
        }
        let order = match req.order {
            Some(order) => {
                if siblings.iter().any(|s| s.order == order) {
                    return Err(FlowError::ValidationFailed(format!(
                        "order {} is already taken",
                        order
                    )));
                }
                order
            }
            None => siblings.iter().map(|s| s.order).max().unwrap_or(0) + 1,
        };

        let signer = self
            .store
            .add_signer(&AddSignerParams {
                envelope_id,
                order,
                name: req.name.trim().to_string(),
                email: req.email,
                color: pick_color(&siblings),
                token: generate_token(),
                require_phone_2fa: req.require_phone_2fa,
            })
            .await?;
        Ok(signer)
    }

    pub async fn add_field(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
        req: AddFieldRequest,
    ) -> Result<Field, FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;
        if envelope.status != EnvelopeStatus::Draft {
            return Err(FlowError::InvalidState(
                "fields can only be placed on a draft".to_string(),
            ));
        }
        if req.page < 1 {
            return Err(FlowError::ValidationFailed("page numbers start at 1".to_string()));
        }
        if !(0.0..=1.0).contains(&req.x) || !(0.0..=1.0).contains(&req.y) {
            return Err(FlowError::ValidationFailed(
                "field position must be within the page".to_string(),
            ));
        }
        let signer = self.store.get_signer(&req.signer_id).await?;
        if signer.envelope_id != envelope_id {
            return Err(FlowError::ValidationFailed(
                "signer belongs to a different envelope".to_string(),
            ));
        }

        let field = self
            .store
            .create_field(&CreateFieldParams {
                envelope_id,
                signer_id: req.signer_id,
                kind: req.kind,
                page: req.page,
                x: req.x,
                y: req.y,
                required: req.required,
            })
            .await?;
        Ok(field)
    }

    // ───────────────────────────────────── Lifecycle ──────────────────────────────────────

    /// Send a draft: flips it to `Pending` and invites the active signers.
    pub async fn send_envelope(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
        ctx: &RequestContext,
    ) -> Result<Envelope, FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;
        if envelope.status != EnvelopeStatus::Draft {
            return Err(FlowError::InvalidState(format!(
                "cannot send an envelope in status {}",
                envelope.status
            )));
        }

        let signers = self.store.list_signers(&envelope_id).await?;
        if signers.is_empty() {
            return Err(FlowError::ValidationFailed(
                "envelope has no signers".to_string(),
            ));
        }
        let fields = self.store.list_fields(&envelope_id).await?;
        for signer in &signers {
            if !fields.iter().any(|f| f.signer_id == signer.id) {
                return Err(FlowError::ValidationFailed(format!(
                    "signer {} has no fields",
                    signer.email
                )));
            }
        }

        let audit = entry(envelope_id, AuditAction::EnvelopeSent)
            .detail(serde_json::json!({ "signers": signers.len() }))
            .context(ctx)
            .build();
        let fired = self
            .store
            .update_envelope_status(&envelope_id, EnvelopeStatus::Draft, EnvelopeStatus::Pending, audit)
            .await?;
        if !fired {
            return Err(FlowError::InvalidState(
                "envelope was no longer a draft".to_string(),
            ));
        }

        let envelope = self.store.get_envelope(&envelope_id).await?;
        for signer in crate::signer::active_signers(&envelope, &signers) {
            self.dispatcher.dispatch(self.notification(
                NotificationKind::SignerInvited,
                &envelope,
                Some(signer),
                &signer.email,
                Some(self.config.sign_url(&signer.token)),
            ));
        }

        tracing::info!(envelope_id = %envelope.id, "envelope sent");
        Ok(envelope)
    }

    pub async fn rename_envelope(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
        name: &str,
        ctx: &RequestContext,
    ) -> Result<Envelope, FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;
        if envelope.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "cannot rename an envelope in status {}",
                envelope.status
            )));
        }
        if name.trim().is_empty() {
            return Err(FlowError::ValidationFailed("name must not be empty".to_string()));
        }

        let audit = entry(envelope_id, AuditAction::EnvelopeRenamed)
            .detail(serde_json::json!({ "from": envelope.name, "to": name.trim() }))
            .context(ctx)
            .build();
        self.store
            .rename_envelope(&envelope_id, name.trim(), audit)
            .await?;
        Ok(self.store.get_envelope(&envelope_id).await?)
    }

    pub async fn set_due_date(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
        expires_at: Option<DateTime<Utc>>,
        ctx: &RequestContext,
    ) -> Result<Envelope, FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;
        if envelope.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "cannot change the due date in status {}",
                envelope.status
            )));
        }
        if let Some(at) = expires_at {
            if at <= Utc::now() {
                return Err(FlowError::ValidationFailed(
                    "due date must be in the future".to_string(),
                ));
            }
        }

        let audit = entry(envelope_id, AuditAction::EnvelopeDueDateChanged)
            .detail(serde_json::json!({ "from": envelope.expires_at, "to": expires_at }))
            .context(ctx)
            .build();
        self.store
            .set_envelope_expiry(&envelope_id, expires_at, audit)
            .await?;
        Ok(self.store.get_envelope(&envelope_id).await?)
    }

    /// Cancel a draft or pending envelope. Signer links stop working for
    /// anything but viewing.
    pub async fn cancel_envelope(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
        ctx: &RequestContext,
    ) -> Result<Envelope, FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;
        if envelope.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "cannot cancel an envelope in status {}",
                envelope.status
            )));
        }

        let audit = entry(envelope_id, AuditAction::EnvelopeCancelled)
            .detail(serde_json::json!({ "by": "owner" }))
            .context(ctx)
            .build();
        let fired = self
            .store
            .update_envelope_status(&envelope_id, envelope.status, EnvelopeStatus::Cancelled, audit)
            .await?;
        if !fired {
            return Err(FlowError::InvalidState(
                "envelope status changed concurrently".to_string(),
            ));
        }
        Ok(self.store.get_envelope(&envelope_id).await?)
    }

    /// Hard delete: purges the records, the trail and the stored blobs.
    pub async fn delete_envelope(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
    ) -> Result<(), FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;

        // An orphaned blob is a leak, not a reason to keep the records
        if let Err(err) = self.objects.delete(&envelope.document_key).await {
            tracing::warn!(envelope_id = %envelope_id, error = %err, "document cleanup failed");
        }
        if let Some(preview_key) = &envelope.preview_key {
            if let Err(err) = self.objects.delete(preview_key).await {
                tracing::warn!(envelope_id = %envelope_id, error = %err, "preview cleanup failed");
            }
        }
        self.store.delete_envelope(&envelope_id).await?;
        tracing::info!(envelope_id = %envelope_id, "envelope purged");
        Ok(())
    }

    // ───────────────────────────────────── Reads ──────────────────────────────────────────

    pub async fn envelope(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
    ) -> Result<Envelope, FlowError> {
        self.owned_envelope(owner, &envelope_id).await
    }

    pub async fn list_envelopes(&self, owner: UserId) -> Result<Vec<Envelope>, FlowError> {
        let envelopes = self.store.list_envelopes_for_owner(&owner).await?;
        let mut out = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            out.push(self.expire_if_due(envelope).await?);
        }
        Ok(out)
    }

    pub async fn signers(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
    ) -> Result<Vec<Signer>, FlowError> {
        self.owned_envelope(owner, &envelope_id).await?;
        Ok(self.store.list_signers(&envelope_id).await?)
    }

    pub async fn fields(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
    ) -> Result<Vec<Field>, FlowError> {
        self.owned_envelope(owner, &envelope_id).await?;
        Ok(self.store.list_fields(&envelope_id).await?)
    }

    /// The envelope's full history, oldest first.
    pub async fn audit_trail(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
    ) -> Result<Vec<AuditEntry>, FlowError> {
        self.owned_envelope(owner, &envelope_id).await?;
        Ok(self.store.list_audit(&envelope_id).await?)
    }

    /// Re-derive statuses from the trail and compare them to the stored
    /// records. Returns whether they agree.
    pub async fn verify_trail(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
    ) -> Result<bool, FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;
        let signers = self.store.list_signers(&envelope_id).await?;
        let trail = self.store.list_audit(&envelope_id).await?;

        let replayed = replay(&trail)
            .map_err(|e| FlowError::UpstreamFailure(format!("corrupt trail: {}", e)))?;

        let agrees = replayed.envelope == envelope.status
            && signers.iter().all(|s| replayed.signer(&s.id) == s.status);
        Ok(agrees)
    }

    /// Presigned download URL for the owner.
    pub async fn document_download_url(
        &self,
        owner: UserId,
        envelope_id: EnvelopeId,
    ) -> Result<String, FlowError> {
        let envelope = self.owned_envelope(owner, &envelope_id).await?;
        Ok(self
            .objects
            .presign(&envelope.document_key, DOWNLOAD_URL_TTL_SECS)
            .await?)
    }

    // ───────────────────────────────────── Internals ──────────────────────────────────────

    /// Fetch an envelope, enforce ownership, and apply lazy expiry.
    pub(crate) async fn owned_envelope(
        &self,
        owner: UserId,
        envelope_id: &EnvelopeId,
    ) -> Result<Envelope, FlowError> {
        let envelope = self.store.get_envelope(envelope_id).await?;
        if envelope.owner_id != owner {
            return Err(FlowError::Forbidden("not the envelope owner".to_string()));
        }
        self.expire_if_due(envelope).await
    }

    /// A pending envelope past its due date flips to `Expired` on first
    /// touch. The conditional store transition guarantees exactly one
    /// `envelope.expired` entry under racing readers.
    pub(crate) async fn expire_if_due(&self, envelope: Envelope) -> Result<Envelope, FlowError> {
        if envelope.status != EnvelopeStatus::Pending {
            return Ok(envelope);
        }
        let Some(at) = envelope.expires_at else {
            return Ok(envelope);
        };
        if at > Utc::now() {
            return Ok(envelope);
        }

        let audit = entry(envelope.id, AuditAction::EnvelopeExpired)
            .detail(serde_json::json!({ "due": at }))
            .build();
        let fired = self
            .store
            .update_envelope_status(&envelope.id, EnvelopeStatus::Pending, EnvelopeStatus::Expired, audit)
            .await?;
        if fired {
            tracing::info!(envelope_id = %envelope.id, "envelope expired");
        }
        Ok(self.store.get_envelope(&envelope.id).await?)
    }
}
