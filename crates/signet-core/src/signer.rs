//! Signer-link operations: everything reachable through an access token.
//!
//! Tokens are unguessable capabilities; resolving one is the only
//! authentication a signer has. An unresolvable token is `NotFound`,
//! indistinguishable from a token that never existed.

use crate::{FlowError, SignFlow};
use chrono::Utc;
use signet_audit::{entry, AuditAction, RequestContext};
use signet_events::NotificationKind;
use signet_otp::{mask_phone, normalize_phone, Purpose};
use signet_storage::{
    ApplySignedParams, DeclineParams, DeclinePolicy, Envelope, EnvelopeStatus, Field, FieldId,
    FieldKind, MarkViewedParams, MarkVerifiedParams, Signer, SignerStatus, StoreError,
};

/// What a signer sees when opening their link.
#[derive(Clone, Debug)]
pub struct SignerView {
    pub envelope: Envelope,
    pub signer: Signer,
    /// Only this signer's fields; co-signers' fields are not exposed.
    pub fields: Vec<Field>,
    /// Whether this signer may act right now (envelope pending, their turn
    /// in a sequential flow, not yet terminal).
    pub actionable: bool,
}

/// The signers currently allowed to act. In a sequential flow that is the
/// first non-terminal signer by order; otherwise every non-terminal signer.
pub(crate) fn active_signers<'a>(envelope: &Envelope, signers: &'a [Signer]) -> Vec<&'a Signer> {
    if envelope.sequential {
        signers
            .iter()
            .find(|s| !s.status.is_terminal())
            .into_iter()
            .collect()
    } else {
        signers.iter().filter(|s| !s.status.is_terminal()).collect()
    }
}

impl SignFlow {
    // ───────────────────────────────────── Viewing ────────────────────────────────────────

    /// Open a signer link. Records the first view while the envelope is
    /// pending; stays read-only otherwise.
    pub async fn open_signer_link(
        &self,
        token: &str,
        ctx: &RequestContext,
    ) -> Result<SignerView, FlowError> {
        let signer = self.store.get_signer_by_token(token).await?;
        let envelope = self.store.get_envelope(&signer.envelope_id).await?;
        let envelope = self.expire_if_due(envelope).await?;

        // Links go live at send
        if envelope.status == EnvelopeStatus::Draft {
            return Err(FlowError::NotFound);
        }

        let signer = if envelope.status == EnvelopeStatus::Pending
            && signer.status == SignerStatus::Pending
        {
            let audit = entry(envelope.id, AuditAction::SignerViewed)
                .signer_id(signer.id)
                .context(ctx)
                .build();
            self.store
                .mark_signer_viewed(&MarkViewedParams {
                    signer_id: signer.id,
                    viewed_at: Utc::now(),
                    audit,
                })
                .await?;
            self.store.get_signer(&signer.id).await?
        } else {
            signer
        };

        // A cancelled envelope reports the cancellation, not field data
        let fields = if envelope.status == EnvelopeStatus::Cancelled {
            Vec::new()
        } else {
            self.store.list_fields_for_signer(&signer.id).await?
        };
        let actionable = envelope.status == EnvelopeStatus::Pending
            && !signer.status.is_terminal()
            && active_signers(&envelope, &self.store.list_signers(&envelope.id).await?)
                .iter()
                .any(|s| s.id == signer.id);

        Ok(SignerView {
            envelope,
            signer,
            fields,
            actionable,
        })
    }

    // ───────────────────────────────────── Filling ────────────────────────────────────────

    /// Write a field value. Gated on envelope state, signing order and the
    /// signer's phone-2FA requirement.
    pub async fn fill_field(
        &self,
        token: &str,
        field_id: FieldId,
        value: &str,
    ) -> Result<Field, FlowError> {
        let signer = self.store.get_signer_by_token(token).await?;
        let envelope = self.store.get_envelope(&signer.envelope_id).await?;
        let envelope = self.expire_if_due(envelope).await?;

        self.ensure_can_act(&envelope, &signer).await?;

        let field = self.store.get_field(&field_id).await?;
        if field.signer_id != signer.id {
            return Err(FlowError::Forbidden("field belongs to another signer".to_string()));
        }

        validate_field_value(field.kind, value)?;

        self.store.set_field_value(&field_id, value).await?;
        Ok(self.store.get_field(&field_id).await?)
    }

    // ───────────────────────────────────── Phone 2FA ──────────────────────────────────────

    /// Ask for a verification code before filling fields. Only meaningful
    /// for signers carrying the phone-2FA requirement. Returns the masked
    /// phone for display.
    pub async fn request_field_verification(
        &self,
        token: &str,
        phone: &str,
    ) -> Result<String, FlowError> {
        let signer = self.store.get_signer_by_token(token).await?;
        let envelope = self.store.get_envelope(&signer.envelope_id).await?;
        let envelope = self.expire_if_due(envelope).await?;

        self.ensure_verification_applies(&envelope, &signer)?;
        self.otp
            .request_challenge(Purpose::FieldVerification, phone)
            .await?;
        Ok(normalize_phone(phone).map(|p| mask_phone(&p))?)
    }

    /// Confirm the code. Success marks the signer verified and appends the
    /// trail entry; a wrong code changes nothing anywhere.
    pub async fn confirm_field_verification(
        &self,
        token: &str,
        phone: &str,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<Signer, FlowError> {
        let signer = self.store.get_signer_by_token(token).await?;
        let envelope = self.store.get_envelope(&signer.envelope_id).await?;
        let envelope = self.expire_if_due(envelope).await?;

        self.ensure_verification_applies(&envelope, &signer)?;
        self.otp
            .check_challenge(Purpose::FieldVerification, phone, code)
            .await?;

        // The record keeps the canonical number; display surfaces get the mask
        let canonical = normalize_phone(phone)?;
        let audit = entry(envelope.id, AuditAction::SignerPhoneVerified)
            .signer_id(signer.id)
            .detail(serde_json::json!({
                "purpose": Purpose::FieldVerification.to_string(),
                "phone": mask_phone(&canonical),
                "phone_canonical": canonical,
            }))
            .context(ctx)
            .build();
        self.store
            .mark_signer_verified(&MarkVerifiedParams {
                signer_id: signer.id,
                audit,
            })
            .await?;
        Ok(self.store.get_signer(&signer.id).await?)
    }

    // ───────────────────────────────────── Signing ────────────────────────────────────────

    /// Finalize: the signer's terminal `Signed` transition.
    ///
    /// Uses the envelope version as an optimistic lock. A concurrent field
    /// write or co-signer transition between our read and the store write
    /// surfaces as a conflict; preconditions are re-derived from fresh state
    /// and the write retried. Completing the envelope rides in the same
    /// store transaction as the last signature, so exactly one caller
    /// completes it.
    pub async fn sign(&self, token: &str, ctx: &RequestContext) -> Result<Signer, FlowError> {
        let signer = self.store.get_signer_by_token(token).await?;

        for attempt in 0..=self.config.sign_retries {
            let envelope = self.store.get_envelope(&signer.envelope_id).await?;
            let envelope = self.expire_if_due(envelope).await?;
            let fresh = self.store.get_signer(&signer.id).await?;

            self.ensure_can_act(&envelope, &fresh).await?;

            let fields = self.store.list_fields_for_signer(&fresh.id).await?;
            if let Some(missing) = fields
                .iter()
                .find(|f| f.required && f.value.as_deref().map_or(true, str::is_empty))
            {
                return Err(FlowError::ValidationFailed(format!(
                    "required {} field on page {} is empty",
                    missing.kind, missing.page
                )));
            }

            let signers = self.store.list_signers(&envelope.id).await?;
            let completes = signers
                .iter()
                .filter(|s| s.id != fresh.id)
                .all(|s| s.status == SignerStatus::Signed);

            let audit = entry(envelope.id, AuditAction::SignerSigned)
                .signer_id(fresh.id)
                .context(ctx)
                .build();
            let completed_audit = completes.then(|| {
                entry(envelope.id, AuditAction::EnvelopeCompleted)
                    .detail(serde_json::json!({ "signers": signers.len() }))
                    .build()
            });

            let result = self
                .store
                .apply_signed(&ApplySignedParams {
                    envelope_id: envelope.id,
                    expected_version: envelope.version,
                    signer_id: fresh.id,
                    signed_at: Utc::now(),
                    audit,
                    complete_envelope: completes,
                    completed_audit,
                })
                .await;

            match result {
                Ok(()) => {
                    let envelope = self.store.get_envelope(&envelope.id).await?;
                    let signed = self.store.get_signer(&fresh.id).await?;
                    self.dispatch_after_sign(&envelope, &signed, completes).await?;
                    return Ok(signed);
                }
                Err(StoreError::Conflict) => {
                    tracing::debug!(
                        envelope_id = %envelope.id,
                        attempt,
                        "signing raced a concurrent write, retrying"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(FlowError::UpstreamFailure(
            "signing retries exhausted under contention".to_string(),
        ))
    }

    async fn dispatch_after_sign(
        &self,
        envelope: &Envelope,
        signed: &Signer,
        completed: bool,
    ) -> Result<(), FlowError> {
        self.dispatcher.dispatch(self.notification(
            NotificationKind::SignerSigned,
            envelope,
            Some(signed),
            &envelope.owner_email,
            None,
        ));

        let signers = self.store.list_signers(&envelope.id).await?;
        if completed {
            self.dispatcher.dispatch(self.notification(
                NotificationKind::EnvelopeCompleted,
                envelope,
                None,
                &envelope.owner_email,
                Some(self.config.envelope_url(&envelope.slug)),
            ));
            for signer in &signers {
                self.dispatcher.dispatch(self.notification(
                    NotificationKind::EnvelopeCompleted,
                    envelope,
                    Some(signer),
                    &signer.email,
                    Some(self.config.envelope_url(&envelope.slug)),
                ));
            }
        } else if envelope.sequential {
            // The turn passes to the next signer, whether or not they have
            // already peeked at their link
            for next in active_signers(envelope, &signers) {
                self.dispatcher.dispatch(self.notification(
                    NotificationKind::SignerInvited,
                    envelope,
                    Some(next),
                    &next.email,
                    Some(self.config.sign_url(&next.token)),
                ));
            }
        }
        Ok(())
    }

    // ───────────────────────────────────── Declining ──────────────────────────────────────

    /// Decline to sign. Depending on the envelope's policy this either
    /// leaves co-signers unaffected or cancels the whole envelope.
    pub async fn decline(
        &self,
        token: &str,
        reason: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Signer, FlowError> {
        let signer = self.store.get_signer_by_token(token).await?;
        let envelope = self.store.get_envelope(&signer.envelope_id).await?;
        let envelope = self.expire_if_due(envelope).await?;

        if envelope.status != EnvelopeStatus::Pending {
            return Err(FlowError::InvalidState(format!(
                "cannot decline while the envelope is {}",
                envelope.status
            )));
        }
        if signer.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "signer already {}",
                signer.status
            )));
        }

        let cancels = envelope.decline_policy == DeclinePolicy::CancelEnvelope;
        let audit = entry(envelope.id, AuditAction::SignerDeclined)
            .signer_id(signer.id)
            .detail(serde_json::json!({ "reason": reason }))
            .context(ctx)
            .build();
        let cancelled_audit = cancels.then(|| {
            entry(envelope.id, AuditAction::EnvelopeCancelled)
                .detail(serde_json::json!({ "by": "decline_policy" }))
                .build()
        });

        let fired = self
            .store
            .decline_signer(&DeclineParams {
                signer_id: signer.id,
                reason: reason.map(str::to_string),
                audit,
                cancel_envelope: cancels,
                cancelled_audit,
            })
            .await?;
        if !fired {
            return Err(FlowError::InvalidState(
                "signer reached a terminal state concurrently".to_string(),
            ));
        }

        let declined = self.store.get_signer(&signer.id).await?;
        self.dispatcher.dispatch(self.notification(
            NotificationKind::SignerDeclined,
            &envelope,
            Some(&declined),
            &envelope.owner_email,
            None,
        ));
        Ok(declined)
    }

    // ───────────────────────────────────── Document access ────────────────────────────────

    /// Request a code to view a completed envelope's document. Returns the
    /// masked phone for display.
    pub async fn request_document_access(
        &self,
        token: &str,
        phone: &str,
    ) -> Result<String, FlowError> {
        let signer = self.store.get_signer_by_token(token).await?;
        let envelope = self.store.get_envelope(&signer.envelope_id).await?;
        if envelope.status != EnvelopeStatus::Completed {
            return Err(FlowError::InvalidState(
                "document access applies to completed envelopes".to_string(),
            ));
        }
        self.otp
            .request_challenge(Purpose::DocumentAccess, phone)
            .await?;
        Ok(normalize_phone(phone).map(|p| mask_phone(&p))?)
    }

    /// Confirm the code and mint a time-limited access grant. The grant, not
    /// the signer record, carries the proof; signer state is unchanged.
    pub async fn confirm_document_access(
        &self,
        token: &str,
        phone: &str,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<String, FlowError> {
        let signer = self.store.get_signer_by_token(token).await?;
        let envelope = self.store.get_envelope(&signer.envelope_id).await?;
        if envelope.status != EnvelopeStatus::Completed {
            return Err(FlowError::InvalidState(
                "document access applies to completed envelopes".to_string(),
            ));
        }

        self.otp
            .check_challenge(Purpose::DocumentAccess, phone, code)
            .await?;

        let canonical = normalize_phone(phone)?;
        self.store
            .append_audit(
                &entry(envelope.id, AuditAction::SignerPhoneVerified)
                    .signer_id(signer.id)
                    .detail(serde_json::json!({
                        "purpose": Purpose::DocumentAccess.to_string(),
                        "phone": mask_phone(&canonical),
                        "phone_canonical": canonical,
                    }))
                    .context(ctx)
                    .build(),
            )
            .await?;

        Ok(self.otp.issue_grant(envelope.id, Some(signer.id))?)
    }

    /// Fetch the document bytes with a grant token.
    pub async fn download_with_grant(&self, grant_token: &str) -> Result<Vec<u8>, FlowError> {
        let grant = self.otp.verify_grant(grant_token)?;
        let envelope = self.store.get_envelope(&grant.envelope_id).await?;
        Ok(self.objects.get(&envelope.document_key).await?)
    }

    // ───────────────────────────────────── Internals ──────────────────────────────────────

    /// Preconditions shared by filling and signing.
    async fn ensure_can_act(&self, envelope: &Envelope, signer: &Signer) -> Result<(), FlowError> {
        if envelope.status != EnvelopeStatus::Pending {
            return Err(FlowError::InvalidState(format!(
                "envelope is {}",
                envelope.status
            )));
        }
        if signer.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "signer already {}",
                signer.status
            )));
        }
        if !signer.status.has_viewed() {
            return Err(FlowError::InvalidState(
                "signer has not opened the envelope".to_string(),
            ));
        }
        if signer.require_phone_2fa && !signer.phone_verified {
            return Err(FlowError::Forbidden(
                "phone verification required first".to_string(),
            ));
        }
        if envelope.sequential {
            let signers = self.store.list_signers(&envelope.id).await?;
            let my_turn = active_signers(envelope, &signers)
                .iter()
                .any(|s| s.id == signer.id);
            if !my_turn {
                return Err(FlowError::Forbidden(
                    "waiting for earlier signers".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn ensure_verification_applies(
        &self,
        envelope: &Envelope,
        signer: &Signer,
    ) -> Result<(), FlowError> {
        if envelope.status != EnvelopeStatus::Pending {
            return Err(FlowError::InvalidState(format!(
                "envelope is {}",
                envelope.status
            )));
        }
        if signer.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "signer already {}",
                signer.status
            )));
        }
        // Verification promotes Viewed to Verified; it cannot precede the
        // first view or the stored status and the trail would disagree.
        if !signer.status.has_viewed() {
            return Err(FlowError::InvalidState(
                "signer has not opened the envelope".to_string(),
            ));
        }
        if !signer.require_phone_2fa {
            return Err(FlowError::InvalidState(
                "signer has no phone verification requirement".to_string(),
            ));
        }
        if signer.phone_verified {
            return Err(FlowError::InvalidState("phone already verified".to_string()));
        }
        Ok(())
    }
}

fn validate_field_value(kind: FieldKind, value: &str) -> Result<(), FlowError> {
    match kind {
        FieldKind::Checkbox => {
            if value != "true" && value != "false" {
                return Err(FlowError::ValidationFailed(
                    "checkbox value must be true or false".to_string(),
                ));
            }
        }
        FieldKind::Date => {
            if chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
                return Err(FlowError::ValidationFailed(
                    "date value must be YYYY-MM-DD".to_string(),
                ));
            }
        }
        FieldKind::Signature | FieldKind::Initials | FieldKind::Text => {
            if value.trim().is_empty() {
                return Err(FlowError::ValidationFailed(
                    "value must not be empty".to_string(),
                ));
            }
        }
    }
    Ok(())
}
