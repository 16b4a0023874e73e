//! In-memory Store implementation.
//!
//! Backs development and tests. All state lives behind a single mutex, so
//! each trait method is one atomic critical section, which is exactly the
//! transaction guarantee the Store contract asks a real database backend to
//! provide. Audit entries are kept per envelope in insertion order, which is
//! also timestamp order.

use async_trait::async_trait;
use chrono::Utc;
use signet_storage::{
    AddSignerParams, ApplySignedParams, AuditEntry, AuditEntryId, CreateEnvelopeParams,
    CreateFieldParams, DeclineParams, Envelope, EnvelopeId, EnvelopeStatus, Field, FieldId,
    MarkViewedParams, MarkVerifiedParams, NewAuditEntry, Signer, SignerId, SignerStatus, Store,
    StoreError, UserId,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    envelopes: HashMap<EnvelopeId, Envelope>,
    signers: HashMap<SignerId, Signer>,
    fields: HashMap<FieldId, Field>,
    audit: HashMap<EnvelopeId, Vec<AuditEntry>>,
    slugs: HashMap<String, EnvelopeId>,
    tokens: HashMap<String, SignerId>,
}

impl Inner {
    fn append(&mut self, entry: &NewAuditEntry) -> AuditEntry {
        let record = AuditEntry {
            id: AuditEntryId(Uuid::now_v7()),
            envelope_id: entry.envelope_id,
            signer_id: entry.signer_id,
            action: entry.action.clone(),
            detail: entry.detail.clone(),
            timestamp: Utc::now(),
            ip: entry.ip.clone(),
            user_agent: entry.user_agent.clone(),
        };
        self.audit
            .entry(entry.envelope_id)
            .or_default()
            .push(record.clone());
        record
    }

    fn bump(&mut self, envelope_id: &EnvelopeId) -> Result<(), StoreError> {
        let envelope = self
            .envelopes
            .get_mut(envelope_id)
            .ok_or(StoreError::NotFound)?;
        envelope.version += 1;
        envelope.updated_at = Utc::now();
        Ok(())
    }
}

/// Single-process Store over hash maps.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panic mid-test; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // ───────────────────────────────────── Envelopes ──────────────────────────────────────

    async fn create_envelope(
        &self,
        params: &CreateEnvelopeParams,
    ) -> Result<Envelope, StoreError> {
        let mut inner = self.lock();
        if inner.slugs.contains_key(&params.slug) {
            return Err(StoreError::AlreadyExists);
        }
        let now = Utc::now();
        let envelope = Envelope {
            id: EnvelopeId(Uuid::now_v7()),
            owner_id: params.owner_id,
            owner_email: params.owner_email.clone(),
            name: params.name.clone(),
            slug: params.slug.clone(),
            status: EnvelopeStatus::Draft,
            version: 1,
            sequential: params.sequential,
            decline_policy: params.decline_policy,
            expires_at: params.expires_at,
            document_key: params.document_key.clone(),
            preview_key: params.preview_key.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.slugs.insert(envelope.slug.clone(), envelope.id);
        inner.envelopes.insert(envelope.id, envelope.clone());
        Ok(envelope)
    }

    async fn get_envelope(&self, id: &EnvelopeId) -> Result<Envelope, StoreError> {
        self.lock()
            .envelopes
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_envelope_by_slug(&self, slug: &str) -> Result<Envelope, StoreError> {
        let inner = self.lock();
        let id = inner.slugs.get(slug).ok_or(StoreError::NotFound)?;
        inner.envelopes.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_envelopes_for_owner(&self, owner: &UserId) -> Result<Vec<Envelope>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<Envelope> = inner
            .envelopes
            .values()
            .filter(|e| e.owner_id == *owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update_envelope_status(
        &self,
        id: &EnvelopeId,
        from: EnvelopeStatus,
        to: EnvelopeStatus,
        audit: NewAuditEntry,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        {
            let envelope = inner.envelopes.get_mut(id).ok_or(StoreError::NotFound)?;
            if envelope.status != from {
                return Ok(false);
            }
            envelope.status = to;
        }
        inner.bump(id)?;
        inner.append(&audit);
        Ok(true)
    }

    async fn rename_envelope(
        &self,
        id: &EnvelopeId,
        name: &str,
        audit: NewAuditEntry,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .envelopes
            .get_mut(id)
            .ok_or(StoreError::NotFound)?
            .name = name.to_string();
        inner.bump(id)?;
        inner.append(&audit);
        Ok(())
    }

    async fn set_envelope_expiry(
        &self,
        id: &EnvelopeId,
        expires_at: Option<chrono::DateTime<Utc>>,
        audit: NewAuditEntry,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .envelopes
            .get_mut(id)
            .ok_or(StoreError::NotFound)?
            .expires_at = expires_at;
        inner.bump(id)?;
        inner.append(&audit);
        Ok(())
    }

    async fn delete_envelope(&self, id: &EnvelopeId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let envelope = inner.envelopes.remove(id).ok_or(StoreError::NotFound)?;
        inner.slugs.remove(&envelope.slug);
        inner.audit.remove(id);
        inner.fields.retain(|_, f| f.envelope_id != *id);
        let tokens: Vec<String> = inner
            .signers
            .values()
            .filter(|s| s.envelope_id == *id)
            .map(|s| s.token.clone())
            .collect();
        for token in tokens {
            inner.tokens.remove(&token);
        }
        inner.signers.retain(|_, s| s.envelope_id != *id);
        Ok(())
    }

    // ───────────────────────────────────── Signers ────────────────────────────────────────

    async fn add_signer(&self, params: &AddSignerParams) -> Result<Signer, StoreError> {
        let mut inner = self.lock();
        if !inner.envelopes.contains_key(&params.envelope_id) {
            return Err(StoreError::NotFound);
        }
        if inner.tokens.contains_key(&params.token) {
            return Err(StoreError::AlreadyExists);
        }
        let order_taken = inner
            .signers
            .values()
            .any(|s| s.envelope_id == params.envelope_id && s.order == params.order);
        if order_taken {
            return Err(StoreError::AlreadyExists);
        }
        let now = Utc::now();
        let signer = Signer {
            id: SignerId(Uuid::now_v7()),
            envelope_id: params.envelope_id,
            order: params.order,
            name: params.name.clone(),
            email: params.email.clone(),
            color: params.color.clone(),
            token: params.token.clone(),
            status: SignerStatus::Pending,
            require_phone_2fa: params.require_phone_2fa,
            phone_verified: false,
            viewed_at: None,
            signed_at: None,
            declined_reason: None,
            created_at: now,
            updated_at: now,
        };
        inner.tokens.insert(signer.token.clone(), signer.id);
        inner.signers.insert(signer.id, signer.clone());
        inner.bump(&params.envelope_id)?;
        Ok(signer)
    }

    async fn get_signer(&self, id: &SignerId) -> Result<Signer, StoreError> {
        self.lock()
            .signers
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_signer_by_token(&self, token: &str) -> Result<Signer, StoreError> {
        let inner = self.lock();
        let id = inner.tokens.get(token).ok_or(StoreError::NotFound)?;
        inner.signers.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_signers(&self, envelope_id: &EnvelopeId) -> Result<Vec<Signer>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<Signer> = inner
            .signers
            .values()
            .filter(|s| s.envelope_id == *envelope_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.order);
        Ok(out)
    }

    async fn mark_signer_viewed(&self, params: &MarkViewedParams) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let envelope_id = {
            let signer = inner
                .signers
                .get_mut(&params.signer_id)
                .ok_or(StoreError::NotFound)?;
            if signer.status != SignerStatus::Pending {
                return Ok(false);
            }
            signer.status = SignerStatus::Viewed;
            signer.viewed_at = Some(params.viewed_at);
            signer.updated_at = Utc::now();
            signer.envelope_id
        };
        inner.bump(&envelope_id)?;
        inner.append(&params.audit);
        Ok(true)
    }

    async fn mark_signer_verified(&self, params: &MarkVerifiedParams) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let envelope_id = {
            let signer = inner
                .signers
                .get_mut(&params.signer_id)
                .ok_or(StoreError::NotFound)?;
            if signer.phone_verified || signer.status.is_terminal() {
                return Ok(false);
            }
            signer.phone_verified = true;
            if signer.status == SignerStatus::Viewed {
                signer.status = SignerStatus::Verified;
            }
            signer.updated_at = Utc::now();
            signer.envelope_id
        };
        inner.bump(&envelope_id)?;
        inner.append(&params.audit);
        Ok(true)
    }

    async fn apply_signed(&self, params: &ApplySignedParams) -> Result<(), StoreError> {
        let mut inner = self.lock();
        {
            let envelope = inner
                .envelopes
                .get(&params.envelope_id)
                .ok_or(StoreError::NotFound)?;
            if envelope.version != params.expected_version {
                return Err(StoreError::Conflict);
            }
        }
        {
            let signer = inner
                .signers
                .get_mut(&params.signer_id)
                .ok_or(StoreError::NotFound)?;
            if signer.status.is_terminal() {
                return Err(StoreError::Conflict);
            }
            signer.status = SignerStatus::Signed;
            signer.signed_at = Some(params.signed_at);
            signer.updated_at = Utc::now();
        }
        inner.bump(&params.envelope_id)?;
        inner.append(&params.audit);
        if params.complete_envelope {
            let envelope = inner
                .envelopes
                .get_mut(&params.envelope_id)
                .ok_or(StoreError::NotFound)?;
            envelope.status = EnvelopeStatus::Completed;
            if let Some(completed) = &params.completed_audit {
                inner.append(completed);
            }
        }
        Ok(())
    }

    async fn decline_signer(&self, params: &DeclineParams) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let envelope_id = {
            let signer = inner
                .signers
                .get_mut(&params.signer_id)
                .ok_or(StoreError::NotFound)?;
            if signer.status.is_terminal() {
                return Ok(false);
            }
            signer.status = SignerStatus::Declined;
            signer.declined_reason = params.reason.clone();
            signer.updated_at = Utc::now();
            signer.envelope_id
        };
        inner.bump(&envelope_id)?;
        inner.append(&params.audit);
        if params.cancel_envelope {
            let cancelled = {
                let envelope = inner
                    .envelopes
                    .get_mut(&envelope_id)
                    .ok_or(StoreError::NotFound)?;
                if envelope.status == EnvelopeStatus::Pending {
                    envelope.status = EnvelopeStatus::Cancelled;
                    true
                } else {
                    false
                }
            };
            if cancelled {
                if let Some(audit) = &params.cancelled_audit {
                    inner.append(audit);
                }
            }
        }
        Ok(true)
    }

    // ───────────────────────────────────── Fields ─────────────────────────────────────────

    async fn create_field(&self, params: &CreateFieldParams) -> Result<Field, StoreError> {
        let mut inner = self.lock();
        if !inner.envelopes.contains_key(&params.envelope_id) {
            return Err(StoreError::NotFound);
        }
        let signer = inner
            .signers
            .get(&params.signer_id)
            .ok_or(StoreError::NotFound)?;
        if signer.envelope_id != params.envelope_id {
            return Err(StoreError::NotFound);
        }
        let now = Utc::now();
        let field = Field {
            id: FieldId(Uuid::now_v7()),
            envelope_id: params.envelope_id,
            signer_id: params.signer_id,
            kind: params.kind,
            page: params.page,
            x: params.x,
            y: params.y,
            required: params.required,
            value: None,
            created_at: now,
            updated_at: now,
        };
        inner.fields.insert(field.id, field.clone());
        inner.bump(&params.envelope_id)?;
        Ok(field)
    }

    async fn get_field(&self, id: &FieldId) -> Result<Field, StoreError> {
        self.lock()
            .fields
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_fields(&self, envelope_id: &EnvelopeId) -> Result<Vec<Field>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<Field> = inner
            .fields
            .values()
            .filter(|f| f.envelope_id == *envelope_id)
            .cloned()
            .collect();
        out.sort_by_key(|f| f.id.0);
        Ok(out)
    }

    async fn list_fields_for_signer(&self, signer_id: &SignerId) -> Result<Vec<Field>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<Field> = inner
            .fields
            .values()
            .filter(|f| f.signer_id == *signer_id)
            .cloned()
            .collect();
        out.sort_by_key(|f| f.id.0);
        Ok(out)
    }

    async fn set_field_value(&self, id: &FieldId, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let envelope_id = {
            let field = inner.fields.get_mut(id).ok_or(StoreError::NotFound)?;
            field.value = Some(value.to_string());
            field.updated_at = Utc::now();
            field.envelope_id
        };
        inner.bump(&envelope_id)?;
        Ok(())
    }

    // ───────────────────────────────────── Audit trail ────────────────────────────────────

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let mut inner = self.lock();
        if !inner.envelopes.contains_key(&entry.envelope_id) {
            return Err(StoreError::NotFound);
        }
        Ok(inner.append(entry))
    }

    async fn list_audit(&self, envelope_id: &EnvelopeId) -> Result<Vec<AuditEntry>, StoreError> {
        let inner = self.lock();
        if !inner.envelopes.contains_key(envelope_id) {
            return Err(StoreError::NotFound);
        }
        Ok(inner.audit.get(envelope_id).cloned().unwrap_or_default())
    }
}
