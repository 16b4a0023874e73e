use chrono::{Duration, Utc};
use signet_storage::{
    AddSignerParams, ApplySignedParams, CreateEnvelopeParams, CreateFieldParams, DeclineParams,
    DeclinePolicy, EnvelopeStatus, FieldKind, MarkViewedParams, MarkVerifiedParams, NewAuditEntry,
    SignerStatus, Store, StoreError, UserId,
};
use signet_store_memory::MemoryStore;
use uuid::Uuid;

fn envelope_params(owner_id: UserId, slug: &str) -> CreateEnvelopeParams {
    CreateEnvelopeParams {
        owner_id,
        owner_email: "owner@example.com".to_string(),
        name: "Lease Agreement".to_string(),
        slug: slug.to_string(),
        sequential: false,
        decline_policy: DeclinePolicy::SiblingsContinue,
        expires_at: None,
        document_key: format!("documents/{}.pdf", slug),
        preview_key: None,
    }
}

fn signer_params(
    envelope_id: signet_storage::EnvelopeId,
    order: i32,
    email: &str,
    token: &str,
) -> AddSignerParams {
    AddSignerParams {
        envelope_id,
        order,
        name: email.split('@').next().unwrap_or("signer").to_string(),
        email: email.to_string(),
        color: "#4F46E5".to_string(),
        token: token.to_string(),
        require_phone_2fa: false,
    }
}

fn audit(
    envelope_id: signet_storage::EnvelopeId,
    signer_id: Option<signet_storage::SignerId>,
    action: &str,
) -> NewAuditEntry {
    NewAuditEntry {
        envelope_id,
        signer_id,
        action: action.to_string(),
        detail: serde_json::Value::Null,
        ip: None,
        user_agent: None,
    }
}

#[tokio::test]
async fn end_to_end_happy_path() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());

    let envelope = s.create_envelope(&envelope_params(owner, "lease-1")).await.unwrap();
    assert_eq!(envelope.status, EnvelopeStatus::Draft);
    assert_eq!(envelope.version, 1);

    let a = s
        .add_signer(&signer_params(envelope.id, 1, "ada@example.com", "tok-a"))
        .await
        .unwrap();
    let b = s
        .add_signer(&signer_params(envelope.id, 2, "bob@example.com", "tok-b"))
        .await
        .unwrap();
    assert_eq!(a.status, SignerStatus::Pending);

    // Fields for both signers
    let field = s
        .create_field(&CreateFieldParams {
            envelope_id: envelope.id,
            signer_id: a.id,
            kind: FieldKind::Signature,
            page: 1,
            x: 0.2,
            y: 0.8,
            required: true,
        })
        .await
        .unwrap();
    assert!(field.value.is_none());

    // Send
    let sent = s
        .update_envelope_status(
            &envelope.id,
            EnvelopeStatus::Draft,
            EnvelopeStatus::Pending,
            audit(envelope.id, None, "envelope.sent"),
        )
        .await
        .unwrap();
    assert!(sent);

    // Signer A views, fills, signs
    assert!(s
        .mark_signer_viewed(&MarkViewedParams {
            signer_id: a.id,
            viewed_at: Utc::now(),
            audit: audit(envelope.id, Some(a.id), "signer.viewed"),
        })
        .await
        .unwrap());

    s.set_field_value(&field.id, "Ada Lovelace").await.unwrap();
    let filled = s.get_field(&field.id).await.unwrap();
    assert_eq!(filled.value.as_deref(), Some("Ada Lovelace"));

    let current = s.get_envelope(&envelope.id).await.unwrap();
    s.apply_signed(&ApplySignedParams {
        envelope_id: envelope.id,
        expected_version: current.version,
        signer_id: a.id,
        signed_at: Utc::now(),
        audit: audit(envelope.id, Some(a.id), "signer.signed"),
        complete_envelope: false,
        completed_audit: None,
    })
    .await
    .unwrap();

    // Signer B signs last; this completes the envelope
    let current = s.get_envelope(&envelope.id).await.unwrap();
    s.apply_signed(&ApplySignedParams {
        envelope_id: envelope.id,
        expected_version: current.version,
        signer_id: b.id,
        signed_at: Utc::now(),
        audit: audit(envelope.id, Some(b.id), "signer.signed"),
        complete_envelope: true,
        completed_audit: Some(audit(envelope.id, None, "envelope.completed")),
    })
    .await
    .unwrap();

    let done = s.get_envelope(&envelope.id).await.unwrap();
    assert_eq!(done.status, EnvelopeStatus::Completed);

    let trail = s.list_audit(&envelope.id).await.unwrap();
    let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec![
            "envelope.sent",
            "signer.viewed",
            "signer.signed",
            "signer.signed",
            "envelope.completed",
        ]
    );
    // Timestamps ascend with insertion order
    assert!(trail.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn unique_constraints() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());

    let envelope = s.create_envelope(&envelope_params(owner, "dup")).await.unwrap();
    let clash = s.create_envelope(&envelope_params(owner, "dup")).await;
    assert!(matches!(clash, Err(StoreError::AlreadyExists)));

    s.add_signer(&signer_params(envelope.id, 1, "ada@example.com", "tok-1"))
        .await
        .unwrap();
    // Token reuse rejected, even across envelopes
    let other = s.create_envelope(&envelope_params(owner, "other")).await.unwrap();
    let token_clash = s
        .add_signer(&signer_params(other.id, 1, "bob@example.com", "tok-1"))
        .await;
    assert!(matches!(token_clash, Err(StoreError::AlreadyExists)));

    // Order reuse within an envelope rejected
    let order_clash = s
        .add_signer(&signer_params(envelope.id, 1, "bob@example.com", "tok-2"))
        .await;
    assert!(matches!(order_clash, Err(StoreError::AlreadyExists)));
}

#[tokio::test]
async fn conditional_status_transition_fires_once() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());
    let envelope = s.create_envelope(&envelope_params(owner, "once")).await.unwrap();

    let first = s
        .update_envelope_status(
            &envelope.id,
            EnvelopeStatus::Draft,
            EnvelopeStatus::Pending,
            audit(envelope.id, None, "envelope.sent"),
        )
        .await
        .unwrap();
    let second = s
        .update_envelope_status(
            &envelope.id,
            EnvelopeStatus::Draft,
            EnvelopeStatus::Pending,
            audit(envelope.id, None, "envelope.sent"),
        )
        .await
        .unwrap();

    assert!(first);
    assert!(!second, "transition from a stale status must not fire");

    let trail = s.list_audit(&envelope.id).await.unwrap();
    assert_eq!(trail.len(), 1, "no audit entry for the no-op call");
}

#[tokio::test]
async fn viewed_and_verified_are_idempotent() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());
    let envelope = s.create_envelope(&envelope_params(owner, "idem")).await.unwrap();
    let signer = s
        .add_signer(&signer_params(envelope.id, 1, "ada@example.com", "tok-a"))
        .await
        .unwrap();

    let view = MarkViewedParams {
        signer_id: signer.id,
        viewed_at: Utc::now(),
        audit: audit(envelope.id, Some(signer.id), "signer.viewed"),
    };
    assert!(s.mark_signer_viewed(&view).await.unwrap());
    assert!(!s.mark_signer_viewed(&view).await.unwrap());

    let verify = MarkVerifiedParams {
        signer_id: signer.id,
        audit: audit(envelope.id, Some(signer.id), "signer.phone_verified"),
    };
    assert!(s.mark_signer_verified(&verify).await.unwrap());
    assert!(!s.mark_signer_verified(&verify).await.unwrap());

    let signer = s.get_signer(&signer.id).await.unwrap();
    assert_eq!(signer.status, SignerStatus::Verified);
    assert!(signer.phone_verified);

    let trail = s.list_audit(&envelope.id).await.unwrap();
    assert_eq!(trail.len(), 2, "one entry per transition that fired");
}

#[tokio::test]
async fn stale_version_is_a_conflict() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());
    let envelope = s.create_envelope(&envelope_params(owner, "stale")).await.unwrap();
    let signer = s
        .add_signer(&signer_params(envelope.id, 1, "ada@example.com", "tok-a"))
        .await
        .unwrap();

    let seen = s.get_envelope(&envelope.id).await.unwrap().version;

    // A concurrent field write bumps the version after our read
    let field = s
        .create_field(&CreateFieldParams {
            envelope_id: envelope.id,
            signer_id: signer.id,
            kind: FieldKind::Text,
            page: 1,
            x: 0.1,
            y: 0.1,
            required: false,
        })
        .await
        .unwrap();
    s.set_field_value(&field.id, "v").await.unwrap();

    let result = s
        .apply_signed(&ApplySignedParams {
            envelope_id: envelope.id,
            expected_version: seen,
            signer_id: signer.id,
            signed_at: Utc::now(),
            audit: audit(envelope.id, Some(signer.id), "signer.signed"),
            complete_envelope: false,
            completed_audit: None,
        })
        .await;
    assert!(matches!(result, Err(StoreError::Conflict)));

    // No partial effects
    let signer = s.get_signer(&signer.id).await.unwrap();
    assert_eq!(signer.status, SignerStatus::Pending);
    let trail = s.list_audit(&envelope.id).await.unwrap();
    assert!(trail.is_empty());
}

#[tokio::test]
async fn decline_with_cancellation() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());
    let envelope = s.create_envelope(&envelope_params(owner, "decl")).await.unwrap();
    let signer = s
        .add_signer(&signer_params(envelope.id, 1, "ada@example.com", "tok-a"))
        .await
        .unwrap();
    s.update_envelope_status(
        &envelope.id,
        EnvelopeStatus::Draft,
        EnvelopeStatus::Pending,
        audit(envelope.id, None, "envelope.sent"),
    )
    .await
    .unwrap();

    let fired = s
        .decline_signer(&DeclineParams {
            signer_id: signer.id,
            reason: Some("wrong terms".to_string()),
            audit: audit(envelope.id, Some(signer.id), "signer.declined"),
            cancel_envelope: true,
            cancelled_audit: Some(audit(envelope.id, None, "envelope.cancelled")),
        })
        .await
        .unwrap();
    assert!(fired);

    let signer = s.get_signer(&signer.id).await.unwrap();
    assert_eq!(signer.status, SignerStatus::Declined);
    assert_eq!(signer.declined_reason.as_deref(), Some("wrong terms"));

    let envelope = s.get_envelope(&envelope.id).await.unwrap();
    assert_eq!(envelope.status, EnvelopeStatus::Cancelled);

    // Declining a terminal signer is a no-op
    let again = s
        .decline_signer(&DeclineParams {
            signer_id: signer.id,
            reason: None,
            audit: audit(envelope.id, Some(signer.id), "signer.declined"),
            cancel_envelope: false,
            cancelled_audit: None,
        })
        .await
        .unwrap();
    assert!(!again);
}

#[tokio::test]
async fn delete_envelope_purges_everything() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());
    let envelope = s.create_envelope(&envelope_params(owner, "purge")).await.unwrap();
    let signer = s
        .add_signer(&signer_params(envelope.id, 1, "ada@example.com", "tok-a"))
        .await
        .unwrap();
    let field = s
        .create_field(&CreateFieldParams {
            envelope_id: envelope.id,
            signer_id: signer.id,
            kind: FieldKind::Signature,
            page: 1,
            x: 0.5,
            y: 0.5,
            required: true,
        })
        .await
        .unwrap();
    s.append_audit(&audit(envelope.id, None, "envelope.sent"))
        .await
        .unwrap();

    s.delete_envelope(&envelope.id).await.unwrap();

    assert!(matches!(s.get_envelope(&envelope.id).await, Err(StoreError::NotFound)));
    assert!(matches!(s.get_signer(&signer.id).await, Err(StoreError::NotFound)));
    assert!(matches!(s.get_field(&field.id).await, Err(StoreError::NotFound)));
    assert!(matches!(
        s.get_signer_by_token("tok-a").await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(s.list_audit(&envelope.id).await, Err(StoreError::NotFound)));

    // Slug and token are free for reuse after the purge
    s.create_envelope(&envelope_params(owner, "purge")).await.unwrap();
}

#[tokio::test]
async fn owner_listing_is_newest_first_and_isolated() {
    let s = MemoryStore::new();
    let alice = UserId(Uuid::now_v7());
    let bob = UserId(Uuid::now_v7());

    s.create_envelope(&envelope_params(alice, "a-1")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    s.create_envelope(&envelope_params(alice, "a-2")).await.unwrap();
    s.create_envelope(&envelope_params(bob, "b-1")).await.unwrap();

    let listed = s.list_envelopes_for_owner(&alice).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].slug, "a-2");
    assert_eq!(listed[1].slug, "a-1");
}

#[tokio::test]
async fn signers_list_in_order_and_fields_by_signer() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());
    let envelope = s.create_envelope(&envelope_params(owner, "ord")).await.unwrap();

    // Insert out of order
    let second = s
        .add_signer(&signer_params(envelope.id, 2, "bob@example.com", "tok-b"))
        .await
        .unwrap();
    let first = s
        .add_signer(&signer_params(envelope.id, 1, "ada@example.com", "tok-a"))
        .await
        .unwrap();

    let listed = s.list_signers(&envelope.id).await.unwrap();
    assert_eq!(listed[0].id, first.id);
    assert_eq!(listed[1].id, second.id);

    for (signer, n) in [(first.id, 2), (second.id, 1)] {
        for _ in 0..n {
            s.create_field(&CreateFieldParams {
                envelope_id: envelope.id,
                signer_id: signer,
                kind: FieldKind::Text,
                page: 1,
                x: 0.0,
                y: 0.0,
                required: false,
            })
            .await
            .unwrap();
        }
    }
    assert_eq!(s.list_fields(&envelope.id).await.unwrap().len(), 3);
    assert_eq!(s.list_fields_for_signer(&first.id).await.unwrap().len(), 2);
    assert_eq!(s.list_fields_for_signer(&second.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn expiry_can_be_set_and_cleared() {
    let s = MemoryStore::new();
    let owner = UserId(Uuid::now_v7());
    let envelope = s.create_envelope(&envelope_params(owner, "exp")).await.unwrap();

    let due = Utc::now() + Duration::days(7);
    s.set_envelope_expiry(
        &envelope.id,
        Some(due),
        audit(envelope.id, None, "envelope.due_date_changed"),
    )
    .await
    .unwrap();
    assert_eq!(s.get_envelope(&envelope.id).await.unwrap().expires_at, Some(due));

    s.set_envelope_expiry(
        &envelope.id,
        None,
        audit(envelope.id, None, "envelope.due_date_changed"),
    )
    .await
    .unwrap();
    assert_eq!(s.get_envelope(&envelope.id).await.unwrap().expires_at, None);

    let envelope = s.get_envelope(&envelope.id).await.unwrap();
    assert_eq!(envelope.version, 3, "each mutation bumps the version");
}
