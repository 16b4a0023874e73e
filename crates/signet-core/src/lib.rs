//! The envelope workflow engine.
//!
//! [`SignFlow`] ties the pieces together: a [`Store`] for records and the
//! audit trail, an [`ObjectStore`] for document blobs, a notification
//! [`Dispatcher`] and the phone-verification [`OtpGate`]. Owner-facing
//! operations live in the `envelope` module, signer-link operations in
//! `signer`.
//!
//! Status transition rules are enforced here; the store stays mechanical.
//! Every transition carries its audit entry into the store so the trail and
//! the cached statuses can never drift apart.

use signet_events::{Dispatcher, Notification, NotificationKind, NotificationSink};
use signet_otp::{OtpGate, SmsProvider};
use signet_storage::{Envelope, Signer, Store};
use std::sync::Arc;

mod color;
mod config;
mod envelope;
mod error;
mod objects;
mod signer;
mod token;

pub use color::{pick_color, PALETTE};
pub use config::{ConfigError, FlowConfig};
pub use envelope::{AddFieldRequest, AddSignerRequest, CreateEnvelopeRequest};
pub use error::FlowError;
pub use objects::{MemoryObjectStore, ObjectError, ObjectStore};
pub use signer::SignerView;
pub use token::{generate_slug, generate_token};

// Re-exported so embedders only need this crate for the common path.
pub use signet_audit::RequestContext;

/// The workflow engine. Cheap to clone pieces, share behind an `Arc`.
pub struct SignFlow {
    store: Arc<dyn Store>,
    objects: Arc<dyn ObjectStore>,
    dispatcher: Dispatcher,
    otp: OtpGate,
    config: FlowConfig,
}

impl SignFlow {
    pub fn new(
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        sink: Arc<dyn NotificationSink>,
        sms: Arc<dyn SmsProvider>,
        config: FlowConfig,
    ) -> Self {
        Self {
            store,
            objects,
            dispatcher: Dispatcher::new(sink),
            otp: OtpGate::new(sms),
            config,
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    fn notification(
        &self,
        kind: NotificationKind,
        envelope: &Envelope,
        about: Option<&Signer>,
        recipient_email: &str,
        sign_url: Option<String>,
    ) -> Notification {
        Notification {
            kind,
            envelope_id: envelope.id,
            envelope_name: envelope.name.clone(),
            signer_id: about.map(|s| s.id),
            recipient_email: recipient_email.to_string(),
            sign_url,
            timestamp: chrono::Utc::now(),
        }
    }
}
