//! Notification fan-out for envelope workflow events.
//!
//! This crate defines the NotificationSink trait that allows different
//! delivery backends behind the workflow engine:
//! - Memory (single process, tokio broadcast channels) for development and tests
//! - An email or webhook sink in a real deployment
//!
//! Delivery is advisory. The workflow engine dispatches notifications in the
//! background and never fails an operation because a notification could not
//! be delivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use signet_storage::{EnvelopeId, SignerId};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const CHANNEL_CAPACITY: usize = 100;

/// Kind of workflow event a notification announces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A signer has been invited to sign and should receive their link.
    SignerInvited,
    /// A signer finished signing; sent to the envelope owner.
    SignerSigned,
    /// A signer declined; sent to the envelope owner.
    SignerDeclined,
    /// Every signer finished; sent to the owner and to all signers.
    EnvelopeCompleted,
}

/// A single notification addressed to one recipient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub envelope_id: EnvelopeId,
    pub envelope_name: String,
    /// The signer the event is about, if any. For `SignerInvited` this is
    /// also the recipient.
    pub signer_id: Option<SignerId>,
    pub recipient_email: String,
    /// Access link for the recipient, present on invitations and
    /// completion notices.
    pub sign_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Error type for notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Stream of notifications for one envelope.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// Delivery backend for workflow notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a single notification to its recipient.
    async fn deliver(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// In-memory sink using tokio broadcast channels, keyed by envelope.
///
/// Notifications are only visible within a single process. Subscribers that
/// attach after a notification was delivered do not see it.
pub struct MemorySink {
    channels: Arc<DashMap<EnvelopeId, broadcast::Sender<Notification>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
        }
    }

    fn get_or_create_channel(&self, envelope_id: &EnvelopeId) -> broadcast::Sender<Notification> {
        self.channels
            .entry(*envelope_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribe to notifications delivered for one envelope.
    pub fn subscribe(&self, envelope_id: &EnvelopeId) -> NotificationStream {
        let rx = self.get_or_create_channel(envelope_id).subscribe();
        // Lagged receivers drop the overflowed notifications
        let stream = BroadcastStream::new(rx).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, notification: Notification) -> Result<(), NotifyError> {
        let tx = self.get_or_create_channel(&notification.envelope_id);

        // No subscribers is fine
        let _ = tx.send(notification);

        Ok(())
    }
}

/// Sink that records every delivery, for assertions in tests.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: Notification) -> Result<(), NotifyError> {
        self.delivered.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Fire-and-forget dispatch over a sink.
///
/// Failures are logged and swallowed; workflow operations never block on or
/// fail because of delivery.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Hand a notification to the sink in a background task.
    pub fn dispatch(&self, notification: Notification) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let envelope_id = notification.envelope_id;
            let kind = notification.kind;
            if let Err(err) = sink.deliver(notification).await {
                tracing::warn!(
                    envelope_id = %envelope_id,
                    ?kind,
                    error = %err,
                    "notification delivery failed"
                );
            }
        });
    }

    pub fn dispatch_all(&self, notifications: Vec<Notification>) {
        for n in notifications {
            self.dispatch(n);
        }
    }
}
