//! Inbound events from the protocol layer.

use crate::jid::Jid;
use crate::protocol::{Connection, ConnectionHandle, MessageId};
use crate::registry::{SessionRegistry, SessionState};
use serde::Serialize;
use std::sync::{Arc, Weak};

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub id: MessageId,
    pub chat: Jid,
    pub sender: Jid,
    /// Plain conversation text, if the message carried any.
    pub text: Option<String>,
}

/// Delivery-state notification for previously sent messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptEvent {
    pub chat: Jid,
    pub message_ids: Vec<MessageId>,
    /// Upstream receipt type descriptor, as text.
    pub receipt_type: String,
}

/// Every event category the gateway distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(MessageEvent),
    Receipt(ReceiptEvent),
    /// The device was linked by scanning a QR code.
    PairSuccess { id: Jid },
    Connected,
    Disconnected,
    LoggedOut { reason: String },
    /// Anything else; accepted and ignored.
    Other { kind: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Sent,
    Delivered,
    Read,
}

/// Classify a receipt descriptor by case-sensitive substring, in priority
/// order `sender`, `Delivered`, `Read`.
pub fn classify_receipt(descriptor: &str) -> Option<ReceiptKind> {
    if descriptor.contains("sender") {
        Some(ReceiptKind::Sent)
    } else if descriptor.contains("Delivered") {
        Some(ReceiptKind::Delivered)
    } else if descriptor.contains("Read") {
        Some(ReceiptKind::Read)
    } else {
        None
    }
}

/// Receives events pushed by a connection.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: InboundEvent);
}

/// Logs inbound traffic for one session and moves its registry state on
/// login, disconnect and logout.
///
/// A sink is bound to the connection it is subscribed to. Once that
/// connection has been replaced in the registry its events are still logged
/// but no longer touch the entry.
pub struct EventSink {
    key: String,
    registry: Arc<SessionRegistry>,
    connection: Weak<dyn Connection>,
}

impl EventSink {
    pub fn new(
        key: impl Into<String>,
        registry: Arc<SessionRegistry>,
        connection: &ConnectionHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            registry,
            connection: Arc::downgrade(connection),
        })
    }

    fn transition(&self, state: SessionState) {
        let moved = self
            .connection
            .upgrade()
            .is_some_and(|conn| self.registry.set_state_if_current(&self.key, &conn, state));
        if !moved {
            tracing::debug!(
                session = %self.key,
                ?state,
                "event from a replaced connection ignored"
            );
        }
    }
}

impl EventHandler for EventSink {
    fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::Message(msg) => {
                tracing::info!(
                    session = %self.key,
                    chat = %msg.chat,
                    from = %msg.sender,
                    id = %msg.id,
                    text = msg.text.as_deref().unwrap_or(""),
                    "received a message"
                );
            }
            InboundEvent::Receipt(receipt) => {
                let kind = classify_receipt(&receipt.receipt_type);
                for id in &receipt.message_ids {
                    match kind {
                        Some(kind) => tracing::info!(
                            session = %self.key,
                            chat = %receipt.chat,
                            message_id = %id,
                            ?kind,
                            "receipt"
                        ),
                        None => tracing::debug!(
                            session = %self.key,
                            chat = %receipt.chat,
                            message_id = %id,
                            descriptor = %receipt.receipt_type,
                            "unclassified receipt"
                        ),
                    }
                }
            }
            InboundEvent::PairSuccess { id } => {
                tracing::info!(session = %self.key, device = %id, "pairing succeeded");
                self.transition(SessionState::Paired);
            }
            InboundEvent::Connected => {
                tracing::info!(session = %self.key, "connected");
                self.transition(SessionState::Paired);
            }
            InboundEvent::Disconnected => {
                tracing::info!(session = %self.key, "disconnected");
                self.transition(SessionState::Disconnected);
            }
            InboundEvent::LoggedOut { reason } => {
                tracing::warn!(session = %self.key, %reason, "logged out upstream");
                self.transition(SessionState::LoggedOut);
            }
            InboundEvent::Other { kind } => {
                tracing::trace!(session = %self.key, %kind, "ignored event");
            }
        }
    }
}
