//! Seams to the protocol layer and the persistent device store.
//!
//! The gateway never speaks the wire protocol itself. A backend provides a
//! [`DeviceStore`] for persisted credentials and a [`ConnectionFactory`] that
//! binds a [`Connection`] to one stored device.

use crate::error::ProtocolError;
use crate::events::EventHandler;
use crate::jid::Jid;
use crate::media::MediaKind;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

pub type MessageId = String;

/// Shared handle to a live protocol connection.
pub type ConnectionHandle = Arc<dyn Connection>;

/// A device credential as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceRecord {
    /// Account address; `None` until the device has been paired.
    pub id: Option<Jid>,
    pub platform: String,
    pub push_name: String,
}

impl DeviceRecord {
    /// The session key for this device, if it has a non-blank identifier.
    pub fn key(&self) -> Option<&str> {
        self.id
            .as_ref()
            .map(|jid| jid.user.as_str())
            .filter(|user| !user.trim().is_empty())
    }
}

/// One item from the QR pairing stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrEvent {
    /// A fresh code to show to the user.
    Code(String),
    /// The phone scanned a code and the device is now linked.
    Success,
    /// No code was scanned before the stream ran out of codes.
    Timeout,
    /// The stream failed upstream.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Unavailable,
}

/// Server acknowledgement for a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: MessageId,
    pub timestamp: SystemTime,
}

/// Result of uploading encrypted media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text(String),
    Image {
        media: UploadedMedia,
        mimetype: String,
        caption: String,
    },
    Video {
        media: UploadedMedia,
        mimetype: String,
        caption: String,
    },
    Audio {
        media: UploadedMedia,
        mimetype: String,
    },
    Document {
        media: UploadedMedia,
        mimetype: String,
        file_name: String,
        title: String,
        caption: String,
    },
}

/// Whether a phone number is registered on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientCheck {
    pub target: String,
    pub is_registered: bool,
    pub resolved_address: Jid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
}

/// A protocol connection bound to one device credential.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Current view of the bound device (its id changes once paired).
    fn device(&self) -> DeviceRecord;

    /// The stored credential resolves to an authenticated identity.
    fn is_authenticated(&self) -> bool {
        self.device().id.is_some()
    }

    fn is_logged_in(&self) -> bool;

    async fn connect(&self) -> Result<(), ProtocolError>;

    async fn disconnect(&self);

    /// Log out upstream; the stored credential is invalidated for good.
    async fn logout(&self) -> Result<(), ProtocolError>;

    /// Open the QR pairing stream. Must be called before [`Connection::connect`].
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, ProtocolError>;

    /// Register a handler for inbound events.
    fn subscribe(&self, handler: Arc<dyn EventHandler>);

    async fn send_message(
        &self,
        to: &Jid,
        message: OutgoingMessage,
    ) -> Result<SendReceipt, ProtocolError>;

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, ProtocolError>;

    async fn send_presence(&self, presence: Presence) -> Result<(), ProtocolError>;

    async fn check_registered(&self, phones: &[String])
    -> Result<Vec<RecipientCheck>, ProtocolError>;
}

/// Builds connections bound to stored devices.
pub trait ConnectionFactory: Send + Sync {
    fn build(&self, device: &DeviceRecord) -> ConnectionHandle;
}

/// Persistent device credentials.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn all_devices(&self) -> Result<Vec<DeviceRecord>, ProtocolError>;

    /// The first stored device, or a fresh one when the store is empty.
    async fn first_device(&self) -> Result<DeviceRecord, ProtocolError>;

    /// Allocate a brand-new, unpaired device identity.
    async fn new_device(&self) -> Result<DeviceRecord, ProtocolError>;
}
