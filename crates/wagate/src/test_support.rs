use crate::error::ProtocolError;
use crate::events::EventHandler;
use crate::jid::Jid;
use crate::media::MediaKind;
use crate::protocol::{
    Connection, ConnectionHandle, DeviceRecord, OutgoingMessage, Presence, QrEvent,
    RecipientCheck, SendReceipt, UploadedMedia,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Minimal connection for unit tests: fixed login state, sends always succeed.
pub(crate) struct StubConnection {
    device: DeviceRecord,
    logged_in: bool,
    pub presence_calls: AtomicUsize,
    pub handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
}

impl StubConnection {
    pub fn new(user: &str, logged_in: bool) -> Arc<Self> {
        Arc::new(Self {
            device: DeviceRecord {
                id: Some(Jid::user(user)),
                platform: "stub".into(),
                push_name: user.into(),
            },
            logged_in,
            presence_calls: AtomicUsize::new(0),
            handlers: Mutex::new(Vec::new()),
        })
    }

    pub fn handle(user: &str, logged_in: bool) -> ConnectionHandle {
        Self::new(user, logged_in)
    }
}

#[async_trait]
impl Connection for StubConnection {
    fn device(&self) -> DeviceRecord {
        self.device.clone()
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn logout(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, ProtocolError> {
        Err(ProtocolError::QrChannel("stub has no qr stream".into()))
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(handler);
        }
    }

    async fn send_message(
        &self,
        _to: &Jid,
        _message: OutgoingMessage,
    ) -> Result<SendReceipt, ProtocolError> {
        Ok(SendReceipt {
            id: "stub-id".into(),
            timestamp: SystemTime::now(),
        })
    }

    async fn upload(&self, data: &[u8], _kind: MediaKind) -> Result<UploadedMedia, ProtocolError> {
        Ok(UploadedMedia {
            url: "stub".into(),
            direct_path: "stub".into(),
            media_key: vec![],
            file_sha256: vec![],
            file_enc_sha256: vec![],
            file_length: data.len() as u64,
        })
    }

    async fn send_presence(&self, _presence: Presence) -> Result<(), ProtocolError> {
        if self.logged_in {
            self.presence_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            Err(ProtocolError::Presence("not connected".into()))
        }
    }

    async fn check_registered(
        &self,
        _phones: &[String],
    ) -> Result<Vec<RecipientCheck>, ProtocolError> {
        Ok(vec![])
    }
}
