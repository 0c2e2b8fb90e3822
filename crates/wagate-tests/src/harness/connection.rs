use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use wagate::{
    Connection, ConnectionFactory, ConnectionHandle, DeviceRecord, EventHandler, InboundEvent,
    Jid, MediaKind, OutgoingMessage, Presence, ProtocolError, QrEvent, RecipientCheck,
    SendReceipt, UploadedMedia,
};

/// How connections built for one device key behave.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub fail_connect: bool,
    pub fail_qr_channel: bool,
    pub fail_logout: bool,
    /// Codes queued on the QR stream as soon as it is opened.
    pub qr_codes: Vec<String>,
    /// Close the QR stream right after the queued codes.
    pub close_qr_after_codes: bool,
    /// Recipient users whose sends fail upstream.
    pub failing_recipients: HashSet<String>,
    pub send_delay: Option<Duration>,
}

impl Plan {
    pub fn with_qr(codes: &[&str]) -> Self {
        Self {
            qr_codes: codes.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// Upstream call counters shared by every connection of one factory.
#[derive(Debug, Default)]
pub struct Stats {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub logouts: AtomicUsize,
    pub uploads: AtomicUsize,
    pub sends: AtomicUsize,
    pub presences: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeConnection {
    device: Mutex<DeviceRecord>,
    plan: Plan,
    stats: Arc<Stats>,
    logged_in: AtomicBool,
    qr_tx: Mutex<Option<mpsc::Sender<QrEvent>>>,
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
    pub sent: Mutex<Vec<(Jid, OutgoingMessage)>>,
}

impl FakeConnection {
    fn new(device: DeviceRecord, plan: Plan, stats: Arc<Stats>) -> Self {
        Self {
            device: Mutex::new(device),
            plan,
            stats,
            logged_in: AtomicBool::new(false),
            qr_tx: Mutex::new(None),
            handlers: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue another code on the open QR stream.
    pub async fn push_qr(&self, code: &str) {
        let tx = self.qr_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(QrEvent::Code(code.to_string())).await;
        }
    }

    /// Close the QR stream without a login.
    pub fn close_qr(&self) {
        self.qr_tx.lock().unwrap().take();
    }

    /// The phone scanned the code: the device becomes `user`.
    pub async fn complete_login(&self, user: &str) {
        let jid = Jid::user(user);
        self.device.lock().unwrap().id = Some(jid.clone());
        self.logged_in.store(true, Ordering::SeqCst);

        let tx = self.qr_tx.lock().unwrap().take();
        if let Some(tx) = tx {
            let _ = tx.send(QrEvent::Success).await;
        }
        self.emit(InboundEvent::PairSuccess { id: jid });
    }

    /// Deliver `event` to every subscribed handler.
    pub fn emit(&self, event: InboundEvent) {
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            handler.handle(event.clone());
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn sent_messages(&self) -> Vec<(Jid, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn device(&self) -> DeviceRecord {
        self.device.lock().unwrap().clone()
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        if self.plan.fail_connect {
            return Err(ProtocolError::Connect("connection refused".to_string()));
        }
        if self.is_authenticated() {
            self.logged_in.store(true, Ordering::SeqCst);
            self.emit(InboundEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.stats.logouts.fetch_add(1, Ordering::SeqCst);
        if self.plan.fail_logout {
            return Err(ProtocolError::Logout("server rejected logout".to_string()));
        }
        self.logged_in.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, ProtocolError> {
        if self.plan.fail_qr_channel {
            return Err(ProtocolError::QrChannel("already connected".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        for code in &self.plan.qr_codes {
            let _ = tx.try_send(QrEvent::Code(code.clone()));
        }
        if !self.plan.close_qr_after_codes {
            *self.qr_tx.lock().unwrap() = Some(tx);
        }
        Ok(rx)
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.lock().unwrap().push(handler);
    }

    async fn send_message(
        &self,
        to: &Jid,
        message: OutgoingMessage,
    ) -> Result<SendReceipt, ProtocolError> {
        let n = self.stats.sends.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.plan.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.plan.failing_recipients.contains(&to.user) {
            return Err(ProtocolError::Send(format!("{to} is unreachable")));
        }
        self.sent.lock().unwrap().push((to.clone(), message));
        Ok(SendReceipt {
            id: format!("msg-{n}"),
            timestamp: SystemTime::now(),
        })
    }

    async fn upload(&self, data: &[u8], _kind: MediaKind) -> Result<UploadedMedia, ProtocolError> {
        let n = self.stats.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UploadedMedia {
            url: format!("https://mmg.test/{n}.enc"),
            direct_path: format!("/v/{n}"),
            media_key: vec![7; 32],
            file_sha256: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_length: data.len() as u64,
        })
    }

    async fn send_presence(&self, _presence: Presence) -> Result<(), ProtocolError> {
        if !self.is_logged_in() {
            return Err(ProtocolError::Presence("not connected".to_string()));
        }
        self.stats.presences.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_registered(
        &self,
        phones: &[String],
    ) -> Result<Vec<RecipientCheck>, ProtocolError> {
        Ok(phones
            .iter()
            .map(|phone| RecipientCheck {
                target: phone.clone(),
                // Numbers starting with 0 are never registered.
                is_registered: !phone.starts_with('0'),
                resolved_address: Jid::user(phone.trim_start_matches('+')),
                business_name: None,
            })
            .collect())
    }
}

/// Builds [`FakeConnection`]s, following the [`Plan`] registered for each
/// device key.
#[derive(Default)]
pub struct FakeFactory {
    plans: Mutex<HashMap<String, Plan>>,
    default_plan: Mutex<Plan>,
    built: Mutex<Vec<Arc<FakeConnection>>>,
    pub stats: Arc<Stats>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self, key: &str, plan: Plan) {
        self.plans.lock().unwrap().insert(key.to_string(), plan);
    }

    /// Plan for devices without a specific one, including unpaired devices.
    pub fn default_plan(&self, plan: Plan) {
        *self.default_plan.lock().unwrap() = plan;
    }

    pub fn built(&self) -> Vec<Arc<FakeConnection>> {
        self.built.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        self.built
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection built yet")
    }
}

impl ConnectionFactory for FakeFactory {
    fn build(&self, device: &DeviceRecord) -> ConnectionHandle {
        let plan = device
            .key()
            .and_then(|key| self.plans.lock().unwrap().get(key).cloned())
            .unwrap_or_else(|| self.default_plan.lock().unwrap().clone());
        let connection = Arc::new(FakeConnection::new(
            device.clone(),
            plan,
            self.stats.clone(),
        ));
        tracing::debug!(device = ?device.id, "built fake connection");
        self.built.lock().unwrap().push(connection.clone());
        connection
    }
}
