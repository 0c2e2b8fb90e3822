pub mod connection;
pub mod store;

use connection::FakeFactory;
use std::sync::Arc;
use store::MemoryDeviceStore;
use wagate::{DeviceRecord, Gateway, GatewayOptions, Jid};

/// A stored device that has already been paired as `user`.
pub fn paired_device(user: &str) -> DeviceRecord {
    DeviceRecord {
        id: Some(Jid::user(user)),
        platform: "android".to_string(),
        push_name: format!("device {user}"),
    }
}

/// A stored device that was never paired.
pub fn unpaired_device() -> DeviceRecord {
    DeviceRecord {
        id: None,
        platform: "android".to_string(),
        push_name: String::new(),
    }
}

/// Everything a flow test needs, wired together.
pub struct TestGateway {
    pub gateway: Arc<Gateway>,
    pub store: Arc<MemoryDeviceStore>,
    pub factory: Arc<FakeFactory>,
}

impl TestGateway {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self::with_concurrency(devices, wagate::dispatch::DEFAULT_MAX_CONCURRENCY)
    }

    pub fn with_concurrency(devices: Vec<DeviceRecord>, max_concurrency: usize) -> Self {
        crate::init_tracing();
        let store = Arc::new(MemoryDeviceStore::new(devices));
        let factory = Arc::new(FakeFactory::new());
        let gateway = Gateway::new(
            store.clone(),
            factory.clone(),
            GatewayOptions { max_concurrency },
        );
        Self {
            gateway,
            store,
            factory,
        }
    }

    /// Log every stored device in and return the gateway.
    pub async fn logged_in(devices: Vec<DeviceRecord>) -> Self {
        let harness = Self::new(devices);
        harness
            .gateway
            .auto_login()
            .await
            .expect("auto-login over the memory store");
        harness
    }
}
