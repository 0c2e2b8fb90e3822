use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use wagate::{DeviceRecord, DeviceStore, ProtocolError};

/// Device store backed by a vector.
pub struct MemoryDeviceStore {
    devices: Mutex<Vec<DeviceRecord>>,
    pub new_device_calls: AtomicUsize,
    pub first_device_calls: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryDeviceStore {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices: Mutex::new(devices),
            new_device_calls: AtomicUsize::new(0),
            first_device_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn push(&self, device: DeviceRecord) {
        self.devices.lock().unwrap().push(device);
    }

    /// Make every later call fail.
    pub fn break_store(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ProtocolError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProtocolError::Store("store unavailable".to_string()));
        }
        Ok(())
    }

    fn fresh() -> DeviceRecord {
        DeviceRecord {
            id: None,
            platform: "test".to_string(),
            push_name: String::new(),
        }
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn all_devices(&self) -> Result<Vec<DeviceRecord>, ProtocolError> {
        self.check()?;
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn first_device(&self) -> Result<DeviceRecord, ProtocolError> {
        self.check()?;
        self.first_device_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .devices
            .lock()
            .unwrap()
            .first()
            .cloned()
            .unwrap_or_else(Self::fresh))
    }

    async fn new_device(&self) -> Result<DeviceRecord, ProtocolError> {
        self.check()?;
        self.new_device_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::fresh())
    }
}
