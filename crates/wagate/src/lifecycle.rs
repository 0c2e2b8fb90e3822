//! Batch operations over every device known to the store.
//!
//! Each traversal walks the persisted device list, not the registry. A
//! failure on one device is logged and the walk moves on.

use crate::error::Result;
use crate::events::EventSink;
use crate::protocol::{ConnectionFactory, ConnectionHandle, DeviceRecord, DeviceStore};
use crate::registry::{SessionRegistry, SessionState};
use std::sync::Arc;

/// Per-device tally of one traversal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Devices the operation was attempted on.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Devices without an identifier or without a valid credential.
    pub skipped: usize,
}

/// What to do with every session when the process shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    None,
    Disconnect,
    Logout,
}

pub struct Lifecycle {
    store: Arc<dyn DeviceStore>,
    factory: Arc<dyn ConnectionFactory>,
    registry: Arc<SessionRegistry>,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            factory,
            registry,
        }
    }

    /// Connect every stored device with a valid credential and register it.
    pub async fn auto_login(&self) -> Result<BatchSummary> {
        let devices = self.store.all_devices().await?;
        let mut summary = BatchSummary::default();

        for device in devices {
            let Some(key) = device.key().map(str::to_string) else {
                summary.skipped += 1;
                continue;
            };

            let connection = self.factory.build(&device);
            if !connection.is_authenticated() {
                summary.skipped += 1;
                continue;
            }
            connection.subscribe(EventSink::new(&key, self.registry.clone(), &connection));

            summary.attempted += 1;
            match connection.connect().await {
                Ok(()) => {
                    if let Some(previous) =
                        self.registry
                            .set(key.clone(), connection.clone(), SessionState::Paired)
                        && !Arc::ptr_eq(&previous, &connection)
                    {
                        previous.disconnect().await;
                    }
                    summary.succeeded += 1;
                    tracing::info!(session = %key, "auto-login connected");
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(session = %key, err = %e, "auto-login failed, continuing");
                }
            }
        }

        tracing::info!(?summary, "auto-login finished");
        Ok(summary)
    }

    /// Disconnect every stored device's connection.
    pub async fn auto_disconnect(&self) -> Result<BatchSummary> {
        let devices = self.store.all_devices().await?;
        let mut summary = BatchSummary::default();

        for device in devices {
            let Some((key, connection)) = self.bound_connection(&device) else {
                summary.skipped += 1;
                continue;
            };
            if !connection.is_authenticated() {
                summary.skipped += 1;
                continue;
            }

            summary.attempted += 1;
            connection.disconnect().await;
            self.registry
                .set_state_if_current(&key, &connection, SessionState::Disconnected);
            summary.succeeded += 1;
            tracing::info!(session = %key, "auto-disconnect done");
        }

        tracing::info!(?summary, "auto-disconnect finished");
        Ok(summary)
    }

    /// Log out every stored device; credentials are invalidated for good.
    pub async fn auto_logout(&self) -> Result<BatchSummary> {
        let devices = self.store.all_devices().await?;
        let mut summary = BatchSummary::default();

        for device in devices {
            let Some((key, connection)) = self.bound_connection(&device) else {
                summary.skipped += 1;
                continue;
            };
            if !connection.is_authenticated() {
                summary.skipped += 1;
                continue;
            }

            summary.attempted += 1;
            match connection.logout().await {
                Ok(()) => {
                    self.registry
                        .remove_if(&key, |s| Arc::ptr_eq(&s.connection, &connection));
                    summary.succeeded += 1;
                    tracing::info!(session = %key, "auto-logout done");
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(session = %key, err = %e, "auto-logout failed, continuing");
                }
            }
        }

        tracing::info!(?summary, "auto-logout finished");
        Ok(summary)
    }

    pub async fn run_shutdown(&self, action: ShutdownAction) -> Result<Option<BatchSummary>> {
        match action {
            ShutdownAction::None => Ok(None),
            ShutdownAction::Disconnect => self.auto_disconnect().await.map(Some),
            ShutdownAction::Logout => self.auto_logout().await.map(Some),
        }
    }

    /// The registered handle for `device`, or a freshly built one.
    fn bound_connection(&self, device: &DeviceRecord) -> Option<(String, ConnectionHandle)> {
        let key = device.key()?.to_string();
        let connection = match self.registry.get(&key) {
            Some(connection) => connection,
            None => self.factory.build(device),
        };
        Some((key, connection))
    }
}
