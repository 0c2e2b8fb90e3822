//! QR-code pairing of new or re-linking devices.
//!
//! A pairing attempt opens the QR stream, connects, and hands the first code
//! back to the caller. A background watcher keeps draining the stream until
//! the phone scans a code or the stream runs dry. At most one attempt per key
//! is live: starting another cancels the previous watcher.

use crate::error::{GatewayError, Result};
use crate::events::EventSink;
use crate::protocol::{ConnectionFactory, ConnectionHandle, DeviceRecord, DeviceStore, QrEvent};
use crate::registry::{SessionRegistry, SessionState};
use dashmap::DashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Edge length of the rendered QR image, in pixels.
pub const QR_IMAGE_SIZE: u32 = 256;

/// A pairing code rendered for humans.
#[derive(Debug, Clone)]
pub struct QrArtifact {
    pub code: String,
    /// PNG image of the code.
    pub png: Vec<u8>,
    /// Half-block rendering for terminals.
    pub terminal: String,
}

#[derive(Debug, Clone)]
pub enum PairingOutcome {
    /// The session is already linked; there is nothing to scan.
    AlreadyPaired,
    /// Waiting for the phone to scan this code.
    AwaitingScan(QrArtifact),
}

impl PairingOutcome {
    /// PNG bytes to return to the caller; empty when already paired.
    pub fn into_png(self) -> Vec<u8> {
        match self {
            PairingOutcome::AlreadyPaired => Vec::new(),
            PairingOutcome::AwaitingScan(artifact) => artifact.png,
        }
    }
}

/// Render `code` as a PNG and as terminal text.
pub fn render_qr(code: &str) -> Result<QrArtifact> {
    let qr = qrcode::QrCode::with_error_correction_level(code.as_bytes(), qrcode::EcLevel::M)
        .map_err(|e| GatewayError::QrRender(e.to_string()))?;
    let image = qr
        .render::<image::Luma<u8>>()
        .min_dimensions(QR_IMAGE_SIZE, QR_IMAGE_SIZE)
        .build();

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| GatewayError::QrRender(e.to_string()))?;

    let terminal =
        qr2term::generate_qr_string(code).map_err(|e| GatewayError::QrRender(e.to_string()))?;

    Ok(QrArtifact {
        code: code.to_string(),
        png,
        terminal,
    })
}

pub struct Pairing {
    store: Arc<dyn DeviceStore>,
    factory: Arc<dyn ConnectionFactory>,
    registry: Arc<SessionRegistry>,
    attempts: DashMap<String, CancellationToken>,
}

impl Pairing {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            factory,
            registry,
            attempts: DashMap::new(),
        }
    }

    /// Start or resume pairing for `key`.
    pub async fn start(&self, key: &str) -> Result<PairingOutcome> {
        if self.registry.logged_in(key).is_ok() {
            return Ok(PairingOutcome::AlreadyPaired);
        }

        let device = self.resolve_device(key).await?;
        let connection = self.factory.build(&device);
        connection.subscribe(EventSink::new(key, self.registry.clone(), &connection));

        if connection.is_authenticated() {
            connection.connect().await?;
            self.install(key, connection, SessionState::Paired);
            tracing::info!(session = %key, "stored credential is valid, connected without pairing");
            return Ok(PairingOutcome::AlreadyPaired);
        }

        let mut qr = connection.qr_channel().await?;
        connection.connect().await?;
        tracing::info!(session = %key, "waiting for QR code or login event");

        while let Some(event) = qr.recv().await {
            match event {
                QrEvent::Code(code) => {
                    let artifact = match render_qr(&code) {
                        Ok(artifact) => artifact,
                        Err(e) => {
                            connection.disconnect().await;
                            return Err(e);
                        }
                    };
                    eprint!("{}", artifact.terminal);
                    tracing::info!(session = %key, %code, "QR code issued");

                    self.install(key, connection.clone(), SessionState::AwaitingPairing);
                    self.watch(key, connection, qr);
                    return Ok(PairingOutcome::AwaitingScan(artifact));
                }
                QrEvent::Success => {
                    self.install(key, connection, SessionState::Paired);
                    tracing::info!(session = %key, "paired before a code was shown");
                    return Ok(PairingOutcome::AlreadyPaired);
                }
                other => {
                    tracing::info!(session = %key, event = ?other, "login event");
                }
            }
        }

        connection.disconnect().await;
        Err(GatewayError::PairingAbandoned(key.to_string()))
    }

    /// Pick the device to pair for `key`.
    ///
    /// With no stored devices the store's first (fresh) device is used.
    /// Otherwise a stored device whose id matches `key` is re-paired, or a
    /// brand-new identity is allocated.
    async fn resolve_device(&self, key: &str) -> Result<DeviceRecord> {
        let devices = self.store.all_devices().await?;
        if devices.is_empty() {
            return Ok(self.store.first_device().await?);
        }

        let wanted = key.trim();
        let matched = devices
            .into_iter()
            .rev()
            .find(|d| d.id.as_ref().is_some_and(|id| id.user.trim() == wanted));

        match matched {
            Some(device) => Ok(device),
            None => Ok(self.store.new_device().await?),
        }
    }

    fn install(&self, key: &str, connection: ConnectionHandle, state: SessionState) {
        if let Some(previous) = self.registry.set(key, connection.clone(), state)
            && !Arc::ptr_eq(&previous, &connection)
        {
            tokio::spawn(async move { previous.disconnect().await });
        }
    }

    fn watch(&self, key: &str, connection: ConnectionHandle, qr: mpsc::Receiver<QrEvent>) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.attempts.insert(key.to_string(), cancel.clone()) {
            previous.cancel();
        }

        let key = key.to_string();
        let registry = self.registry.clone();
        tokio::spawn(watch_qr_stream(key, connection, qr, registry, cancel));
    }
}

async fn watch_qr_stream(
    key: String,
    connection: ConnectionHandle,
    mut qr: mpsc::Receiver<QrEvent>,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(session = %key, "pairing attempt superseded");
                return;
            }
            event = qr.recv() => event,
        };

        match event {
            Some(QrEvent::Code(code)) => match render_qr(&code) {
                Ok(artifact) => {
                    eprint!("{}", artifact.terminal);
                    tracing::info!(session = %key, %code, "QR code refreshed");
                }
                Err(e) => tracing::warn!(session = %key, err = %e, "failed to render QR code"),
            },
            Some(QrEvent::Success) => {
                registry.set_state_if_current(&key, &connection, SessionState::Paired);
                tracing::info!(session = %key, "pairing complete");
                return;
            }
            Some(other) => {
                tracing::info!(session = %key, event = ?other, "login event");
            }
            None => break,
        }
    }

    let discarded = registry.remove_if(&key, |s| {
        Arc::ptr_eq(&s.connection, &connection) && s.state == SessionState::AwaitingPairing
    });
    if discarded.is_some() {
        tracing::info!(session = %key, "QR stream closed without login, pairing abandoned");
        connection.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_qr_produces_png_and_terminal_text() {
        let artifact = render_qr("2@abc,def,ghi,jkl").unwrap();
        assert!(artifact.png.starts_with(b"\x89PNG\r\n\x1A\n"));
        assert!(!artifact.terminal.is_empty());
        assert_eq!(artifact.code, "2@abc,def,ghi,jkl");
    }

    #[test]
    fn already_paired_outcome_has_no_image() {
        assert!(PairingOutcome::AlreadyPaired.into_png().is_empty());
    }
}
