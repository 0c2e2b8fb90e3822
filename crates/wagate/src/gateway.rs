//! The request-facing service: every operation the HTTP layer calls.

use crate::dispatch::{DispatchReport, Dispatcher, send_text};
use crate::error::{GatewayError, Result};
use crate::jid::session_key;
use crate::lifecycle::{BatchSummary, Lifecycle, ShutdownAction};
use crate::media::MediaPayload;
use crate::pairing::{Pairing, PairingOutcome};
use crate::presence::broadcast_presence;
use crate::protocol::{ConnectionFactory, DeviceStore, MessageId, Presence, RecipientCheck};
use crate::registry::SessionRegistry;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Ceiling on concurrent sends within one fan-out.
    pub max_concurrency: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_concurrency: crate::dispatch::DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// A stored device as listed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub push_name: String,
    pub platform: String,
    pub user: String,
    pub server: String,
    pub is_logged_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: String,
    pub push_name: String,
    pub is_login: bool,
}

pub struct Gateway {
    store: Arc<dyn DeviceStore>,
    registry: Arc<SessionRegistry>,
    pairing: Pairing,
    lifecycle: Lifecycle,
    dispatcher: Dispatcher,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        factory: Arc<dyn ConnectionFactory>,
        options: GatewayOptions,
    ) -> Arc<Self> {
        let registry = SessionRegistry::new();
        Arc::new(Self {
            pairing: Pairing::new(store.clone(), factory.clone(), registry.clone()),
            lifecycle: Lifecycle::new(store.clone(), factory, registry.clone()),
            dispatcher: Dispatcher::new(options.max_concurrency),
            store,
            registry,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the QR image to scan; empty when the session is already paired.
    pub async fn start_or_resume_pairing(&self, sender: &str) -> Result<Vec<u8>> {
        let key = session_key(sender);
        let outcome = self.pairing.start(&key).await?;
        if let PairingOutcome::AlreadyPaired = outcome {
            tracing::info!(sender = %key, "already paired");
        }
        Ok(outcome.into_png())
    }

    /// Send one text message; fails fast on the first error.
    pub async fn send_text(&self, sender: &str, target: &str, text: &str) -> Result<MessageId> {
        let connection = self.registry.logged_in(&session_key(sender))?;
        let id = send_text(&connection, target, text).await?;
        tracing::info!(sender = %sender, recipient = %target, %id, "text sent");
        Ok(id)
    }

    /// Fire-and-log text fan-out. Only a missing session is reported.
    pub async fn send_text_bulk(
        &self,
        sender: &str,
        targets: Vec<String>,
        text: String,
    ) -> Result<()> {
        let connection = self.registry.logged_in(&session_key(sender))?;
        self.dispatcher.send_text_bulk(connection, targets, text).await;
        Ok(())
    }

    /// Send media to every target. The kind is detected from `data`.
    pub async fn send_media(
        &self,
        sender: &str,
        targets: Vec<String>,
        data: Vec<u8>,
        file_name: Option<String>,
        caption: &str,
    ) -> Result<DispatchReport> {
        let connection = self.registry.logged_in(&session_key(sender))?;
        let payload = Arc::new(MediaPayload::new(data, file_name, caption));
        tracing::debug!(
            sender = %sender,
            mimetype = %payload.mimetype,
            kind = ?payload.kind,
            recipients = targets.len(),
            "dispatching media"
        );
        Ok(self.dispatcher.send_media(connection, targets, payload).await)
    }

    pub async fn check_recipients(
        &self,
        sender: &str,
        targets: &[String],
    ) -> Result<Vec<RecipientCheck>> {
        let connection = self.registry.logged_in(&session_key(sender))?;
        Ok(connection.check_registered(targets).await?)
    }

    /// Every stored device, with its live login state from the registry.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self.store.all_devices().await?;
        Ok(devices
            .into_iter()
            .map(|device| {
                let (user, server) = match &device.id {
                    Some(jid) => (jid.user.clone(), jid.server.clone()),
                    None => (String::new(), String::new()),
                };
                let is_logged_in = self
                    .registry
                    .get(&user)
                    .is_some_and(|c| c.is_logged_in());
                DeviceInfo {
                    push_name: device.push_name,
                    platform: device.platform,
                    user,
                    server,
                    is_logged_in,
                }
            })
            .collect())
    }

    pub fn status(&self, sender: &str) -> Result<SessionStatus> {
        let connection = self.registry.logged_in(&session_key(sender))?;
        let device = connection.device();
        Ok(SessionStatus {
            id: device.id.map(|jid| jid.to_string()).unwrap_or_default(),
            push_name: device.push_name,
            is_login: connection.is_logged_in(),
        })
    }

    pub async fn send_presence(&self, sender: &str) -> Result<()> {
        let connection = self.registry.logged_in(&session_key(sender))?;
        Ok(connection.send_presence(Presence::Available).await?)
    }

    /// Presence for every registered session; used by the scheduled job.
    pub async fn broadcast_presence(&self) -> BatchSummary {
        broadcast_presence(&self.registry).await
    }

    /// Log the session out upstream and drop it from the registry.
    pub async fn logout(&self, sender: &str) -> Result<()> {
        let key = session_key(sender);
        let connection = self.registry.logged_in(&key)?;
        connection.logout().await.map_err(GatewayError::from)?;
        self.registry
            .remove_if(&key, |s| Arc::ptr_eq(&s.connection, &connection));
        tracing::info!(sender = %key, "logged out");
        Ok(())
    }

    pub async fn auto_login(&self) -> Result<BatchSummary> {
        self.lifecycle.auto_login().await
    }

    pub async fn auto_disconnect(&self) -> Result<BatchSummary> {
        self.lifecycle.auto_disconnect().await
    }

    pub async fn auto_logout(&self) -> Result<BatchSummary> {
        self.lifecycle.auto_logout().await
    }

    /// Stop pending fan-out work, then run the shutdown traversal.
    pub async fn shutdown(&self, action: ShutdownAction) -> Result<Option<BatchSummary>> {
        self.dispatcher.shutdown();
        self.lifecycle.run_shutdown(action).await
    }
}
