//! Concurrent per-recipient fan-out for bulk sends.
//!
//! Every recipient gets its own task. Tasks wait on a shared semaphore, so at
//! most `max_concurrency` sends are in flight for one dispatch, and a task
//! that has not started yet gives up when the dispatcher is cancelled.

use crate::error::{GatewayError, Result};
use crate::jid::normalize_recipient;
use crate::media::{MediaKind, MediaPayload};
use crate::protocol::{ConnectionHandle, MessageId, OutgoingMessage};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl From<MediaKind> for MessageKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => MessageKind::Image,
            MediaKind::Video => MessageKind::Video,
            MediaKind::Audio => MessageKind::Audio,
            MediaKind::Document => MessageKind::Document,
        }
    }
}

/// A message the server accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub message_id: MessageId,
    /// Normalized recipient address.
    pub recipient: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug)]
pub struct RecipientFailure {
    /// The target as the caller supplied it.
    pub target: String,
    pub error: GatewayError,
}

/// Outcome of one fan-out. Order of either list is unspecified.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub sent: Vec<SentMessage>,
    pub failed: Vec<RecipientFailure>,
}

impl DispatchReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn extend(&mut self, other: DispatchReport) {
        self.sent.extend(other.sent);
        self.failed.extend(other.failed);
    }

    /// Collapse to the legacy shape: the first failure and no results when
    /// anything failed, otherwise every sent message. Messages already sent
    /// stay sent either way.
    pub fn into_first_error(self) -> Result<Vec<SentMessage>> {
        match self.failed.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.sent),
        }
    }
}

pub struct Dispatcher {
    max_concurrency: usize,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Cancel every recipient that has not started sending yet.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Upload and send `payload` to every recipient, collecting every outcome.
    pub async fn send_media(
        &self,
        connection: ConnectionHandle,
        recipients: Vec<String>,
        payload: Arc<MediaPayload>,
    ) -> DispatchReport {
        let report = Arc::new(Mutex::new(DispatchReport::default()));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = Vec::with_capacity(recipients.len());

        for target in recipients {
            let connection = connection.clone();
            let payload = payload.clone();
            let report = report.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();

            tasks.push(tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(GatewayError::Cancelled),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(_permit) => send_one_media(&connection, &target, &payload).await,
                        Err(_) => Err(GatewayError::Cancelled),
                    },
                };

                let mut report = report.lock().await;
                match outcome {
                    Ok(sent) => {
                        tracing::info!(
                            recipient = %sent.recipient,
                            id = %sent.message_id,
                            kind = ?sent.kind,
                            "media sent"
                        );
                        report.sent.push(sent);
                    }
                    Err(error) => {
                        tracing::warn!(recipient = %target, err = %error, "media send failed");
                        report.failed.push(RecipientFailure { target, error });
                    }
                }
            }));
        }

        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                tracing::error!(err = %e, "dispatch task panicked");
            }
        }

        let mut report = report.lock().await;
        std::mem::take(&mut *report)
    }

    /// Send `text` to every recipient. Outcomes are logged, never returned.
    pub async fn send_text_bulk(
        &self,
        connection: ConnectionHandle,
        recipients: Vec<String>,
        text: String,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let text = Arc::new(text);
        let mut tasks = Vec::with_capacity(recipients.len());

        for target in recipients {
            let connection = connection.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let text = text.clone();

            tasks.push(tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(GatewayError::Cancelled),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(_permit) => send_text(&connection, &target, text.as_str()).await,
                        Err(_) => Err(GatewayError::Cancelled),
                    },
                };
                match outcome {
                    Ok(id) => tracing::info!(recipient = %target, %id, "text sent"),
                    Err(e) => tracing::warn!(recipient = %target, err = %e, "text send failed"),
                }
            }));
        }

        join_all(tasks).await;
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

/// Normalize `target` and send one text message to it.
pub async fn send_text(
    connection: &ConnectionHandle,
    target: &str,
    text: &str,
) -> Result<MessageId> {
    let jid = normalize_recipient(target)?;
    let receipt = connection
        .send_message(&jid, OutgoingMessage::Text(text.to_string()))
        .await?;
    Ok(receipt.id)
}

async fn send_one_media(
    connection: &ConnectionHandle,
    target: &str,
    payload: &MediaPayload,
) -> Result<SentMessage> {
    let jid = normalize_recipient(target)?;
    let uploaded = connection.upload(&payload.data, payload.kind).await?;
    let message = payload.build_message(uploaded);
    let receipt = connection.send_message(&jid, message).await?;

    Ok(SentMessage {
        message_id: receipt.id,
        recipient: jid.to_string(),
        kind: payload.kind.into(),
        file_name: payload.file_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubConnection;

    fn failure(target: &str) -> RecipientFailure {
        RecipientFailure {
            target: target.to_string(),
            error: GatewayError::invalid_recipient(target, "empty user part"),
        }
    }

    #[test]
    fn first_error_hides_the_successes() {
        let report = DispatchReport {
            sent: vec![SentMessage {
                message_id: "1".into(),
                recipient: "1@s.whatsapp.net".into(),
                kind: MessageKind::Text,
                file_name: None,
            }],
            failed: vec![failure("@g.us"), failure("")],
        };
        assert!(!report.is_complete_success());
        assert!(matches!(
            report.into_first_error(),
            Err(GatewayError::InvalidRecipient { .. })
        ));
    }

    #[test]
    fn a_clean_report_returns_every_message() {
        let report = DispatchReport::default();
        assert!(report.into_first_error().unwrap().is_empty());
    }

    #[tokio::test]
    async fn media_fan_out_skips_malformed_recipients() {
        let dispatcher = Dispatcher::new(2);
        let payload = Arc::new(MediaPayload::new(
            b"\x89PNG\r\n\x1A\nrest".to_vec(),
            Some("a.png".into()),
            "hi",
        ));
        let report = dispatcher
            .send_media(
                StubConnection::handle("62811", true),
                vec!["1".into(), "@g.us".into(), "+2".into()],
                payload,
            )
            .await;

        assert_eq!(report.sent.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].target, "@g.us");
        assert!(report.sent.iter().all(|s| s.kind == MessageKind::Image));
    }

    #[tokio::test]
    async fn cancelled_dispatcher_reports_every_recipient_as_cancelled() {
        let dispatcher = Dispatcher::default();
        dispatcher.shutdown();
        let payload = Arc::new(MediaPayload::new(b"%PDF-1.4".to_vec(), None, ""));
        let report = dispatcher
            .send_media(
                StubConnection::handle("62811", true),
                vec!["1".into(), "2".into()],
                payload,
            )
            .await;

        assert!(report.sent.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert!(report
            .failed
            .iter()
            .all(|f| matches!(f.error, GatewayError::Cancelled)));
    }

    #[test]
    fn zero_concurrency_is_raised_to_one() {
        assert_eq!(Dispatcher::new(0).max_concurrency(), 1);
    }
}
