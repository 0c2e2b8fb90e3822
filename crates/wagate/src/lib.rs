//! Core of a multi-session messaging gateway.
//!
//! One process operates many linked accounts at once. The [`SessionRegistry`]
//! maps each account key to its live connection; [`Pairing`] links new
//! devices by QR code; [`Lifecycle`] logs every stored device in or out in
//! bulk; [`Dispatcher`] fans one send out to many recipients. [`Gateway`]
//! ties them together behind the operations the request layer calls.

pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod jid;
pub mod lifecycle;
pub mod media;
pub mod pairing;
pub mod presence;
pub mod protocol;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use dispatch::{DispatchReport, Dispatcher, MessageKind, RecipientFailure, SentMessage};
pub use error::{GatewayError, ProtocolError, Result};
pub use events::{EventHandler, EventSink, InboundEvent, MessageEvent, ReceiptEvent, ReceiptKind};
pub use gateway::{DeviceInfo, Gateway, GatewayOptions, SessionStatus};
pub use jid::{Jid, normalize_recipient, parse_recipient_list, session_key};
pub use lifecycle::{BatchSummary, Lifecycle, ShutdownAction};
pub use media::{MediaKind, MediaPayload};
pub use pairing::{Pairing, PairingOutcome, QrArtifact};
pub use protocol::{
    Connection, ConnectionFactory, ConnectionHandle, DeviceRecord, DeviceStore, OutgoingMessage,
    Presence, QrEvent, RecipientCheck, SendReceipt, UploadedMedia,
};
pub use registry::{Session, SessionRegistry, SessionState};
