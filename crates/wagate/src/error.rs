use thiserror::Error;

/// Failure reported by the protocol layer or the device store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("logout failed: {0}")]
    Logout(String),

    #[error("qr channel unavailable: {0}")]
    QrChannel(String),

    #[error("presence failed: {0}")]
    Presence(String),

    #[error("recipient lookup failed: {0}")]
    Lookup(String),

    #[error("device store error: {0}")]
    Store(String),
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid recipient {target:?}: {reason}")]
    InvalidRecipient { target: String, reason: &'static str },

    #[error("session {0} has no logged-in connection")]
    UnauthenticatedSession(String),

    #[error("upstream protocol error: {0}")]
    Upstream(#[from] ProtocolError),

    #[error("pairing for {0} abandoned: QR stream closed without login")]
    PairingAbandoned(String),

    #[error("failed to render QR code: {0}")]
    QrRender(String),

    #[error("dispatch cancelled before the send started")]
    Cancelled,
}

impl GatewayError {
    pub(crate) fn invalid_recipient(target: &str, reason: &'static str) -> Self {
        GatewayError::InvalidRecipient {
            target: target.to_string(),
            reason,
        }
    }

    /// Stable machine-readable code for the request layer.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidRecipient { .. } => "invalid_recipient",
            GatewayError::UnauthenticatedSession(_) => "unauthenticated_session",
            GatewayError::Upstream(_) => "upstream_protocol_error",
            GatewayError::PairingAbandoned(_) => "pairing_abandoned",
            GatewayError::QrRender(_) => "qr_render_failed",
            GatewayError::Cancelled => "cancelled",
        }
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_convert_and_keep_their_message() {
        let err: GatewayError = ProtocolError::Send("socket closed".into()).into();
        assert_eq!(err.code(), "upstream_protocol_error");
        assert_eq!(
            err.to_string(),
            "upstream protocol error: send failed: socket closed"
        );
    }

    #[test]
    fn invalid_recipient_mentions_the_target() {
        let err = GatewayError::invalid_recipient("@g.us", "empty user part");
        assert_eq!(err.code(), "invalid_recipient");
        assert!(err.to_string().contains("\"@g.us\""));
    }
}
