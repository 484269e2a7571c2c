//! Error taxonomy of the call coordinator.
//!
//! Only [`CallError::MediaAccess`], [`CallError::RoomNotFound`] and
//! [`CallError::RestartExhausted`] end a session. Everything else is logged
//! and the session keeps going where it can.

use crate::types::RoomId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaAccessError {
    #[error("capture permission denied")]
    PermissionDenied,

    #[error("no capture device available: {0}")]
    NoDevice(String),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling transport error: {0}")]
    Io(String),

    #[error("room {0} does not exist")]
    MissingRoom(RoomId),

    #[error("malformed signaling message: {0}")]
    Decode(String),

    #[error("signaling channel closed")]
    Closed,
}

impl From<serde_json::Error> for SignalingError {
    fn from(err: serde_json::Error) -> Self {
        SignalingError::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalingError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SignalingError::Io(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer transport error: {0}")]
    Rtc(String),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),
}

impl From<webrtc::Error> for TransportError {
    fn from(err: webrtc::Error) -> Self {
        TransportError::Rtc(err.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("credential request failed: {0}")]
    Network(String),

    #[error("credential endpoint answered with status {0}")]
    Status(u16),

    #[error("malformed credential response: {0}")]
    Parse(String),

    #[error("no credential endpoint configured")]
    NotConfigured,
}

impl From<reqwest::Error> for CredentialError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CredentialError::Parse(err.to_string())
        } else {
            CredentialError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("media access failed: {0}")]
    MediaAccess(#[from] MediaAccessError),

    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("connection could not be restored after {0} restart attempts, please reconnect manually")]
    RestartExhausted(u32),

    #[error("a call session is already active")]
    SessionAlreadyActive,

    #[error("coordinator task has stopped")]
    CoordinatorGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_exhaustion_message_asks_for_manual_reconnect() {
        let msg = CallError::RestartExhausted(2).to_string();
        assert!(msg.contains("reconnect manually"));
    }

    #[test]
    fn leaf_errors_convert_into_call_error() {
        let err: CallError = MediaAccessError::PermissionDenied.into();
        assert!(matches!(err, CallError::MediaAccess(_)));
        let err: CallError = SignalingError::Closed.into();
        assert!(matches!(err, CallError::Signaling(SignalingError::Closed)));
    }
}
