use crate::quality::QualityReading;
use crate::types::RoomId;
use tracing::{debug, error, info, warn};

/// Status transitions reported to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    MediaReady,
    RoomCreated(RoomId),
    Joined(RoomId),
    Negotiating,
    Connected,
    ConnectionProblem,
    Reconnecting { attempt: u32 },
    Recovered,
    /// Terminal failure; the text asks the user to reconnect manually
    Failed(String),
    RemoteHungUp,
    Disconnected,
    Error(String),
}

impl CallStatus {
    pub fn event_name(&self) -> &'static str {
        match self {
            CallStatus::MediaReady => "call-media-ready",
            CallStatus::RoomCreated(_) => "call-room-created",
            CallStatus::Joined(_) => "call-joined",
            CallStatus::Negotiating => "call-negotiating",
            CallStatus::Connected => "call-connected",
            CallStatus::ConnectionProblem => "call-connection-problem",
            CallStatus::Reconnecting { .. } => "call-reconnecting",
            CallStatus::Recovered => "call-recovered",
            CallStatus::Failed(_) => "call-failed",
            CallStatus::RemoteHungUp => "call-remote-hung-up",
            CallStatus::Disconnected => "call-disconnected",
            CallStatus::Error(_) => "call-error",
        }
    }
}

/// Outward notifications. Implementations must not block.
pub trait UiSink: Send + Sync {
    fn status(&self, status: CallStatus);

    fn quality(&self, reading: QualityReading);

    fn room(&self, _room: &RoomId) {}

    fn remote_track(&self, _kind: &str, _id: &str) {}
}

/// Writes every notification to the log; the CLI's only UI
pub struct LogUiSink;

impl UiSink for LogUiSink {
    fn status(&self, status: CallStatus) {
        let evt = status.event_name();
        match &status {
            CallStatus::Failed(msg) => error!("{}: {}", evt, msg),
            CallStatus::Error(msg) => warn!("{}: {}", evt, msg),
            CallStatus::Reconnecting { attempt } => info!("{} (attempt {})", evt, attempt),
            CallStatus::RoomCreated(room) | CallStatus::Joined(room) => {
                info!("{} room={}", evt, room)
            }
            _ => info!("{}", evt),
        }
    }

    fn quality(&self, reading: QualityReading) {
        match &reading.path {
            Some(path) => debug!(
                "Quality {:?} ({:?}): {} <-> {} sent={} received={}",
                reading.tier,
                reading.state,
                path.local_candidate_id,
                path.remote_candidate_id,
                path.bytes_sent,
                path.bytes_received
            ),
            None => debug!("Quality {:?} ({:?})", reading.tier, reading.state),
        }
    }

    fn room(&self, room: &RoomId) {
        info!("Room id: {}", room);
    }

    fn remote_track(&self, kind: &str, id: &str) {
        info!("Remote {} track {}", kind, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_stable() {
        assert_eq!(CallStatus::Connected.event_name(), "call-connected");
        assert_eq!(
            CallStatus::Reconnecting { attempt: 1 }.event_name(),
            "call-reconnecting"
        );
        assert_eq!(CallStatus::Failed("x".into()).event_name(), "call-failed");
    }
}
