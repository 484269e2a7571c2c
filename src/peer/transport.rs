use crate::error::TransportError;
use crate::peer::media::LocalMedia;
use crate::quality::PathStats;
use crate::types::{IceCandidate, IceServerConfig, SessionDescription};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// ICE connectivity of the peer transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Offer/answer negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    StateChanged(TransportState),
    NegotiationChanged(NegotiationState),
    RemoteTrack { kind: String, id: String },
}

/// Callback the transport reports its events through
pub type TransportEventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn attach_media(&self, media: &LocalMedia) -> Result<(), TransportError>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: &SessionDescription)
        -> Result<(), TransportError>;

    async fn has_remote_description(&self) -> bool;

    fn negotiation_state(&self) -> NegotiationState;

    fn connection_state(&self) -> TransportState;

    /// Must only be called once a remote description is in place
    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    /// Swaps in fresh STUN/TURN servers ahead of an ICE restart
    async fn update_servers(&self, servers: &[IceServerConfig]) -> Result<(), TransportError>;

    async fn selected_path(&self) -> Option<PathStats>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        servers: &[IceServerConfig],
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
