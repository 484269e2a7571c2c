pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod logger;
pub mod peer;
pub mod quality;
pub mod signaling;
pub mod types;
pub mod ui;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::CoordinatorConfig;
pub use coordinator::{CallState, Coordinator, CoordinatorHandle};
pub use credentials::{CredentialProvider, CredentialSet};
pub use error::CallError;
pub use quality::{QualityReading, QualityTier};
pub use signaling::{MemoryChannel, SignalingChannel, SocketChannel};
pub use types::{IceCandidate, IceServerConfig, Role, Room, RoomId, SessionDescription};
pub use ui::{CallStatus, LogUiSink, UiSink};
