pub mod media;
pub mod rtc;
pub mod transport;

pub use media::{LocalMedia, MediaSource, SyntheticMediaSource};
pub use rtc::RtcTransportFactory;
pub use transport::{PeerTransport, TransportEvent, TransportFactory, TransportState};
