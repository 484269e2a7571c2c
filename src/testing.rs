//! In-process doubles for the coordinator's collaborators.

use crate::credentials::CredentialFetcher;
use crate::error::{CredentialError, MediaAccessError, TransportError};
use crate::peer::media::{LocalMedia, MediaSource};
use crate::peer::transport::{
    NegotiationState, PeerTransport, TransportEvent, TransportEventSink, TransportFactory,
    TransportState,
};
use crate::quality::{PathStats, QualityReading, QualityTier};
use crate::types::{IceCandidate, IceServerConfig, RoomId, SdpKind, SessionDescription};
use crate::ui::{CallStatus, UiSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct StaticFetcher {
    response: Mutex<Result<Vec<IceServerConfig>, CredentialError>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn ok(servers: Vec<IceServerConfig>) -> Self {
        Self {
            response: Mutex::new(Ok(servers)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: CredentialError) -> Self {
        Self {
            response: Mutex::new(Err(err)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, response: Result<Vec<IceServerConfig>, CredentialError>) {
        *self.response.lock() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialFetcher for StaticFetcher {
    async fn fetch(&self) -> Result<Vec<IceServerConfig>, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().clone()
    }
}

struct FakeState {
    negotiation: NegotiationState,
    connection: TransportState,
    remote: Option<SessionDescription>,
    servers: Vec<IceServerConfig>,
    applied: Vec<IceCandidate>,
    premature_adds: usize,
    offers: usize,
    restart_offers: usize,
    server_updates: usize,
    closes: usize,
    attached: usize,
    gathered: bool,
    next_body: u64,
}

/// Emulates offer/answer negotiation states without any networking.
///
/// Setting the first local description trickles one host candidate. With
/// `auto_connect`, the first applied remote candidate drives the transport
/// through `checking` to `connected`.
pub struct FakeTransport {
    id: u64,
    auto_connect: bool,
    events: TransportEventSink,
    state: Mutex<FakeState>,
}

impl FakeTransport {
    fn new(id: u64, servers: &[IceServerConfig], events: TransportEventSink, auto_connect: bool) -> Self {
        Self {
            id,
            auto_connect,
            events,
            state: Mutex::new(FakeState {
                negotiation: NegotiationState::Stable,
                connection: TransportState::New,
                remote: None,
                servers: servers.to_vec(),
                applied: Vec::new(),
                premature_adds: 0,
                offers: 0,
                restart_offers: 0,
                server_updates: 0,
                closes: 0,
                attached: 0,
                gathered: false,
                next_body: 0,
            }),
        }
    }

    /// Reports `event` as if the underlying stack produced it
    pub fn emit(&self, event: TransportEvent) {
        if let TransportEvent::StateChanged(state) = &event {
            self.state.lock().connection = *state;
        }
        (self.events)(event);
    }

    pub fn set_state(&self, state: TransportState) {
        self.emit(TransportEvent::StateChanged(state));
    }

    pub fn applied(&self) -> Vec<String> {
        self.state
            .lock()
            .applied
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn premature_adds(&self) -> usize {
        self.state.lock().premature_adds
    }

    pub fn offers(&self) -> usize {
        self.state.lock().offers
    }

    pub fn restart_offers(&self) -> usize {
        self.state.lock().restart_offers
    }

    pub fn server_updates(&self) -> usize {
        self.state.lock().server_updates
    }

    pub fn servers(&self) -> Vec<IceServerConfig> {
        self.state.lock().servers.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn attached(&self) -> usize {
        self.state.lock().attached
    }

    fn next_body(&self, prefix: &str) -> String {
        let mut state = self.state.lock();
        state.next_body += 1;
        format!("{}-{}-{}", prefix, self.id, state.next_body)
    }

    fn move_to(&self, next: NegotiationState) {
        self.state.lock().negotiation = next;
        (self.events)(TransportEvent::NegotiationChanged(next));
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn attach_media(&self, _media: &LocalMedia) -> Result<(), TransportError> {
        self.state.lock().attached += 1;
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError> {
        {
            let mut state = self.state.lock();
            state.offers += 1;
            if ice_restart {
                state.restart_offers += 1;
            }
        }
        Ok(SessionDescription::offer(self.next_body("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if self.negotiation_state() != NegotiationState::HaveRemoteOffer {
            return Err(TransportError::InvalidDescription("no remote offer to answer".into()));
        }
        Ok(SessionDescription::answer(self.next_body("answer")))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), TransportError> {
        let next = match (desc.kind, self.negotiation_state()) {
            (SdpKind::Offer, NegotiationState::Stable | NegotiationState::HaveLocalOffer) => {
                NegotiationState::HaveLocalOffer
            }
            (SdpKind::Answer, NegotiationState::HaveRemoteOffer) => NegotiationState::Stable,
            (kind, state) => {
                return Err(TransportError::InvalidDescription(format!(
                    "local {:?} in {:?}",
                    kind, state
                )))
            }
        };
        self.move_to(next);

        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.gathered, true)
        };
        if first {
            (self.events)(TransportEvent::LocalCandidate(IceCandidate::new(format!(
                "candidate:{} 1 udp 2130706431 10.0.0.{} 5000 typ host",
                self.id, self.id
            ))));
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        let next = match (desc.kind, self.negotiation_state()) {
            (SdpKind::Offer, NegotiationState::Stable | NegotiationState::HaveRemoteOffer) => {
                NegotiationState::HaveRemoteOffer
            }
            (SdpKind::Answer, NegotiationState::HaveLocalOffer) => NegotiationState::Stable,
            (kind, state) => {
                return Err(TransportError::InvalidDescription(format!(
                    "remote {:?} in {:?}",
                    kind, state
                )))
            }
        };
        self.state.lock().remote = Some(desc.clone());
        self.move_to(next);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().remote.is_some()
    }

    fn negotiation_state(&self) -> NegotiationState {
        self.state.lock().negotiation
    }

    fn connection_state(&self) -> TransportState {
        self.state.lock().connection
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let connect = {
            let mut state = self.state.lock();
            if state.remote.is_none() {
                state.premature_adds += 1;
                return Err(TransportError::InvalidDescription(
                    "candidate added before remote description".into(),
                ));
            }
            state.applied.push(candidate.clone());
            self.auto_connect && state.connection == TransportState::New
        };
        if connect {
            self.set_state(TransportState::Checking);
            self.set_state(TransportState::Connected);
        }
        Ok(())
    }

    async fn update_servers(&self, servers: &[IceServerConfig]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.server_updates += 1;
        state.servers = servers.to_vec();
        Ok(())
    }

    async fn selected_path(&self) -> Option<PathStats> {
        match self.connection_state() {
            TransportState::Connected | TransportState::Completed => Some(PathStats {
                local_candidate_id: format!("local-{}", self.id),
                remote_candidate_id: "remote".into(),
                bytes_sent: 0,
                bytes_received: 0,
            }),
            _ => None,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.closes += 1;
        state.connection = TransportState::Closed;
        state.negotiation = NegotiationState::Closed;
        Ok(())
    }
}

pub struct FakeTransportFactory {
    auto_connect: bool,
    next_id: AtomicU64,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::with_auto_connect(true)
    }

    /// Transports stay `new` until a test drives their state
    pub fn manual() -> Self {
        Self::with_auto_connect(false)
    }

    fn with_auto_connect(auto_connect: bool) -> Self {
        Self {
            auto_connect,
            next_id: AtomicU64::new(0),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no transport created yet")
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        servers: &[IceServerConfig],
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let transport = Arc::new(FakeTransport::new(id, servers, events, self.auto_connect));
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Default)]
pub struct FakeMediaSource {
    deny: AtomicBool,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl FakeMediaSource {
    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self) -> Result<LocalMedia, MediaAccessError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaAccessError::PermissionDenied);
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LocalMedia::empty(format!("fake-{}", n)))
    }

    fn release(&self, _media: LocalMedia) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingUiSink {
    statuses: Mutex<Vec<CallStatus>>,
    readings: Mutex<Vec<QualityReading>>,
    rooms: Mutex<Vec<RoomId>>,
    tracks: Mutex<Vec<(String, String)>>,
}

impl RecordingUiSink {
    pub fn statuses(&self) -> Vec<CallStatus> {
        self.statuses.lock().clone()
    }

    pub fn count(&self, wanted: impl Fn(&CallStatus) -> bool) -> usize {
        self.statuses.lock().iter().filter(|s| wanted(s)).count()
    }

    pub fn tiers(&self) -> Vec<QualityTier> {
        self.readings.lock().iter().map(|r| r.tier).collect()
    }

    pub fn last_reading(&self) -> Option<QualityReading> {
        self.readings.lock().last().cloned()
    }

    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().clone()
    }

    pub fn tracks(&self) -> Vec<(String, String)> {
        self.tracks.lock().clone()
    }
}

impl UiSink for RecordingUiSink {
    fn status(&self, status: CallStatus) {
        self.statuses.lock().push(status);
    }

    fn quality(&self, reading: QualityReading) {
        self.readings.lock().push(reading);
    }

    fn room(&self, room: &RoomId) {
        self.rooms.lock().push(room.clone());
    }

    fn remote_track(&self, kind: &str, id: &str) {
        self.tracks.lock().push((kind.to_string(), id.to_string()));
    }
}
