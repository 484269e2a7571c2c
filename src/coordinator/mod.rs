//! Call coordinator: drives offer/answer, buffers early remote candidates,
//! watches connection health and recovers with bounded ICE restarts.
//!
//! Transport callbacks, signaling subscriptions and timers never touch the
//! coordinator directly. They push [`SessionEvent`]s onto one queue which
//! the owner drains, so every state change happens on one logical thread.
//! Events carry the generation of the session that produced them; anything
//! from an older session is dropped.

pub mod candidates;
pub mod handle;
pub mod session;

pub use handle::CoordinatorHandle;
pub use session::{CallState, CoordinatorSession};

use crate::config::CoordinatorConfig;
use crate::credentials::CredentialProvider;
use crate::error::CallError;
use crate::logger::{candidate_kind_counts, dump_candidate};
use crate::peer::media::{LocalMedia, MediaSource};
use crate::peer::transport::{
    NegotiationState, PeerTransport, TransportEvent, TransportEventSink, TransportFactory,
    TransportState,
};
use crate::quality::{reading_for, tier_for, QualityTier};
use crate::signaling::SignalingChannel;
use crate::types::{IceCandidate, IceServerConfig, Role, Room, RoomId, RoomPatch, SessionDescription};
use crate::ui::{CallStatus, UiSink};
use candidates::can_apply;
use session::{EventKind, EventSender, SessionEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct Coordinator {
    config: CoordinatorConfig,
    channel: Arc<dyn SignalingChannel>,
    transports: Arc<dyn TransportFactory>,
    media_source: Arc<dyn MediaSource>,
    ui: Arc<dyn UiSink>,
    credentials: CredentialProvider,
    state: CallState,
    media: Option<LocalMedia>,
    session: Option<CoordinatorSession>,
    generation: u64,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        channel: Arc<dyn SignalingChannel>,
        transports: Arc<dyn TransportFactory>,
        media_source: Arc<dyn MediaSource>,
        ui: Arc<dyn UiSink>,
    ) -> Self {
        let credentials = CredentialProvider::from_config(&config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            channel,
            transports,
            media_source,
            ui,
            credentials,
            state: CallState::Idle,
            media: None,
            session: None,
            generation: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialProvider) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|s| s.role)
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.session.as_ref().map(|s| &s.room_id)
    }

    pub fn restart_attempts(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.restart_attempts)
    }

    pub fn buffered_candidates(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.buffer.len())
    }

    /// Last connectivity state the transport reported
    pub fn transport_state(&self) -> Option<TransportState> {
        self.session.as_ref().map(|s| s.last_transport_state)
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    fn set_state(&mut self, next: CallState) {
        if self.state != next {
            info!("Call state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Acquires local capture ahead of a call. A no-op when media is held.
    pub async fn open_media(&mut self) -> Result<(), CallError> {
        if self.media.is_some() {
            return Ok(());
        }
        match self.media_source.acquire().await {
            Ok(media) => {
                debug!("Local media acquired: {:?}", media);
                self.media = Some(media);
                if !self.state.is_live() {
                    self.set_state(CallState::MediaReady);
                }
                self.ui.status(CallStatus::MediaReady);
                Ok(())
            }
            Err(e) => {
                warn!("Media access failed: {}", e);
                if !self.state.is_live() {
                    self.set_state(CallState::Idle);
                }
                self.ui.status(CallStatus::Error(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Caller path: publishes a new room carrying the local offer
    pub async fn start_call(&mut self) -> Result<RoomId, CallError> {
        self.prepare()?;
        self.open_media().await?;

        let servers = self.credentials.get_credentials().await.servers;
        let (generation, sink) = self.next_generation();
        let transport = self.create_transport(&servers, sink).await?;
        self.set_state(CallState::Offering);

        match self.open_as_caller(generation, &transport).await {
            Ok(session) => {
                let room = session.room_id.clone();
                self.session = Some(session);
                info!("Waiting for an answer in room {}", room);
                self.ui.room(&room);
                self.ui.status(CallStatus::RoomCreated(room.clone()));
                Ok(room)
            }
            Err(e) => {
                self.abandon_setup(&transport, &e).await;
                Err(e)
            }
        }
    }

    /// Callee path: answers the offer stored in `room_id`
    pub async fn join_call(&mut self, room_id: &RoomId) -> Result<(), CallError> {
        self.prepare()?;
        self.open_media().await?;

        let offer = match self.channel.get_room(room_id).await {
            Ok(Some(Room {
                offer: Some(offer), ..
            })) => offer,
            Ok(_) => {
                let err = CallError::RoomNotFound(room_id.clone());
                warn!("{}", err);
                self.ui.status(CallStatus::Error(err.to_string()));
                return Err(err);
            }
            Err(e) => {
                warn!("Room lookup failed: {}", e);
                self.ui.status(CallStatus::Error(e.to_string()));
                return Err(e.into());
            }
        };

        let servers = self.credentials.get_credentials().await.servers;
        let (generation, sink) = self.next_generation();
        let transport = self.create_transport(&servers, sink).await?;
        self.set_state(CallState::Answering);

        match self.open_as_callee(generation, &transport, room_id, offer).await {
            Ok(session) => {
                self.session = Some(session);
                self.ui.room(room_id);
                self.ui.status(CallStatus::Joined(room_id.clone()));
                self.flush_if_ready().await;
                Ok(())
            }
            Err(e) => {
                self.abandon_setup(&transport, &e).await;
                Err(e)
            }
        }
    }

    /// Ends the call from any state. Calling it again is a no-op.
    pub async fn hangup(&mut self) {
        if self.state == CallState::Closed && self.session.is_none() && self.media.is_none() {
            debug!("Hangup on a closed coordinator ignored");
            return;
        }
        info!("Hanging up");
        self.teardown().await;
        self.set_state(CallState::Closed);
        self.ui.status(CallStatus::Disconnected);
    }

    /// Waits for the next queued event and handles it
    pub async fn next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event).await;
        }
    }

    /// Handles everything already queued, including events queued meanwhile
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    fn prepare(&mut self) -> Result<(), CallError> {
        if self.session.is_some() {
            warn!("Refusing a second call while room session is active");
            return Err(CallError::SessionAlreadyActive);
        }
        if matches!(self.state, CallState::Closed | CallState::Failed) {
            self.set_state(CallState::Idle);
        }
        Ok(())
    }

    fn next_generation(&mut self) -> (u64, TransportEventSink) {
        self.generation += 1;
        let generation = self.generation;
        let events = self.events_tx.clone();
        let sink: TransportEventSink = Arc::new(move |event| {
            let _ = events.send(SessionEvent {
                generation,
                kind: EventKind::Transport(event),
            });
        });
        (generation, sink)
    }

    fn listener<T: 'static>(
        &self,
        generation: u64,
        wrap: fn(T) -> EventKind,
    ) -> Arc<dyn Fn(T) + Send + Sync> {
        let events = self.events_tx.clone();
        Arc::new(move |item| {
            let _ = events.send(SessionEvent {
                generation,
                kind: wrap(item),
            });
        })
    }

    async fn create_transport(
        &mut self,
        servers: &[IceServerConfig],
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, CallError> {
        match self.transports.create(servers, sink).await {
            Ok(transport) => Ok(transport),
            Err(e) => {
                error!("Failed to create peer transport: {}", e);
                self.ui.status(CallStatus::Error(e.to_string()));
                Err(e.into())
            }
        }
    }

    async fn open_as_caller(
        &mut self,
        generation: u64,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<CoordinatorSession, CallError> {
        if let Some(media) = &self.media {
            transport.attach_media(media).await?;
        }
        let offer = transport.create_offer(false).await?;
        transport.set_local_description(&offer).await?;
        self.set_state(CallState::Negotiating);
        self.ui.status(CallStatus::Negotiating);

        let room_id = self.channel.create_room(offer).await?;
        info!("Created room {}", room_id);

        let mut session =
            CoordinatorSession::new(generation, Role::Caller, room_id.clone(), transport.clone());
        if let Err(e) = self.subscribe(&mut session).await {
            if let Err(del) = self.channel.delete_room(&room_id).await {
                warn!("Failed to delete abandoned room {}: {}", room_id, del);
            }
            return Err(e);
        }
        Ok(session)
    }

    async fn open_as_callee(
        &mut self,
        generation: u64,
        transport: &Arc<dyn PeerTransport>,
        room_id: &RoomId,
        offer: SessionDescription,
    ) -> Result<CoordinatorSession, CallError> {
        if let Some(media) = &self.media {
            transport.attach_media(media).await?;
        }
        let answer = accept_offer(transport, &offer).await?;
        self.set_state(CallState::Negotiating);
        self.ui.status(CallStatus::Negotiating);
        self.channel
            .update_room(room_id, RoomPatch::answer(answer))
            .await?;

        let mut session =
            CoordinatorSession::new(generation, Role::Callee, room_id.clone(), transport.clone());
        session.applied_remote = Some(offer.body);
        self.subscribe(&mut session).await?;
        Ok(session)
    }

    /// Room changes plus candidates published by the other role
    async fn subscribe(&self, session: &mut CoordinatorSession) -> Result<(), CallError> {
        let room_sub = self
            .channel
            .subscribe_room(
                &session.room_id,
                self.listener(session.generation, EventKind::RoomChanged),
            )
            .await?;
        session.add_subscription(room_sub);

        let candidate_sub = self
            .channel
            .subscribe_candidates(
                &session.room_id,
                session.role.remote(),
                self.listener(session.generation, EventKind::RemoteCandidate),
            )
            .await?;
        session.add_subscription(candidate_sub);
        Ok(())
    }

    async fn abandon_setup(&mut self, transport: &Arc<dyn PeerTransport>, err: &CallError) {
        warn!("Call setup failed: {}", err);
        if let Err(e) = transport.close().await {
            debug!("Closing abandoned transport: {}", e);
        }
        let fallback = if self.media.is_some() {
            CallState::MediaReady
        } else {
            CallState::Idle
        };
        self.set_state(fallback);
        self.ui.status(CallStatus::Error(err.to_string()));
    }

    /// Timers are cancelled before anything else is released
    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.cancel_timers();
            session.unsubscribe_all();
            let dropped = session.buffer.take_all();
            if !dropped.is_empty() {
                debug!("Dropping {} unapplied remote candidates", dropped.len());
            }
            if let Err(e) = session.transport.close().await {
                warn!("Failed to close peer transport: {}", e);
            }
            if session.role == Role::Caller {
                if let Err(e) = self.channel.delete_room(&session.room_id).await {
                    warn!("Failed to delete room {}: {}", session.room_id, e);
                }
            }
        }
        if let Some(media) = self.media.take() {
            self.media_source.release(media);
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        let current = matches!(&self.session, Some(s) if s.generation == event.generation);
        if !current {
            debug!("Dropping stale event {:?}", event.kind);
            return;
        }
        match event.kind {
            EventKind::Transport(event) => self.on_transport_event(event).await,
            EventKind::RemoteCandidate(candidate) => self.on_remote_candidate(candidate).await,
            EventKind::RoomChanged(room) => self.on_room_changed(room).await,
            EventKind::GraceExpired(token) => self.on_grace_expired(token).await,
            EventKind::ConnectTimeout(token) => self.on_connect_timeout(token).await,
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => self.publish_local_candidate(candidate).await,
            TransportEvent::GatheringComplete => debug!("ICE gathering complete"),
            TransportEvent::StateChanged(state) => self.on_transport_state(state).await,
            TransportEvent::NegotiationChanged(state) => {
                debug!("Negotiation state {:?}", state);
                if state == NegotiationState::Stable {
                    self.flush_if_ready().await;
                }
            }
            TransportEvent::RemoteTrack { kind, id } => {
                info!("Remote {} track {}", kind, id);
                self.ui.remote_track(&kind, &id);
            }
        }
    }

    async fn publish_local_candidate(&mut self, candidate: IceCandidate) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        dump_candidate("local", &candidate);
        if let Err(e) = self
            .channel
            .append_candidate(&session.room_id, session.role, candidate)
            .await
        {
            warn!("Failed to publish local candidate: {}", e);
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        dump_candidate("remote", &candidate);
        let transport = session.transport.clone();
        if !can_apply(
            transport.has_remote_description().await,
            transport.negotiation_state(),
        ) {
            session.buffer.push(candidate);
            debug!("Remote candidate buffered ({} pending)", session.buffer.len());
            return;
        }
        // earlier arrivals go first
        for pending in session.buffer.take_all() {
            apply_candidate(&transport, &pending).await;
        }
        apply_candidate(&transport, &candidate).await;
    }

    async fn flush_if_ready(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.buffer.is_empty() {
            return;
        }
        let transport = session.transport.clone();
        if !can_apply(
            transport.has_remote_description().await,
            transport.negotiation_state(),
        ) {
            return;
        }
        let pending = session.buffer.take_all();
        info!("Applying {} buffered remote candidates", pending.len());
        candidate_kind_counts(&pending);
        for candidate in &pending {
            apply_candidate(&transport, candidate).await;
        }
    }

    async fn on_transport_state(&mut self, state: TransportState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        debug!("Transport state {:?}", state);
        session.last_transport_state = state;
        let transport = session.transport.clone();
        let path = if tier_for(state) == QualityTier::Good {
            transport.selected_path().await
        } else {
            None
        };
        self.ui.quality(reading_for(state, path));

        match state {
            TransportState::Checking => {
                let delay = self.config.connect_timeout();
                if let Some(session) = self.session.as_mut() {
                    session.arm_connect_timeout(&self.events_tx, delay);
                }
            }
            TransportState::Connected | TransportState::Completed => self.on_connected(),
            TransportState::Disconnected => {
                let delay = self.config.grace_period();
                if let Some(session) = self.session.as_mut() {
                    session.degraded = true;
                    session.arm_grace(&self.events_tx, delay);
                }
                warn!("Connection problem, waiting {:?} for recovery", delay);
                self.ui.status(CallStatus::ConnectionProblem);
            }
            TransportState::Failed => {
                if let Some(session) = self.session.as_mut() {
                    session.cancel_grace();
                }
                self.begin_restart("transport failed").await;
            }
            TransportState::New | TransportState::Closed => {}
        }
    }

    fn on_connected(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.cancel_timers();
        session.restart_attempts = 0;
        let degraded = std::mem::replace(&mut session.degraded, false);
        let recovered = degraded || self.state == CallState::Reconnecting;
        if self.state == CallState::Connected && !recovered {
            return;
        }
        self.set_state(CallState::Connected);
        if recovered {
            info!("Connection recovered");
            self.ui.status(CallStatus::Recovered);
        }
        self.ui.status(CallStatus::Connected);
    }

    async fn on_grace_expired(&mut self, token: u64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.take_grace(token) {
            debug!("Ignoring cancelled grace timer {}", token);
            return;
        }
        if is_up(session.transport.connection_state()) {
            return;
        }
        self.begin_restart("grace period expired").await;
    }

    async fn on_connect_timeout(&mut self, token: u64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.take_connect_timeout(token) {
            debug!("Ignoring cancelled connect timer {}", token);
            return;
        }
        if is_up(session.transport.connection_state()) {
            return;
        }
        self.begin_restart("connect timeout").await;
    }

    async fn begin_restart(&mut self, reason: &str) {
        let max = self.config.max_restart_attempts;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.cancel_timers();
        session.restart_attempts += 1;
        let attempt = session.restart_attempts;
        if attempt > max {
            self.fail_session(max).await;
            return;
        }

        let role = session.role;
        let room = session.room_id.clone();
        let transport = session.transport.clone();
        warn!("ICE restart {}/{} ({})", attempt, max, reason);
        self.set_state(CallState::Reconnecting);
        self.ui.status(CallStatus::Reconnecting { attempt });

        let servers = self.credentials.force_refresh().await.servers;
        if let Err(e) = transport.update_servers(&servers).await {
            warn!("Failed to apply refreshed ICE servers: {}", e);
        }

        match role {
            Role::Caller => {
                if let Err(e) = publish_restart_offer(&transport, self.channel.as_ref(), &room).await
                {
                    warn!("Failed to publish restart offer: {}", e);
                    self.ui.status(CallStatus::Error(e.to_string()));
                }
            }
            Role::Callee => debug!("Waiting for the caller to renegotiate"),
        }

        let delay = self.config.connect_timeout();
        if let Some(session) = self.session.as_mut() {
            session.arm_connect_timeout(&self.events_tx, delay);
        }
    }

    async fn fail_session(&mut self, attempts: u32) {
        let err = CallError::RestartExhausted(attempts);
        error!("{}", err);
        self.teardown().await;
        self.set_state(CallState::Failed);
        self.ui.status(CallStatus::Failed(err.to_string()));
    }

    async fn on_room_changed(&mut self, room: Option<Room>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match (session.role, room) {
            (Role::Callee, None) => {
                info!("Room {} was closed by the caller", session.room_id);
                self.ui.status(CallStatus::RemoteHungUp);
                self.hangup().await;
            }
            (Role::Caller, None) => debug!("Room {} removed", session.room_id),
            (Role::Caller, Some(room)) => {
                if let Some(answer) = room.answer {
                    self.apply_answer(answer).await;
                }
            }
            (Role::Callee, Some(room)) => {
                if let Some(offer) = room.offer {
                    self.renegotiate(offer).await;
                }
            }
        }
    }

    async fn apply_answer(&mut self, answer: SessionDescription) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.applied_remote.as_deref() == Some(answer.body.as_str()) {
            return;
        }
        let transport = session.transport.clone();
        if transport.negotiation_state() != NegotiationState::HaveLocalOffer {
            debug!("Ignoring answer outside have-local-offer");
            return;
        }
        if let Err(e) = transport.set_remote_description(&answer).await {
            warn!("Failed to apply remote answer: {}", e);
            self.ui.status(CallStatus::Error(e.to_string()));
            return;
        }
        info!("Remote answer applied");
        session.applied_remote = Some(answer.body);
        self.flush_if_ready().await;
    }

    /// A new offer in the room means the caller restarted ICE
    async fn renegotiate(&mut self, offer: SessionDescription) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.applied_remote.as_deref() == Some(offer.body.as_str()) {
            return;
        }
        info!("Caller sent a new offer, answering");
        let transport = session.transport.clone();
        let room = session.room_id.clone();
        let published = match accept_offer(&transport, &offer).await {
            Ok(answer) => self
                .channel
                .update_room(&room, RoomPatch::answer(answer))
                .await
                .map_err(CallError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            warn!("Renegotiation failed: {}", e);
            self.ui.status(CallStatus::Error(e.to_string()));
            return;
        }
        session.applied_remote = Some(offer.body);
        self.flush_if_ready().await;
    }
}

fn is_up(state: TransportState) -> bool {
    matches!(state, TransportState::Connected | TransportState::Completed)
}

async fn apply_candidate(transport: &Arc<dyn PeerTransport>, candidate: &IceCandidate) {
    if let Err(e) = transport.add_remote_candidate(candidate).await {
        warn!("Failed to add remote candidate: {}", e);
    }
}

/// Applies a remote offer and sets the answer locally. Publishing is left
/// to the caller.
async fn accept_offer(
    transport: &Arc<dyn PeerTransport>,
    offer: &SessionDescription,
) -> Result<SessionDescription, CallError> {
    transport.set_remote_description(offer).await?;
    let answer = transport.create_answer().await?;
    transport.set_local_description(&answer).await?;
    Ok(answer)
}

async fn publish_restart_offer(
    transport: &Arc<dyn PeerTransport>,
    channel: &dyn SignalingChannel,
    room: &RoomId,
) -> Result<(), CallError> {
    let offer = transport.create_offer(true).await?;
    transport.set_local_description(&offer).await?;
    channel.update_room(room, RoomPatch::offer(offer)).await?;
    Ok(())
}
