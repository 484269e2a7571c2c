use super::candidates::CandidateBuffer;
use crate::peer::transport::{PeerTransport, TransportEvent, TransportState};
use crate::signaling::Subscription;
use crate::types::{IceCandidate, Role, Room, RoomId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    MediaReady,
    Offering,
    Answering,
    Negotiating,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

impl CallState {
    /// States in which a session owns a transport
    pub fn is_live(self) -> bool {
        matches!(
            self,
            CallState::Offering
                | CallState::Answering
                | CallState::Negotiating
                | CallState::Connected
                | CallState::Reconnecting
        )
    }
}

#[derive(Debug)]
pub(crate) enum EventKind {
    Transport(TransportEvent),
    RemoteCandidate(IceCandidate),
    RoomChanged(Option<Room>),
    GraceExpired(u64),
    ConnectTimeout(u64),
}

/// Everything that reaches the coordinator from callbacks and timers,
/// stamped with the session generation it belongs to
#[derive(Debug)]
pub(crate) struct SessionEvent {
    pub generation: u64,
    pub kind: EventKind,
}

pub(crate) type EventSender = mpsc::UnboundedSender<SessionEvent>;

pub(crate) struct Timer {
    token: u64,
    task: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        self.task.abort();
    }
}

/// Run-time state of one call, created on start/join and dropped on hangup
pub struct CoordinatorSession {
    pub(crate) generation: u64,
    pub(crate) role: Role,
    pub(crate) room_id: RoomId,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) buffer: CandidateBuffer,
    pub(crate) restart_attempts: u32,
    pub(crate) last_transport_state: TransportState,
    /// Body of the last description applied as remote
    pub(crate) applied_remote: Option<String>,
    /// A connection problem was reported and not yet resolved
    pub(crate) degraded: bool,
    grace_timer: Option<Timer>,
    connect_timer: Option<Timer>,
    next_token: u64,
    subscriptions: Vec<Subscription>,
}

impl CoordinatorSession {
    pub(crate) fn new(
        generation: u64,
        role: Role,
        room_id: RoomId,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            generation,
            role,
            room_id,
            transport,
            buffer: CandidateBuffer::default(),
            restart_attempts: 0,
            last_transport_state: TransportState::New,
            applied_remote: None,
            degraded: false,
            grace_timer: None,
            connect_timer: None,
            next_token: 0,
            subscriptions: Vec::new(),
        }
    }

    pub(crate) fn add_subscription(&mut self, sub: Subscription) {
        self.subscriptions.push(sub);
    }

    fn spawn_timer(
        &mut self,
        events: &EventSender,
        delay: Duration,
        kind: fn(u64) -> EventKind,
    ) -> Timer {
        self.next_token += 1;
        let token = self.next_token;
        let generation = self.generation;
        let events = events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent {
                generation,
                kind: kind(token),
            });
        });
        Timer { token, task }
    }

    /// Starts the grace timer unless one is already running
    pub(crate) fn arm_grace(&mut self, events: &EventSender, delay: Duration) {
        if self.grace_timer.is_none() {
            let timer = self.spawn_timer(events, delay, EventKind::GraceExpired);
            debug!("Grace timer {} armed for {:?}", timer.token, delay);
            self.grace_timer = Some(timer);
        }
    }

    /// (Re)starts the connect timeout
    pub(crate) fn arm_connect_timeout(&mut self, events: &EventSender, delay: Duration) {
        if let Some(old) = self.connect_timer.take() {
            old.cancel();
        }
        let timer = self.spawn_timer(events, delay, EventKind::ConnectTimeout);
        debug!("Connect timer {} armed for {:?}", timer.token, delay);
        self.connect_timer = Some(timer);
    }

    pub(crate) fn cancel_grace(&mut self) {
        if let Some(timer) = self.grace_timer.take() {
            timer.cancel();
        }
    }

    pub(crate) fn cancel_connect_timeout(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.cancel();
        }
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.cancel_grace();
        self.cancel_connect_timeout();
    }

    /// Consumes the grace timer if `token` is the one currently armed
    pub(crate) fn take_grace(&mut self, token: u64) -> bool {
        match &self.grace_timer {
            Some(timer) if timer.token == token => {
                self.grace_timer = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn take_connect_timeout(&mut self, token: u64) -> bool {
        match &self.connect_timer {
            Some(timer) if timer.token == token => {
                self.connect_timer = None;
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn has_grace_timer(&self) -> bool {
        self.grace_timer.is_some()
    }

    #[cfg(test)]
    pub(crate) fn has_connect_timer(&self) -> bool {
        self.connect_timer.is_some()
    }

    pub(crate) fn unsubscribe_all(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
    }
}

impl Drop for CoordinatorSession {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
