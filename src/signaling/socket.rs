use super::envelope::{ByePayload, CandidatePayload, DescriptionPayload, SignalEnvelope};
use super::{CandidateListener, MemoryChannel, RoomListener, SignalingChannel, Subscription};
use crate::error::SignalingError;
use crate::types::{IceCandidate, Role, Room, RoomId, RoomPatch, SessionDescription};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Signaling over a WebSocket relay.
///
/// Every envelope seen on the socket is folded into a local room mirror, so
/// rooms and subscriptions behave like the in-memory store. `get_room` waits
/// up to the lookup timeout for a room the relay has not replayed yet.
pub struct SocketChannel {
    mirror: MemoryChannel,
    outbound: mpsc::UnboundedSender<Message>,
    changed: Arc<Notify>,
    lookup_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl SocketChannel {
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        let (ws, _) = connect_async(url).await?;
        info!("Connected to signaling relay {}", url);
        let (mut sink, mut stream) = ws.split();

        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!("Failed to write to signaling socket: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mirror = MemoryChannel::new();
        let changed = Arc::new(Notify::new());
        let reader = tokio::spawn({
            let mirror = mirror.clone();
            let changed = changed.clone();
            async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match SignalEnvelope::decode(&text) {
                            Ok(envelope) => {
                                apply_envelope(&mirror, envelope);
                                changed.notify_waiters();
                            }
                            Err(e) => warn!("Ignoring signaling message: {}", e),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Signaling socket error: {}", e);
                            break;
                        }
                    }
                }
                debug!("Signaling socket reader finished");
            }
        });

        Ok(Self {
            mirror,
            outbound,
            changed,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            tasks: vec![writer, reader],
        })
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    fn send(&self, envelope: SignalEnvelope) -> Result<(), SignalingError> {
        let text = envelope.encode()?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| SignalingError::Closed)
    }

    fn require_room(&self, room: &RoomId) -> Result<(), SignalingError> {
        match self.mirror.room(room) {
            Some(_) => Ok(()),
            None => Err(SignalingError::MissingRoom(room.clone())),
        }
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn apply_envelope(mirror: &MemoryChannel, envelope: SignalEnvelope) {
    match envelope {
        SignalEnvelope::Offer(p) => mirror.upsert_room(&p.room, RoomPatch::offer(p.description)),
        SignalEnvelope::Answer(p) => mirror.upsert_room(&p.room, RoomPatch::answer(p.description)),
        SignalEnvelope::Candidate(p) => mirror.upsert_candidate(&p.room, p.role, p.candidate),
        SignalEnvelope::Bye(p) => {
            mirror.remove_room(&p.room);
        }
    }
}

#[async_trait]
impl SignalingChannel for SocketChannel {
    async fn create_room(&self, offer: SessionDescription) -> Result<RoomId, SignalingError> {
        let room = RoomId::generate();
        self.send(SignalEnvelope::Offer(DescriptionPayload {
            room: room.clone(),
            description: offer.clone(),
        }))?;
        self.mirror.upsert_room(&room, RoomPatch::offer(offer));
        Ok(room)
    }

    async fn get_room(&self, room: &RoomId) -> Result<Option<Room>, SignalingError> {
        let deadline = Instant::now() + self.lookup_timeout;
        loop {
            let notified = self.changed.notified();
            if let Some(found) = self.mirror.room(room) {
                return Ok(Some(found));
            }
            if self.outbound.is_closed() {
                return Err(SignalingError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn update_room(&self, room: &RoomId, patch: RoomPatch) -> Result<(), SignalingError> {
        self.require_room(room)?;
        if let Some(offer) = &patch.offer {
            self.send(SignalEnvelope::Offer(DescriptionPayload {
                room: room.clone(),
                description: offer.clone(),
            }))?;
        }
        if let Some(answer) = &patch.answer {
            self.send(SignalEnvelope::Answer(DescriptionPayload {
                room: room.clone(),
                description: answer.clone(),
            }))?;
        }
        self.mirror.upsert_room(room, patch);
        Ok(())
    }

    async fn delete_room(&self, room: &RoomId) -> Result<(), SignalingError> {
        self.send(SignalEnvelope::Bye(ByePayload { room: room.clone() }))?;
        self.mirror.remove_room(room);
        Ok(())
    }

    async fn subscribe_room(
        &self,
        room: &RoomId,
        on_change: RoomListener,
    ) -> Result<Subscription, SignalingError> {
        self.mirror.subscribe_room(room, on_change).await
    }

    async fn append_candidate(
        &self,
        room: &RoomId,
        role: Role,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        self.require_room(room)?;
        self.send(SignalEnvelope::Candidate(CandidatePayload {
            room: room.clone(),
            role,
            candidate: candidate.clone(),
        }))?;
        self.mirror.upsert_candidate(room, role, candidate);
        Ok(())
    }

    async fn subscribe_candidates(
        &self,
        room: &RoomId,
        role: Role,
        on_added: CandidateListener,
    ) -> Result<Subscription, SignalingError> {
        self.mirror.subscribe_candidates(room, role, on_added).await
    }
}
