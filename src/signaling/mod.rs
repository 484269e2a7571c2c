//! Room-scoped signaling used to swap offers, answers and candidates.
//!
//! Two backends share the [`SignalingChannel`] contract:
//! - [`MemoryChannel`]: an in-process room document store
//! - [`SocketChannel`]: `{type, payload}` envelopes over a WebSocket relay
//!
//! Subscriptions deliver whatever already exists at subscription time once,
//! then every later change, in order.

pub mod envelope;
pub mod memory;
pub mod relay;
pub mod socket;

use crate::error::SignalingError;
use crate::types::{IceCandidate, Role, Room, RoomId, RoomPatch, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;

pub use envelope::SignalEnvelope;
pub use memory::MemoryChannel;
pub use socket::SocketChannel;

/// Receives the room after every change; `None` once it is deleted
pub type RoomListener = Arc<dyn Fn(Option<Room>) + Send + Sync>;

pub type CandidateListener = Arc<dyn Fn(IceCandidate) + Send + Sync>;

/// Disposer returned by the subscribe calls. Dropping it unsubscribes too.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn create_room(&self, offer: SessionDescription) -> Result<RoomId, SignalingError>;

    async fn get_room(&self, room: &RoomId) -> Result<Option<Room>, SignalingError>;

    async fn update_room(&self, room: &RoomId, patch: RoomPatch) -> Result<(), SignalingError>;

    async fn delete_room(&self, room: &RoomId) -> Result<(), SignalingError>;

    async fn subscribe_room(
        &self,
        room: &RoomId,
        on_change: RoomListener,
    ) -> Result<Subscription, SignalingError>;

    async fn append_candidate(
        &self,
        room: &RoomId,
        role: Role,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError>;

    /// Candidates published by `role`
    async fn subscribe_candidates(
        &self,
        room: &RoomId,
        role: Role,
        on_added: CandidateListener,
    ) -> Result<Subscription, SignalingError>;
}
