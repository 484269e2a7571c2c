use super::{CandidateListener, RoomListener, SignalingChannel, Subscription};
use crate::error::SignalingError;
use crate::types::{IceCandidate, Role, Room, RoomId, RoomPatch, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Default)]
struct RoomEntry {
    room: Room,
    caller_candidates: Vec<IceCandidate>,
    callee_candidates: Vec<IceCandidate>,
    room_watchers: Vec<(u64, RoomListener)>,
    candidate_watchers: Vec<(u64, Role, CandidateListener)>,
}

impl RoomEntry {
    fn candidates(&self, role: Role) -> &Vec<IceCandidate> {
        match role {
            Role::Caller => &self.caller_candidates,
            Role::Callee => &self.callee_candidates,
        }
    }

    fn candidates_mut(&mut self, role: Role) -> &mut Vec<IceCandidate> {
        match role {
            Role::Caller => &mut self.caller_candidates,
            Role::Callee => &mut self.callee_candidates,
        }
    }

    fn notify_room(&self, room: Option<&Room>) {
        for (_, listener) in &self.room_watchers {
            listener(room.cloned());
        }
    }

    fn push_candidate(&mut self, role: Role, candidate: IceCandidate) {
        for (_, watched, listener) in &self.candidate_watchers {
            if *watched == role {
                listener(candidate.clone());
            }
        }
        self.candidates_mut(role).push(candidate);
    }
}

#[derive(Default)]
struct Store {
    rooms: HashMap<RoomId, RoomEntry>,
    next_watcher: u64,
    offline: bool,
    deleted: usize,
}

impl Store {
    fn check_online(&self) -> Result<(), SignalingError> {
        if self.offline {
            Err(SignalingError::Io("signaling store unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn entry(&mut self, room: &RoomId) -> Result<&mut RoomEntry, SignalingError> {
        self.rooms
            .get_mut(room)
            .ok_or_else(|| SignalingError::MissingRoom(room.clone()))
    }

    fn watcher_id(&mut self) -> u64 {
        self.next_watcher += 1;
        self.next_watcher
    }
}

/// In-process room document store.
///
/// Listeners run while the store lock is held, which is what keeps delivery
/// ordered. They must not call back into the channel.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    store: Arc<Mutex<Store>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every channel operation fail with an I/O error until reset
    pub fn set_offline(&self, offline: bool) {
        self.store.lock().offline = offline;
    }

    pub fn room(&self, room: &RoomId) -> Option<Room> {
        self.store.lock().rooms.get(room).map(|e| e.room.clone())
    }

    pub fn candidates(&self, room: &RoomId, role: Role) -> Vec<IceCandidate> {
        self.store
            .lock()
            .rooms
            .get(room)
            .map(|e| e.candidates(role).clone())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.store.lock().rooms.len()
    }

    /// Number of rooms removed through `delete_room`
    pub fn deleted_rooms(&self) -> usize {
        self.store.lock().deleted
    }

    /// Creates the room on first sight, then applies `patch`
    pub(crate) fn upsert_room(&self, room: &RoomId, patch: RoomPatch) {
        let mut store = self.store.lock();
        let entry = store.rooms.entry(room.clone()).or_default();
        patch.apply(&mut entry.room);
        entry.notify_room(Some(&entry.room));
    }

    pub(crate) fn upsert_candidate(&self, room: &RoomId, role: Role, candidate: IceCandidate) {
        let mut store = self.store.lock();
        store
            .rooms
            .entry(room.clone())
            .or_default()
            .push_candidate(role, candidate);
    }

    pub(crate) fn remove_room(&self, room: &RoomId) -> bool {
        let mut store = self.store.lock();
        match store.rooms.remove(room) {
            Some(entry) => {
                store.deleted += 1;
                entry.notify_room(None);
                true
            }
            None => false,
        }
    }

    fn unsubscribe_room(store: &Weak<Mutex<Store>>, room: &RoomId, watcher: u64) {
        if let Some(store) = store.upgrade() {
            if let Some(entry) = store.lock().rooms.get_mut(room) {
                entry.room_watchers.retain(|(id, _)| *id != watcher);
            }
        }
    }

    fn unsubscribe_candidates(store: &Weak<Mutex<Store>>, room: &RoomId, watcher: u64) {
        if let Some(store) = store.upgrade() {
            if let Some(entry) = store.lock().rooms.get_mut(room) {
                entry.candidate_watchers.retain(|(id, _, _)| *id != watcher);
            }
        }
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn create_room(&self, offer: SessionDescription) -> Result<RoomId, SignalingError> {
        let mut store = self.store.lock();
        store.check_online()?;
        let id = RoomId::generate();
        let entry = store.rooms.entry(id.clone()).or_default();
        entry.room.offer = Some(offer);
        debug!("Room {} created", id);
        Ok(id)
    }

    async fn get_room(&self, room: &RoomId) -> Result<Option<Room>, SignalingError> {
        let store = self.store.lock();
        store.check_online()?;
        Ok(store.rooms.get(room).map(|e| e.room.clone()))
    }

    async fn update_room(&self, room: &RoomId, patch: RoomPatch) -> Result<(), SignalingError> {
        let mut store = self.store.lock();
        store.check_online()?;
        let entry = store.entry(room)?;
        patch.apply(&mut entry.room);
        entry.notify_room(Some(&entry.room));
        Ok(())
    }

    async fn delete_room(&self, room: &RoomId) -> Result<(), SignalingError> {
        self.store.lock().check_online()?;
        if self.remove_room(room) {
            debug!("Room {} deleted", room);
        }
        Ok(())
    }

    async fn subscribe_room(
        &self,
        room: &RoomId,
        on_change: RoomListener,
    ) -> Result<Subscription, SignalingError> {
        let mut store = self.store.lock();
        store.check_online()?;
        let watcher = store.watcher_id();
        let entry = store.entry(room)?;
        on_change(Some(entry.room.clone()));
        entry.room_watchers.push((watcher, on_change));

        let weak = Arc::downgrade(&self.store);
        let room = room.clone();
        Ok(Subscription::new(move || {
            Self::unsubscribe_room(&weak, &room, watcher)
        }))
    }

    async fn append_candidate(
        &self,
        room: &RoomId,
        role: Role,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        let mut store = self.store.lock();
        store.check_online()?;
        store.entry(room)?.push_candidate(role, candidate);
        Ok(())
    }

    async fn subscribe_candidates(
        &self,
        room: &RoomId,
        role: Role,
        on_added: CandidateListener,
    ) -> Result<Subscription, SignalingError> {
        let mut store = self.store.lock();
        store.check_online()?;
        let watcher = store.watcher_id();
        let entry = store.entry(room)?;
        for existing in entry.candidates(role) {
            on_added(existing.clone());
        }
        entry.candidate_watchers.push((watcher, role, on_added));

        let weak = Arc::downgrade(&self.store);
        let room = room.clone();
        Ok(Subscription::new(move || {
            Self::unsubscribe_candidates(&weak, &room, watcher)
        }))
    }
}
