//! WebSocket relay for [`SocketChannel`](super::SocketChannel) clients.
//!
//! Every message is forwarded to every other connection. The relay also
//! keeps each room's history and replays it to newcomers, so a callee that
//! connects after the caller still sees the offer and earlier candidates.
//! A `bye` drops the room's history, and so does the disconnect of the last
//! peer that published into the room.

use super::envelope::SignalEnvelope;
use crate::types::RoomId;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

#[derive(Default)]
struct RoomHistory {
    messages: Vec<String>,
    publishers: HashSet<u64>,
}

#[derive(Default)]
struct HubState {
    peers: HashMap<u64, mpsc::UnboundedSender<Message>>,
    history: HashMap<RoomId, RoomHistory>,
    next_peer: u64,
}

#[derive(Default)]
pub struct RelayHub {
    state: Mutex<HubState>,
}

impl RelayHub {
    /// Registers a peer and queues the retained history for it
    fn join(&self, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let mut state = self.state.lock();
        state.next_peer += 1;
        let id = state.next_peer;
        for room in state.history.values() {
            for text in &room.messages {
                let _ = tx.send(Message::Text(text.clone()));
            }
        }
        state.peers.insert(id, tx);
        id
    }

    fn leave(&self, id: u64) {
        let mut state = self.state.lock();
        state.peers.remove(&id);
        state.history.retain(|room, history| {
            history.publishers.remove(&id);
            if history.publishers.is_empty() {
                debug!("Room {} has no publishers left, dropping its history", room);
                return false;
            }
            true
        });
    }

    fn publish(&self, from: u64, envelope: &SignalEnvelope, text: String) {
        let mut state = self.state.lock();
        match envelope {
            SignalEnvelope::Bye(p) => {
                state.history.remove(&p.room);
            }
            other => {
                let room = state.history.entry(other.room().clone()).or_default();
                room.messages.push(text.clone());
                room.publishers.insert(from);
            }
        }
        state.peers.retain(|id, tx| {
            *id == from || tx.send(Message::Text(text.clone())).is_ok()
        });
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().history.len()
    }
}

pub struct RelayServer {
    listener: TcpListener,
    hub: Arc<RelayHub>,
}

impl RelayServer {
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            hub: Arc::new(RelayHub::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<RelayHub> {
        self.hub.clone()
    }

    pub async fn run(self) -> io::Result<()> {
        info!("Signaling relay listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let hub = self.hub.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, hub).await {
                    warn!("Relay connection {} ended with error: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, hub: Arc<RelayHub>) -> Result<(), WsError> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = hub.join(tx);
    info!("Relay peer {} connected", id);

    let forward = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut result = Ok(());
    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Text(text)) => match SignalEnvelope::decode(&text) {
                Ok(envelope) => {
                    debug!("Relay peer {} -> room {}", id, envelope.room());
                    hub.publish(id, &envelope, text);
                }
                Err(e) => warn!("Relay peer {} sent a bad message: {}", id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    hub.leave(id);
    forward.abort();
    info!("Relay peer {} disconnected", id);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::envelope::{ByePayload, DescriptionPayload};
    use crate::types::SessionDescription;

    fn offer(room: &str) -> SignalEnvelope {
        SignalEnvelope::Offer(DescriptionPayload {
            room: RoomId::new(room),
            description: SessionDescription::offer("o"),
        })
    }

    #[test]
    fn publish_skips_sender_and_replays_history() {
        let hub = RelayHub::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = hub.join(tx_a);
        let _b = hub.join(tx_b);

        let env = offer("r1");
        hub.publish(a, &env, env.encode().unwrap());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());

        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        hub.join(tx_c);
        assert!(rx_c.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn bye_clears_history() {
        let hub = RelayHub::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = hub.join(tx);
        let env = offer("r1");
        hub.publish(a, &env, env.encode().unwrap());
        assert_eq!(hub.room_count(), 1);

        let bye = SignalEnvelope::Bye(ByePayload {
            room: RoomId::new("r1"),
        });
        hub.publish(a, &bye, bye.encode().unwrap());
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn history_goes_with_its_last_publisher() {
        let hub = RelayHub::default();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        let a = hub.join(tx_a);
        let b = hub.join(tx_b);
        let c = hub.join(tx_c);

        let first = offer("r1");
        hub.publish(a, &first, first.encode().unwrap());
        hub.publish(b, &first, first.encode().unwrap());
        let second = offer("r2");
        hub.publish(c, &second, second.encode().unwrap());

        hub.leave(a);
        assert_eq!(hub.room_count(), 2);
        hub.leave(b);
        assert_eq!(hub.room_count(), 1);

        let (tx_d, mut rx_d) = mpsc::unbounded_channel();
        hub.join(tx_d);
        let replayed = rx_d.try_recv().unwrap();
        assert!(matches!(replayed, Message::Text(t) if t.contains("r2")));
        assert!(rx_d.try_recv().is_err());
    }

    #[test]
    fn dead_peers_are_dropped() {
        let hub = RelayHub::default();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = hub.join(tx_a);
        hub.join(tx_b);
        drop(rx_b);

        let env = offer("r1");
        hub.publish(a, &env, env.encode().unwrap());
        assert_eq!(hub.peer_count(), 1);
    }
}
