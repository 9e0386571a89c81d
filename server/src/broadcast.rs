//! Fan-out of server packets to open connections.
//!
//! Every connection owns a bounded outbound queue that its writer task drains
//! into the socket. The hub only ever uses `try_send`, so a slow or dead peer
//! can never stall the engine: a full or closed queue counts as a delivery
//! failure, the peer is dropped from the hub and handed back to the caller to
//! be disconnected.

use crate::client_manager::ConnectionId;
use log::{error, trace, warn};
use shared::ServerPacket;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Stalled,
    #[error("connection writer has shut down")]
    Closed,
    #[error("connection is not open")]
    Unknown,
}

#[derive(Default)]
pub struct BroadcastHub {
    peers: HashMap<ConnectionId, Outbox>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection: ConnectionId, outbox: Outbox) {
        self.peers.insert(connection, outbox);
    }

    /// Drops a peer's outbox. Returns false if it was not open.
    pub fn unregister(&mut self, connection: ConnectionId) -> bool {
        self.peers.remove(&connection).is_some()
    }

    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.peers.contains_key(&connection)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drops every outbox, which closes all writer tasks.
    pub fn close_all(&mut self) {
        self.peers.clear();
    }

    /// Delivers one packet to a single connection.
    ///
    /// On failure the peer is removed from the hub.
    pub fn send_to(
        &mut self,
        connection: ConnectionId,
        packet: &ServerPacket,
    ) -> Result<(), DeliveryError> {
        let Some(frame) = encode(packet) else {
            return Ok(());
        };
        let outbox = self.peers.get(&connection).ok_or(DeliveryError::Unknown)?;

        match deliver(outbox, frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Dropping connection {}: {}", connection, e);
                self.peers.remove(&connection);
                Err(e)
            }
        }
    }

    /// Serializes `packet` once and queues it for every open connection
    /// except `exclude`.
    ///
    /// Each recipient is handled independently. Returns the connections that
    /// could not take the frame; they have already been removed from the hub.
    pub fn broadcast(
        &mut self,
        packet: &ServerPacket,
        exclude: Option<ConnectionId>,
    ) -> Vec<ConnectionId> {
        let Some(frame) = encode(packet) else {
            return Vec::new();
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (connection, outbox) in &self.peers {
            if Some(*connection) == exclude {
                continue;
            }

            match deliver(outbox, frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Failed to deliver {} to connection {}: {}",
                        packet.kind(),
                        connection,
                        e
                    );
                    failed.push(*connection);
                }
            }
        }

        for connection in &failed {
            self.peers.remove(connection);
        }

        trace!(
            "Broadcast {} to {} peers ({} failed)",
            packet.kind(),
            delivered,
            failed.len()
        );

        failed
    }
}

fn encode(packet: &ServerPacket) -> Option<Message> {
    match packet.encode() {
        Ok(json) => Some(Message::text(json)),
        Err(e) => {
            error!("Failed to serialize {}: {}", packet.kind(), e);
            None
        }
    }
}

fn deliver(outbox: &Outbox, frame: Message) -> Result<(), DeliveryError> {
    outbox.try_send(frame).map_err(|e| match e {
        TrySendError::Full(_) => DeliveryError::Stalled,
        TrySendError::Closed(_) => DeliveryError::Closed,
    })
}
