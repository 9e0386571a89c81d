//! The sync engine: the single owner of the grid, the participant registry and
//! the broadcast hub.
//!
//! The network layer moves one `SyncEngine` into its event loop and calls it
//! for every connection event, one at a time. Nothing here blocks or locks,
//! and every public entry point leaves the engine with no pending evictions.

use crate::broadcast::{BroadcastHub, Outbox};
use crate::client_manager::{ClientManager, ConnectionId, Participant};
use crate::config::ServerConfig;
use crate::grid::Grid;
use log::{debug, warn};
use shared::{Canvas, Color, ServerPacket, UserInfo};

/// Running counters, reported through the control handle and the periodic
/// stats log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Participants currently registered
    pub connected: usize,
    /// Connections accepted since startup
    pub total_connections: u64,
    /// Text frames received
    pub messages: u64,
    /// Frames that did not decode
    pub malformed: u64,
    /// Pixel changes written to the grid and relayed
    pub pixels_applied: u64,
    /// Pixel changes outside the grid
    pub pixels_dropped: u64,
    /// Peers disconnected because their outbound queue failed
    pub evictions: u64,
}

pub struct SyncEngine {
    pub(crate) grid: Grid,
    pub(crate) clients: ClientManager,
    pub(crate) hub: BroadcastHub,
    pub(crate) stats: EngineStats,
    pending_evictions: Vec<ConnectionId>,
    // Evicted connections whose sockets the network layer still has to close
    evicted: Vec<ConnectionId>,
}

impl SyncEngine {
    pub fn new(grid: Grid, palette: Vec<Color>) -> Self {
        Self {
            grid,
            clients: ClientManager::new(palette),
            hub: BroadcastHub::new(),
            stats: EngineStats::default(),
            pending_evictions: Vec::new(),
            evicted: Vec::new(),
        }
    }

    /// Builds an engine from an already validated configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        let grid = Grid::new(
            config.grid_width,
            config.grid_height,
            config.background.clone(),
        );
        Self::new(grid, config.palette.clone())
    }

    /// Joins a new connection.
    ///
    /// The newcomer gets the full canvas and its own identity first, then
    /// everyone (newcomer included) gets the refreshed roster.
    pub fn connect(&mut self, connection: ConnectionId, outbox: Outbox) -> Participant {
        self.hub.register(connection, outbox);
        let participant = self.clients.register(connection);
        self.stats.total_connections += 1;

        let welcome = ServerPacket::CanvasState {
            canvas: self.grid.snapshot(),
            user_id: participant.id.clone(),
            user_color: participant.color.clone(),
        };
        if let Err(e) = self.hub.send_to(connection, &welcome) {
            warn!("Could not send canvas to {}: {}", participant.id, e);
            self.pending_evictions.push(connection);
        }

        self.broadcast_roster();
        self.drain_evictions();
        participant
    }

    /// Handles a closed connection. Closing a connection that never
    /// registered, or that was already evicted, does nothing.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.hub.unregister(connection);
        self.leave(connection);
        self.drain_evictions();
    }

    /// Drops every outbound queue, which closes every socket.
    pub fn shutdown(&mut self) {
        debug!("Closing {} connections", self.hub.len());
        self.hub.close_all();
    }

    pub fn snapshot(&self) -> Canvas {
        self.grid.snapshot()
    }

    /// Current color of one cell, or None outside the grid.
    pub fn pixel(&self, x: i64, y: i64) -> Option<Color> {
        self.grid.get(x, y).ok().cloned()
    }

    pub fn roster(&self) -> Vec<UserInfo> {
        self.clients.list_all()
    }

    pub fn participant_count(&self) -> usize {
        self.clients.len()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            connected: self.clients.len(),
            ..self.stats
        }
    }

    /// Connections evicted since the last call. Their sessions are already
    /// gone; the caller is expected to tear down the sockets.
    pub fn take_evicted(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.evicted)
    }

    /// Broadcasts through the hub and queues any peer that failed delivery
    /// for eviction.
    pub(crate) fn broadcast(&mut self, packet: &ServerPacket, exclude: Option<ConnectionId>) {
        let failed = self.hub.broadcast(packet, exclude);
        self.pending_evictions.extend(failed);
    }

    pub(crate) fn broadcast_roster(&mut self) {
        let roster = ServerPacket::UserList {
            users: self.clients.list_all(),
        };
        self.broadcast(&roster, None);
    }

    /// Runs the leave path for every evicted peer. Announcing a departure can
    /// itself fail on further peers, so this loops until the queue is empty.
    pub(crate) fn drain_evictions(&mut self) {
        while let Some(connection) = self.pending_evictions.pop() {
            self.stats.evictions += 1;
            warn!("Evicting connection {}", connection);
            self.hub.unregister(connection);
            self.evicted.push(connection);
            self.leave(connection);
        }
    }

    fn leave(&mut self, connection: ConnectionId) {
        let Some(participant) = self.clients.unregister(connection) else {
            debug!("Connection {} closed without a session", connection);
            return;
        };

        self.broadcast(
            &ServerPacket::UserDisconnected {
                user_id: participant.id,
            },
            None,
        );
        self.broadcast_roster();
    }
}
