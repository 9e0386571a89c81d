//! Participant registry for the connected clients
//!
//! This module tracks who is connected to the shared canvas:
//! - Identity assignment (`user_<n>`) from a counter that is never reset
//! - Default display names and palette colors derived from that counter
//! - Display name and cursor updates
//! - Roster snapshots in join order for `userList` broadcasts
//!
//! Every method is infallible. Operations on a connection that already left
//! are silent no-ops, since a message can race with that connection's close.

use log::{debug, info};
use shared::{Color, Cursor, UserInfo};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Process-local handle for one accepted WebSocket connection
pub type ConnectionId = u64;

/// Server-side record of one connected client
#[derive(Debug, Clone)]
pub struct Participant {
    /// Public identifier, `user_<n>`
    pub id: String,
    /// Display name, user-settable
    pub name: String,
    /// Palette color assigned at join
    pub color: Color,
    /// Last reported cursor, absent until the first `cursorMove`
    pub cursor: Option<Cursor>,
    /// When the connection registered
    pub connected_at: Instant,
}

impl Participant {
    /// Creates the participant for identity number `number`
    ///
    /// The color is picked by rotating through the palette, so two
    /// participants share a color once more than `palette.len()` have joined.
    pub fn new(number: u64, palette: &[Color]) -> Self {
        let color = palette[(number % palette.len() as u64) as usize].clone();
        Self {
            id: format!("user_{}", number),
            name: format!("User {}", number),
            color,
            cursor: None,
            connected_at: Instant::now(),
        }
    }

    /// How long this participant has been connected
    pub fn session_length(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Roster entry sent to clients
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            cursor: self.cursor,
        }
    }
}

/// Maps live connections to their participants
///
/// Join order is kept separately from the lookup table so roster
/// broadcasts list participants in the order they registered.
pub struct ClientManager {
    /// Participants indexed by connection
    clients: HashMap<ConnectionId, Participant>,
    /// Connections in registration order
    order: Vec<ConnectionId>,
    /// Last identity number handed out
    identity_counter: u64,
    /// Display colors, cycled by identity number
    palette: Vec<Color>,
}

impl ClientManager {
    /// Creates an empty registry
    ///
    /// `palette` must not be empty; the server configuration validates this
    /// before the registry is built.
    pub fn new(palette: Vec<Color>) -> Self {
        assert!(!palette.is_empty(), "participant palette must not be empty");
        Self {
            clients: HashMap::new(),
            order: Vec::new(),
            identity_counter: 0,
            palette,
        }
    }

    /// Registers a new connection and returns its participant
    ///
    /// Identity numbers start at 1 and are never reused, even after the
    /// participant leaves.
    pub fn register(&mut self, connection: ConnectionId) -> Participant {
        self.identity_counter += 1;
        let participant = Participant::new(self.identity_counter, &self.palette);

        info!(
            "{} ({}) joined on connection {}",
            participant.id, participant.name, connection
        );

        if self
            .clients
            .insert(connection, participant.clone())
            .is_none()
        {
            self.order.push(connection);
        }

        participant
    }

    /// Removes a connection's participant
    ///
    /// Returns None if the connection was never registered or already left.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<Participant> {
        let participant = self.clients.remove(&connection)?;
        self.order.retain(|id| *id != connection);
        info!(
            "{} ({}) left after {:.1}s",
            participant.id,
            participant.name,
            participant.session_length().as_secs_f32()
        );
        Some(participant)
    }

    pub fn lookup(&self, connection: ConnectionId) -> Option<&Participant> {
        self.clients.get(&connection)
    }

    /// Records a cursor position
    ///
    /// Returns the updated participant, or None if the connection is gone.
    pub fn set_cursor(&mut self, connection: ConnectionId, x: f32, y: f32) -> Option<&Participant> {
        let participant = self.clients.get_mut(&connection)?;
        participant.cursor = Some(Cursor { x, y });
        Some(participant)
    }

    /// Changes a display name
    ///
    /// Names that are empty or only whitespace are rejected. Accepted names
    /// are stored exactly as sent. Returns true when the name changed hands.
    pub fn rename(&mut self, connection: ConnectionId, name: &str) -> bool {
        if name.trim().is_empty() {
            debug!("Rejected blank name from connection {}", connection);
            return false;
        }

        match self.clients.get_mut(&connection) {
            Some(participant) => {
                debug!("{} renamed to {:?}", participant.id, name);
                participant.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the roster in join order
    pub fn list_all(&self) -> Vec<UserInfo> {
        self.order
            .iter()
            .filter_map(|connection| self.clients.get(connection))
            .map(Participant::info)
            .collect()
    }

    /// Returns the number of registered participants
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if nobody is connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
