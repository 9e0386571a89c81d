//! Inbound message handling.
//!
//! | message          | effect                          | broadcast                      |
//! |------------------|---------------------------------|--------------------------------|
//! | `pixelChange`    | write the cell if in bounds     | `pixelChange` to everyone else |
//! | `cursorMove`     | store the cursor                | `cursorMove` to everyone else  |
//! | `userNameChange` | rename unless the name is blank | `userList` to everyone         |
//! | anything else    | none                            | none                           |

use crate::client_manager::ConnectionId;
use crate::engine::SyncEngine;
use log::{debug, trace, warn};
use shared::{ClientPacket, Color, Cursor, ServerPacket};

impl SyncEngine {
    /// Decodes one text frame and applies it. Frames that fail to decode are
    /// logged and dropped; the connection stays open.
    pub fn handle_text(&mut self, connection: ConnectionId, text: &str) {
        self.stats.messages += 1;
        match ClientPacket::decode(text) {
            Ok(packet) => self.handle_packet(connection, packet),
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Malformed message from connection {}: {}", connection, e);
            }
        }
    }

    pub fn handle_packet(&mut self, connection: ConnectionId, packet: ClientPacket) {
        match packet {
            ClientPacket::PixelChange { x, y, color } => self.pixel_change(connection, x, y, color),
            ClientPacket::CursorMove { x, y } => self.cursor_move(connection, x, y),
            ClientPacket::UserNameChange { name } => self.name_change(connection, &name),
            ClientPacket::Unknown => {
                debug!("Ignoring unknown message type from connection {}", connection);
            }
        }
        self.drain_evictions();
    }

    fn pixel_change(&mut self, connection: ConnectionId, x: i64, y: i64, color: Color) {
        let Some(user_id) = self.clients.lookup(connection).map(|p| p.id.clone()) else {
            debug!("pixelChange from connection {} without a session", connection);
            return;
        };

        if let Err(e) = self.grid.set(x, y, color.clone()) {
            self.stats.pixels_dropped += 1;
            trace!("Dropped pixel from {}: {}", user_id, e);
            return;
        }
        self.stats.pixels_applied += 1;

        let packet = ServerPacket::PixelChange {
            x,
            y,
            color,
            user_id,
        };
        self.broadcast(&packet, Some(connection));
    }

    fn cursor_move(&mut self, connection: ConnectionId, x: f32, y: f32) {
        let Some(participant) = self.clients.set_cursor(connection, x, y) else {
            debug!("cursorMove from connection {} without a session", connection);
            return;
        };

        let packet = ServerPacket::CursorMove {
            user_id: participant.id.clone(),
            cursor: Cursor { x, y },
        };
        self.broadcast(&packet, Some(connection));
    }

    fn name_change(&mut self, connection: ConnectionId, name: &str) {
        if self.clients.rename(connection, name) {
            self.broadcast_roster();
        }
    }
}
