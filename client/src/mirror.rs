//! Client-side copy of the shared canvas and the people drawing on it

use log::{debug, trace};
use shared::{Canvas, Color, Cursor, ServerPacket, UserInfo, DEFAULT_BACKGROUND};
use std::collections::HashMap;

/// Pointer of another participant, drawn in that participant's color
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    pub user_id: String,
    pub color: Color,
    pub position: Cursor,
}

/// Local view kept in step with the server by applying every server packet
#[derive(Debug, Clone)]
pub struct CanvasMirror {
    canvas: Canvas,
    user_id: Option<String>,
    user_color: Option<Color>,
    users: Vec<UserInfo>,
    cursors: HashMap<String, RemoteCursor>,
}

impl CanvasMirror {
    pub fn new() -> Self {
        Self {
            canvas: Canvas::filled(0, 0, Color::from(DEFAULT_BACKGROUND)),
            user_id: None,
            user_color: None,
            users: Vec::new(),
            cursors: HashMap::new(),
        }
    }

    /// True once the initial canvas has arrived
    pub fn is_synced(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn apply(&mut self, packet: &ServerPacket) {
        match packet {
            ServerPacket::CanvasState {
                canvas,
                user_id,
                user_color,
            } => {
                debug!(
                    "Joined as {} on a {}x{} canvas",
                    user_id,
                    canvas.width(),
                    canvas.height()
                );
                self.canvas = canvas.clone();
                self.user_id = Some(user_id.clone());
                self.user_color = Some(user_color.clone());
            }

            ServerPacket::PixelChange {
                x,
                y,
                color,
                user_id,
            } => {
                if self.is_own(user_id) {
                    return;
                }
                if !self.canvas.set(*x, *y, color.clone()) {
                    trace!("Ignoring pixel ({}, {}) outside the local canvas", x, y);
                }
            }

            ServerPacket::CursorMove { user_id, cursor } => {
                if self.is_own(user_id) {
                    return;
                }
                let Some(user) = self.users.iter().find(|u| &u.id == user_id) else {
                    trace!("Cursor from unknown user {}", user_id);
                    return;
                };
                let remote = RemoteCursor {
                    user_id: user_id.clone(),
                    color: user.color.clone(),
                    position: *cursor,
                };
                self.cursors.insert(user_id.clone(), remote);
            }

            ServerPacket::UserList { users } => {
                self.users = users.clone();
            }

            ServerPacket::UserDisconnected { user_id } => {
                self.cursors.remove(user_id);
            }
        }
    }

    /// Writes a cell locally, ahead of the server echoing it to others.
    /// Returns false if the cell is outside the canvas.
    pub fn paint(&mut self, x: i64, y: i64, color: Color) -> bool {
        self.canvas.set(x, y, color)
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub(crate) fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn user_color(&self) -> Option<&Color> {
        self.user_color.as_ref()
    }

    /// Roster from the most recent `userList`
    pub fn users(&self) -> &[UserInfo] {
        &self.users
    }

    pub fn remote_cursor(&self, user_id: &str) -> Option<&RemoteCursor> {
        self.cursors.get(user_id)
    }

    pub fn remote_cursors(&self) -> impl Iterator<Item = &RemoteCursor> {
        self.cursors.values()
    }

    fn is_own(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

impl Default for CanvasMirror {
    fn default() -> Self {
        Self::new()
    }
}
