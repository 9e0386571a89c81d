use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_GRID_WIDTH: usize = 64;
pub const DEFAULT_GRID_HEIGHT: usize = 64;
pub const DEFAULT_BACKGROUND: &str = "#ffffff";

/// Opaque color token. The protocol never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(String);

impl Color {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Color {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Color {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last reported pointer position of a participant, in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub x: f32,
    pub y: f32,
}

/// Roster entry as it appears in `userList`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub color: Color,
    pub cursor: Option<Cursor>,
}

/// Full pixel grid, serialized as rows: `canvas[y][x]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Canvas {
    rows: Vec<Vec<Color>>,
}

impl Canvas {
    pub fn filled(width: usize, height: usize, color: Color) -> Self {
        Self {
            rows: vec![vec![color; width]; height],
        }
    }

    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        self.index(x, y).is_some()
    }

    pub fn get(&self, x: i64, y: i64) -> Option<&Color> {
        let (col, row) = self.index(x, y)?;
        Some(&self.rows[row][col])
    }

    /// Writes one cell. Returns false and leaves the canvas untouched when
    /// the coordinates fall outside the grid.
    pub fn set(&mut self, x: i64, y: i64, color: Color) -> bool {
        match self.index(x, y) {
            Some((col, row)) => {
                self.rows[row][col] = color;
                true
            }
            None => false,
        }
    }

    pub fn rows(&self) -> &[Vec<Color>] {
        &self.rows
    }

    fn index(&self, x: i64, y: i64) -> Option<(usize, usize)> {
        let col = usize::try_from(x).ok()?;
        let row = usize::try_from(y).ok()?;
        let cells = self.rows.get(row)?;
        if col < cells.len() {
            Some((col, row))
        } else {
            None
        }
    }
}

/// Frames sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientPacket {
    PixelChange { x: i64, y: i64, color: Color },
    CursorMove { x: f32, y: f32 },
    UserNameChange { name: String },
    /// Any `type` tag this build does not know about.
    #[serde(other)]
    Unknown,
}

/// Frames sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerPacket {
    #[serde(rename_all = "camelCase")]
    CanvasState {
        canvas: Canvas,
        user_id: String,
        user_color: Color,
    },
    #[serde(rename_all = "camelCase")]
    PixelChange {
        x: i64,
        y: i64,
        color: Color,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CursorMove { user_id: String, cursor: Cursor },
    UserList { users: Vec<UserInfo> },
    #[serde(rename_all = "camelCase")]
    UserDisconnected { user_id: String },
}

impl ClientPacket {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerPacket {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire name of the packet, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerPacket::CanvasState { .. } => "canvasState",
            ServerPacket::PixelChange { .. } => "pixelChange",
            ServerPacket::CursorMove { .. } => "cursorMove",
            ServerPacket::UserList { .. } => "userList",
            ServerPacket::UserDisconnected { .. } => "userDisconnected",
        }
    }
}
