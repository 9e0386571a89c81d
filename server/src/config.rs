//! Process-wide server settings, fixed at startup.

use shared::{Color, DEFAULT_BACKGROUND, DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Display colors handed to participants in rotation.
pub const DEFAULT_PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
    "#BB8FCE", "#85C1E9",
];

/// Outbound slack on top of one frame per grid cell, for the roster and
/// cursor traffic that interleaves with a full-canvas fill.
pub const OUTBOUND_HEADROOM: usize = 256;

/// Frontend origins accepted when origin checking is switched on.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:3000"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("grid must be at least 1x1, got {width}x{height}")]
    EmptyGrid { width: usize, height: usize },
    #[error("participant palette is empty")]
    EmptyPalette,
    #[error("{0} capacity must be greater than zero")]
    ZeroCapacity(&'static str),
}

/// Accept/reject decision for an incoming WebSocket handshake, keyed on the
/// `Origin` header.
pub trait OriginFilter: Send + Sync {
    fn accept(&self, origin: Option<&str>) -> bool;
}

/// Accepts every handshake, with or without an `Origin` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnyOrigin;

impl OriginFilter for AllowAnyOrigin {
    fn accept(&self, _origin: Option<&str>) -> bool {
        true
    }
}

/// Accepts only exact matches against a fixed list. A handshake without an
/// `Origin` header is rejected.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    origins: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }
}

impl OriginFilter for AllowList {
    fn accept(&self, origin: Option<&str>) -> bool {
        origin.is_some_and(|origin| self.origins.iter().any(|allowed| allowed == origin))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    AllowAny,
    AllowList(Vec<String>),
}

impl OriginPolicy {
    pub fn build_filter(&self) -> Arc<dyn OriginFilter> {
        match self {
            OriginPolicy::AllowAny => Arc::new(AllowAnyOrigin),
            OriginPolicy::AllowList(origins) => Arc::new(AllowList::new(origins.iter().cloned())),
        }
    }
}

impl fmt::Display for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginPolicy::AllowAny => f.write_str("any origin"),
            OriginPolicy::AllowList(origins) => write!(f, "only {}", origins.join(", ")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    pub grid_width: usize,
    pub grid_height: usize,
    /// Initial color of every cell
    pub background: Color,
    pub palette: Vec<Color>,
    /// Frames buffered per connection before it counts as too slow. `None`
    /// sizes the queue from the grid, see [`ServerConfig::outbound_capacity()`].
    pub outbound_capacity: Option<usize>,
    /// Inbound events buffered between reader tasks and the engine loop
    pub event_capacity: usize,
    pub origin_policy: OriginPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            grid_width: DEFAULT_GRID_WIDTH,
            grid_height: DEFAULT_GRID_HEIGHT,
            background: Color::from(DEFAULT_BACKGROUND),
            palette: DEFAULT_PALETTE.iter().map(|c| Color::from(*c)).collect(),
            outbound_capacity: None,
            event_capacity: 1024,
            origin_policy: OriginPolicy::AllowAny,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(ConfigError::EmptyGrid {
                width: self.grid_width,
                height: self.grid_height,
            });
        }
        if self.palette.is_empty() {
            return Err(ConfigError::EmptyPalette);
        }
        if self.outbound_capacity == Some(0) {
            return Err(ConfigError::ZeroCapacity("outbound queue"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("event queue"));
        }
        Ok(())
    }

    /// Effective per-connection queue size. Unless set explicitly, a whole
    /// canvas of single-cell changes fits without the peer being evicted.
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity.unwrap_or_else(|| {
            self.grid_width
                .saturating_mul(self.grid_height)
                .saturating_add(OUTBOUND_HEADROOM)
        })
    }
}
