//! # Pixel Sync Client Library
//!
//! This library provides a headless participant for the shared pixel canvas.
//! It speaks the server's WebSocket protocol, keeps a local mirror of the
//! canvas and of the other participants, and offers the drawing operations a
//! front end would build on.
//!
//! ## Architecture Overview
//!
//! ### Local Mirror
//! The client keeps its own copy of the canvas. Its own strokes are applied
//! locally straight away, since the server never echoes a change back to the
//! participant that made it. Changes from everyone else arrive as server
//! messages and are applied in arrival order.
//!
//! ### Client-Side Tools
//! The server only understands single-cell writes. Multi-cell tools such as
//! the bucket fill run locally and emit one `pixelChange` per changed cell.
//!
//! ## Module Organization
//!
//! ### Mirror Module (`mirror`)
//! Local state rebuilt from server messages:
//! - Canvas contents and own identity from `canvasState`
//! - Roster from `userList`
//! - Remote cursors, tagged with their owner's color
//!
//! ### Fill Module (`fill`)
//! Bucket fill over 4-connected cells of the same color.
//!
//! ### Network Module (`network`)
//! WebSocket connection, message encoding and the event stream.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use shared::Color;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("ws://127.0.0.1:8080").await?;
//!     client.wait_until_synced().await?;
//!
//!     client.change_name("Painter").await?;
//!     client.paint(3, 4, Color::from("#FF6B6B")).await?;
//!     let cells = client.fill(0, 0, Color::from("#4ECDC4")).await?;
//!     println!("Filled {} cells", cells);
//!
//!     // Everyone else's edits, applied to client.mirror() as they arrive
//!     let event = client.next_event().await?;
//!     println!("{:?}", event);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod fill;
pub mod mirror;
pub mod network;

pub use fill::flood_fill;
pub use mirror::{CanvasMirror, RemoteCursor};
pub use network::{Client, ClientError, SyncEvent};
