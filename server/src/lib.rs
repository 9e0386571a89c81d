//! # Pixel Sync Server Library
//!
//! This library provides the authoritative server for a shared pixel canvas.
//! Many WebSocket clients paint on one fixed-size grid; the server holds the
//! single source of truth and relays every accepted change to everyone else.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Canvas
//! The grid lives only on the server. Clients send single-cell writes, the
//! server applies them in arrival order (last write wins) and relays them.
//! Out-of-range writes are dropped without a reply.
//!
//! ### Participant Management
//! Handles the complete lifecycle of client connections including:
//! - Identity assignment (`user_1`, `user_2`, ...) with a palette color
//! - Full canvas snapshot for every newcomer
//! - Display name and cursor updates
//! - Departure announcements and roster refreshes
//!
//! ### Fan-Out
//! Every outbound message is serialized once and queued to each recipient.
//! A recipient whose queue is full or closed is disconnected instead of
//! slowing down everyone else.
//!
//! ## Architecture Design
//!
//! ### Single Engine Loop
//! One task owns the grid, the participant registry and the broadcast hub
//! and applies events strictly one at a time. There are no locks: connection
//! tasks talk to the engine through a bounded channel, and the engine talks
//! back through bounded per-connection queues.
//!
//! ### Per-Connection Tasks
//! Each WebSocket gets a reader task that forwards text frames to the engine
//! in receive order and a writer task that drains the connection's outbound
//! queue into the socket, flushing once per batch of queued frames. When the
//! engine evicts a connection it signals the reader, which tears the socket
//! down without waiting for the peer.
//!
//! ## Module Organization
//!
//! - `grid`: the W×H color matrix
//! - `client_manager`: connection to participant mapping
//! - `broadcast`: outbound queues and fan-out
//! - `engine`: join and leave handling, eviction of failed peers
//! - `dispatcher`: decoding and applying client messages
//! - `config`: startup settings and the handshake origin predicate
//! - `network`: listener, connection tasks, event loop and control handle
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = Server::bind(config).await?;
//!     let handle = server.handle();
//!     tokio::spawn(server.run());
//!
//!     // The handle reads engine state without touching the sockets
//!     let canvas = handle.snapshot().await?;
//!     println!("{}x{} canvas", canvas.width(), canvas.height());
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod client_manager;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod grid;
pub mod network;

pub use config::{AllowAnyOrigin, AllowList, OriginFilter, OriginPolicy, ServerConfig};
pub use engine::{EngineStats, SyncEngine};
pub use network::{HandleError, Server, ServerHandle};
