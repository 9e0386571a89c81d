//! Server network layer: WebSocket transport and the engine event loop

use crate::client_manager::ConnectionId;
use crate::config::{OriginFilter, ServerConfig};
use crate::engine::{EngineStats, SyncEngine};
use futures_util::{Sink, SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{Canvas, Color, UserInfo};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, StatusCode};
use tokio_tungstenite::tungstenite::Message;

/// How often engine statistics are logged while clients are connected
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// How long a closing connection's writer may keep draining its queue
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Events sent from connection tasks and control handles to the engine loop
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        connection: ConnectionId,
        addr: SocketAddr,
        outbox: mpsc::Sender<Message>,
        /// Fired by the engine loop when the connection is evicted
        close: oneshot::Sender<()>,
    },
    MessageReceived {
        connection: ConnectionId,
        text: String,
    },
    Disconnected {
        connection: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<Canvas>,
    },
    Pixel {
        x: i64,
        y: i64,
        reply: oneshot::Sender<Option<Color>>,
    },
    Roster {
        reply: oneshot::Sender<Vec<UserInfo>>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("server has stopped")]
    ServerStopped,
}

/// Cloneable handle for inspecting and stopping a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    events: mpsc::Sender<ServerEvent>,
}

impl ServerHandle {
    pub async fn snapshot(&self) -> Result<Canvas, HandleError> {
        self.request(|reply| ServerEvent::Snapshot { reply }).await
    }

    /// Color of one cell, or None if it lies outside the grid
    pub async fn pixel(&self, x: i64, y: i64) -> Result<Option<Color>, HandleError> {
        self.request(|reply| ServerEvent::Pixel { x, y, reply }).await
    }

    pub async fn roster(&self) -> Result<Vec<UserInfo>, HandleError> {
        self.request(|reply| ServerEvent::Roster { reply }).await
    }

    pub async fn stats(&self) -> Result<EngineStats, HandleError> {
        self.request(|reply| ServerEvent::Stats { reply }).await
    }

    /// Asks the engine loop to stop; every open socket is closed
    pub async fn shutdown(&self) -> Result<(), HandleError> {
        self.events
            .send(ServerEvent::Shutdown)
            .await
            .map_err(|_| HandleError::ServerStopped)
    }

    async fn request<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> ServerEvent,
    ) -> Result<T, HandleError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(event(reply))
            .await
            .map_err(|_| HandleError::ServerStopped)?;
        response.await.map_err(|_| HandleError::ServerStopped)
    }
}

/// Main server owning the listener and the engine event queue
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    origin_filter: Arc<dyn OriginFilter>,

    // Connection tasks and handles feed this queue; the engine loop drains it
    events_tx: mpsc::Sender<ServerEvent>,
    events_rx: mpsc::Receiver<ServerEvent>,
}

impl Server {
    /// Validates the configuration and binds the listener
    pub async fn bind(
        config: ServerConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        info!(
            "Canvas {}x{}, accepting {}",
            config.grid_width, config.grid_height, config.origin_policy
        );

        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let origin_filter = config.origin_policy.build_filter();

        Ok(Server {
            listener,
            config,
            origin_filter,
            events_tx,
            events_rx,
        })
    }

    /// Replaces the origin predicate derived from the configuration
    pub fn with_origin_filter(mut self, origin_filter: Arc<dyn OriginFilter>) -> Self {
        self.origin_filter = origin_filter;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Main loop: accepts connections in a background task and applies every
    /// event to the engine, one at a time, until shut down
    pub async fn run(self) {
        let Server {
            listener,
            config,
            origin_filter,
            events_tx,
            mut events_rx,
        } = self;

        let mut engine = SyncEngine::from_config(&config);
        let mut closers: HashMap<ConnectionId, oneshot::Sender<()>> = HashMap::new();
        let acceptor = tokio::spawn(accept_connections(
            listener,
            events_tx,
            origin_filter,
            config.outbound_capacity(),
        ));

        let mut stats_interval = interval(STATS_INTERVAL);
        // Skip the first tick since it fires immediately
        stats_interval.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(ServerEvent::Connected { connection, addr, outbox, close }) => {
                            debug!("Connection {} opened from {}", connection, addr);
                            closers.insert(connection, close);
                            engine.connect(connection, outbox);
                        }
                        Some(ServerEvent::MessageReceived { connection, text }) => {
                            engine.handle_text(connection, &text);
                        }
                        Some(ServerEvent::Disconnected { connection }) => {
                            closers.remove(&connection);
                            engine.disconnect(connection);
                        }
                        Some(ServerEvent::Snapshot { reply }) => {
                            let _ = reply.send(engine.snapshot());
                        }
                        Some(ServerEvent::Pixel { x, y, reply }) => {
                            let _ = reply.send(engine.pixel(x, y));
                        }
                        Some(ServerEvent::Roster { reply }) => {
                            let _ = reply.send(engine.roster());
                        }
                        Some(ServerEvent::Stats { reply }) => {
                            let _ = reply.send(engine.stats());
                        }
                        Some(ServerEvent::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }

                    for connection in engine.take_evicted() {
                        if let Some(close) = closers.remove(&connection) {
                            let _ = close.send(());
                        }
                    }
                }

                _ = stats_interval.tick() => {
                    let stats = engine.stats();
                    if stats.connected > 0 {
                        debug!(
                            "{} clients, {} messages ({} malformed), {} pixels applied, {} dropped, {} evictions",
                            stats.connected,
                            stats.messages,
                            stats.malformed,
                            stats.pixels_applied,
                            stats.pixels_dropped,
                            stats.evictions
                        );
                    }
                }
            }
        }

        acceptor.abort();
        engine.shutdown();

        // Give open connections a moment to finish their closing handshake
        let _ = timeout(CLOSE_GRACE, async {
            while !closers.is_empty() {
                match events_rx.recv().await {
                    Some(ServerEvent::Disconnected { connection }) => {
                        closers.remove(&connection);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await;
    }
}

/// Accepts TCP connections and spawns one task per connection
async fn accept_connections(
    listener: TcpListener,
    events: mpsc::Sender<ServerEvent>,
    origin_filter: Arc<dyn OriginFilter>,
    outbound_capacity: usize,
) {
    let mut next_connection: ConnectionId = 0;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                next_connection += 1;
                let connection = next_connection;
                let events = events.clone();
                let origin_filter = Arc::clone(&origin_filter);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(
                        stream,
                        addr,
                        connection,
                        events,
                        origin_filter,
                        outbound_capacity,
                    )
                    .await
                    {
                        debug!("Connection {} from {} failed: {}", connection, addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Runs one WebSocket connection: handshake, writer task, then the reader
/// loop until the peer goes away
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection: ConnectionId,
    events: mpsc::Sender<ServerEvent>,
    origin_filter: Arc<dyn OriginFilter>,
    outbound_capacity: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let check_origin = |request: &Request, response: Response| {
        let origin = request
            .headers()
            .get(ORIGIN)
            .and_then(|value| value.to_str().ok());

        if origin_filter.accept(origin) {
            Ok(response)
        } else {
            warn!("Rejected handshake from {} with origin {:?}", addr, origin);
            let mut rejection = ErrorResponse::new(Some("Origin not allowed".to_string()));
            *rejection.status_mut() = StatusCode::FORBIDDEN;
            Err(rejection)
        }
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_origin).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (outbox, mut outbound) = mpsc::channel::<Message>(outbound_capacity);
    let (close, mut evicted) = oneshot::channel();
    let opened = ServerEvent::Connected {
        connection,
        addr,
        outbox,
        close,
    };
    if events.send(opened).await.is_err() {
        return Ok(());
    }

    // Writer task: drains the outbound queue until the engine drops the sender
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = write_batch(&mut ws_sender, &mut outbound, frame).await {
                debug!("Write to connection {} failed: {}", connection, e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Dropped without firing on shutdown; the writer then closes the socket
    let mut watching_eviction = true;
    let mut was_evicted = false;

    loop {
        tokio::select! {
            signal = &mut evicted, if watching_eviction => {
                if signal.is_ok() {
                    was_evicted = true;
                    break;
                }
                watching_eviction = false;
            }

            frame = ws_receiver.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(Message::Text(text)) => {
                        let received = ServerEvent::MessageReceived {
                            connection,
                            text: text.as_str().to_owned(),
                        };
                        if events.send(received).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        warn!(
                            "Ignoring {} byte binary frame from connection {}",
                            data.len(),
                            connection
                        );
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Read from connection {} failed: {}", connection, e);
                        break;
                    }
                }
            }
        }
    }

    if was_evicted {
        // The peer stopped keeping up; whatever is still queued is abandoned
        info!("Closing evicted connection {} from {}", connection, addr);
        writer.abort();
        return Ok(());
    }

    let _ = events.send(ServerEvent::Disconnected { connection }).await;
    if timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        debug!("Writer for connection {} did not finish, aborting", connection);
        writer.abort();
    }
    Ok(())
}

/// Writes `first` plus everything already queued behind it, then flushes
/// once.
async fn write_batch<S>(
    sink: &mut S,
    outbound: &mut mpsc::Receiver<Message>,
    first: Message,
) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    sink.feed(first).await?;
    while let Ok(frame) = outbound.try_recv() {
        sink.feed(frame).await?;
    }
    sink.flush().await
}
