use crate::fill::flood_fill;
use crate::mirror::CanvasMirror;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{ClientPacket, Color, Cursor, ServerPacket, UserInfo};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid origin header value: {0:?}")]
    InvalidOrigin(String),
    #[error("connection closed by server")]
    Closed,
}

/// Something that happened on the shared canvas, already applied to the
/// client's mirror
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Joined {
        user_id: String,
        color: Color,
    },
    PixelChanged {
        x: i64,
        y: i64,
        color: Color,
        user_id: String,
    },
    CursorMoved {
        user_id: String,
        cursor: Cursor,
    },
    RosterUpdated(Vec<UserInfo>),
    UserLeft {
        user_id: String,
    },
}

impl From<ServerPacket> for SyncEvent {
    fn from(packet: ServerPacket) -> Self {
        match packet {
            ServerPacket::CanvasState {
                user_id,
                user_color,
                ..
            } => SyncEvent::Joined {
                user_id,
                color: user_color,
            },
            ServerPacket::PixelChange {
                x,
                y,
                color,
                user_id,
            } => SyncEvent::PixelChanged {
                x,
                y,
                color,
                user_id,
            },
            ServerPacket::CursorMove { user_id, cursor } => {
                SyncEvent::CursorMoved { user_id, cursor }
            }
            ServerPacket::UserList { users } => SyncEvent::RosterUpdated(users),
            ServerPacket::UserDisconnected { user_id } => SyncEvent::UserLeft { user_id },
        }
    }
}

/// WebSocket participant on a shared canvas
pub struct Client {
    socket: Socket,
    mirror: CanvasMirror,
}

impl Client {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let request = url.into_client_request()?;
        Self::open(request).await
    }

    /// Connects with an explicit `Origin` header, as a browser would send
    pub async fn connect_with_origin(url: &str, origin: &str) -> Result<Self, ClientError> {
        let mut request = url.into_client_request()?;
        let value = HeaderValue::from_str(origin)
            .map_err(|_| ClientError::InvalidOrigin(origin.to_string()))?;
        request.headers_mut().insert(ORIGIN, value);
        Self::open(request).await
    }

    async fn open(request: tungstenite::handshake::client::Request) -> Result<Self, ClientError> {
        info!("Connecting to {}", request.uri());
        let (socket, _) = connect_async(request).await?;
        Ok(Client {
            socket,
            mirror: CanvasMirror::new(),
        })
    }

    /// Reads events until the initial canvas has arrived
    pub async fn wait_until_synced(&mut self) -> Result<(), ClientError> {
        while !self.mirror.is_synced() {
            self.next_event().await?;
        }
        Ok(())
    }

    /// Waits for the next server message, applies it to the mirror and
    /// returns it. Frames that do not decode are skipped.
    pub async fn next_event(&mut self) -> Result<SyncEvent, ClientError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => match ServerPacket::decode(text.as_str()) {
                    Ok(packet) => {
                        self.mirror.apply(&packet);
                        return Ok(SyncEvent::from(packet));
                    }
                    Err(e) => warn!("Skipping undecodable message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    pub async fn send(&mut self, packet: &ClientPacket) -> Result<(), ClientError> {
        let text = packet.encode()?;
        self.socket.send(Message::text(text)).await?;
        Ok(())
    }

    /// Paints one cell locally and sends it to the server
    pub async fn paint(&mut self, x: i64, y: i64, color: Color) -> Result<(), ClientError> {
        self.mirror.paint(x, y, color.clone());
        self.send(&ClientPacket::PixelChange { x, y, color }).await
    }

    pub async fn move_cursor(&mut self, x: f32, y: f32) -> Result<(), ClientError> {
        self.send(&ClientPacket::CursorMove { x, y }).await
    }

    pub async fn change_name(&mut self, name: &str) -> Result<(), ClientError> {
        self.send(&ClientPacket::UserNameChange {
            name: name.to_string(),
        })
        .await
    }

    /// Bucket fill on the local canvas, sent as one `pixelChange` per
    /// changed cell. Returns how many cells changed.
    pub async fn fill(&mut self, x: i64, y: i64, color: Color) -> Result<usize, ClientError> {
        let changed = flood_fill(self.mirror.canvas_mut(), x, y, &color);
        debug!("Fill at ({}, {}) changed {} cells", x, y, changed.len());

        for &(cx, cy) in &changed {
            let packet = ClientPacket::PixelChange {
                x: cx,
                y: cy,
                color: color.clone(),
            };
            self.send(&packet).await?;
        }
        Ok(changed.len())
    }

    pub fn mirror(&self) -> &CanvasMirror {
        &self.mirror
    }

    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        match self.socket.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
