use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use rand::Rng;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serenity::model::id::{GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    protocol::{parse_guild_id, IncomingMessage, LoadResult, UpdatePlayerBody},
    GuildEvent, LoadOutcome, NodeDescriptor, NodeEvent, NodeId, NodeStats, NodeTransport,
    PlaybackEvent, PlayerPatch,
};
use crate::{audio::track::Track, error::NodeError};

const CLIENT_NAME: &str = concat!("nerox-player/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Política de reconexión de un nodo
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub tries: u32,
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            tries: 5,
            interval: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Espera lineal con jitter de hasta un segundo
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.interval * attempt.clamp(1, 6);
        let jitter = rand::thread_rng().gen_range(0..=1000);
        base + Duration::from_millis(jitter)
    }
}

/// Transporte Lavalink v4: REST para control y WebSocket para eventos
pub struct LavalinkNode {
    descriptor: NodeDescriptor,
    id: NodeId,
    rest_base: String,
    ws_url: String,
    user_id: UserId,
    http: Client,
    session: Arc<RwLock<Option<String>>>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
}

impl LavalinkNode {
    pub fn new(
        descriptor: NodeDescriptor,
        user_id: UserId,
        policy: ReconnectPolicy,
    ) -> Result<Self, NodeError> {
        let id = descriptor.id();
        let invalid = |message: String| NodeError::InvalidUrl {
            node: descriptor.name.clone(),
            message,
        };

        let rest = Url::parse(&descriptor.http_base()).map_err(|e| invalid(e.to_string()))?;
        let ws = Url::parse(&descriptor.ws_base())
            .and_then(|base| base.join("v4/websocket"))
            .map_err(|e| invalid(e.to_string()))?;

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(CLIENT_NAME)
            .build()
            .map_err(|source| NodeError::Http {
                node: descriptor.name.clone(),
                source,
            })?;

        Ok(Self {
            rest_base: rest.as_str().trim_end_matches('/').to_string(),
            ws_url: ws.to_string(),
            descriptor,
            id,
            user_id,
            http,
            session: Arc::new(RwLock::new(None)),
            policy,
            cancel: CancellationToken::new(),
        })
    }

    fn session_id(&self) -> Result<String, NodeError> {
        self.session
            .read()
            .clone()
            .ok_or_else(|| NodeError::NotConnected(self.descriptor.name.clone()))
    }

    fn player_url(&self, session_id: &str, guild_id: GuildId) -> String {
        format!("{}/v4/sessions/{}/players/{}", self.rest_base, session_id, guild_id)
    }

    fn http_error(&self, source: reqwest::Error) -> NodeError {
        NodeError::Http {
            node: self.descriptor.name.clone(),
            source,
        }
    }

    async fn check(&self, response: Response) -> Result<Response, NodeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(NodeError::Status {
            node: self.descriptor.name.clone(),
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, NodeError> {
        let response = self
            .http
            .get(url)
            .header("Authorization", self.descriptor.password.as_str())
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        let bytes = self
            .check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| self.http_error(e))?;

        serde_json::from_slice(&bytes).map_err(|source| NodeError::Decode {
            node: self.descriptor.name.clone(),
            source,
        })
    }
}

#[async_trait]
impl NodeTransport for LavalinkNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn connect(&self, events: mpsc::UnboundedSender<NodeEvent>) -> Result<(), NodeError> {
        let supervisor = Supervisor {
            node: self.id.clone(),
            url: self.ws_url.clone(),
            password: self.descriptor.password.clone(),
            user_id: self.user_id,
            session: Arc::clone(&self.session),
            policy: self.policy,
            cancel: self.cancel.clone(),
            events,
        };

        info!("🎼 Conectando al nodo {} ({})", self.id, self.ws_url);
        tokio::spawn(supervisor.run());
        Ok(())
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadOutcome, NodeError> {
        let url = format!(
            "{}/v4/loadtracks?identifier={}",
            self.rest_base,
            urlencoding::encode(identifier)
        );

        let result: LoadResult = self.get_json(&url).await?;
        Ok(match result {
            LoadResult::Track(track) => LoadOutcome::Tracks(vec![Track::from(track)]),
            LoadResult::Search(tracks) => {
                LoadOutcome::Tracks(tracks.into_iter().map(Track::from).collect())
            }
            LoadResult::Playlist(playlist) => LoadOutcome::Playlist {
                name: playlist.info.name,
                tracks: playlist.tracks.into_iter().map(Track::from).collect(),
            },
            LoadResult::Empty(_) => LoadOutcome::Empty,
            LoadResult::Error(exception) => LoadOutcome::Failed(exception.describe()),
        })
    }

    async fn update_player(&self, guild_id: GuildId, patch: PlayerPatch) -> Result<(), NodeError> {
        let session_id = self.session_id()?;
        let url = format!("{}?noReplace=false", self.player_url(&session_id, guild_id));
        let body = UpdatePlayerBody::from(patch);

        let response = self
            .http
            .patch(&url)
            .header("Authorization", self.descriptor.password.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        self.check(response).await?;

        debug!("🎛️ Player de guild {} actualizado en {}", guild_id, self.id);
        Ok(())
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let session_id = self.session_id()?;
        let response = self
            .http
            .delete(self.player_url(&session_id, guild_id))
            .header("Authorization", self.descriptor.password.as_str())
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn version(&self) -> Result<String, NodeError> {
        let response = self
            .http
            .get(format!("{}/version", self.rest_base))
            .header("Authorization", self.descriptor.password.as_str())
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        self.check(response)
            .await?
            .text()
            .await
            .map_err(|e| self.http_error(e))
    }

    async fn stats(&self) -> Result<NodeStats, NodeError> {
        self.get_json(&format!("{}/v4/stats", self.rest_base)).await
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Tarea que mantiene viva la conexión WebSocket de un nodo
struct Supervisor {
    node: NodeId,
    url: String,
    password: String,
    user_id: UserId,
    session: Arc<RwLock<Option<String>>>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl Supervisor {
    async fn run(self) {
        let mut attempt = 0u32;

        loop {
            match self.open().await {
                Ok(socket) => {
                    attempt = 0;
                    let reason = self.run_session(socket).await;
                    *self.session.write() = None;

                    if self.cancel.is_cancelled() {
                        info!("🔌 Nodo {} cerrado", self.node);
                        return;
                    }

                    warn!("⚠️ Nodo {} desconectado: {}", self.node, reason);
                    self.emit(NodeEvent::Disconnected {
                        node: self.node.clone(),
                        reason,
                    });
                }
                Err(e) => {
                    error!("❌ No se pudo conectar al nodo {}: {}", self.node, e);
                    self.emit(NodeEvent::Failed {
                        node: self.node.clone(),
                        error: e.to_string(),
                    });
                }
            }

            attempt += 1;
            if attempt > self.policy.tries {
                error!(
                    "❌ Nodo {} sin conexión tras {} intentos, abandonando",
                    self.node, self.policy.tries
                );
                return;
            }

            let delay = self.policy.delay_for(attempt);
            self.emit(NodeEvent::Reconnecting {
                node: self.node.clone(),
                attempt,
                delay,
            });

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn open(&self) -> Result<Socket, NodeError> {
        let ws_error = |message: String| NodeError::WebSocket {
            node: self.node.to_string(),
            message,
        };

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ws_error(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&self.password).map_err(|e| ws_error(e.to_string()))?,
        );
        headers.insert(
            "User-Id",
            HeaderValue::from_str(&self.user_id.to_string()).map_err(|e| ws_error(e.to_string()))?,
        );
        headers.insert("Client-Name", HeaderValue::from_static(CLIENT_NAME));

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ws_error(e.to_string()))?;
        Ok(socket)
    }

    async fn run_session(&self, mut socket: Socket) -> String {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = socket.close(None).await;
                    return "shutdown".to_string();
                }
                message = socket.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        return frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "cerrado sin motivo".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return e.to_string(),
                    None => return "stream terminado".to_string(),
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let message = match serde_json::from_str::<IncomingMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Mensaje ignorado del nodo {}: {} ({})", self.node, e, text);
                return;
            }
        };

        match message {
            IncomingMessage::Ready(ready) => {
                *self.session.write() = Some(ready.session_id.clone());
                self.emit(NodeEvent::Ready {
                    node: self.node.clone(),
                    session_id: ready.session_id,
                    resumed: ready.resumed,
                });
            }
            IncomingMessage::PlayerUpdate(update) => {
                if let Some(guild_id) = parse_guild_id(&update.guild_id) {
                    self.emit_guild(
                        guild_id,
                        PlaybackEvent::PositionUpdate {
                            position_ms: update.state.position,
                            connected: update.state.connected,
                        },
                    );
                }
            }
            IncomingMessage::Stats(stats) => self.emit(NodeEvent::Stats {
                node: self.node.clone(),
                stats,
            }),
            IncomingMessage::Event(event) => match parse_guild_id(event.guild_id()) {
                Some(guild_id) => self.emit_guild(guild_id, event.into_playback()),
                None => warn!("Evento con guild inválido del nodo {}", self.node),
            },
        }
    }

    fn emit_guild(&self, guild_id: GuildId, event: PlaybackEvent) {
        self.emit(NodeEvent::Guild(GuildEvent {
            node: self.node.clone(),
            guild_id,
            event,
        }));
    }

    fn emit(&self, event: NodeEvent) {
        if self.events.send(event).is_err() {
            debug!("Canal de eventos cerrado para el nodo {}", self.node);
        }
    }
}
