//! # Audio Nodes
//!
//! Types shared by every audio-node transport and the [`NodePool`](crate::audio::pool::NodePool).
//!
//! A node is an external Lavalink-compatible process that resolves search
//! queries into tracks and streams them into a Discord voice channel. The
//! pool talks to nodes only through the [`NodeTransport`] trait; the real
//! implementation lives in [`lavalink`] and tests plug in fakes.
//!
//! Every transport pushes [`NodeEvent`]s into the channel it receives on
//! [`NodeTransport::connect`]. Node-level events update the pool's
//! bookkeeping, playback events are routed to the owning guild player.

pub mod lavalink;
pub mod protocol;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::mpsc;

use crate::{audio::track::Track, error::NodeError};

/// Nombre único de un nodo
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptor de un nodo tal como aparece en `lava.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    /// Menor valor = preferido
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

impl NodeDescriptor {
    pub fn id(&self) -> NodeId {
        NodeId::new(&self.name)
    }

    pub fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn ws_base(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Connecting,
    Ready,
    Disconnected,
    Reconnecting,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeState::Connecting => "connecting",
            NodeState::Ready => "ready",
            NodeState::Disconnected => "disconnected",
            NodeState::Reconnecting => "reconnecting",
        })
    }
}

/// Estado de conectividad de un nodo; sólo el pool lo escribe
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub state: NodeState,
    pub session_id: Option<String>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub connected_at: Option<DateTime<Utc>>,
    /// Últimas estadísticas recibidas por el WebSocket
    pub stats: Option<NodeStats>,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            state: NodeState::Connecting,
            session_id: None,
            last_error: None,
            reconnect_attempts: 0,
            connected_at: None,
            stats: None,
        }
    }
}

/// Credenciales de voz de Discord que el nodo necesita para transmitir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSession {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Cambios parciales sobre el reproductor remoto de un guild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerPatch {
    /// `Some(None)` detiene la pista actual
    pub track: Option<Option<String>>,
    pub paused: Option<bool>,
    pub volume: Option<u16>,
    pub voice: Option<VoiceSession>,
}

impl PlayerPatch {
    pub fn play(track: &Track, volume: u16) -> Self {
        Self {
            track: Some(Some(track.encoded.clone())),
            paused: Some(false),
            volume: Some(volume),
            ..Self::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            track: Some(None),
            ..Self::default()
        }
    }

    pub fn pause(paused: bool) -> Self {
        Self {
            paused: Some(paused),
            ..Self::default()
        }
    }

    pub fn volume(volume: u16) -> Self {
        Self {
            volume: Some(volume),
            ..Self::default()
        }
    }

    pub fn voice(voice: VoiceSession) -> Self {
        Self {
            voice: Some(voice),
            ..Self::default()
        }
    }
}

/// Resultado de resolver un identificador
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Tracks(Vec<Track>),
    Playlist { name: String, tracks: Vec<Track> },
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

/// Evento de reproducción para un guild concreto
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    TrackStart { encoded: String },
    TrackEnd { encoded: String, reason: TrackEndReason },
    TrackException { encoded: String, message: String },
    TrackStuck { encoded: String, threshold_ms: u64 },
    PositionUpdate { position_ms: u64, connected: bool },
    VoiceClosed { code: u16, reason: String, by_remote: bool },
    /// Generado por el pool: el nodo perdió la sesión que alojaba al reproductor
    SessionLost { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuildEvent {
    pub node: NodeId,
    pub guild_id: GuildId,
    pub event: PlaybackEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Ready {
        node: NodeId,
        session_id: String,
        resumed: bool,
    },
    /// No se pudo establecer la conexión inicial
    Failed { node: NodeId, error: String },
    Disconnected { node: NodeId, reason: String },
    Reconnecting {
        node: NodeId,
        attempt: u32,
        delay: Duration,
    },
    Stats { node: NodeId, stats: NodeStats },
    Guild(GuildEvent),
}

impl NodeEvent {
    pub fn node(&self) -> &NodeId {
        match self {
            NodeEvent::Ready { node, .. }
            | NodeEvent::Failed { node, .. }
            | NodeEvent::Disconnected { node, .. }
            | NodeEvent::Reconnecting { node, .. }
            | NodeEvent::Stats { node, .. } => node,
            NodeEvent::Guild(event) => &event.node,
        }
    }
}

/// Estadísticas publicadas por un nodo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    /// Milisegundos
    pub uptime: u64,
    #[serde(default)]
    pub memory: MemoryStats,
    #[serde(default)]
    pub cpu: CpuStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Información de salud de un nodo
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHealth {
    pub node: NodeId,
    pub state: NodeState,
    pub priority: u32,
    pub version: Option<String>,
    pub stats: Option<NodeStats>,
    pub error: Option<String>,
}

impl NodeHealth {
    pub fn online(&self) -> bool {
        self.version.is_some()
    }
}

/// Canal de control hacia un nodo de audio
#[async_trait]
pub trait NodeTransport: Send + Sync {
    fn descriptor(&self) -> &NodeDescriptor;

    /// Inicia la conexión y su supervisión; no espera el handshake
    async fn connect(&self, events: mpsc::UnboundedSender<NodeEvent>) -> Result<(), NodeError>;

    async fn load_tracks(&self, identifier: &str) -> Result<LoadOutcome, NodeError>;

    async fn update_player(&self, guild_id: GuildId, patch: PlayerPatch) -> Result<(), NodeError>;

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError>;

    async fn version(&self) -> Result<String, NodeError>;

    async fn stats(&self) -> Result<NodeStats, NodeError>;

    /// Detiene la supervisión y cierra la conexión
    fn shutdown(&self);
}
