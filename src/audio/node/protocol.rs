//! Lavalink v4 wire models.
//!
//! Only the fields the player core consumes are modelled; unknown fields are
//! ignored by serde.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serenity::model::id::GuildId;

use super::{NodeStats, PlaybackEvent, PlayerPatch, TrackEndReason, VoiceSession};
use crate::audio::track::Track;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    pub encoded: String,
    pub info: TrackInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    #[serde(default)]
    pub is_seekable: bool,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default)]
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub source_name: String,
}

impl From<TrackData> for Track {
    fn from(data: TrackData) -> Self {
        let info = data.info;
        Track {
            encoded: data.encoded,
            identifier: info.identifier,
            title: info.title,
            author: info.author,
            uri: info.uri,
            duration_ms: if info.is_stream { 0 } else { info.length },
            is_stream: info.is_stream,
            requester: None,
            thumbnail: info.artwork_url,
            source_name: info.source_name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub tracks: Vec<TrackData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    #[serde(default)]
    pub selected_track: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Exception {
    pub message: Option<String>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub cause: String,
}

impl Exception {
    pub fn describe(&self) -> String {
        match &self.message {
            Some(message) => format!("{} ({})", message, self.severity),
            None => format!("{} ({})", self.cause, self.severity),
        }
    }
}

/// Respuesta de `GET /v4/loadtracks`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "lowercase")]
pub enum LoadResult {
    Track(TrackData),
    Playlist(PlaylistData),
    Search(Vec<TrackData>),
    Empty(Value),
    Error(Exception),
}

/// Mensajes recibidos por el WebSocket del nodo
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    Ready(ReadyOp),
    PlayerUpdate(PlayerUpdateOp),
    Stats(NodeStats),
    Event(EventOp),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyOp {
    #[serde(default)]
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateOp {
    pub guild_id: String,
    pub state: PlayerState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub ping: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum EventOp {
    TrackStartEvent(TrackStartEvent),
    TrackEndEvent(TrackEndEvent),
    TrackExceptionEvent(TrackExceptionEvent),
    TrackStuckEvent(TrackStuckEvent),
    WebSocketClosedEvent(WebSocketClosedEvent),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStartEvent {
    pub guild_id: String,
    pub track: TrackData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEndEvent {
    pub guild_id: String,
    pub track: TrackData,
    pub reason: TrackEndReason,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackExceptionEvent {
    pub guild_id: String,
    pub track: TrackData,
    pub exception: Exception,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuckEvent {
    pub guild_id: String,
    pub track: TrackData,
    pub threshold_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosedEvent {
    pub guild_id: String,
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub by_remote: bool,
}

impl EventOp {
    pub fn guild_id(&self) -> &str {
        match self {
            EventOp::TrackStartEvent(e) => &e.guild_id,
            EventOp::TrackEndEvent(e) => &e.guild_id,
            EventOp::TrackExceptionEvent(e) => &e.guild_id,
            EventOp::TrackStuckEvent(e) => &e.guild_id,
            EventOp::WebSocketClosedEvent(e) => &e.guild_id,
        }
    }

    pub fn into_playback(self) -> PlaybackEvent {
        match self {
            EventOp::TrackStartEvent(e) => PlaybackEvent::TrackStart {
                encoded: e.track.encoded,
            },
            EventOp::TrackEndEvent(e) => PlaybackEvent::TrackEnd {
                encoded: e.track.encoded,
                reason: e.reason,
            },
            EventOp::TrackExceptionEvent(e) => PlaybackEvent::TrackException {
                encoded: e.track.encoded,
                message: e.exception.describe(),
            },
            EventOp::TrackStuckEvent(e) => PlaybackEvent::TrackStuck {
                encoded: e.track.encoded,
                threshold_ms: e.threshold_ms,
            },
            EventOp::WebSocketClosedEvent(e) => PlaybackEvent::VoiceClosed {
                code: e.code,
                reason: e.reason,
                by_remote: e.by_remote,
            },
        }
    }
}

/// Los ids de Lavalink viajan como texto
pub fn parse_guild_id(raw: &str) -> Option<GuildId> {
    raw.parse::<u64>().ok().filter(|id| *id != 0).map(GuildId::new)
}

/// Cuerpo de `PATCH /v4/sessions/{session}/players/{guild}`
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdatePlayerBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<UpdatePlayerTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceSession>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePlayerTrack {
    /// `null` detiene la pista
    pub encoded: Option<String>,
}

impl From<PlayerPatch> for UpdatePlayerBody {
    fn from(patch: PlayerPatch) -> Self {
        Self {
            track: patch.track.map(|encoded| UpdatePlayerTrack { encoded }),
            paused: patch.paused,
            volume: patch.volume,
            voice: patch.voice,
        }
    }
}
