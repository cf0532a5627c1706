//! # Now Playing
//!
//! One logical "now playing" message per player. The view is a pure function
//! of a [`PlayerSnapshot`]; [`UiSync`] decides whether to send, edit or delete
//! and never lets a Discord failure reach the playback logic.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    audio::{player::PlayerSnapshot, queue::LoopMode},
    error::SendError,
};

const TITLE_LIMIT: usize = 45;
pub const LIVE_INDICATOR: &str = "🔴 LIVE";

/// Contenido renderizado del mensaje
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlayingView {
    pub guild_id: GuildId,
    pub title: String,
    pub author: String,
    pub uri: Option<String>,
    pub thumbnail: Option<String>,
    pub requester: Option<UserId>,
    /// Duración formateada o [`LIVE_INDICATOR`]
    pub duration: String,
    pub progress: String,
    pub queue_size: usize,
    pub volume: u16,
    pub paused: bool,
    pub autoplay: bool,
    pub loop_mode: LoopMode,
}

impl NowPlayingView {
    /// `None` cuando no hay canción actual
    pub fn render(snapshot: &PlayerSnapshot) -> Option<Self> {
        let track = snapshot.current.as_ref()?;
        let duration = track.duration();

        Some(Self {
            guild_id: snapshot.guild_id,
            title: truncate_title(&track.title),
            author: track.author.clone(),
            uri: track.uri.clone(),
            thumbnail: track.thumbnail.clone(),
            requester: track.requester,
            duration: duration
                .map(format_duration)
                .unwrap_or_else(|| LIVE_INDICATOR.to_string()),
            progress: progress_bar(Duration::from_millis(snapshot.position_ms), duration, 15),
            queue_size: snapshot.upcoming.len(),
            volume: snapshot.volume,
            paused: snapshot.paused,
            autoplay: snapshot.autoplay,
            loop_mode: snapshot.loop_mode,
        })
    }
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() > TITLE_LIMIT {
        let short: String = title.chars().take(TITLE_LIMIT - 3).collect();
        format!("{}...", short)
    } else {
        title.to_string()
    }
}

/// Barra de progreso; las duraciones indeterminadas muestran LIVE
pub fn progress_bar(position: Duration, duration: Option<Duration>, width: usize) -> String {
    let total = match duration {
        Some(total) if !total.is_zero() && width > 0 => total.as_millis(),
        _ => return LIVE_INDICATOR.to_string(),
    };

    let elapsed = position.as_millis().min(total);
    let filled = ((elapsed * width as u128) / total) as usize;
    let filled = filled.min(width - 1);

    format!("{}🔘{}", "▬".repeat(filled), "▬".repeat(width - 1 - filled))
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Referencia débil al mensaje publicado
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlayingMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    /// Última vista publicada
    pub view: NowPlayingView,
}

/// Superficie donde se publica el mensaje (Discord en producción)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NowPlayingSurface: Send + Sync {
    async fn send(&self, channel_id: ChannelId, view: &NowPlayingView) -> Result<MessageId, SendError>;

    async fn edit(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        view: &NowPlayingView,
    ) -> Result<(), SendError>;

    async fn delete(&self, channel_id: ChannelId, message_id: MessageId) -> Result<(), SendError>;
}

pub struct UiSync {
    surface: Arc<dyn NowPlayingSurface>,
    delete_on_end: bool,
}

impl UiSync {
    pub fn new(surface: Arc<dyn NowPlayingSurface>, delete_on_end: bool) -> Self {
        Self {
            surface,
            delete_on_end,
        }
    }

    /// Edita el mensaje vivo o publica uno nuevo
    pub async fn show(
        &self,
        current: Option<NowPlayingMessage>,
        channel_id: ChannelId,
        view: NowPlayingView,
    ) -> Option<NowPlayingMessage> {
        if let Some(message) = current {
            if message.channel_id == channel_id {
                if message.view == view {
                    return Some(message);
                }

                match self.surface.edit(channel_id, message.message_id, &view).await {
                    Ok(()) => {
                        return Some(NowPlayingMessage { view, ..message });
                    }
                    Err(SendError::NotFound) => {
                        debug!("Mensaje now playing {} ya no existe", message.message_id);
                    }
                    Err(e) => {
                        warn!("⚠️ No se pudo editar now playing: {}", e);
                        return Some(message);
                    }
                }
            } else {
                self.discard(message).await;
            }
        }

        match self.surface.send(channel_id, &view).await {
            Ok(message_id) => Some(NowPlayingMessage {
                channel_id,
                message_id,
                view,
            }),
            Err(e) => {
                warn!("⚠️ No se pudo enviar now playing: {}", e);
                None
            }
        }
    }

    /// Sólo edita; nunca publica un mensaje nuevo
    pub async fn refresh(
        &self,
        current: Option<NowPlayingMessage>,
        view: NowPlayingView,
    ) -> Option<NowPlayingMessage> {
        let message = current?;
        if message.view == view {
            return Some(message);
        }

        match self
            .surface
            .edit(message.channel_id, message.message_id, &view)
            .await
        {
            Ok(()) => Some(NowPlayingMessage { view, ..message }),
            Err(SendError::NotFound) => None,
            Err(e) => {
                warn!("⚠️ No se pudo actualizar now playing: {}", e);
                Some(message)
            }
        }
    }

    /// Invalida el mensaje al terminar la canción o destruir el player
    pub async fn retire(&self, message: NowPlayingMessage) {
        if self.delete_on_end {
            self.discard(message).await;
        }
    }

    /// Borra el mensaje sin importar la configuración
    pub async fn discard(&self, message: NowPlayingMessage) {
        match self
            .surface
            .delete(message.channel_id, message.message_id)
            .await
        {
            Ok(()) | Err(SendError::NotFound) => {}
            Err(e) => warn!("⚠️ No se pudo borrar now playing: {}", e),
        }
    }
}
