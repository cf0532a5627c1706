use async_trait::async_trait;
use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter, CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::{sync::Arc, time::Duration};
use tracing::debug;

use crate::{
    audio::{node::NodeHealth, player::DestroyReport, queue::LoopMode},
    error::SendError,
    ui::{
        buttons::player_controls,
        now_playing::{format_duration, NowPlayingSurface, NowPlayingView},
    },
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Nerox";

/// Embed del mensaje now playing
pub fn create_now_playing_embed(view: &NowPlayingView) -> CreateEmbed {
    let status = if view.paused { "⏸️ En pausa" } else { "🎵 Reproduciendo Ahora" };
    let requester = view
        .requester
        .map(|user| format!("<@{}>", user))
        .unwrap_or_else(|| "🎲 Autoplay".to_string());

    let mut embed = CreateEmbed::new()
        .title(status)
        .description(format!("**{}**\n{}", view.title, view.progress))
        .colour(colors::MUSIC_PURPLE)
        .field("🎤 Artista", &view.author, true)
        .field("⏱️ Duración", &view.duration, true)
        .field("👤 Solicitado por", requester, true)
        .field("📋 En cola", view.queue_size.to_string(), true)
        .field("🔊 Volumen", format!("{}%", view.volume), true)
        .field("🔁 Repetir", loop_label(view.loop_mode), true)
        .footer(CreateEmbedFooter::new(format!(
            "{} • Autoplay {}",
            STANDARD_FOOTER,
            if view.autoplay { "activado" } else { "desactivado" }
        )));

    if let Some(uri) = &view.uri {
        embed = embed.url(uri);
    }
    if let Some(thumbnail) = &view.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
}

fn loop_label(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Off => "Desactivado",
        LoopMode::Track => "🔂 Canción",
        LoopMode::Queue => "🔁 Cola",
    }
}

/// Aviso publicado cuando un player se destruye
pub fn create_destroy_embed(report: &DestroyReport) -> CreateEmbed {
    let colour = if report.reason.is_error() {
        colors::ERROR_RED
    } else {
        colors::INFO_BLUE
    };

    let mut embed = CreateEmbed::new()
        .title("⏹️ Reproductor detenido")
        .description(report.reason.to_string())
        .colour(colour)
        .timestamp(Timestamp::now());

    if let Some(track) = &report.last_track {
        embed = embed.field("🎵 Última canción", format!("{} - {}", track.title, track.author), false);
    }

    embed
}

/// Estado de los nodos de audio
pub fn create_nodes_embed(report: &[NodeHealth]) -> CreateEmbed {
    let online = report.iter().filter(|node| node.online()).count();
    let colour = match online {
        0 => colors::ERROR_RED,
        n if n < report.len() => colors::WARNING_ORANGE,
        _ => colors::SUCCESS_GREEN,
    };

    report.iter().fold(
        CreateEmbed::new()
            .title("📡 Nodos de audio")
            .description(format!("{}/{} en línea", online, report.len()))
            .colour(colour)
            .timestamp(Timestamp::now()),
        |embed, node| embed.field(node.node.to_string(), describe_node(node), false),
    )
}

/// Resumen de texto de un nodo
pub fn describe_node(node: &NodeHealth) -> String {
    let Some(version) = &node.version else {
        return format!(
            "🔴 Offline ({})\n{}",
            node.state,
            node.error.as_deref().unwrap_or("sin respuesta")
        );
    };

    let mut lines = vec![format!("🟢 Online • v{} • prioridad {}", version, node.priority)];
    if let Some(stats) = &node.stats {
        lines.push(format!(
            "Players: {} ({} reproduciendo)",
            stats.players, stats.playing_players
        ));
        lines.push(format!(
            "Uptime: {}",
            humantime::format_duration(Duration::from_secs(stats.uptime / 1000))
        ));
        lines.push(format!(
            "Memoria: {} MB / {} MB • CPU: {:.1}%",
            stats.memory.used / 1024 / 1024,
            stats.memory.allocated / 1024 / 1024,
            stats.cpu.lavalink_load * 100.0
        ));
    }
    lines.join("\n")
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("❌ {}", title))
        .description(description)
        .colour(colors::ERROR_RED)
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("✅ {}", title))
        .description(description)
        .colour(colors::SUCCESS_GREEN)
}

/// Canción agregada a la cola
pub fn create_track_added_embed(title: &str, position: usize, duration: Option<Duration>) -> CreateEmbed {
    CreateEmbed::new()
        .title("✅ Canción agregada")
        .description(format!("**{}**", title))
        .field("📋 Posición", position.to_string(), true)
        .field(
            "⏱️ Duración",
            duration.map(format_duration).unwrap_or_else(|| "🔴 En vivo".to_string()),
            true,
        )
        .colour(colors::SUCCESS_GREEN)
}

/// Publica el mensaje now playing en Discord
pub struct DiscordSurface {
    http: Arc<Http>,
}

impl DiscordSurface {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn map_error(error: serenity::Error) -> SendError {
    if let serenity::Error::Http(http_error) = &error {
        if http_error.status_code().map(|status| status.as_u16()) == Some(404) {
            return SendError::NotFound;
        }
    }
    SendError::Http(error.to_string())
}

#[async_trait]
impl NowPlayingSurface for DiscordSurface {
    async fn send(&self, channel_id: ChannelId, view: &NowPlayingView) -> Result<MessageId, SendError> {
        let message = CreateMessage::new()
            .embed(create_now_playing_embed(view))
            .components(player_controls(view));

        let sent = channel_id
            .send_message(self.http.as_ref(), message)
            .await
            .map_err(map_error)?;
        debug!("📨 Now playing enviado: {}", sent.id);
        Ok(sent.id)
    }

    async fn edit(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        view: &NowPlayingView,
    ) -> Result<(), SendError> {
        let edit = EditMessage::new()
            .embed(create_now_playing_embed(view))
            .components(player_controls(view));

        channel_id
            .edit_message(self.http.as_ref(), message_id, edit)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn delete(&self, channel_id: ChannelId, message_id: MessageId) -> Result<(), SendError> {
        channel_id
            .delete_message(self.http.as_ref(), message_id)
            .await
            .map_err(map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::node::{CpuStats, MemoryStats, NodeId, NodeState, NodeStats};

    #[test]
    fn test_describe_offline_node() {
        let node = NodeHealth {
            node: NodeId::new("main"),
            state: NodeState::Disconnected,
            priority: 1,
            version: None,
            stats: None,
            error: Some("connection refused".into()),
        };
        let text = describe_node(&node);
        assert!(text.starts_with("🔴 Offline (disconnected)"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn test_describe_online_node() {
        let node = NodeHealth {
            node: NodeId::new("main"),
            state: NodeState::Ready,
            priority: 1,
            version: Some("4.0.8".into()),
            stats: Some(NodeStats {
                players: 3,
                playing_players: 2,
                uptime: 90_000,
                memory: MemoryStats {
                    free: 0,
                    used: 200 * 1024 * 1024,
                    allocated: 512 * 1024 * 1024,
                    reservable: 0,
                },
                cpu: CpuStats {
                    cores: 4,
                    system_load: 0.5,
                    lavalink_load: 0.125,
                },
            }),
            error: None,
        };
        let text = describe_node(&node);
        assert!(text.contains("v4.0.8"));
        assert!(text.contains("Players: 3 (2 reproduciendo)"));
        assert!(text.contains("Uptime: 1m 30s"));
        assert!(text.contains("200 MB / 512 MB"));
        assert!(text.contains("CPU: 12.5%"));
    }
}
