use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        node::VoiceSession,
        player::{DestroyReason, EnqueueOutcome, PlayerSnapshot},
        queue::LoopMode,
        track::{SearchEngine, Track},
    },
    bot::NeroxBot,
    error::PlayerError,
    storage::namespaces,
    ui::{
        buttons::{self, PlayerAction},
        embeds,
    },
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &NeroxBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "previous" => handle_previous(ctx, &command, bot, guild_id).await?,
        "pause" => handle_pause(ctx, &command, bot, guild_id, true).await?,
        "resume" => handle_pause(ctx, &command, bot, guild_id, false).await?,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await?,
        "autoplay" => handle_autoplay(ctx, &command, bot, guild_id).await?,
        "loop" => handle_loop(ctx, &command, bot, guild_id).await?,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await?,
        "nodes" => handle_nodes(ctx, &command, bot).await?,
        _ => {
            respond(ctx, &command, embeds::create_error_embed("Error", "Comando no reconocido"), true)
                .await?;
        }
    }

    Ok(())
}

/// Maneja los botones del mensaje now playing
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &NeroxBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let Some((target, action)) = buttons::parse_custom_id(&component.data.custom_id) else {
        debug!("Botón desconocido: {}", component.data.custom_id);
        return Ok(());
    };

    // Un botón de un mensaje viejo no debe controlar al player actual
    let snapshot = bot.manager.snapshot(guild_id).filter(|snapshot| {
        target == guild_id
            && snapshot
                .now_playing
                .as_ref()
                .is_some_and(|message| message.message_id == component.message.id)
    });

    let Some(snapshot) = snapshot else {
        if let Err(e) = component.message.delete(&ctx.http).await {
            debug!("No se pudo borrar un now playing obsoleto: {}", e);
        }
        return respond_component(ctx, &component, "❌ Este reproductor ya no está activo").await;
    };

    let user_channel = get_user_voice_channel(ctx, guild_id, component.user.id).ok();
    if let Some(rejection) = button_guard(&snapshot, user_channel, action) {
        return respond_component(ctx, &component, &rejection).await;
    }

    let result = match action {
        PlayerAction::Stop => {
            bot.manager.destroy(guild_id, DestroyReason::Requested).await;
            leave_voice(ctx, guild_id).await;
            Ok(())
        }
        PlayerAction::Pause => bot.manager.pause(guild_id, true).await.map(drop),
        PlayerAction::Resume => bot.manager.pause(guild_id, false).await.map(drop),
        PlayerAction::Next => bot.manager.skip(guild_id).await.map(drop),
        PlayerAction::Prev => match bot.manager.previous(guild_id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                return respond_component(ctx, &component, "⏮️ No hay canciones anteriores").await;
            }
            Err(e) => Err(e),
        },
        PlayerAction::Autoplay => bot.manager.toggle_autoplay(guild_id).await.map(drop),
        PlayerAction::Like => {
            let message = like_current(bot, guild_id, component.user.id).await?;
            return respond_component(ctx, &component, &message).await;
        }
    };

    match result {
        // El mensaje se actualiza solo cuando cambia el estado del player
        Ok(()) => {
            component
                .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
                .await?;
            Ok(())
        }
        Err(e) => respond_component(ctx, &component, &format!("❌ {}", e)).await,
    }
}

// Comandos de reproducción

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeroxBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = option_str(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Debes proporcionar una búsqueda"))?
        .to_string();
    let engine = match option_str(command, "source") {
        Some(source) => source.parse::<SearchEngine>()?,
        None => bot.config.default_search_engine,
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let voice_channel = match get_user_voice_channel(ctx, guild_id, command.user.id) {
        Ok(channel) => channel,
        Err(e) => return edit_error(ctx, command, &e.to_string()).await,
    };

    let tracks = match bot.pool.search(&query, engine, Some(guild_id)).await {
        Ok(tracks) if !tracks.is_empty() => tracks,
        Ok(_) => return edit_error(ctx, command, "No se encontraron resultados").await,
        Err(e) => return edit_error(ctx, command, &e.to_string()).await,
    };

    // Las URLs pueden ser playlists; una búsqueda sólo aporta su mejor resultado
    let is_url = query.starts_with("http://") || query.starts_with("https://");
    let tracks: Vec<Track> = if is_url {
        tracks
    } else {
        tracks.into_iter().take(1).collect()
    };

    let fresh = bot.manager.get_player(guild_id).is_none();
    if let Err(e) = bot.manager.create(guild_id, voice_channel, command.channel_id) {
        return edit_error(ctx, command, &e.to_string()).await;
    }

    if fresh {
        if let Err(e) = join_voice(ctx, bot, guild_id, voice_channel).await {
            warn!("⚠️ No se pudo conectar a voz en guild {}: {}", guild_id, e);
            bot.manager
                .destroy(guild_id, DestroyReason::PlaybackFailed(e.to_string()))
                .await;
            return edit_error(ctx, command, "Error al conectar al canal de voz").await;
        }
    }

    let requester = Some(command.user.id);
    let total = tracks.len();
    let mut added = Vec::with_capacity(total);
    for track in tracks {
        match bot.manager.play(guild_id, track.clone().requested_by(requester)).await {
            Ok(outcome) => added.push((track, outcome)),
            Err(PlayerError::QueueFull(max)) => {
                warn!("📋 Cola llena en guild {} ({} máximo)", guild_id, max);
                break;
            }
            Err(e) => return edit_error(ctx, command, &e.to_string()).await,
        }
    }

    let embed = match added.as_slice() {
        [] => embeds::create_error_embed("Cola llena", "No se pudo agregar ninguna canción"),
        [(track, EnqueueOutcome::Started(_))] => embeds::create_success_embed(
            "Reproduciendo",
            &format!("**{}** - {}", track.title, track.author),
        ),
        [(track, EnqueueOutcome::Queued { position })] => {
            embeds::create_track_added_embed(&track.title, *position, track.duration())
        }
        _ => embeds::create_success_embed(
            "Playlist agregada",
            &format!("{} de {} canciones agregadas a la cola", added.len(), total),
        ),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

// Comandos de control

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeroxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.manager.skip(guild_id).await {
        Ok(true) => embeds::create_success_embed("Canción saltada", "⏭️ Pasando a la siguiente"),
        Ok(false) => embeds::create_error_embed("Error", "No hay nada que saltar"),
        Err(e) => embeds::create_error_embed("Error", &e.to_string()),
    };
    respond(ctx, command, embed, false).await
}

async fn handle_previous(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeroxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.manager.previous(guild_id).await {
        Ok(Some(track)) => embeds::create_success_embed("Canción anterior", &format!("⏮️ **{}**", track.title)),
        Ok(None) => embeds::create_error_embed("Error", "No hay canciones anteriores"),
        Err(e) => embeds::create_error_embed("Error", &e.to_string()),
    };
    respond(ctx, command, embed, false).await
}

async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeroxBot,
    guild_id: GuildId,
    paused: bool,
) -> Result<()> {
    let embed = match bot.manager.pause(guild_id, paused).await {
        Ok(true) if paused => embeds::create_success_embed("Pausado", "⏸️ Reproducción pausada"),
        Ok(true) => embeds::create_success_embed("Reanudado", "▶️ Reproducción reanudada"),
        Ok(false) if paused => embeds::create_error_embed("Error", "La reproducción ya está en pausa"),
        Ok(false) => embeds::create_error_embed("Error", "La reproducción no está en pausa"),
        Err(e) => embeds::create_error_embed("Error", &e.to_string()),
    };
    respond(ctx, command, embed, false).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeroxBot,
    guild_id: GuildId,
) -> Result<()> {
    let destroyed = bot.manager.destroy(guild_id, DestroyReason::Requested).await;
    leave_voice(ctx, guild_id).await;

    let embed = match destroyed {
        Some(_) => embeds::create_success_embed("Detenido", "⏹️ Reproducción detenida y cola limpiada"),
        None => embeds::create_error_embed("Error", &PlayerError::NoPlayer.to_string()),
    };
    respond(ctx, command, embed, destroyed.is_none()).await
}

async fn handle_autoplay(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeroxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.manager.toggle_autoplay(guild_id).await {
        Ok(true) => embeds::create_success_embed("Autoplay", "🎲 Autoplay activado"),
        Ok(false) => embeds::create_success_embed("Autoplay", "🎲 Autoplay desactivado"),
        Err(e) => embeds::create_error_embed("Error", &e.to_string()),
    };
    respond(ctx, command, embed, false).await
}

async fn handle_loop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeroxBot,
    guild_id: GuildId,
) -> Result<()> {
    let mode = match option_str(command, "mode") {
        Some("track") => LoopMode::Track,
        Some("queue") => LoopMode::Queue,
        _ => LoopMode::Off,
    };

    let embed = match bot.manager.set_loop_mode(guild_id, mode).await {
        Ok(()) => embeds::create_success_embed("Repetición", &format!("🔁 Modo de repetición: {}", mode)),
        Err(e) => embeds::create_error_embed("Error", &e.to_string()),
    };
    respond(ctx, command, embed, false).await
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeroxBot,
    guild_id: GuildId,
) -> Result<()> {
    let level = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "level")
        .and_then(|opt| opt.value.as_i64())
        .ok_or_else(|| anyhow::anyhow!("Debes indicar un nivel de volumen"))?;
    let level = u16::try_from(level.max(0)).unwrap_or(u16::MAX);

    let embed = match bot.manager.set_volume(guild_id, level).await {
        Ok(volume) => embeds::create_success_embed("Volumen", &format!("🔊 Volumen ajustado a {}%", volume)),
        Err(e) => embeds::create_error_embed("Error", &e.to_string()),
    };
    respond(ctx, command, embed, false).await
}

// Información

async fn handle_nodes(ctx: &Context, command: &CommandInteraction, bot: &NeroxBot) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let report = bot.pool.health_report().await;
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().embed(embeds::create_nodes_embed(&report)),
        )
        .await?;
    Ok(())
}

// Funciones auxiliares

/// Guarda la canción actual en los favoritos del usuario
async fn like_current(bot: &NeroxBot, guild_id: GuildId, user_id: UserId) -> Result<String> {
    let Some(track) = bot.manager.snapshot(guild_id).and_then(|s| s.current) else {
        return Ok("❌ No hay nada reproduciéndose".to_string());
    };

    let liked = bot.storage.namespace(namespaces::LIKED_SONGS).await?;
    let key = user_id.to_string();
    let mut songs: Vec<Track> = liked.get(&key).await?.unwrap_or_default();

    if songs.iter().any(|song| song.dedup_key() == track.dedup_key()) {
        return Ok(format!("💜 **{}** ya está en tus favoritos", track.title));
    }

    let message = format!("❤️ **{}** agregada a tus favoritos", track.title);
    songs.push(track.requested_by(None));
    liked.set(&key, &songs).await?;
    info!("❤️ Usuario {} guardó una canción ({} en total)", user_id, songs.len());
    Ok(message)
}

/// Conecta el bot al canal y entrega la sesión de voz al nodo
async fn join_voice(
    ctx: &Context,
    bot: &NeroxBot,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Result<()> {
    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

    let (connection, _call) = manager.join_gateway(guild_id, channel_id).await?;
    info!("🔊 Conectado al canal de voz en guild {}", guild_id);

    bot.manager
        .connect_voice(
            guild_id,
            VoiceSession {
                token: connection.token,
                endpoint: connection.endpoint,
                session_id: connection.session_id,
            },
        )
        .await?;
    Ok(())
}

async fn leave_voice(ctx: &Context, guild_id: GuildId) {
    let Some(manager) = songbird::get(ctx).await else {
        return;
    };
    if manager.get(guild_id).is_none() {
        return;
    }

    match manager.remove(guild_id).await {
        Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", guild_id),
        Err(e) => debug!("No se pudo salir del canal de voz en {}: {}", guild_id, e),
    }
}

/// Motivo para rechazar un botón antes de tocar el player; `None` si procede
fn button_guard(
    snapshot: &PlayerSnapshot,
    user_channel: Option<ChannelId>,
    action: PlayerAction,
) -> Option<String> {
    if user_channel != Some(snapshot.voice_channel) {
        return Some(format!(
            "❌ Debes estar en <#{}> para hacer esto",
            snapshot.voice_channel
        ));
    }

    // Con la cola vacía y sin autoplay, saltar terminaría la sesión
    let nothing_next = snapshot.upcoming.is_empty()
        && !snapshot.autoplay
        && snapshot.loop_mode != LoopMode::Queue;
    if action == PlayerAction::Next && nothing_next {
        return Some("❌ No quedan canciones en la cola para saltar".to_string());
    }

    None
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn edit_error(ctx: &Context, command: &CommandInteraction, message: &str) -> Result<()> {
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().embed(embeds::create_error_embed("Error", message)),
        )
        .await?;
    Ok(())
}

async fn respond_component(ctx: &Context, component: &ComponentInteraction, content: &str) -> Result<()> {
    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{node::NodeId, player::PlayerStatus};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    const VOICE: ChannelId = ChannelId::new(500);

    fn track(name: &str) -> Track {
        Track {
            encoded: format!("enc-{name}"),
            identifier: name.into(),
            title: format!("Song {name}"),
            author: "Artist".into(),
            uri: None,
            duration_ms: 180_000,
            is_stream: false,
            requester: None,
            thumbnail: None,
            source_name: "youtube".into(),
        }
    }

    fn snapshot() -> PlayerSnapshot {
        PlayerSnapshot {
            guild_id: GuildId::new(1),
            generation: 1,
            voice_channel: VOICE,
            text_channel: ChannelId::new(600),
            node: NodeId::new("main"),
            status: PlayerStatus::Active,
            current: Some(track("a")),
            previous: Vec::new(),
            upcoming: Vec::new(),
            position_ms: 0,
            volume: 100,
            paused: false,
            autoplay: false,
            loop_mode: LoopMode::Off,
            pending: None,
            now_playing: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_buttons_require_the_bot_voice_channel() {
        let snapshot = snapshot();

        let outside = button_guard(&snapshot, None, PlayerAction::Pause);
        assert_eq!(outside.as_deref(), Some("❌ Debes estar en <#500> para hacer esto"));

        let elsewhere = button_guard(&snapshot, Some(ChannelId::new(501)), PlayerAction::Stop);
        assert!(elsewhere.is_some());

        assert_eq!(button_guard(&snapshot, Some(VOICE), PlayerAction::Pause), None);
    }

    #[test]
    fn test_next_refused_when_nothing_follows() {
        let mut snapshot = snapshot();
        assert!(button_guard(&snapshot, Some(VOICE), PlayerAction::Next).is_some());
        // Stop sigue permitido con la cola vacía
        assert_eq!(button_guard(&snapshot, Some(VOICE), PlayerAction::Stop), None);

        snapshot.autoplay = true;
        assert_eq!(button_guard(&snapshot, Some(VOICE), PlayerAction::Next), None);

        snapshot.autoplay = false;
        snapshot.loop_mode = LoopMode::Queue;
        assert_eq!(button_guard(&snapshot, Some(VOICE), PlayerAction::Next), None);

        snapshot.loop_mode = LoopMode::Off;
        snapshot.upcoming.push(track("b"));
        assert_eq!(button_guard(&snapshot, Some(VOICE), PlayerAction::Next), None);
    }
}
