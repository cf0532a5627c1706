//! # Bot Module
//!
//! Discord front end of the player core.
//!
//! [`NeroxBot`] implements Serenity's [`EventHandler`]. It registers the slash
//! commands, routes interactions to [`handlers`] and watches the bot's own
//! voice state so a forced disconnect tears the guild player down.
//!
//! Destroy reports published by the [`PlayerManager`] are announced in the
//! player's text channel by a background task started on the first `ready`.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
    builder::CreateMessage,
    http::Http,
};
use songbird::Songbird;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{
        player::{DestroyReason, DestroyReport, PlayerManager},
        pool::NodePool,
    },
    config::Config,
    storage::KvStore,
    ui::embeds,
};

/// Handler de eventos de Discord
pub struct NeroxBot {
    pub config: Arc<Config>,
    pub manager: Arc<PlayerManager>,
    pub pool: Arc<NodePool>,
    pub storage: Arc<KvStore>,
    announcer_started: AtomicBool,
}

impl NeroxBot {
    pub fn new(
        config: Arc<Config>,
        manager: Arc<PlayerManager>,
        pool: Arc<NodePool>,
        storage: Arc<KvStore>,
    ) -> Self {
        Self {
            config,
            manager,
            pool,
            storage,
            announcer_started: AtomicBool::new(false),
        }
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!(
                            "No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'."
                        )
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for NeroxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // `ready` se repite en cada reconexión del gateway
        if !self.announcer_started.swap(true, Ordering::SeqCst) {
            let reports = self.manager.subscribe_destroyed();
            let songbird = songbird::get(&ctx).await;
            tokio::spawn(announce_destroyed(ctx.http.clone(), songbird, reports));
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component) => {
                if let Err(e) = handlers::handle_component(&ctx, component, self).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.manager
                .destroy(guild_id, DestroyReason::VoiceDisconnected)
                .await;
        }
    }
}

/// Publica cada destrucción en el canal de texto del player y sale del canal de voz
async fn announce_destroyed(
    http: Arc<Http>,
    songbird: Option<Arc<Songbird>>,
    mut reports: broadcast::Receiver<DestroyReport>,
) {
    loop {
        let report = match reports.recv().await {
            Ok(report) => report,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("⚠️ Se perdieron {} avisos de destrucción", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let Some(songbird) = &songbird {
            if songbird.get(report.guild_id).is_some() {
                if let Err(e) = songbird.remove(report.guild_id).await {
                    debug!("No se pudo salir del canal de voz en {}: {}", report.guild_id, e);
                }
            }
        }

        let message = CreateMessage::new().embed(embeds::create_destroy_embed(&report));
        if let Err(e) = report.text_channel.send_message(http.as_ref(), message).await {
            warn!(
                "⚠️ No se pudo anunciar la destrucción en guild {}: {}",
                report.guild_id, e
            );
        }
    }
    debug!("Anunciador de destrucciones terminado");
}
