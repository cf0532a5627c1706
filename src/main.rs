use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, model::id::UserId, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use nerox_player::{
    audio::{
        autoplay::AutoplayResolver,
        node::{lavalink::LavalinkNode, NodeTransport},
        player::{DestroyReason, PlayerManager},
        pool::NodePool,
    },
    bot::NeroxBot,
    config::Config,
    storage::KvStore,
    ui::{embeds::DiscordSurface, now_playing::UiSync},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nerox_player=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Nerox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    let storage = Arc::new(KvStore::open(config.data_dir.clone()).await?);

    // El usuario del bot identifica la sesión ante los nodos
    let http = Arc::new(Http::new(&config.discord_token));
    let user_id = http.get_current_user().await?.id;

    info!("🎼 Inicializando nodos de audio...");
    let pool = Arc::new(build_pool(&config, user_id)?);
    pool.connect().await;

    let autoplay = AutoplayResolver::new(pool.clone())?;
    let ui = UiSync::new(
        Arc::new(DiscordSurface::new(http.clone())),
        config.delete_now_playing_on_end,
    );
    let manager = Arc::new(PlayerManager::new(
        pool.clone(),
        autoplay,
        ui,
        config.player_settings(),
    ));

    // Eventos de los nodos: pool -> dispatcher -> buzón de cada guild
    let (guild_tx, guild_rx) = mpsc::unbounded_channel();
    {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run(guild_tx).await });
    }
    tokio::spawn(manager.clone().run(guild_rx));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = NeroxBot::new(config.clone(), manager.clone(), pool.clone(), storage);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        manager.destroy_all(DestroyReason::Requested).await;
        pool.shutdown();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

fn build_pool(config: &Config, user_id: UserId) -> Result<NodePool> {
    let pool = NodePool::new();
    for descriptor in &config.nodes {
        let node = LavalinkNode::new(descriptor.clone(), user_id, config.reconnect_policy())?;
        pool.add_node(Arc::new(node) as Arc<dyn NodeTransport>);
    }
    Ok(pool)
}

/// Consulta la API REST de cada nodo; falla si ninguno responde
async fn health_check(config: &Config) -> Result<()> {
    let pool = build_pool(config, UserId::new(config.application_id))?;
    let report = pool.health_report().await;

    for node in &report {
        match &node.version {
            Some(version) => println!("{}: online (v{})", node.node, version),
            None => println!(
                "{}: offline ({})",
                node.node,
                node.error.as_deref().unwrap_or("sin respuesta")
            ),
        }
    }

    if report.iter().any(|node| node.online()) {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Ningún nodo de audio responde");
    }
}
