use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::audio::{
    node::{lavalink::ReconnectPolicy, NodeDescriptor},
    player::{PlayerSettings, MAX_VOLUME},
    track::SearchEngine,
};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Reproductor
    pub default_volume: u16,
    pub max_queue_size: usize,
    pub history_size: usize,
    pub default_search_engine: SearchEngine,
    pub default_autoplay: bool,
    pub delete_now_playing_on_end: bool,

    // Paths
    pub data_dir: PathBuf,
    pub lava_config: PathBuf,

    // Nodos de audio
    pub nodes: Vec<NodeDescriptor>,
    pub node_reconnect_tries: u32,
    pub node_reconnect_interval: Duration,
}

/// Contenido de `lava.json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LavaConfig {
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
    #[serde(default, alias = "defaultsearchengine")]
    pub default_search_engine: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;
        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let lava_config: PathBuf = var("LAVA_CONFIG", "lava.json").into();
        let lava = load_lava_config(&lava_config)?;

        let nodes = match lava.as_ref().map(|l| l.nodes.clone()) {
            Some(nodes) if !nodes.is_empty() => nodes,
            _ => vec![NodeDescriptor {
                name: "main".to_string(),
                host: var("LAVALINK_HOST", "localhost"),
                port: var("LAVALINK_PORT", "2333")
                    .parse()
                    .context("LAVALINK_PORT inválido")?,
                password: var("LAVALINK_PASSWORD", "youshallnotpass"),
                secure: var("LAVALINK_SECURE", "false").parse()?,
                priority: 1,
            }],
        };

        let default_search_engine = lookup("DEFAULT_SEARCH_ENGINE")
            .or_else(|| lava.and_then(|l| l.default_search_engine))
            .map(|engine| engine.parse::<SearchEngine>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            application_id: lookup("APPLICATION_ID")
                .context("APPLICATION_ID no definido")?
                .parse()?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.parse().ok()),

            // Reproductor
            default_volume: var("DEFAULT_VOLUME", "100").parse()?,
            max_queue_size: var("MAX_QUEUE_SIZE", "1000").parse()?,
            history_size: var("HISTORY_SIZE", "50").parse()?,
            default_search_engine,
            default_autoplay: var("DEFAULT_AUTOPLAY", "false").parse()?,
            delete_now_playing_on_end: var("DELETE_NOW_PLAYING_ON_END", "true").parse()?,

            // Paths
            data_dir: var("DATA_DIR", "/app/data").into(),
            lava_config,

            // Nodos
            nodes,
            node_reconnect_tries: var("NODE_RECONNECT_TRIES", "5").parse()?,
            node_reconnect_interval: Duration::from_secs(
                var("NODE_RECONNECT_INTERVAL_SECS", "5").parse()?,
            ),
        })
    }

    /// Validates configuration values for correctness.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.application_id == 0 {
            anyhow::bail!("APPLICATION_ID must be a valid snowflake");
        }

        if self.default_volume > MAX_VOLUME {
            anyhow::bail!(
                "Default volume must be between 0 and {}, got: {}",
                MAX_VOLUME,
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.history_size == 0 {
            anyhow::bail!("History size must be greater than 0");
        }

        if self.nodes.is_empty() {
            anyhow::bail!("At least one audio node must be configured");
        }

        for node in &self.nodes {
            if node.host.trim().is_empty() {
                anyhow::bail!("Node '{}' has an empty host", node.name);
            }
        }

        let mut names: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.nodes.len() {
            anyhow::bail!("Node names must be unique");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and node passwords are never included.
    pub fn summary(&self) -> String {
        let nodes = self
            .nodes
            .iter()
            .map(|n| format!("{}@{}:{} (p{})", n.name, n.host, n.port, n.priority))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Player: {}% vol, {} queue, {} history, search {}\n  \
            Features: Autoplay={}, DeleteNowPlaying={}\n  \
            Nodes: {} (reconnect {}x every {})",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_queue_size,
            self.history_size,
            self.default_search_engine,
            self.default_autoplay,
            self.delete_now_playing_on_end,
            nodes,
            self.node_reconnect_tries,
            humantime::format_duration(self.node_reconnect_interval),
        )
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            default_volume: self.default_volume,
            max_queue_size: self.max_queue_size,
            history_size: self.history_size,
            default_autoplay: self.default_autoplay,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            tries: self.node_reconnect_tries,
            interval: self.node_reconnect_interval,
        }
    }
}

/// Lee `lava.json` con sobrescrituras `LAVA_*`; `None` si no existe
pub fn load_lava_config(path: &Path) -> Result<Option<LavaConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Json))
        .add_source(config::Environment::with_prefix("LAVA").separator("__"))
        .build()
        .with_context(|| format!("No se pudo leer {}", path.display()))?;

    let lava = settings
        .try_deserialize::<LavaConfig>()
        .with_context(|| format!("Formato inválido en {}", path.display()))?;
    Ok(Some(lava))
}
