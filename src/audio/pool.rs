//! # Node Pool
//!
//! Process-wide registry of audio nodes. The pool is the only writer of node
//! connectivity state; players only hold the [`NodeId`] they were bound to.
//!
//! No player is migrated when its node drops. The transport reconnects on its
//! own and the pool records the state changes. Sessions are never resumed, so
//! a disconnect (or a fresh session after one) means the remote players are
//! gone: every guild bound to that node gets a [`PlaybackEvent::SessionLost`].

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    node::{
        GuildEvent, LoadOutcome, NodeEvent, NodeHealth, NodeId, NodeState, NodeStatus,
        NodeTransport, PlaybackEvent, PlayerPatch, VoiceSession,
    },
    track::{SearchEngine, Track},
};
use crate::error::{PlayerError, PlayerResult};

struct NodeEntry {
    id: NodeId,
    priority: u32,
    transport: Arc<dyn NodeTransport>,
    status: RwLock<NodeStatus>,
}

impl NodeEntry {
    fn is_ready(&self) -> bool {
        self.status.read().state == NodeState::Ready
    }
}

pub struct NodePool {
    nodes: RwLock<Vec<Arc<NodeEntry>>>,
    bindings: DashMap<GuildId, NodeId>,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<NodeEvent>>>,
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePool {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            nodes: RwLock::new(Vec::new()),
            bindings: DashMap::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Registra un nodo; el orden por prioridad es estable
    pub fn add_node(&self, transport: Arc<dyn NodeTransport>) {
        let descriptor = transport.descriptor();
        let entry = Arc::new(NodeEntry {
            id: descriptor.id(),
            priority: descriptor.priority,
            transport,
            status: RwLock::new(NodeStatus::default()),
        });

        let mut nodes = self.nodes.write();
        let index = nodes
            .iter()
            .position(|n| n.priority > entry.priority)
            .unwrap_or(nodes.len());
        info!("📡 Nodo registrado: {} (prioridad {})", entry.id, entry.priority);
        nodes.insert(index, entry);
    }

    /// Abre todos los nodos sin esperar a que alguno quede listo
    pub async fn connect(&self) {
        let nodes = self.snapshot();
        info!("🎼 Conectando {} nodos de audio", nodes.len());

        let attempts = nodes.iter().map(|entry| {
            let events = self.events_tx.clone();
            async move {
                *entry.status.write() = NodeStatus::default();
                if let Err(e) = entry.transport.connect(events).await {
                    error!("❌ Nodo {} no pudo iniciar: {}", entry.id, e);
                    let mut status = entry.status.write();
                    status.state = NodeState::Disconnected;
                    status.last_error = Some(e.to_string());
                }
            }
        });
        join_all(attempts).await;
    }

    /// Consume los eventos de los nodos y reenvía los de cada guild
    pub async fn run(&self, guild_events: mpsc::UnboundedSender<GuildEvent>) {
        let Some(mut events) = self.events_rx.lock().take() else {
            warn!("⚠️ El bucle de eventos del pool ya está en marcha");
            return;
        };

        while let Some(event) = events.recv().await {
            self.apply(&event);
            let forwarded = match event {
                NodeEvent::Guild(guild_event) => vec![guild_event],
                other => self.session_lost_events(&other),
            };

            for guild_event in forwarded {
                if guild_events.send(guild_event).is_err() {
                    debug!("Dispatcher cerrado, terminando bucle del pool");
                    return;
                }
            }
        }
    }

    /// Eventos `SessionLost` para los guilds asignados a un nodo sin sesión
    pub fn session_lost_events(&self, event: &NodeEvent) -> Vec<GuildEvent> {
        let (node, reason) = match event {
            NodeEvent::Disconnected { node, reason } => (node, reason.clone()),
            NodeEvent::Ready {
                node,
                resumed: false,
                ..
            } => (node, "sesión nueva sin reanudar".to_string()),
            _ => return Vec::new(),
        };

        let guilds = self.guilds_on(node);
        if !guilds.is_empty() {
            warn!(
                "⚠️ Nodo {} perdió la sesión de {} players: {}",
                node,
                guilds.len(),
                reason
            );
        }

        guilds
            .into_iter()
            .map(|guild_id| GuildEvent {
                node: node.clone(),
                guild_id,
                event: PlaybackEvent::SessionLost {
                    reason: reason.clone(),
                },
            })
            .collect()
    }

    /// Actualiza el estado de conectividad a partir de un evento de nodo
    pub fn apply(&self, event: &NodeEvent) {
        let Some(entry) = self.entry(event.node()) else {
            warn!("Evento de nodo desconocido: {}", event.node());
            return;
        };

        match event {
            NodeEvent::Ready {
                session_id, resumed, ..
            } => {
                let mut status = entry.status.write();
                status.state = NodeState::Ready;
                status.session_id = Some(session_id.clone());
                status.last_error = None;
                status.reconnect_attempts = 0;
                status.connected_at = Some(Utc::now());
                info!(
                    "✅ Nodo {} listo (sesión {}, reanudada: {})",
                    entry.id, session_id, resumed
                );
            }
            NodeEvent::Failed { error, .. } => {
                {
                    let mut status = entry.status.write();
                    status.state = NodeState::Disconnected;
                    status.last_error = Some(error.clone());
                }
                self.log_fallback(&entry.id);
            }
            NodeEvent::Disconnected { reason, .. } => {
                {
                    let mut status = entry.status.write();
                    status.state = NodeState::Disconnected;
                    status.session_id = None;
                    status.last_error = Some(reason.clone());
                }
                self.log_fallback(&entry.id);
            }
            NodeEvent::Reconnecting { attempt, delay, .. } => {
                let mut status = entry.status.write();
                status.state = NodeState::Reconnecting;
                status.reconnect_attempts = *attempt;
                info!(
                    "🔄 Reconectando nodo {} (intento {}, en {})",
                    entry.id,
                    attempt,
                    humantime::format_duration(*delay)
                );
            }
            NodeEvent::Stats { stats, .. } => {
                entry.status.write().stats = Some(stats.clone());
            }
            NodeEvent::Guild(_) => {}
        }
    }

    /// Busca canciones en el nodo del guild o en el mejor nodo listo
    pub async fn search(
        &self,
        query: &str,
        engine: SearchEngine,
        guild_id: Option<GuildId>,
    ) -> PlayerResult<Vec<Track>> {
        let entry = guild_id
            .and_then(|guild| self.bound_entry(guild))
            .filter(|entry| entry.is_ready())
            .or_else(|| self.best_ready())
            .ok_or_else(|| PlayerError::SearchFailed("no hay nodos listos".into()))?;

        let identifier = engine.identifier_for(query);
        debug!("🔍 Buscando '{}' en {}", identifier, entry.id);

        let outcome = entry
            .transport
            .load_tracks(&identifier)
            .await
            .map_err(|e| PlayerError::SearchFailed(e.to_string()))?;

        match outcome {
            LoadOutcome::Tracks(tracks) => Ok(tracks),
            LoadOutcome::Playlist { name, tracks } => {
                info!("📃 Playlist '{}' con {} canciones", name, tracks.len());
                Ok(tracks)
            }
            LoadOutcome::Empty => Ok(Vec::new()),
            LoadOutcome::Failed(message) => Err(PlayerError::SearchFailed(message)),
        }
    }

    /// Asigna al guild el nodo listo de menor prioridad
    pub fn bind(&self, guild_id: GuildId, voice_channel: ChannelId) -> PlayerResult<NodeId> {
        let entry = self.best_ready().ok_or(PlayerError::NoNodesAvailable)?;
        self.bindings.insert(guild_id, entry.id.clone());
        info!(
            "🔗 Guild {} (canal {}) asignado al nodo {}",
            guild_id, voice_channel, entry.id
        );
        Ok(entry.id.clone())
    }

    pub fn bound_node(&self, guild_id: GuildId) -> Option<NodeId> {
        self.bindings.get(&guild_id).map(|node| node.clone())
    }

    /// Guilds asignados actualmente a `node`
    pub fn guilds_on(&self, node: &NodeId) -> Vec<GuildId> {
        self.bindings
            .iter()
            .filter(|binding| binding.value() == node)
            .map(|binding| *binding.key())
            .collect()
    }

    pub async fn play(&self, guild_id: GuildId, track: &Track, volume: u16) -> PlayerResult<()> {
        self.forward(guild_id, PlayerPatch::play(track, volume)).await
    }

    pub async fn stop_track(&self, guild_id: GuildId) -> PlayerResult<()> {
        self.forward(guild_id, PlayerPatch::stop()).await
    }

    pub async fn pause(&self, guild_id: GuildId, paused: bool) -> PlayerResult<()> {
        self.forward(guild_id, PlayerPatch::pause(paused)).await
    }

    pub async fn set_volume(&self, guild_id: GuildId, volume: u16) -> PlayerResult<()> {
        self.forward(guild_id, PlayerPatch::volume(volume)).await
    }

    pub async fn connect_voice(&self, guild_id: GuildId, voice: VoiceSession) -> PlayerResult<()> {
        self.forward(guild_id, PlayerPatch::voice(voice)).await
    }

    /// Libera la asignación y destruye el reproductor remoto
    pub async fn release(&self, guild_id: GuildId) {
        let Some((_, node)) = self.bindings.remove(&guild_id) else {
            return;
        };
        let Some(entry) = self.entry(&node) else {
            return;
        };

        if let Err(e) = entry.transport.destroy_player(guild_id).await {
            debug!("No se pudo destruir el player remoto de {}: {}", guild_id, e);
        }
        debug!("🔓 Guild {} liberado del nodo {}", guild_id, node);
    }

    pub fn node_states(&self) -> Vec<(NodeId, NodeStatus)> {
        self.snapshot()
            .iter()
            .map(|entry| (entry.id.clone(), entry.status.read().clone()))
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.snapshot().iter().filter(|entry| entry.is_ready()).count()
    }

    /// Consulta `/version` y `/v4/stats` de cada nodo
    pub async fn health_report(&self) -> Vec<NodeHealth> {
        let nodes = self.snapshot();
        let checks = nodes.iter().map(|entry| async move {
            let (version, stats) =
                tokio::join!(entry.transport.version(), entry.transport.stats());
            let error = version
                .as_ref()
                .err()
                .or(stats.as_ref().err())
                .map(|e| e.to_string());

            NodeHealth {
                node: entry.id.clone(),
                state: entry.status.read().state,
                priority: entry.priority,
                version: version.ok(),
                stats: stats.ok(),
                error,
            }
        });
        join_all(checks).await
    }

    pub fn shutdown(&self) {
        for entry in self.snapshot() {
            entry.transport.shutdown();
        }
        info!("🛑 Nodos de audio detenidos");
    }

    // Funciones privadas

    async fn forward(&self, guild_id: GuildId, patch: PlayerPatch) -> PlayerResult<()> {
        let Some(entry) = self.bound_entry(guild_id) else {
            debug!("Guild {} sin nodo asignado, se ignora la orden", guild_id);
            return Ok(());
        };

        entry.transport.update_player(guild_id, patch).await?;
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<NodeEntry>> {
        self.nodes.read().clone()
    }

    fn entry(&self, id: &NodeId) -> Option<Arc<NodeEntry>> {
        self.nodes.read().iter().find(|n| &n.id == id).cloned()
    }

    fn bound_entry(&self, guild_id: GuildId) -> Option<Arc<NodeEntry>> {
        let node = self.bound_node(guild_id)?;
        self.entry(&node)
    }

    fn best_ready(&self) -> Option<Arc<NodeEntry>> {
        self.nodes.read().iter().find(|n| n.is_ready()).cloned()
    }

    fn log_fallback(&self, lost: &NodeId) {
        match self.best_ready() {
            Some(backup) => warn!(
                "⚠️ Nodo {} desconectado, cambiando al nodo de respaldo {}",
                lost, backup.id
            ),
            None => error!("💀 Nodo {} desconectado y no quedan nodos listos", lost),
        }
    }
}
