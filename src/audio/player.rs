//! # Player State Machine
//!
//! One [`GuildPlayer`] per guild, owned by the [`PlayerManager`] registry.
//!
//! ```text
//! Idle ──create──▶ Pending ──TrackStart──▶ Active ⇄ Paused ──▶ Destroyed
//! ```
//!
//! Every mutating operation and every node event for a guild runs under that
//! guild's operation lock, so `skip`, `previous` and `TrackEnd` never overlap.
//! [`PlayerManager::destroy`] is the exception: it never waits for the lock.
//! It flips the liveness flag and every in-flight operation re-checks
//! [`GuildPlayer::is_alive`] after each await before touching state again.

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::{
    autoplay::AutoplayResolver,
    node::{GuildEvent, NodeId, PlaybackEvent, TrackEndReason, VoiceSession},
    pool::NodePool,
    queue::{LoopMode, Queue, DEFAULT_HISTORY},
    track::Track,
};
use crate::{
    error::{PlayerError, PlayerResult},
    ui::now_playing::{NowPlayingMessage, NowPlayingView, UiSync},
};

pub const MAX_VOLUME: u16 = 200;

/// Código de cierre de voz cuando el bot fue desconectado del canal
const VOICE_DISCONNECTED_CODE: u16 = 4014;

/// Valores iniciales de cada player
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub default_volume: u16,
    pub max_queue_size: usize,
    pub history_size: usize,
    pub default_autoplay: bool,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            default_volume: 100,
            max_queue_size: 1000,
            history_size: DEFAULT_HISTORY,
            default_autoplay: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// Creado, esperando el primer TrackStart
    Pending,
    Active,
    Paused,
    Destroyed,
}

/// Transición pedida al nodo que aún no confirmó su TrackEnd
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingTransition {
    Skip,
    Rewind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyReason {
    Requested,
    VoiceDisconnected,
    QueueEnded,
    AutoplayFailed,
    NodeException(String),
    NodeStuck(u64),
    NodeCleanup,
    PlaybackFailed(String),
}

impl DestroyReason {
    /// Si la destrucción se debe a un fallo
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DestroyReason::AutoplayFailed
                | DestroyReason::NodeException(_)
                | DestroyReason::NodeStuck(_)
                | DestroyReason::NodeCleanup
                | DestroyReason::PlaybackFailed(_)
        )
    }
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyReason::Requested => write!(f, "Reproducción detenida"),
            DestroyReason::VoiceDisconnected => write!(f, "Me desconectaron del canal de voz"),
            DestroyReason::QueueEnded => write!(f, "La cola terminó"),
            DestroyReason::AutoplayFailed => {
                write!(f, "Autoplay no encontró una canción similar")
            }
            DestroyReason::NodeException(message) => {
                write!(f, "Error del nodo de audio: {}", message)
            }
            DestroyReason::NodeStuck(threshold) => {
                write!(f, "La reproducción se atascó ({} ms sin audio)", threshold)
            }
            DestroyReason::NodeCleanup => write!(f, "El nodo de audio cerró el reproductor"),
            DestroyReason::PlaybackFailed(message) => {
                write!(f, "No se pudo reproducir: {}", message)
            }
        }
    }
}

/// Información publicada al destruir un player
#[derive(Debug, Clone, PartialEq)]
pub struct DestroyReport {
    pub guild_id: GuildId,
    pub text_channel: ChannelId,
    pub reason: DestroyReason,
    pub last_track: Option<Track>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Se pidió la reproducción inmediata
    Started(Track),
    /// Posición en `upcoming` (1 = siguiente)
    Queued { position: usize },
}

/// Copia de sólo lectura del estado de un player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub guild_id: GuildId,
    pub generation: u64,
    pub voice_channel: ChannelId,
    pub text_channel: ChannelId,
    pub node: NodeId,
    pub status: PlayerStatus,
    pub current: Option<Track>,
    pub previous: Vec<Track>,
    pub upcoming: Vec<Track>,
    pub position_ms: u64,
    pub volume: u16,
    pub paused: bool,
    pub autoplay: bool,
    pub loop_mode: LoopMode,
    pub pending: Option<PendingTransition>,
    pub now_playing: Option<NowPlayingMessage>,
    pub created_at: DateTime<Utc>,
}

struct PlayerState {
    voice_channel: ChannelId,
    text_channel: ChannelId,
    node: NodeId,
    queue: Queue,
    position_ms: u64,
    volume: u16,
    paused: bool,
    autoplay: bool,
    now_playing: Option<NowPlayingMessage>,
    status: PlayerStatus,
    pending: Option<PendingTransition>,
    created_at: DateTime<Utc>,
}

pub struct GuildPlayer {
    guild_id: GuildId,
    generation: u64,
    alive: AtomicBool,
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<PlayerState>,
    mailbox: Mutex<Option<mpsc::UnboundedSender<PlaybackEvent>>>,
}

impl GuildPlayer {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn node(&self) -> NodeId {
        self.state.lock().node.clone()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let state = self.state.lock();
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &PlayerState) -> PlayerSnapshot {
        PlayerSnapshot {
            guild_id: self.guild_id,
            generation: self.generation,
            voice_channel: state.voice_channel,
            text_channel: state.text_channel,
            node: state.node.clone(),
            status: state.status,
            current: state.queue.current().cloned(),
            previous: state.queue.previous().cloned().collect(),
            upcoming: state.queue.upcoming().cloned().collect(),
            position_ms: state.position_ms,
            volume: state.volume,
            paused: state.paused,
            autoplay: state.autoplay,
            loop_mode: state.queue.loop_mode(),
            pending: state.pending,
            now_playing: state.now_playing.clone(),
            created_at: state.created_at,
        }
    }

    fn view(&self, state: &PlayerState) -> Option<NowPlayingView> {
        NowPlayingView::render(&self.snapshot_of(state))
    }
}

/// Registro de players por guild
pub struct PlayerManager {
    pool: Arc<NodePool>,
    autoplay: AutoplayResolver,
    ui: UiSync,
    settings: PlayerSettings,
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    generations: AtomicU64,
    destroyed_tx: broadcast::Sender<DestroyReport>,
}

impl PlayerManager {
    pub fn new(
        pool: Arc<NodePool>,
        autoplay: AutoplayResolver,
        ui: UiSync,
        settings: PlayerSettings,
    ) -> Self {
        let (destroyed_tx, _) = broadcast::channel(64);
        Self {
            pool,
            autoplay,
            ui,
            settings,
            players: DashMap::new(),
            generations: AtomicU64::new(1),
            destroyed_tx,
        }
    }

    /// Suscripción a los reportes de destrucción
    pub fn subscribe_destroyed(&self) -> broadcast::Receiver<DestroyReport> {
        self.destroyed_tx.subscribe()
    }

    pub fn get_player(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players
            .get(&guild_id)
            .map(|player| Arc::clone(player.value()))
            .filter(|player| player.is_alive())
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Option<PlayerSnapshot> {
        self.get_player(guild_id).map(|player| player.snapshot())
    }

    pub fn active_players(&self) -> usize {
        self.players.len()
    }

    /// Crea el player del guild o devuelve el que ya existe
    pub fn create(
        self: &Arc<Self>,
        guild_id: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> PlayerResult<Arc<GuildPlayer>> {
        let (player, mailbox) = match self.players.entry(guild_id) {
            Entry::Occupied(existing) if existing.get().is_alive() => {
                return Ok(Arc::clone(existing.get()));
            }
            entry => {
                let node = self.pool.bind(guild_id, voice_channel)?;
                let (tx, rx) = mpsc::unbounded_channel();
                let queue = Queue::new(self.settings.max_queue_size, self.settings.history_size);

                let player = Arc::new(GuildPlayer {
                    guild_id,
                    generation: self.generations.fetch_add(1, Ordering::SeqCst),
                    alive: AtomicBool::new(true),
                    op_lock: tokio::sync::Mutex::new(()),
                    state: Mutex::new(PlayerState {
                        voice_channel,
                        text_channel,
                        node,
                        queue,
                        position_ms: 0,
                        volume: self.settings.default_volume.min(MAX_VOLUME),
                        paused: false,
                        autoplay: self.settings.default_autoplay,
                        now_playing: None,
                        status: PlayerStatus::Pending,
                        pending: None,
                        created_at: Utc::now(),
                    }),
                    mailbox: Mutex::new(Some(tx)),
                });

                match entry {
                    Entry::Occupied(mut stale) => {
                        stale.insert(Arc::clone(&player));
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(Arc::clone(&player));
                    }
                }
                (player, rx)
            }
        };

        info!(
            "🎵 Player creado para guild {} (generación {})",
            guild_id, player.generation
        );
        tokio::spawn(Arc::clone(self).run_mailbox(Arc::clone(&player), mailbox));
        Ok(player)
    }

    /// Reenvía las credenciales de voz al nodo asignado
    pub async fn connect_voice(&self, guild_id: GuildId, voice: VoiceSession) -> PlayerResult<()> {
        let player = self.require(guild_id)?;
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return Err(PlayerError::NoPlayer);
        }

        self.pool.connect_voice(guild_id, voice).await
    }

    /// Reproduce de inmediato si no hay canción actual; si no, encola
    pub async fn play(&self, guild_id: GuildId, track: Track) -> PlayerResult<EnqueueOutcome> {
        let player = self.require(guild_id)?;
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return Err(PlayerError::NoPlayer);
        }

        let (position, start) = {
            let mut state = player.state.lock();
            let busy = state.queue.current().is_some() || state.pending.is_some();
            let position = state.queue.enqueue(track)?;
            let start = if busy { None } else { state.queue.advance() };
            (position, start)
        };

        match start {
            Some(track) => {
                self.start_track(&player, &track).await;
                Ok(EnqueueOutcome::Started(track))
            }
            None => {
                debug!("➕ Guild {}: encolado en posición {}", guild_id, position);
                self.refresh_ui(&player).await;
                Ok(EnqueueOutcome::Queued { position })
            }
        }
    }

    /// Detiene la pista actual; el TrackEnd del nodo hace el avance
    pub async fn skip(&self, guild_id: GuildId) -> PlayerResult<bool> {
        let player = self.require(guild_id)?;
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return Err(PlayerError::NoPlayer);
        }

        {
            let mut state = player.state.lock();
            if state.queue.current().is_none() || state.pending.is_some() {
                debug!("⏭️ Skip ignorado en guild {}: nada que saltar", guild_id);
                return Ok(false);
            }
            state.pending = Some(PendingTransition::Skip);
        }

        if let Err(e) = self.pool.stop_track(guild_id).await {
            if player.is_alive() {
                player.state.lock().pending = None;
            }
            return Err(e);
        }

        info!("⏭️ Skip solicitado en guild {}", guild_id);
        Ok(true)
    }

    /// Vuelve a la canción anterior; `None` si no hay historial
    pub async fn previous(&self, guild_id: GuildId) -> PlayerResult<Option<Track>> {
        let player = self.require(guild_id)?;
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return Err(PlayerError::NoPlayer);
        }

        let rewound = {
            let mut state = player.state.lock();
            if state.pending.is_some() || state.queue.current().is_none() {
                return Ok(None);
            }
            let Some(track) = state.queue.rewind() else {
                debug!("⏮️ Sin historial en guild {}", guild_id);
                return Ok(None);
            };
            state.pending = Some(PendingTransition::Rewind);
            track
        };

        if let Err(e) = self.pool.stop_track(guild_id).await {
            if player.is_alive() {
                let mut state = player.state.lock();
                state.queue.skip_advance();
                state.pending = None;
            }
            return Err(e);
        }

        info!("⏮️ Volviendo a '{}' en guild {}", rewound.title, guild_id);
        Ok(Some(rewound))
    }

    /// Pausa o reanuda; sólo contacta al nodo si el estado cambia
    pub async fn pause(&self, guild_id: GuildId, paused: bool) -> PlayerResult<bool> {
        let player = self.require(guild_id)?;
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return Err(PlayerError::NoPlayer);
        }

        {
            let state = player.state.lock();
            if state.queue.current().is_none() || state.paused == paused {
                return Ok(false);
            }
        }

        self.pool.pause(guild_id, paused).await?;
        if !player.is_alive() {
            return Ok(false);
        }

        {
            let mut state = player.state.lock();
            state.paused = paused;
            if state.status != PlayerStatus::Pending {
                state.status = if paused {
                    PlayerStatus::Paused
                } else {
                    PlayerStatus::Active
                };
            }
        }

        info!(
            "{} Guild {}",
            if paused { "⏸️ Pausado" } else { "▶️ Reanudado" },
            guild_id
        );
        self.refresh_ui(&player).await;
        Ok(true)
    }

    /// Ajusta el volumen (0..=200) y devuelve el valor aplicado
    pub async fn set_volume(&self, guild_id: GuildId, volume: u16) -> PlayerResult<u16> {
        let player = self.require(guild_id)?;
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return Err(PlayerError::NoPlayer);
        }

        let volume = volume.min(MAX_VOLUME);
        let has_track = player.state.lock().queue.current().is_some();
        if has_track {
            self.pool.set_volume(guild_id, volume).await?;
            if !player.is_alive() {
                return Err(PlayerError::NoPlayer);
            }
        }

        player.state.lock().volume = volume;
        info!("🔊 Volumen de guild {}: {}%", guild_id, volume);
        self.refresh_ui(&player).await;
        Ok(volume)
    }

    pub async fn set_loop_mode(&self, guild_id: GuildId, mode: LoopMode) -> PlayerResult<()> {
        let player = self.require(guild_id)?;
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return Err(PlayerError::NoPlayer);
        }

        player.state.lock().queue.set_loop_mode(mode);
        self.refresh_ui(&player).await;
        Ok(())
    }

    pub async fn set_autoplay(&self, guild_id: GuildId, enabled: bool) -> PlayerResult<bool> {
        self.update_autoplay(guild_id, |_| enabled).await
    }

    pub async fn toggle_autoplay(&self, guild_id: GuildId) -> PlayerResult<bool> {
        self.update_autoplay(guild_id, |enabled| !enabled).await
    }

    /// Destruye el player; la segunda llamada devuelve `None` y no emite nada
    pub async fn destroy(&self, guild_id: GuildId, reason: DestroyReason) -> Option<DestroyReport> {
        let player = self.players.get(&guild_id).map(|p| Arc::clone(p.value()))?;
        self.destroy_player(&player, reason).await
    }

    pub async fn destroy_all(&self, reason: DestroyReason) {
        let players: Vec<Arc<GuildPlayer>> =
            self.players.iter().map(|p| Arc::clone(p.value())).collect();
        for player in players {
            self.destroy_player(&player, reason.clone()).await;
        }
    }

    /// Enruta un evento del nodo al buzón del guild
    pub fn dispatch(&self, event: GuildEvent) {
        let Some(player) = self.get_player(event.guild_id) else {
            debug!("Evento para guild {} sin player: {:?}", event.guild_id, event.event);
            return;
        };

        if player.node() != event.node {
            debug!(
                "Evento de {} ignorado: guild {} está en otro nodo",
                event.node, event.guild_id
            );
            return;
        }

        let mailbox = player.mailbox.lock().clone();
        if let Some(mailbox) = mailbox {
            let _ = mailbox.send(event.event);
        }
    }

    /// Consume los eventos reenviados por el pool
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<GuildEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        debug!("Dispatcher de players terminado");
    }

    /// Procesa un evento en línea, respetando el orden por guild
    pub async fn handle_event(&self, guild_id: GuildId, event: PlaybackEvent) {
        if let Some(player) = self.get_player(guild_id) {
            self.process_event(&player, event).await;
        }
    }

    // Funciones privadas

    fn require(&self, guild_id: GuildId) -> PlayerResult<Arc<GuildPlayer>> {
        self.get_player(guild_id).ok_or(PlayerError::NoPlayer)
    }

    /// Lee y escribe el flag bajo el lock de operaciones del guild
    async fn update_autoplay(
        &self,
        guild_id: GuildId,
        next: impl FnOnce(bool) -> bool,
    ) -> PlayerResult<bool> {
        let player = self.require(guild_id)?;
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return Err(PlayerError::NoPlayer);
        }

        let enabled = {
            let mut state = player.state.lock();
            state.autoplay = next(state.autoplay);
            state.autoplay
        };
        info!(
            "🎲 Autoplay {} en guild {}",
            if enabled { "activado" } else { "desactivado" },
            guild_id
        );
        self.refresh_ui(&player).await;
        Ok(enabled)
    }

    async fn run_mailbox(
        self: Arc<Self>,
        player: Arc<GuildPlayer>,
        mut events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !player.is_alive() {
                break;
            }
            self.process_event(&player, event).await;
        }
        debug!(
            "📪 Buzón de guild {} cerrado (generación {})",
            player.guild_id, player.generation
        );
    }

    async fn process_event(&self, player: &GuildPlayer, event: PlaybackEvent) {
        let _op = player.op_lock.lock().await;
        if !player.is_alive() {
            return;
        }

        match event {
            PlaybackEvent::TrackStart { encoded } => self.on_track_start(player, &encoded).await,
            PlaybackEvent::TrackEnd { encoded, reason } => {
                self.on_track_end(player, &encoded, reason).await
            }
            PlaybackEvent::TrackException { message, .. } => {
                error!("❌ Excepción del nodo en guild {}: {}", player.guild_id, message);
                self.destroy_player(player, DestroyReason::NodeException(message))
                    .await;
            }
            PlaybackEvent::TrackStuck { threshold_ms, .. } => {
                error!(
                    "❌ Reproducción atascada en guild {} ({} ms)",
                    player.guild_id, threshold_ms
                );
                self.destroy_player(player, DestroyReason::NodeStuck(threshold_ms))
                    .await;
            }
            PlaybackEvent::PositionUpdate { position_ms, .. } => {
                player.state.lock().position_ms = position_ms;
            }
            PlaybackEvent::VoiceClosed {
                code,
                reason,
                by_remote,
            } => {
                warn!(
                    "🔇 Voz cerrada en guild {}: {} {} (remoto: {})",
                    player.guild_id, code, reason, by_remote
                );
                if code == VOICE_DISCONNECTED_CODE {
                    self.destroy_player(player, DestroyReason::VoiceDisconnected)
                        .await;
                }
            }
            PlaybackEvent::SessionLost { reason } => {
                error!(
                    "💀 Guild {} perdió su sesión en el nodo: {}",
                    player.guild_id, reason
                );
                self.destroy_player(
                    player,
                    DestroyReason::NodeException(format!("sesión perdida ({})", reason)),
                )
                .await;
            }
        }
    }

    async fn on_track_start(&self, player: &GuildPlayer, encoded: &str) {
        let (current, channel, view) = {
            let mut state = player.state.lock();
            let is_current = state
                .queue
                .current()
                .is_some_and(|track| track.encoded == encoded);
            if !is_current {
                debug!("TrackStart obsoleto en guild {}", player.guild_id);
                return;
            }

            state.position_ms = 0;
            state.status = if state.paused {
                PlayerStatus::Paused
            } else {
                PlayerStatus::Active
            };

            let Some(view) = player.view(&state) else {
                return;
            };
            (state.now_playing.take(), state.text_channel, view)
        };

        info!("🎵 Reproduciendo '{}' en guild {}", view.title, player.guild_id);
        let shown = self.ui.show(current, channel, view).await;
        if let Some(orphan) = Self::store_message(player, shown) {
            self.ui.discard(orphan).await;
        }
    }

    async fn on_track_end(&self, player: &GuildPlayer, encoded: &str, reason: TrackEndReason) {
        match reason {
            TrackEndReason::Replaced => {
                debug!("TrackEnd por reemplazo ignorado en guild {}", player.guild_id);
                return;
            }
            TrackEndReason::Cleanup => {
                self.destroy_player(player, DestroyReason::NodeCleanup).await;
                return;
            }
            _ => {}
        }

        let (retired, next) = {
            let mut state = player.state.lock();
            let is_current = state
                .queue
                .current()
                .is_some_and(|track| track.encoded == encoded);

            let next = match state.pending {
                Some(PendingTransition::Rewind) => state.queue.current().cloned(),
                Some(PendingTransition::Skip) if is_current => state.queue.skip_advance(),
                None if is_current => state.queue.advance(),
                _ => {
                    debug!("TrackEnd obsoleto en guild {}", player.guild_id);
                    return;
                }
            };

            state.pending = None;
            state.position_ms = 0;
            (state.now_playing.take(), next)
        };

        if let Some(message) = retired {
            self.ui.retire(message).await;
        }
        if !player.is_alive() {
            return;
        }

        match next {
            Some(track) => self.start_track(player, &track).await,
            None => self.on_queue_empty(player).await,
        }
    }

    async fn on_queue_empty(&self, player: &GuildPlayer) {
        let (autoplay, last, known) = {
            let state = player.state.lock();
            (
                state.autoplay,
                state.queue.last_played().cloned(),
                state.queue.known_keys(),
            )
        };
        info!("📭 Cola vacía en guild {}", player.guild_id);

        let last = match (autoplay, last) {
            (true, Some(last)) => last,
            _ => {
                self.destroy_player(player, DestroyReason::QueueEnded).await;
                return;
            }
        };

        let track = match self.autoplay.resolve(&last, &known, player.guild_id).await {
            Ok(track) => track,
            Err(e) => {
                warn!("⚠️ Autoplay falló en guild {}: {}", player.guild_id, e);
                self.destroy_player(player, DestroyReason::AutoplayFailed)
                    .await;
                return;
            }
        };

        if !player.is_alive() {
            return;
        }

        let next = {
            let mut state = player.state.lock();
            match state.queue.enqueue(track) {
                Ok(_) => state.queue.advance(),
                Err(e) => {
                    warn!("⚠️ Autoplay no pudo encolar: {}", e);
                    None
                }
            }
        };

        match next {
            Some(track) => self.start_track(player, &track).await,
            None => {
                self.destroy_player(player, DestroyReason::AutoplayFailed)
                    .await;
            }
        }
    }

    /// Pide al nodo reproducir `track`; un fallo destruye el player
    async fn start_track(&self, player: &GuildPlayer, track: &Track) {
        // El nodo arranca cada pista sin pausa
        let volume = {
            let mut state = player.state.lock();
            state.position_ms = 0;
            state.paused = false;
            if state.status == PlayerStatus::Paused {
                state.status = PlayerStatus::Active;
            }
            state.volume
        };

        debug!("▶️ Solicitando '{}' en guild {}", track.title, player.guild_id);
        if let Err(e) = self.pool.play(player.guild_id, track, volume).await {
            error!("❌ No se pudo reproducir en guild {}: {}", player.guild_id, e);
            self.destroy_player(player, DestroyReason::PlaybackFailed(e.to_string()))
                .await;
        }
    }

    async fn refresh_ui(&self, player: &GuildPlayer) {
        let (current, view) = {
            let mut state = player.state.lock();
            if state.now_playing.is_none() {
                return;
            }
            let Some(view) = player.view(&state) else {
                return;
            };
            (state.now_playing.take(), view)
        };

        let updated = self.ui.refresh(current, view).await;
        if let Some(orphan) = Self::store_message(player, updated) {
            self.ui.retire(orphan).await;
        }
    }

    /// Guarda el mensaje si el player sigue vivo; si no, lo devuelve para borrarlo
    ///
    /// `destroy_player` marca `Destroyed` y toma el mensaje bajo el mismo lock,
    /// así que el mensaje queda guardado y retirado por él, o vuelve aquí.
    fn store_message(
        player: &GuildPlayer,
        message: Option<NowPlayingMessage>,
    ) -> Option<NowPlayingMessage> {
        let mut state = player.state.lock();
        if state.status == PlayerStatus::Destroyed {
            return message;
        }
        state.now_playing = message;
        None
    }

    async fn destroy_player(
        &self,
        player: &GuildPlayer,
        reason: DestroyReason,
    ) -> Option<DestroyReport> {
        if !player.alive.swap(false, Ordering::SeqCst) {
            return None;
        }

        let guild_id = player.guild_id;
        self.players
            .remove_if(&guild_id, |_, p| p.generation == player.generation);
        player.mailbox.lock().take();

        let (message, report) = {
            let mut state = player.state.lock();
            let last_track = state
                .queue
                .current()
                .or_else(|| state.queue.last_played())
                .cloned();

            state.status = PlayerStatus::Destroyed;
            state.pending = None;
            state.queue = Queue::new(0, 1);

            (
                state.now_playing.take(),
                DestroyReport {
                    guild_id,
                    text_channel: state.text_channel,
                    reason,
                    last_track,
                },
            )
        };

        self.pool.release(guild_id).await;
        if let Some(message) = message {
            self.ui.retire(message).await;
        }

        if report.reason.is_error() {
            warn!("💥 Player de guild {} destruido: {}", guild_id, report.reason);
        } else {
            info!("👋 Player de guild {} destruido: {}", guild_id, report.reason);
        }
        let _ = self.destroyed_tx.send(report.clone());
        Some(report)
    }
}
