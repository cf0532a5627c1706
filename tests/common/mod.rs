#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Semaphore};

use nerox_player::{
    audio::{
        autoplay::{AutoplayResolver, TrackSearch},
        node::{
            LoadOutcome, NodeDescriptor, NodeEvent, NodeId, NodeStats, NodeTransport, PlayerPatch,
        },
        player::{PlayerManager, PlayerSettings},
        pool::NodePool,
        track::{SearchEngine, Track},
    },
    error::{NodeError, PlayerResult, SendError},
    ui::now_playing::{NowPlayingSurface, NowPlayingView, UiSync},
};

pub const VOICE: ChannelId = ChannelId::new(500);
pub const TEXT: ChannelId = ChannelId::new(600);

/// Retiene las llamadas que pasan por él mientras esté cerrado
pub struct Gate {
    closed: AtomicBool,
    waiting: AtomicUsize,
    permits: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            closed: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
            permits: Semaphore::new(0),
        }
    }
}

impl Gate {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.permits.add_permits(64);
    }

    /// Llamadas que llegaron con el paso cerrado
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn pass(&self) {
        if !self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.waiting.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Nodo en memoria que registra cada orden recibida
pub struct FakeNode {
    descriptor: NodeDescriptor,
    pub patches: Mutex<Vec<(GuildId, PlayerPatch)>>,
    pub destroyed: Mutex<Vec<GuildId>>,
    pub gate: Gate,
    events: Mutex<Option<mpsc::UnboundedSender<NodeEvent>>>,
}

impl FakeNode {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            descriptor: NodeDescriptor {
                name: name.into(),
                host: "localhost".into(),
                port: 2333,
                password: "youshallnotpass".into(),
                secure: false,
                priority,
            },
            patches: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            gate: Gate::default(),
            events: Mutex::new(None),
        }
    }

    pub fn id(&self) -> NodeId {
        self.descriptor.id()
    }

    /// Publica un evento como lo haría el WebSocket del nodo
    pub fn emit(&self, event: NodeEvent) {
        let events = self.events.lock().clone();
        events
            .expect("el pool no conectó este nodo")
            .send(event)
            .unwrap();
    }

    pub fn patches_for(&self, guild_id: GuildId) -> Vec<PlayerPatch> {
        self.patches
            .lock()
            .iter()
            .filter(|(guild, _)| *guild == guild_id)
            .map(|(_, patch)| patch.clone())
            .collect()
    }

    pub fn count(&self, guild_id: GuildId, patch: &PlayerPatch) -> usize {
        self.patches_for(guild_id)
            .iter()
            .filter(|sent| *sent == patch)
            .count()
    }
}

#[async_trait]
impl NodeTransport for FakeNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn connect(&self, events: mpsc::UnboundedSender<NodeEvent>) -> Result<(), NodeError> {
        *self.events.lock() = Some(events);
        Ok(())
    }

    async fn load_tracks(&self, _identifier: &str) -> Result<LoadOutcome, NodeError> {
        Ok(LoadOutcome::Empty)
    }

    async fn update_player(&self, guild_id: GuildId, patch: PlayerPatch) -> Result<(), NodeError> {
        self.gate.pass().await;
        self.patches.lock().push((guild_id, patch));
        Ok(())
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        self.destroyed.lock().push(guild_id);
        Ok(())
    }

    async fn version(&self) -> Result<String, NodeError> {
        Ok("4.0.8".into())
    }

    async fn stats(&self) -> Result<NodeStats, NodeError> {
        Ok(NodeStats::default())
    }

    fn shutdown(&self) {}
}

/// Superficie que guarda los mensajes en lugar de publicarlos
#[derive(Default)]
pub struct RecordingSurface {
    next_id: AtomicU64,
    pub sent: Mutex<Vec<(MessageId, NowPlayingView)>>,
    pub edited: Mutex<Vec<(MessageId, NowPlayingView)>>,
    pub deleted: Mutex<Vec<MessageId>>,
    pub gate: Gate,
}

#[async_trait]
impl NowPlayingSurface for RecordingSurface {
    async fn send(&self, _channel_id: ChannelId, view: &NowPlayingView) -> Result<MessageId, SendError> {
        self.gate.pass().await;
        let id = MessageId::new(100 + self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sent.lock().push((id, view.clone()));
        Ok(id)
    }

    async fn edit(
        &self,
        _channel_id: ChannelId,
        message_id: MessageId,
        view: &NowPlayingView,
    ) -> Result<(), SendError> {
        self.edited.lock().push((message_id, view.clone()));
        Ok(())
    }

    async fn delete(&self, _channel_id: ChannelId, message_id: MessageId) -> Result<(), SendError> {
        self.deleted.lock().push(message_id);
        Ok(())
    }
}

/// Búsqueda con resultados fijos para el autoplay
#[derive(Default)]
pub struct FakeSearch {
    pub results: Mutex<Vec<Track>>,
    pub queries: Mutex<Vec<String>>,
}

#[async_trait]
impl TrackSearch for FakeSearch {
    async fn search(
        &self,
        query: &str,
        _engine: SearchEngine,
        _guild_id: Option<GuildId>,
    ) -> PlayerResult<Vec<Track>> {
        self.queries.lock().push(query.to_string());
        Ok(self.results.lock().clone())
    }
}

pub struct Harness {
    pub pool: Arc<NodePool>,
    pub manager: Arc<PlayerManager>,
    pub node: Arc<FakeNode>,
    pub surface: Arc<RecordingSurface>,
    pub search: Arc<FakeSearch>,
}

impl Harness {
    pub fn new() -> Self {
        let pool = Arc::new(NodePool::new());
        let node = Arc::new(FakeNode::new("main", 1));
        pool.add_node(node.clone());
        pool.apply(&NodeEvent::Ready {
            node: NodeId::new("main"),
            session_id: "session".into(),
            resumed: false,
        });

        let surface = Arc::new(RecordingSurface::default());
        let search = Arc::new(FakeSearch::default());
        let manager = Arc::new(PlayerManager::new(
            pool.clone(),
            AutoplayResolver::new(search.clone()).unwrap(),
            UiSync::new(surface.clone(), true),
            PlayerSettings::default(),
        ));

        Self {
            pool,
            manager,
            node,
            surface,
            search,
        }
    }

    /// Igual que `new`, pero con los eventos entrando por el pool y el dispatcher
    pub async fn running() -> Self {
        let harness = Self::new();
        harness.pool.connect().await;

        let (guild_tx, guild_rx) = mpsc::unbounded_channel();
        let pool = harness.pool.clone();
        tokio::spawn(async move { pool.run(guild_tx).await });
        tokio::spawn(harness.manager.clone().run(guild_rx));

        harness.node.emit(NodeEvent::Ready {
            node: harness.node.id(),
            session_id: "session".into(),
            resumed: false,
        });
        wait_until(|| harness.pool.ready_count() == 1).await;
        harness
    }

    /// Crea el player del guild con los canales de prueba
    pub fn create(&self, guild_id: GuildId) {
        self.manager.create(guild_id, VOICE, TEXT).unwrap();
    }
}

/// Espera a que las tareas en segundo plano cumplan la condición
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("la condición no se cumplió a tiempo");
}

pub fn guild(id: u64) -> GuildId {
    GuildId::new(id)
}

pub fn track(name: &str) -> Track {
    Track {
        encoded: format!("enc-{name}"),
        identifier: format!("id-{name}"),
        title: format!("Song {name}"),
        author: "Artist".into(),
        uri: Some(format!("https://www.youtube.com/watch?v=id-{name}")),
        duration_ms: 180_000,
        is_stream: false,
        requester: None,
        thumbnail: None,
        source_name: "youtube".into(),
    }
}
