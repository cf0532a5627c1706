//! # Audio Module
//!
//! Playback core of the bot: node pool, queue model and per-guild players.
//!
//! The bot never decodes audio itself. Tracks are resolved and streamed by
//! external Lavalink nodes; this module decides *what* plays and *when*.
//!
//! ## Architecture
//!
//! ### [`pool`] - Node Pool
//! - Supervises every configured node and owns their connectivity state
//! - Binds each guild to the ready node with the lowest priority
//! - Forwards play/stop/pause/volume requests to the bound node
//!
//! ### [`queue`] - Queue Model
//! - `previous` / `current` / `upcoming` partitions with bounded history
//! - Loop modes (off, track, queue)
//!
//! ### [`player`] - Player State Machine
//! - One player per guild, serialized per guild, independent across guilds
//! - Reacts to node events and drives track transitions
//! - Idempotent destroy with a reason for the command layer
//!
//! ### [`autoplay`] - Autoplay Resolver
//! - Picks a related, not yet played track when the queue runs dry
//!
//! ## Event Flow
//!
//! ```text
//! LavalinkNode ──NodeEvent──▶ NodePool::run ──GuildEvent──▶ PlayerManager::run
//!                                                               │
//!                                                      per-guild mailbox task
//! ```

pub mod autoplay;
pub mod node;
pub mod player;
pub mod pool;
pub mod queue;
pub mod track;
