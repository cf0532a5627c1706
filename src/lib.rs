//! # Nerox Player
//!
//! Music player core of the Nerox Discord bot. Audio is decoded and streamed
//! by remote Lavalink nodes; this crate owns everything around them:
//!
//! - [`audio::pool`]: node registry, guild bindings and event fan-in
//! - [`audio::queue`]: per-guild queue with history and loop modes
//! - [`audio::player`]: per-guild lifecycle state machine
//! - [`audio::autoplay`]: related-track resolution when the queue runs dry
//! - [`ui::now_playing`]: the single "now playing" message per player
//!
//! The [`bot`] module wires these into Serenity commands and buttons.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod storage;
pub mod ui;
