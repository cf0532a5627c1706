//! Discord presentation of the player: now-playing message, embeds and buttons.

pub mod buttons;
pub mod embeds;
pub mod now_playing;
