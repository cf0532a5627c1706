use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
    model::id::GuildId,
};
use std::{fmt, str::FromStr};

use crate::ui::now_playing::NowPlayingView;

/// Prefijo de los botones del mensaje now playing
pub const PLAYER_PREFIX: &str = "player";

/// Acciones disponibles en los controles del reproductor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Stop,
    Pause,
    Resume,
    Autoplay,
    Next,
    Prev,
    Like,
}

impl PlayerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerAction::Stop => "stop",
            PlayerAction::Pause => "pause",
            PlayerAction::Resume => "resume",
            PlayerAction::Autoplay => "autoplay",
            PlayerAction::Next => "next",
            PlayerAction::Prev => "prev",
            PlayerAction::Like => "like",
        }
    }
}

impl fmt::Display for PlayerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayerAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(PlayerAction::Stop),
            "pause" => Ok(PlayerAction::Pause),
            "resume" => Ok(PlayerAction::Resume),
            "autoplay" => Ok(PlayerAction::Autoplay),
            "next" => Ok(PlayerAction::Next),
            "prev" => Ok(PlayerAction::Prev),
            "like" => Ok(PlayerAction::Like),
            _ => Err(()),
        }
    }
}

/// `player_<guild>_<acción>`
pub fn custom_id(guild_id: GuildId, action: PlayerAction) -> String {
    format!("{}_{}_{}", PLAYER_PREFIX, guild_id, action)
}

/// Interpreta un custom id; `None` si no es un botón del reproductor
pub fn parse_custom_id(custom_id: &str) -> Option<(GuildId, PlayerAction)> {
    let mut parts = custom_id.splitn(3, '_');
    if parts.next()? != PLAYER_PREFIX {
        return None;
    }

    let guild = parts.next()?.parse::<u64>().ok().filter(|id| *id != 0)?;
    let action = parts.next()?.parse().ok()?;
    Some((GuildId::new(guild), action))
}

/// Controles del mensaje now playing
pub fn player_controls(view: &NowPlayingView) -> Vec<CreateActionRow> {
    let guild = view.guild_id;

    let toggle = if view.paused {
        CreateButton::new(custom_id(guild, PlayerAction::Resume))
            .emoji('▶')
            .style(ButtonStyle::Success)
    } else {
        CreateButton::new(custom_id(guild, PlayerAction::Pause))
            .emoji('⏸')
            .style(ButtonStyle::Primary)
    };

    let row1 = CreateActionRow::Buttons(vec![
        CreateButton::new(custom_id(guild, PlayerAction::Prev))
            .emoji('⏮')
            .style(ButtonStyle::Secondary),
        toggle,
        CreateButton::new(custom_id(guild, PlayerAction::Next))
            .emoji('⏭')
            .style(ButtonStyle::Secondary),
        CreateButton::new(custom_id(guild, PlayerAction::Stop))
            .emoji('⏹')
            .style(ButtonStyle::Danger),
    ]);

    let autoplay_style = if view.autoplay {
        ButtonStyle::Success
    } else {
        ButtonStyle::Secondary
    };

    let row2 = CreateActionRow::Buttons(vec![
        CreateButton::new(custom_id(guild, PlayerAction::Autoplay))
            .label("Autoplay")
            .emoji('🎲')
            .style(autoplay_style),
        CreateButton::new(custom_id(guild, PlayerAction::Like))
            .emoji('❤')
            .style(ButtonStyle::Secondary),
    ]);

    vec![row1, row2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_id_format() {
        assert_eq!(
            custom_id(GuildId::new(817327181659111454), PlayerAction::Autoplay),
            "player_817327181659111454_autoplay"
        );
    }

    #[test]
    fn test_parse_custom_id() {
        assert_eq!(
            parse_custom_id("player_42_prev"),
            Some((GuildId::new(42), PlayerAction::Prev))
        );
        assert_eq!(parse_custom_id("player_42_shuffle"), None);
        assert_eq!(parse_custom_id("player_abc_stop"), None);
        assert_eq!(parse_custom_id("player_0_stop"), None);
        assert_eq!(parse_custom_id("queue_42_next"), None);
        assert_eq!(parse_custom_id("player_42"), None);
    }
}
