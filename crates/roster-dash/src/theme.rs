use ratatui::style::{Color, Modifier, Style};
use roster_core::PresenceState;

pub const BORDER: Color = Color::Rgb(34, 211, 238);
pub const MUTED: Color = Color::Rgb(148, 163, 184);
pub const TEXT: Color = Color::Rgb(226, 232, 240);
pub const CRITICAL: Color = Color::Rgb(239, 68, 68);

pub const TITLE_STYLE: Style = Style::new().fg(BORDER).add_modifier(Modifier::BOLD);
pub const BANNER_STYLE: Style = Style::new().fg(CRITICAL).add_modifier(Modifier::BOLD);
pub const MUTED_STYLE: Style = Style::new().fg(MUTED);

pub fn presence_color(state: PresenceState) -> Color {
    match state {
        PresenceState::Online => Color::Rgb(34, 197, 94),
        PresenceState::Busy => CRITICAL,
        PresenceState::Away => Color::Rgb(245, 158, 11),
        PresenceState::Snooze => Color::Rgb(168, 85, 247),
        PresenceState::LookingToTrade | PresenceState::LookingToPlay => Color::Rgb(34, 211, 238),
        PresenceState::Offline => Color::Rgb(100, 116, 139),
        PresenceState::Invisible | PresenceState::Unknown => TEXT,
    }
}

/// Contacts in a game are highlighted regardless of their presence.
pub fn contact_color(state: PresenceState, playing: bool) -> Color {
    if playing {
        Color::Rgb(74, 222, 128)
    } else {
        presence_color(state)
    }
}
