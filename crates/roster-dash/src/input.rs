use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use roster_core::viewport::DashboardCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Command(DashboardCommand),
    Resize,
}

/// Maps terminal events to dashboard actions. `page` is the number of
/// entries currently visible.
pub fn action_for(event: &Event, page: usize) -> Option<InputAction> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
            command_for_key(key, page).map(InputAction::Command)
        }
        Event::Resize(_, _) => Some(InputAction::Resize),
        _ => None,
    }
}

pub fn command_for_key(key: &KeyEvent, page: usize) -> Option<DashboardCommand> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(DashboardCommand::ExitRequested),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(DashboardCommand::ExitRequested),
        KeyCode::Up | KeyCode::Char('k') => Some(DashboardCommand::ScrollUp(1)),
        KeyCode::Down | KeyCode::Char('j') => Some(DashboardCommand::ScrollDown(1)),
        KeyCode::PageUp => Some(DashboardCommand::ScrollUp(page.max(1))),
        KeyCode::PageDown => Some(DashboardCommand::ScrollDown(page.max(1))),
        KeyCode::Home | KeyCode::Char('g') => Some(DashboardCommand::ScrollToTop),
        KeyCode::End | KeyCode::Char('G') => Some(DashboardCommand::ScrollToBottom),
        _ => None,
    }
}
