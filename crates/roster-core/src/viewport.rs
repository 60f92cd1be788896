use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Terminal rows used by one roster entry: label line plus status line.
pub const ROWS_PER_ENTRY: usize = 2;

pub fn visible_capacity(rows: usize, reserved: usize) -> usize {
    (rows.saturating_sub(reserved) / ROWS_PER_ENTRY).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSnapshot {
    pub offset: usize,
    pub total: usize,
    pub capacity: usize,
}

impl ViewportSnapshot {
    pub fn max_offset(&self) -> usize {
        self.total.saturating_sub(self.capacity)
    }

    /// Half-open index range of visible entries.
    pub fn visible_range(&self) -> (usize, usize) {
        let end = (self.offset + self.capacity).min(self.total);
        (self.offset.min(end), end)
    }

    pub fn overflows(&self) -> bool {
        self.total > self.capacity
    }
}

impl Default for ViewportSnapshot {
    fn default() -> Self {
        Self {
            offset: 0,
            total: 0,
            capacity: 1,
        }
    }
}

/// Scroll offset over the roster. Holds only index ranges; no rendering.
#[derive(Debug, Default)]
pub struct ViewportManager {
    inner: Mutex<ViewportSnapshot>,
}

impl ViewportManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ViewportSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ViewportSnapshot {
        *self.lock()
    }

    pub fn offset(&self) -> usize {
        self.lock().offset
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn visible_range(&self) -> (usize, usize) {
        self.lock().visible_range()
    }

    pub fn update_counts(&self, total: usize, capacity: usize, reset_scroll: bool) {
        let mut view = self.lock();
        view.total = total;
        view.capacity = capacity.max(1);
        if reset_scroll {
            view.offset = 0;
        }
        view.offset = view.offset.min(view.max_offset());
    }

    fn move_to(&self, target: impl FnOnce(&ViewportSnapshot) -> usize) -> bool {
        let mut view = self.lock();
        let next = target(&view).min(view.max_offset());
        if next == view.offset {
            return false;
        }
        debug!(event = "viewport_scrolled", from = view.offset, to = next, total = view.total);
        view.offset = next;
        true
    }

    pub fn scroll_up(&self, lines: usize) -> bool {
        self.move_to(|view| view.offset.saturating_sub(lines.max(1)))
    }

    pub fn scroll_down(&self, lines: usize) -> bool {
        self.move_to(|view| view.offset.saturating_add(lines.max(1)))
    }

    pub fn scroll_to_top(&self) -> bool {
        self.move_to(|_| 0)
    }

    pub fn scroll_to_bottom(&self) -> bool {
        self.move_to(|view| view.max_offset())
    }
}

/// Input-layer commands, independent of concrete key decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardCommand {
    ScrollUp(usize),
    ScrollDown(usize),
    ScrollToTop,
    ScrollToBottom,
    ExitRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Unchanged,
    Scrolled,
    Exit,
}

pub fn apply_command(viewport: &ViewportManager, command: DashboardCommand) -> CommandOutcome {
    let changed = match command {
        DashboardCommand::ScrollUp(lines) => viewport.scroll_up(lines),
        DashboardCommand::ScrollDown(lines) => viewport.scroll_down(lines),
        DashboardCommand::ScrollToTop => viewport.scroll_to_top(),
        DashboardCommand::ScrollToBottom => viewport.scroll_to_bottom(),
        DashboardCommand::ExitRequested => return CommandOutcome::Exit,
    };
    if changed {
        CommandOutcome::Scrolled
    } else {
        CommandOutcome::Unchanged
    }
}
