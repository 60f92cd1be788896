use crate::fingerprint::disconnection_fingerprint;
use crate::store::{SelfPresence, StateStore};
use crate::viewport::ViewportSnapshot;
use crate::{Contact, ContactId, PresenceState, RelationshipCounts, LOADING_TEXT};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    pub self_name: String,
    pub self_status: String,
    pub self_state: PresenceState,
    pub counts: RelationshipCounts,
    pub banner: Option<String>,
}

/// One visible roster entry; rendered as a label line and a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterLine {
    pub id: ContactId,
    pub name: String,
    pub status: String,
    pub state: PresenceState,
    pub playing: bool,
}

impl From<&Contact> for RosterLine {
    fn from(contact: &Contact) -> Self {
        Self {
            id: contact.id,
            name: contact.name.clone(),
            status: contact.status_text.clone(),
            state: contact.state,
            playing: contact.is_playing(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardFrame {
    pub header: HeaderBlock,
    pub entries: Vec<RosterLine>,
    pub scroll_indicator: Option<String>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("terminal too small: {rows} rows, need at least {required}")]
    Undersized { rows: u16, required: u16 },
    #[error("terminal write failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Io(err.to_string())
    }
}

pub fn self_status_line(presence: &SelfPresence) -> String {
    if presence.activity.is_empty() {
        presence.state.as_str().to_string()
    } else {
        format!("{} - {}", presence.state, presence.activity)
    }
}

pub fn header_block(
    store: &StateStore,
    counts: RelationshipCounts,
    now: DateTime<Utc>,
) -> HeaderBlock {
    let presence = store.self_presence();
    let self_name = if presence.name.trim().is_empty() {
        LOADING_TEXT.to_string()
    } else {
        presence.name.clone()
    };
    HeaderBlock {
        self_name,
        self_status: self_status_line(&presence),
        self_state: presence.state,
        counts,
        banner: disconnection_fingerprint(store, now),
    }
}

/// "{first}-{last} of {total}" with a 1-based first row, only when the
/// roster does not fit.
pub fn scroll_indicator(view: &ViewportSnapshot) -> Option<String> {
    if !view.overflows() {
        return None;
    }
    let (start, end) = view.visible_range();
    Some(format!("{}-{} of {}", start + 1, end, view.total))
}

pub fn compose_frame(
    store: &StateStore,
    counts: RelationshipCounts,
    contacts: &[Contact],
    view: ViewportSnapshot,
    now: DateTime<Utc>,
) -> DashboardFrame {
    let (start, end) = view.visible_range();
    let end = end.min(contacts.len());
    let entries = contacts
        .get(start.min(end)..end)
        .unwrap_or_default()
        .iter()
        .map(RosterLine::from)
        .collect();
    DashboardFrame {
        header: header_block(store, counts, now),
        entries,
        scroll_indicator: scroll_indicator(&view),
        total: contacts.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::ViewportManager;
    use crate::AppId;

    fn contacts(count: u64) -> Vec<Contact> {
        (1..=count)
            .map(|id| Contact {
                id: ContactId(id),
                name: format!("friend-{id:02}"),
                state: PresenceState::Online,
                activity: String::new(),
                last_seen: None,
                status_text: "Online".to_string(),
            })
            .collect()
    }

    #[test]
    fn frame_slices_visible_window() {
        let store = StateStore::new();
        store.set_connected(true);
        let roster = contacts(12);
        let viewport = ViewportManager::new();
        viewport.update_counts(roster.len(), 5, false);
        viewport.scroll_down(3);

        let frame = compose_frame(
            &store,
            RelationshipCounts::default(),
            &roster,
            viewport.snapshot(),
            Utc::now(),
        );
        let ids: Vec<u64> = frame.entries.iter().map(|line| line.id.0).collect();
        assert_eq!(ids, vec![4, 5, 6, 7, 8]);
        assert_eq!(frame.scroll_indicator.as_deref(), Some("4-8 of 12"));
        assert_eq!(frame.total, 12);
        assert_eq!(frame.header.banner, None);
    }

    #[test]
    fn indicator_hidden_when_roster_fits() {
        let viewport = ViewportManager::new();
        viewport.update_counts(4, 9, false);
        assert_eq!(scroll_indicator(&viewport.snapshot()), None);
    }

    #[test]
    fn header_reflects_self_presence_and_connection() {
        let store = StateStore::new();
        let now = Utc::now();
        let header = header_block(&store, RelationshipCounts::default(), now);
        assert_eq!(header.self_name, LOADING_TEXT);
        assert_eq!(header.self_status, "Online");
        assert_eq!(header.banner.as_deref(), Some("Steam Disconnected"));

        store.set_self_name("Freeman");
        store.set_self_playing(Some(AppId(70)), "Half-Life");
        store.set_connected_at(false, now);
        let header = header_block(&store, RelationshipCounts::default(), now);
        assert_eq!(header.self_name, "Freeman");
        assert_eq!(header.self_status, "Online - Half-Life");
        assert_eq!(header.banner.as_deref(), Some("Disconnected moments ago"));
    }
}
