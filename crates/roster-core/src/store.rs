use crate::{AppId, ContactId, PresenceState};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Lookup state of an application name.
///
/// A missing entry means the name was never requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppNameEntry {
    Pending,
    Resolved(String),
}

impl AppNameEntry {
    pub fn resolved(&self) -> Option<&str> {
        match self {
            AppNameEntry::Resolved(name) => Some(name.as_str()),
            AppNameEntry::Pending => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfPresence {
    pub name: String,
    pub state: PresenceState,
    pub playing_app: Option<AppId>,
    pub activity: String,
}

impl Default for SelfPresence {
    fn default() -> Self {
        Self {
            name: String::new(),
            state: PresenceState::Online,
            playing_app: None,
            activity: String::new(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    persona_states: HashMap<ContactId, PresenceState>,
    last_seen: HashMap<ContactId, DateTime<Utc>>,
    app_names: HashMap<AppId, AppNameEntry>,
    connected: bool,
    logged_in: bool,
    disconnected_at: Option<DateTime<Utc>>,
    friends_list_received: bool,
    self_presence: SelfPresence,
}

/// Process-wide state shared by the event handler, the roster builder and
/// the render passes. Every operation is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<StoreInner>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_persona_state(&self, id: ContactId, state: PresenceState) {
        self.lock().persona_states.insert(id, state);
    }

    pub fn try_get_persona_state(&self, id: ContactId) -> Option<PresenceState> {
        self.lock().persona_states.get(&id).copied()
    }

    pub fn update_last_seen(&self, id: ContactId, at: DateTime<Utc>) {
        self.lock().last_seen.insert(id, at);
    }

    pub fn try_get_last_seen(&self, id: ContactId) -> Option<DateTime<Utc>> {
        self.lock().last_seen.get(&id).copied()
    }

    pub fn update_app_name(&self, app_id: AppId, name: impl Into<String>) {
        self.lock()
            .app_names
            .insert(app_id, AppNameEntry::Resolved(name.into()));
    }

    /// Returns the resolved name only; pending lookups yield `None`.
    pub fn try_get_app_name(&self, app_id: AppId) -> Option<String> {
        self.lock()
            .app_names
            .get(&app_id)
            .and_then(|entry| entry.resolved().map(str::to_string))
    }

    pub fn app_name_entry(&self, app_id: AppId) -> Option<AppNameEntry> {
        self.lock().app_names.get(&app_id).cloned()
    }

    /// True when a lookup is pending or a name is already known.
    pub fn contains_app(&self, app_id: AppId) -> bool {
        self.lock().app_names.contains_key(&app_id)
    }

    /// Marks an app as pending if nothing is known about it yet.
    ///
    /// Returns true when the caller should issue the lookup; at most one
    /// caller wins per app id.
    pub fn begin_app_lookup(&self, app_id: AppId) -> bool {
        let mut inner = self.lock();
        if inner.app_names.contains_key(&app_id) {
            return false;
        }
        inner.app_names.insert(app_id, AppNameEntry::Pending);
        true
    }

    pub fn set_connected(&self, connected: bool) {
        self.set_connected_at(connected, Utc::now());
    }

    pub fn set_connected_at(&self, connected: bool, now: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.connected = connected;
        if connected {
            inner.disconnected_at = None;
        } else {
            inner.logged_in = false;
            if inner.disconnected_at.is_none() {
                inner.disconnected_at = Some(now);
                debug!(event = "store_disconnected", at = %now);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.lock().logged_in = logged_in;
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock().logged_in
    }

    pub fn disconnected_at(&self) -> Option<DateTime<Utc>> {
        self.lock().disconnected_at
    }

    pub fn time_since_disconnection(&self) -> Option<Duration> {
        self.time_since_disconnection_at(Utc::now())
    }

    pub fn time_since_disconnection_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let inner = self.lock();
        if inner.connected {
            return None;
        }
        inner
            .disconnected_at
            .map(|at| (now - at).max(Duration::zero()))
    }

    pub fn mark_friends_list_received(&self) {
        self.lock().friends_list_received = true;
    }

    pub fn friends_list_received(&self) -> bool {
        self.lock().friends_list_received
    }

    pub fn self_presence(&self) -> SelfPresence {
        self.lock().self_presence.clone()
    }

    pub fn set_self_name(&self, name: impl Into<String>) {
        self.lock().self_presence.name = name.into();
    }

    /// Returns true when the state actually changed.
    pub fn set_self_state(&self, state: PresenceState) -> bool {
        let mut inner = self.lock();
        if inner.self_presence.state == state {
            return false;
        }
        inner.self_presence.state = state;
        true
    }

    pub fn set_self_playing(&self, app_id: Option<AppId>, activity: impl Into<String>) {
        let mut inner = self.lock();
        inner.self_presence.playing_app = app_id.filter(|id| !id.is_none());
        inner.self_presence.activity = activity.into();
    }

    /// Refreshes the self activity label when the named app is the one being played.
    pub fn resolve_self_activity(&self, app_id: AppId, name: &str) -> bool {
        let mut inner = self.lock();
        if inner.self_presence.playing_app != Some(app_id) || inner.self_presence.activity == name {
            return false;
        }
        inner.self_presence.activity = name.to_string();
        true
    }

    /// Drops tracked contact presence, used when the session is torn down.
    pub fn clear_tracked_contacts(&self) {
        let mut inner = self.lock();
        inner.persona_states.clear();
        inner.last_seen.clear();
        inner.friends_list_received = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn reconnect_clears_disconnection_timestamp() {
        let store = StateStore::new();
        store.set_connected_at(true, at(0));
        store.set_connected_at(false, at(1));
        assert_eq!(store.disconnected_at(), Some(at(1)));
        store.set_connected_at(true, at(2));
        assert_eq!(store.disconnected_at(), None);
        store.set_connected_at(true, at(3));
        assert_eq!(store.time_since_disconnection_at(at(4)), None);
    }

    #[test]
    fn repeated_disconnect_keeps_first_timestamp() {
        let store = StateStore::new();
        store.set_logged_in(true);
        store.set_connected_at(false, at(5));
        store.set_connected_at(false, at(9));
        assert_eq!(store.disconnected_at(), Some(at(5)));
        assert!(!store.is_logged_in());
        assert_eq!(
            store.time_since_disconnection_at(at(15)),
            Some(Duration::minutes(10))
        );
    }

    #[test]
    fn app_lookup_is_claimed_once() {
        let store = StateStore::new();
        let app = AppId(440);
        assert!(!store.contains_app(app));
        assert!(store.begin_app_lookup(app));
        assert!(!store.begin_app_lookup(app));
        assert_eq!(store.app_name_entry(app), Some(AppNameEntry::Pending));
        assert_eq!(store.try_get_app_name(app), None);

        store.update_app_name(app, "Team Fortress 2");
        assert_eq!(store.try_get_app_name(app).as_deref(), Some("Team Fortress 2"));
        assert!(!store.begin_app_lookup(app));
    }

    #[test]
    fn concurrent_lookups_have_single_winner() {
        let store = Arc::new(StateStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.begin_app_lookup(AppId(730)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn self_state_reports_changes_only() {
        let store = StateStore::new();
        assert_eq!(store.self_presence().state, PresenceState::Online);
        assert!(!store.set_self_state(PresenceState::Online));
        assert!(store.set_self_state(PresenceState::Away));
        assert!(!store.set_self_state(PresenceState::Away));
    }

    #[test]
    fn self_activity_resolves_for_current_app_only() {
        let store = StateStore::new();
        store.set_self_playing(Some(AppId(10)), crate::LOADING_TEXT);
        assert!(!store.resolve_self_activity(AppId(20), "Other"));
        assert!(store.resolve_self_activity(AppId(10), "Counter-Strike"));
        assert_eq!(store.self_presence().activity, "Counter-Strike");

        store.set_self_playing(Some(AppId(0)), "");
        assert_eq!(store.self_presence().playing_app, None);
    }

    #[test]
    fn clearing_tracked_contacts_keeps_app_names() {
        let store = StateStore::new();
        store.update_persona_state(ContactId(1), PresenceState::Online);
        store.update_last_seen(ContactId(1), at(0));
        store.update_app_name(AppId(1), "Game");
        store.mark_friends_list_received();

        store.clear_tracked_contacts();
        assert_eq!(store.try_get_persona_state(ContactId(1)), None);
        assert_eq!(store.try_get_last_seen(ContactId(1)), None);
        assert!(!store.friends_list_received());
        assert!(store.contains_app(AppId(1)));
    }
}
