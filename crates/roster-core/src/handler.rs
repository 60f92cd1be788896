use crate::directory::{RecordPatch, RelationshipDirectory};
use crate::presence_ipc::{LogonResult, PersonaField, PersonaSignal};
use crate::resilience::ConnectionSupervisor;
use crate::roster::{ensure_app_lookup, AppInfoRequester};
use crate::scheduler::{RenderReason, RenderTrigger};
use crate::store::StateStore;
use crate::{resolve_presence, AppId, ContactId, PresenceState, RelationshipRecord, LOADING_TEXT};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogonOutcome {
    pub result: LogonResult,
    pub self_id: Option<ContactId>,
}

/// Signals delivered by the presence-network client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Connected,
    Disconnected,
    LoggedOn(LogonOutcome),
    LoggedOff { reason: Option<String> },
    AccountInfo { persona_name: String },
    PlayingSession { app_id: Option<AppId> },
    FriendsList {
        relationships: Vec<RelationshipRecord>,
        incremental: bool,
    },
    PersonaState(PersonaSignal),
    AppInfo(Vec<(AppId, String)>),
}

impl PresenceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PresenceEvent::Connected => "connected",
            PresenceEvent::Disconnected => "disconnected",
            PresenceEvent::LoggedOn(_) => "logged_on",
            PresenceEvent::LoggedOff { .. } => "logged_off",
            PresenceEvent::AccountInfo { .. } => "account_info",
            PresenceEvent::PlayingSession { .. } => "playing_session",
            PresenceEvent::FriendsList { .. } => "friends_list",
            PresenceEvent::PersonaState(_) => "persona_state",
            PresenceEvent::AppInfo(_) => "app_info",
        }
    }
}

/// What the caller should do after an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Continue,
    AuthenticationFailed,
    Shutdown,
}

/// Applies presence events to the shared state and requests renders.
pub struct PresenceHandler {
    store: Arc<StateStore>,
    directory: Arc<RelationshipDirectory>,
    supervisor: Arc<ConnectionSupervisor>,
    requester: Arc<dyn AppInfoRequester>,
    trigger: RenderTrigger,
    own_id: Mutex<Option<ContactId>>,
}

impl PresenceHandler {
    pub fn new(
        store: Arc<StateStore>,
        directory: Arc<RelationshipDirectory>,
        supervisor: Arc<ConnectionSupervisor>,
        requester: Arc<dyn AppInfoRequester>,
        trigger: RenderTrigger,
    ) -> Self {
        Self {
            store,
            directory,
            supervisor,
            requester,
            trigger,
            own_id: Mutex::new(None),
        }
    }

    fn own_id(&self) -> Option<ContactId> {
        *self.own_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_own_id(&self, id: Option<ContactId>) {
        *self.own_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    fn render_if_ready(&self, reason: RenderReason) {
        if self.store.friends_list_received() {
            self.trigger.request(reason);
        }
    }

    pub fn handle(&self, event: PresenceEvent) -> HandleOutcome {
        debug!(event = "presence_event", kind = event.kind());
        match event {
            PresenceEvent::Connected => {
                self.supervisor.on_connected();
                self.trigger.request(RenderReason::ConnectionChanged);
            }
            PresenceEvent::Disconnected => {
                self.supervisor.on_disconnected();
                self.trigger.request(RenderReason::ConnectionChanged);
            }
            PresenceEvent::LoggedOn(outcome) => return self.on_logged_on(outcome),
            PresenceEvent::LoggedOff { reason } => {
                info!(event = "logged_off", reason = reason.as_deref().unwrap_or("unspecified"));
                self.store.set_logged_in(false);
                return HandleOutcome::Shutdown;
            }
            PresenceEvent::AccountInfo { persona_name } => {
                self.store.set_self_name(persona_name);
                self.store.set_self_state(PresenceState::Online);
                self.store.set_self_playing(None, "");
                self.render_if_ready(RenderReason::PersonaChanged);
            }
            PresenceEvent::PlayingSession { app_id } => self.on_playing_session(app_id),
            PresenceEvent::FriendsList {
                relationships,
                incremental,
            } => {
                let count = relationships.len();
                self.directory.apply_list(relationships, incremental);
                self.store.mark_friends_list_received();
                info!(event = "friends_list", count, incremental);
                self.trigger.request(if incremental {
                    RenderReason::PersonaChanged
                } else {
                    RenderReason::RosterReplaced
                });
            }
            PresenceEvent::PersonaState(signal) => self.on_persona_state(signal),
            PresenceEvent::AppInfo(apps) => self.on_app_info(apps),
        }
        HandleOutcome::Continue
    }

    fn on_logged_on(&self, outcome: LogonOutcome) -> HandleOutcome {
        match outcome.result {
            LogonResult::Ok => {
                self.store.set_logged_in(true);
                self.set_own_id(outcome.self_id);
                info!(event = "logged_on", self_id = ?outcome.self_id.map(|id| id.0));
                self.trigger.request(RenderReason::ConnectionChanged);
                HandleOutcome::Continue
            }
            result if result.is_auth_failure() => {
                warn!(event = "authentication_failed", result = result.as_str());
                self.store.set_logged_in(false);
                self.directory.clear();
                self.store.clear_tracked_contacts();
                self.trigger.request(RenderReason::RosterReplaced);
                HandleOutcome::AuthenticationFailed
            }
            result => {
                error!(event = "logon_failed", result = result.as_str());
                HandleOutcome::Shutdown
            }
        }
    }

    fn on_playing_session(&self, app_id: Option<AppId>) {
        match app_id {
            None => self.store.set_self_playing(None, ""),
            Some(app_id) => match self.store.try_get_app_name(app_id) {
                Some(name) if !name.is_empty() => self.store.set_self_playing(Some(app_id), name),
                _ => {
                    self.store.set_self_playing(Some(app_id), LOADING_TEXT);
                    ensure_app_lookup(&self.store, self.requester.as_ref(), app_id);
                }
            },
        }
        self.render_if_ready(RenderReason::PersonaChanged);
    }

    fn on_persona_state(&self, signal: PersonaSignal) {
        if !self.store.friends_list_received() {
            debug!(event = "persona_ignored", reason = "no_friends_list", id = %signal.contact_id);
            return;
        }
        if self.own_id() == Some(signal.contact_id) {
            if self.store.set_self_state(signal.state) {
                self.trigger.request(RenderReason::PersonaChanged);
            }
            return;
        }

        let id = signal.contact_id;
        let Some(record) = self.directory.get(id) else {
            debug!(event = "persona_ignored", reason = "unknown_contact", id = %id);
            return;
        };
        if !record.relationship.is_friend() {
            return;
        }

        let status_flag = signal.flags.contains(PersonaField::Status);
        let game_flag = signal.flags.contains(PersonaField::GameExtraInfo);
        let name_flag = signal.flags.contains(PersonaField::PlayerName);

        self.directory.patch(
            id,
            RecordPatch {
                name: signal.name.clone().filter(|_| name_flag || record.name.is_none()),
                queried_state: Some(signal.state),
                playing: game_flag.then(|| (signal.app_id, signal.playing_name.clone())),
            },
        );

        let previous = self.store.try_get_persona_state(id);
        let tracked = resolve_presence(
            status_flag.then_some(signal.state),
            previous,
            Some(signal.state),
        );
        self.store.update_persona_state(id, tracked);
        if let Some(last_seen) = signal.last_seen {
            self.store.update_last_seen(id, last_seen);
        }

        if game_flag && signal.playing_name.as_deref().map_or(true, str::is_empty) {
            if let Some(app_id) = signal.app_id.filter(|app| !app.is_none()) {
                if self.store.try_get_app_name(app_id).is_none() {
                    ensure_app_lookup(&self.store, self.requester.as_ref(), app_id);
                }
            }
        }

        let state_changed = status_flag && previous != Some(tracked);
        if state_changed || game_flag || signal.last_seen.is_some() {
            debug!(
                event = "persona_changed",
                id = %id,
                state = tracked.as_str(),
                state_changed,
                game_flag
            );
            self.trigger.request(RenderReason::PersonaChanged);
        }
    }

    fn on_app_info(&self, apps: Vec<(AppId, String)>) {
        let mut resolved = 0usize;
        for (app_id, name) in apps {
            if name.is_empty() {
                continue;
            }
            self.store.resolve_self_activity(app_id, &name);
            self.store.update_app_name(app_id, name);
            resolved += 1;
        }
        if resolved > 0 {
            debug!(event = "app_info_resolved", resolved);
            self.render_if_ready(RenderReason::AppInfoResolved);
        }
    }
}
