use crate::relative_time::last_online_text;
use crate::store::StateStore;
use crate::{
    resolve_presence, AppId, Contact, PresenceState, Relationship, RelationshipCounts,
    RelationshipRecord, LOADING_GAME_TEXT, LOADING_TEXT,
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::debug;

/// Outbound request to resolve an application id into a display name.
pub trait AppInfoRequester: Send + Sync {
    fn request_app_info(&self, app_id: AppId);
}

/// Issues a lookup for `app_id` unless one is already pending or resolved.
pub fn ensure_app_lookup(store: &StateStore, requester: &dyn AppInfoRequester, app_id: AppId) {
    if app_id.is_none() {
        return;
    }
    if store.begin_app_lookup(app_id) {
        debug!(event = "app_info_requested", app_id = %app_id);
        requester.request_app_info(app_id);
    }
}

pub fn count_relationships(records: &[RelationshipRecord]) -> RelationshipCounts {
    records
        .iter()
        .fold(RelationshipCounts::default(), |mut counts, record| {
            match record.relationship {
                Relationship::Friend => counts.friends += 1,
                Relationship::Blocked | Relationship::Ignored | Relationship::IgnoredFriend => {
                    counts.blocked += 1
                }
                Relationship::RequestRecipient | Relationship::RequestInitiator => {
                    counts.pending += 1
                }
                Relationship::None => {}
            }
            counts
        })
}

pub fn build(
    records: &[RelationshipRecord],
    store: &StateStore,
    requester: &dyn AppInfoRequester,
) -> Vec<Contact> {
    build_at(records, store, requester, Utc::now())
}

/// Builds the ordered roster from relationship data plus tracked state.
///
/// Never fails: missing names, unknown ids and unresolved game names all
/// degrade to placeholder text. An empty friend set yields a single
/// placeholder entry.
pub fn build_at(
    records: &[RelationshipRecord],
    store: &StateStore,
    requester: &dyn AppInfoRequester,
    now: DateTime<Utc>,
) -> Vec<Contact> {
    let mut contacts: Vec<Contact> = records
        .iter()
        .filter(|record| record.relationship.is_friend())
        .map(|record| build_contact(record, store, requester, now))
        .collect();

    if contacts.is_empty() {
        return vec![Contact::placeholder()];
    }
    sort_contacts(&mut contacts);
    contacts
}

fn build_contact(
    record: &RelationshipRecord,
    store: &StateStore,
    requester: &dyn AppInfoRequester,
    now: DateTime<Utc>,
) -> Contact {
    let state = resolve_presence(None, store.try_get_persona_state(record.id), record.queried_state);
    let last_seen = store.try_get_last_seen(record.id);

    let (activity, status_text) = if state.is_offline() {
        let status = match last_seen {
            Some(seen) => last_online_text(seen, now),
            None => state.as_str().to_string(),
        };
        (String::new(), status)
    } else {
        activity_for(record, state, store, requester)
    };

    Contact {
        id: record.id,
        name: record.display_name(),
        state,
        activity,
        last_seen,
        status_text,
    }
}

fn activity_for(
    record: &RelationshipRecord,
    state: PresenceState,
    store: &StateStore,
    requester: &dyn AppInfoRequester,
) -> (String, String) {
    if let Some(live) = record.playing_name.as_deref().filter(|name| !name.is_empty()) {
        return (live.to_string(), format!("{state} - {live}"));
    }
    let Some(app_id) = record.playing_app_id.filter(|id| !id.is_none()) else {
        return (String::new(), state.as_str().to_string());
    };
    match store.try_get_app_name(app_id) {
        Some(name) if !name.is_empty() => {
            let status = format!("{state} - {name}");
            (name, status)
        }
        _ => {
            ensure_app_lookup(store, requester, app_id);
            (
                LOADING_TEXT.to_string(),
                format!("{state} - {LOADING_GAME_TEXT}"),
            )
        }
    }
}

fn cmp_ignore_case(left: &str, right: &str) -> Ordering {
    left.chars()
        .flat_map(char::to_lowercase)
        .cmp(right.chars().flat_map(char::to_lowercase))
}

/// Total order over roster entries.
///
/// Contacts in an activity come first, grouped by activity label, then by
/// presence rank, then most recently seen. Name and id break the remaining
/// ties so equal inputs always produce the same order.
pub fn compare_contacts(left: &Contact, right: &Contact) -> Ordering {
    left.activity
        .is_empty()
        .cmp(&right.activity.is_empty())
        .then_with(|| cmp_ignore_case(&left.activity, &right.activity))
        .then_with(|| left.activity.cmp(&right.activity))
        .then_with(|| left.state.sort_rank().cmp(&right.state.sort_rank()))
        .then_with(|| right.last_seen.cmp(&left.last_seen))
        .then_with(|| cmp_ignore_case(&left.name, &right.name))
        .then_with(|| left.id.cmp(&right.id))
}

pub fn sort_contacts(contacts: &mut [Contact]) {
    contacts.sort_by(compare_contacts);
}
