use crate::{AppId, ContactId, RelationshipRecord};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mirror of the relationship list held by the presence-network client.
///
/// Replaced wholesale when a friends list arrives and patched by persona
/// signals. The roster builder reads snapshots of it.
#[derive(Debug, Default)]
pub struct RelationshipDirectory {
    records: Mutex<BTreeMap<ContactId, RelationshipRecord>>,
}

/// Fields a persona signal may patch on a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub name: Option<String>,
    pub queried_state: Option<crate::PresenceState>,
    pub playing: Option<(Option<AppId>, Option<String>)>,
}

impl RelationshipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ContactId, RelationshipRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges a relationship list. With `incremental` false the list replaces
    /// every known record.
    pub fn apply_list(&self, records: Vec<RelationshipRecord>, incremental: bool) {
        let mut guard = self.lock();
        if !incremental {
            guard.clear();
        }
        for record in records {
            match record.relationship {
                crate::Relationship::None => {
                    guard.remove(&record.id);
                }
                _ => {
                    guard.insert(record.id, record);
                }
            }
        }
    }

    pub fn get(&self, id: ContactId) -> Option<RelationshipRecord> {
        self.lock().get(&id).cloned()
    }

    pub fn snapshot(&self) -> Vec<RelationshipRecord> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns false when the contact is unknown.
    pub fn patch(&self, id: ContactId, patch: RecordPatch) -> bool {
        let mut guard = self.lock();
        let Some(record) = guard.get_mut(&id) else {
            return false;
        };
        if let Some(name) = patch.name.filter(|name| !name.trim().is_empty()) {
            record.name = Some(name);
        }
        if let Some(state) = patch.queried_state {
            record.queried_state = Some(state);
        }
        if let Some((app_id, playing_name)) = patch.playing {
            record.playing_app_id = app_id.filter(|id| !id.is_none());
            record.playing_name = playing_name.filter(|name| !name.is_empty());
        }
        true
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
