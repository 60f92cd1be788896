use crate::relative_time::{disconnection_banner, time_ago_since};
use crate::store::StateStore;
use crate::{Contact, ContactId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The time-derived text of one rendered frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    disconnection: Option<String>,
    offline_phrases: HashMap<ContactId, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshDecision {
    pub refresh: bool,
    pub reasons: Vec<String>,
}

/// Tracks the time-derived text last drawn so periodic ticks only redraw
/// when a visible phrase would change. Nothing is recorded until a pass
/// commits the fingerprint it actually rendered.
#[derive(Debug, Default)]
pub struct FingerprintTracker {
    rendered: Mutex<Fingerprint>,
}

pub fn disconnection_fingerprint(store: &StateStore, now: DateTime<Utc>) -> Option<String> {
    if store.is_connected() {
        return None;
    }
    Some(disconnection_banner(store.time_since_disconnection_at(now)))
}

impl FingerprintTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Fingerprint> {
        self.rendered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compares the current phrases with the last committed ones. The cache
    /// is left untouched; pass the fingerprint to [`commit`](Self::commit)
    /// once the frame is on screen.
    pub fn evaluate_at(
        &self,
        store: &StateStore,
        contacts: &[Contact],
        now: DateTime<Utc>,
    ) -> (RefreshDecision, Fingerprint) {
        let rendered = self.lock();
        let mut reasons = Vec::new();

        let disconnection = disconnection_fingerprint(store, now);
        if disconnection != rendered.disconnection {
            reasons.push(match &disconnection {
                Some(text) => format!("connection banner: {text}"),
                None => "connection restored".to_string(),
            });
        }

        let mut offline_phrases = HashMap::new();
        for contact in contacts {
            let Some(last_seen) = contact.last_seen.filter(|_| contact.state.is_offline()) else {
                continue;
            };
            let phrase = time_ago_since(last_seen, now);
            match rendered.offline_phrases.get(&contact.id) {
                None => reasons.push(format!("{} went offline", contact.id)),
                Some(previous) if *previous != phrase => {
                    reasons.push(format!("{} last seen {phrase}", contact.id))
                }
                Some(_) => {}
            }
            offline_phrases.insert(contact.id, phrase);
        }

        let decision = RefreshDecision {
            refresh: !reasons.is_empty(),
            reasons,
        };
        (
            decision,
            Fingerprint {
                disconnection,
                offline_phrases,
            },
        )
    }

    pub fn commit(&self, fingerprint: Fingerprint) {
        *self.lock() = fingerprint;
    }

    pub fn should_refresh(&self, store: &StateStore, contacts: &[Contact]) -> RefreshDecision {
        self.should_refresh_at(store, contacts, Utc::now())
    }

    /// Evaluates and commits in one step.
    pub fn should_refresh_at(
        &self,
        store: &StateStore,
        contacts: &[Contact],
        now: DateTime<Utc>,
    ) -> RefreshDecision {
        let (decision, fingerprint) = self.evaluate_at(store, contacts, now);
        self.commit(fingerprint);
        decision
    }

    pub fn tracked_offline(&self) -> usize {
        self.lock().offline_phrases.len()
    }
}
