use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod directory;
pub mod fingerprint;
pub mod handler;
pub mod layout;
pub mod presence_ipc;
pub mod relative_time;
pub mod resilience;
pub mod roster;
pub mod scheduler;
pub mod store;
pub mod viewport;

pub const LOADING_TEXT: &str = "Loading...";
pub const LOADING_GAME_TEXT: &str = "Loading game name...";
pub const NO_FRIENDS_TEXT: &str = "No friends found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub u64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u32);

impl AppId {
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresenceState {
    #[default]
    Offline,
    Online,
    Busy,
    Away,
    Snooze,
    LookingToTrade,
    LookingToPlay,
    Invisible,
    Unknown,
}

impl PresenceState {
    /// Short label shown in status lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Offline => "Offline",
            PresenceState::Online => "Online",
            PresenceState::Busy => "Busy",
            PresenceState::Away => "Away",
            PresenceState::Snooze => "Snooze",
            PresenceState::LookingToTrade => "Trading",
            PresenceState::LookingToPlay => "Looking",
            PresenceState::Invisible => "Invisible",
            PresenceState::Unknown => "Unknown",
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            PresenceState::Offline => "offline",
            PresenceState::Online => "online",
            PresenceState::Busy => "busy",
            PresenceState::Away => "away",
            PresenceState::Snooze => "snooze",
            PresenceState::LookingToTrade => "looking_to_trade",
            PresenceState::LookingToPlay => "looking_to_play",
            PresenceState::Invisible => "invisible",
            PresenceState::Unknown => "unknown",
        }
    }

    /// Rank used by the roster order; lower sorts first.
    pub fn sort_rank(&self) -> u8 {
        match self {
            PresenceState::Online => 1,
            PresenceState::LookingToPlay => 2,
            PresenceState::LookingToTrade => 3,
            PresenceState::Away => 4,
            PresenceState::Busy => 5,
            PresenceState::Snooze => 6,
            PresenceState::Invisible => 7,
            PresenceState::Offline => 8,
            PresenceState::Unknown => 9,
        }
    }

    pub fn from_code(code: u64) -> Self {
        match code {
            0 => PresenceState::Offline,
            1 => PresenceState::Online,
            2 => PresenceState::Busy,
            3 => PresenceState::Away,
            4 => PresenceState::Snooze,
            5 => PresenceState::LookingToTrade,
            6 => PresenceState::LookingToPlay,
            7 => PresenceState::Invisible,
            _ => PresenceState::Unknown,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, PresenceState::Offline)
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown presence state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for PresenceState {
    type Err = ParseStateError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase().replace('-', "_");
        if let Ok(code) = normalized.parse::<u64>() {
            return Ok(PresenceState::from_code(code));
        }
        match normalized.as_str() {
            "offline" => Ok(PresenceState::Offline),
            "online" => Ok(PresenceState::Online),
            "busy" => Ok(PresenceState::Busy),
            "away" => Ok(PresenceState::Away),
            "snooze" => Ok(PresenceState::Snooze),
            "looking_to_trade" | "lookingtotrade" | "trading" => Ok(PresenceState::LookingToTrade),
            "looking_to_play" | "lookingtoplay" | "looking" => Ok(PresenceState::LookingToPlay),
            "invisible" => Ok(PresenceState::Invisible),
            "unknown" => Ok(PresenceState::Unknown),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

impl Serialize for PresenceState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> Deserialize<'de> for PresenceState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PresenceStateVisitor;

        impl<'de> Visitor<'de> for PresenceStateVisitor {
            type Value = PresenceState;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a presence state as string or integer code")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(PresenceState::from_code(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Ok(PresenceState::Unknown);
                }
                self.visit_u64(value as u64)
            }

            // Unrecognised names degrade to Unknown instead of failing the frame.
            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(value.parse().unwrap_or(PresenceState::Unknown))
            }
        }

        deserializer.deserialize_any(PresenceStateVisitor)
    }
}

/// Picks the presence state to trust for a contact.
///
/// A state carried by a signal whose status field is authoritative wins, then
/// the state previously tracked in the store, then whatever the network
/// client currently reports. Contacts with no information at all are shown
/// as offline.
pub fn resolve_presence(
    flagged: Option<PresenceState>,
    tracked: Option<PresenceState>,
    queried: Option<PresenceState>,
) -> PresenceState {
    flagged.or(tracked).or(queried).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    #[default]
    None,
    Blocked,
    RequestRecipient,
    Friend,
    RequestInitiator,
    Ignored,
    IgnoredFriend,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::None => "none",
            Relationship::Blocked => "blocked",
            Relationship::RequestRecipient => "request_recipient",
            Relationship::Friend => "friend",
            Relationship::RequestInitiator => "request_initiator",
            Relationship::Ignored => "ignored",
            Relationship::IgnoredFriend => "ignored_friend",
        }
    }

    pub fn is_friend(&self) -> bool {
        matches!(self, Relationship::Friend)
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw relationship data as exposed by the presence-network client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: ContactId,
    pub relationship: Relationship,
    #[serde(default)]
    pub name: Option<String>,
    /// State the client currently reports; may lag behind tracked signals.
    #[serde(default)]
    pub queried_state: Option<PresenceState>,
    /// Live "currently playing" name, when the client already knows it.
    #[serde(default)]
    pub playing_name: Option<String>,
    #[serde(default)]
    pub playing_app_id: Option<AppId>,
}

impl RelationshipRecord {
    pub fn friend(id: u64, name: &str) -> Self {
        Self {
            id: ContactId(id),
            relationship: Relationship::Friend,
            name: Some(name.to_string()),
            queried_state: None,
            playing_name: None,
            playing_app_id: None,
        }
    }

    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Friend {}", self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelationshipCounts {
    pub friends: usize,
    pub blocked: usize,
    pub pending: usize,
}

/// One roster entry. Rebuilt on every pass, never patched in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub state: PresenceState,
    /// Label used for grouping; empty when the contact is not in an activity.
    pub activity: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub status_text: String,
}

impl Contact {
    pub fn placeholder() -> Self {
        Self {
            id: ContactId(0),
            name: NO_FRIENDS_TEXT.to_string(),
            state: PresenceState::Offline,
            activity: String::new(),
            last_seen: None,
            status_text: String::new(),
        }
    }

    pub fn is_playing(&self) -> bool {
        !self.activity.is_empty()
    }

    pub fn is_offline_with_last_seen(&self) -> bool {
        self.state.is_offline() && self.last_seen.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_state_parses_names_and_codes() {
        assert_eq!("online".parse::<PresenceState>(), Ok(PresenceState::Online));
        assert_eq!(
            "Looking-To-Trade".parse::<PresenceState>(),
            Ok(PresenceState::LookingToTrade)
        );
        assert_eq!("6".parse::<PresenceState>(), Ok(PresenceState::LookingToPlay));
        assert!("sleepy".parse::<PresenceState>().is_err());
    }

    #[test]
    fn presence_state_deserializes_leniently() {
        let named: PresenceState = serde_json::from_str("\"busy\"").expect("named");
        assert_eq!(named, PresenceState::Busy);
        let coded: PresenceState = serde_json::from_str("3").expect("coded");
        assert_eq!(coded, PresenceState::Away);
        let strange: PresenceState = serde_json::from_str("\"dancing\"").expect("strange");
        assert_eq!(strange, PresenceState::Unknown);
        assert_eq!(
            serde_json::to_string(&PresenceState::LookingToPlay).expect("encode"),
            "\"looking_to_play\""
        );
    }

    #[test]
    fn sort_rank_follows_presence_priority() {
        let ordered = [
            PresenceState::Online,
            PresenceState::LookingToPlay,
            PresenceState::LookingToTrade,
            PresenceState::Away,
            PresenceState::Busy,
            PresenceState::Snooze,
            PresenceState::Invisible,
            PresenceState::Offline,
            PresenceState::Unknown,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].sort_rank() < pair[1].sort_rank(), "{pair:?}");
        }
    }

    #[test]
    fn resolve_presence_prefers_flagged_then_tracked_then_queried() {
        use PresenceState::*;
        assert_eq!(resolve_presence(Some(Busy), Some(Away), Some(Online)), Busy);
        assert_eq!(resolve_presence(None, Some(Away), Some(Online)), Away);
        assert_eq!(resolve_presence(None, None, Some(Online)), Online);
        assert_eq!(resolve_presence(None, None, None), Offline);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let mut record = RelationshipRecord::friend(77, "  ");
        assert_eq!(record.display_name(), "Friend 77");
        record.name = None;
        assert_eq!(record.display_name(), "Friend 77");
        record.name = Some("Gordon".to_string());
        assert_eq!(record.display_name(), "Gordon");
    }
}
