use crate::handler::{LogonOutcome, PresenceEvent};
use crate::{AppId, ContactId, PresenceState, RelationshipRecord};
use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ProtocolVersionVisitor;

        impl<'de> Visitor<'de> for ProtocolVersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u16::try_from(value)
                    .map(ProtocolVersion)
                    .map_err(|_| E::custom(format!("protocol version out of range: {value}")))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!("negative protocol version: {value}")));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value.trim().trim_start_matches('v');
                cleaned
                    .parse::<u16>()
                    .map(ProtocolVersion)
                    .map_err(|err| E::custom(format!("invalid protocol version '{value}': {err}")))
            }
        }

        deserializer.deserialize_any(ProtocolVersionVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceEnvelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub sender_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub msg: PresenceMsg,
}

impl PresenceEnvelope {
    pub fn new(sender_id: impl Into<String>, msg: PresenceMsg) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            sender_id: sender_id.into(),
            timestamp: Some(Utc::now()),
            msg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PresenceMsg {
    Hello(HelloPayload),
    FriendsList(FriendsListPayload),
    PersonaState(PersonaSignal),
    AppInfo(AppInfoPayload),
    AccountInfo(AccountInfoPayload),
    PlayingSession(PlayingSessionPayload),
    LoggedOn(LoggedOnPayload),
    LoggedOff(LoggedOffPayload),
    AppInfoRequest(AppInfoRequestPayload),
}

impl PresenceMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            PresenceMsg::Hello(_) => "hello",
            PresenceMsg::FriendsList(_) => "friends_list",
            PresenceMsg::PersonaState(_) => "persona_state",
            PresenceMsg::AppInfo(_) => "app_info",
            PresenceMsg::AccountInfo(_) => "account_info",
            PresenceMsg::PlayingSession(_) => "playing_session",
            PresenceMsg::LoggedOn(_) => "logged_on",
            PresenceMsg::LoggedOff(_) => "logged_off",
            PresenceMsg::AppInfoRequest(_) => "app_info_request",
        }
    }

    /// Maps an inbound message to a handler event. Outbound-only messages
    /// yield `None`.
    pub fn into_event(self) -> Option<PresenceEvent> {
        match self {
            PresenceMsg::FriendsList(payload) => Some(PresenceEvent::FriendsList {
                relationships: payload.relationships,
                incremental: payload.incremental,
            }),
            PresenceMsg::PersonaState(signal) => Some(PresenceEvent::PersonaState(signal)),
            PresenceMsg::AppInfo(payload) => Some(PresenceEvent::AppInfo(
                payload
                    .apps
                    .into_iter()
                    .map(|entry| (entry.app_id, entry.name))
                    .collect(),
            )),
            PresenceMsg::AccountInfo(payload) => Some(PresenceEvent::AccountInfo {
                persona_name: payload.persona_name,
            }),
            PresenceMsg::PlayingSession(payload) => Some(PresenceEvent::PlayingSession {
                app_id: payload.app_id.filter(|id| !id.is_none()),
            }),
            PresenceMsg::LoggedOn(payload) => Some(PresenceEvent::LoggedOn(LogonOutcome {
                result: payload.result,
                self_id: payload.self_id,
            })),
            PresenceMsg::LoggedOff(payload) => Some(PresenceEvent::LoggedOff {
                reason: payload.reason,
            }),
            PresenceMsg::Hello(_) | PresenceMsg::AppInfoRequest(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloPayload {
    pub client_id: String,
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendsListPayload {
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub relationships: Vec<RelationshipRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PersonaField {
    Status,
    LastSeen,
    GameExtraInfo,
    PlayerName,
    #[serde(other)]
    Other,
}

/// Which fields of a persona signal are authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct PersonaFlags(pub Vec<PersonaField>);

impl PersonaFlags {
    pub fn contains(&self, field: PersonaField) -> bool {
        self.0.contains(&field)
    }

    pub fn with(mut self, field: PersonaField) -> Self {
        if !self.contains(field) {
            self.0.push(field);
        }
        self
    }
}

/// Per-contact presence change delivered by the network client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonaSignal {
    pub contact_id: ContactId,
    pub state: PresenceState,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub app_id: Option<AppId>,
    #[serde(default)]
    pub playing_name: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flags: PersonaFlags,
}

impl PersonaSignal {
    pub fn new(contact_id: u64, state: PresenceState) -> Self {
        Self {
            contact_id: ContactId(contact_id),
            state,
            name: None,
            app_id: None,
            playing_name: None,
            last_seen: None,
            flags: PersonaFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfoEntry {
    pub app_id: AppId,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfoPayload {
    #[serde(default)]
    pub apps: Vec<AppInfoEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountInfoPayload {
    pub persona_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayingSessionPayload {
    #[serde(default)]
    pub app_id: Option<AppId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogonResult {
    Ok,
    AccessDenied,
    InvalidLoginAuthCode,
    NeedTwoFactor,
    InvalidPassword,
    #[serde(other)]
    Failed,
}

impl LogonResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogonResult::Ok => "ok",
            LogonResult::AccessDenied => "access_denied",
            LogonResult::InvalidLoginAuthCode => "invalid_login_auth_code",
            LogonResult::NeedTwoFactor => "need_two_factor",
            LogonResult::InvalidPassword => "invalid_password",
            LogonResult::Failed => "failed",
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            LogonResult::AccessDenied
                | LogonResult::InvalidLoginAuthCode
                | LogonResult::NeedTwoFactor
                | LogonResult::InvalidPassword
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggedOnPayload {
    pub result: LogonResult,
    #[serde(default)]
    pub self_id: Option<ContactId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggedOffPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfoRequestPayload {
    pub app_ids: Vec<AppId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("no newline within {max} bytes; dropped {size} buffered bytes")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("line {line}: not a presence frame: {reason}")]
    Malformed { line: u64, reason: String },
    #[error("line {line}: bad `{kind}` payload: {reason}")]
    Payload {
        line: u64,
        kind: String,
        reason: String,
    },
    #[error("line {line}: `{kind}` uses unsupported protocol v{version}")]
    UnsupportedVersion { line: u64, kind: String, version: u16 },
}

impl FrameError {
    /// Message type of the rejected frame, when it could be read.
    pub fn kind(&self) -> Option<&str> {
        match self {
            FrameError::Payload { kind, .. } | FrameError::UnsupportedVersion { kind, .. } => {
                Some(kind)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub frames: Vec<PresenceEnvelope>,
    pub errors: Vec<FrameError>,
}

pub fn encode_frame(envelope: &PresenceEnvelope, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(envelope).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

/// Reads presence envelopes from a byte stream, one JSON object per line.
/// A rejected line is reported with its line number and skipped.
pub struct PresenceFrameDecoder {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    line: u64,
}

impl Default for PresenceFrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl PresenceFrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            line: 0,
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport {
        let mut report = DecodeReport::default();
        self.pending.extend_from_slice(chunk);

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline_idx).collect();
            self.decode_line(&line, &mut report);
        }

        if self.pending.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
        }
        report
    }

    /// Decodes a final unterminated line once the stream has ended.
    pub fn finish(&mut self) -> DecodeReport {
        let mut report = DecodeReport::default();
        let rest = std::mem::take(&mut self.pending);
        self.decode_line(&rest, &mut report);
        report
    }

    fn decode_line(&mut self, raw: &[u8], report: &mut DecodeReport) {
        let line = trim_line(raw);
        if line.is_empty() {
            return;
        }
        self.line += 1;
        if line.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedFrame {
                size: line.len(),
                max: self.max_frame_bytes,
            });
            return;
        }
        match serde_json::from_slice::<PresenceEnvelope>(line) {
            Ok(envelope) if envelope.version.0 > CURRENT_PROTOCOL_VERSION => {
                report.errors.push(FrameError::UnsupportedVersion {
                    line: self.line,
                    kind: envelope.msg.kind().to_string(),
                    version: envelope.version.0,
                });
            }
            Ok(envelope) => report.frames.push(envelope),
            Err(err) => report.errors.push(self.classify(line, err)),
        }
    }

    fn classify(&self, line: &[u8], err: serde_json::Error) -> FrameError {
        let kind = serde_json::from_slice::<serde_json::Value>(line)
            .ok()
            .and_then(|value| value.get("type")?.as_str().map(str::to_string));
        match kind {
            Some(kind) => FrameError::Payload {
                line: self.line,
                kind,
                reason: err.to_string(),
            },
            None => FrameError::Malformed {
                line: self.line,
                reason: err.to_string(),
            },
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Relationship;

    fn persona_envelope() -> PresenceEnvelope {
        let mut signal = PersonaSignal::new(76561197960287930, PresenceState::Online);
        signal.app_id = Some(AppId(570));
        signal.flags = PersonaFlags::default()
            .with(PersonaField::Status)
            .with(PersonaField::GameExtraInfo);
        PresenceEnvelope {
            version: ProtocolVersion::CURRENT,
            sender_id: "bridge".to_string(),
            timestamp: None,
            msg: PresenceMsg::PersonaState(signal),
        }
    }

    #[test]
    fn persona_frame_survives_encode_and_decode() {
        let envelope = persona_envelope();
        let bytes = encode_frame(&envelope, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        assert!(bytes.ends_with(b"\n"));

        let mut decoder = PresenceFrameDecoder::default();
        let report = decoder.push_chunk(&bytes);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.frames, vec![envelope]);
    }

    #[test]
    fn bridge_json_maps_to_events() {
        let raw = r#"{"version":1,"sender_id":"bridge","type":"friends_list","payload":{"relationships":[{"id":5,"relationship":"friend","name":"Alyx","queried_state":"snooze"},{"id":6,"relationship":"request_recipient"}]}}"#;
        let envelope: PresenceEnvelope = serde_json::from_str(raw).expect("parse");
        match envelope.msg.into_event() {
            Some(PresenceEvent::FriendsList {
                relationships,
                incremental,
            }) => {
                assert!(!incremental);
                assert_eq!(relationships.len(), 2);
                assert_eq!(relationships[0].queried_state, Some(PresenceState::Snooze));
                assert_eq!(relationships[1].relationship, Relationship::RequestRecipient);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_logon_results_fall_back_to_failed() {
        let raw = r#"{"sender_id":"bridge","type":"logged_on","payload":{"result":"service_unavailable"}}"#;
        let envelope: PresenceEnvelope = serde_json::from_str(raw).expect("parse");
        assert_eq!(envelope.version, ProtocolVersion::CURRENT);
        match envelope.msg {
            PresenceMsg::LoggedOn(payload) => {
                assert_eq!(payload.result, LogonResult::Failed);
                assert!(!payload.result.is_auth_failure());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn outbound_messages_have_no_event() {
        let request = PresenceMsg::AppInfoRequest(AppInfoRequestPayload {
            app_ids: vec![AppId(10)],
        });
        assert_eq!(request.kind(), "app_info_request");
        assert!(request.into_event().is_none());
    }

    #[test]
    fn decoder_recovers_after_malformed_line() {
        let valid = encode_frame(&persona_envelope(), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let mut chunk = b"{\"type\":\"persona_state\"\n".to_vec();
        chunk.extend_from_slice(&valid);

        let mut decoder = PresenceFrameDecoder::default();
        let report = decoder.push_chunk(&chunk);
        assert_eq!(report.frames.len(), 1);
        assert!(matches!(
            report.errors.as_slice(),
            [FrameError::Malformed { line: 1, .. }]
        ));
    }

    #[test]
    fn rejected_frames_name_their_message_kind() {
        let mut chunk = b"{\"sender_id\":\"bridge\",\"type\":\"persona_state\",\"payload\":{\"state\":\"online\"}}\n".to_vec();
        chunk.extend_from_slice(
            b"{\"version\":9,\"sender_id\":\"bridge\",\"type\":\"logged_off\",\"payload\":{}}\n",
        );
        chunk.extend_from_slice(b"[1,2]\n");

        let mut decoder = PresenceFrameDecoder::default();
        let report = decoder.push_chunk(&chunk);
        assert!(report.frames.is_empty());
        let kinds: Vec<Option<&str>> = report.errors.iter().map(FrameError::kind).collect();
        assert_eq!(kinds, vec![Some("persona_state"), Some("logged_off"), None]);
        assert!(matches!(
            &report.errors[1],
            FrameError::UnsupportedVersion { line: 2, version: 9, .. }
        ));
        assert!(matches!(&report.errors[2], FrameError::Malformed { line: 3, .. }));
    }

    #[test]
    fn decoder_handles_split_chunks_and_trailing_frame() {
        let valid = encode_frame(&persona_envelope(), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let (head, tail) = valid.split_at(valid.len() / 2);

        let mut decoder = PresenceFrameDecoder::default();
        assert!(decoder.push_chunk(head).frames.is_empty());
        assert_eq!(decoder.push_chunk(tail).frames.len(), 1);

        let without_newline = &valid[..valid.len() - 1];
        assert!(decoder.push_chunk(without_newline).frames.is_empty());
        assert_eq!(decoder.finish().frames.len(), 1);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut envelope = persona_envelope();
        if let PresenceMsg::PersonaState(signal) = &mut envelope.msg {
            signal.name = Some("x".repeat(256));
        }
        assert!(matches!(
            encode_frame(&envelope, 64),
            Err(FrameError::OversizedFrame { .. })
        ));

        let mut decoder = PresenceFrameDecoder::new(32);
        let report = decoder.push_chunk(&[b'x'; 64]);
        assert!(matches!(
            report.errors.as_slice(),
            [FrameError::OversizedBuffer { .. }]
        ));
    }

    #[test]
    fn version_accepts_string_and_number() {
        let from_string: ProtocolVersion = serde_json::from_str("\"v1\"").expect("string");
        let from_number: ProtocolVersion = serde_json::from_str("1").expect("number");
        assert_eq!(from_string, ProtocolVersion(1));
        assert_eq!(from_number, ProtocolVersion(1));
        assert!(serde_json::from_str::<ProtocolVersion>("-1").is_err());
    }
}
