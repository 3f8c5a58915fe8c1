use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// One structured control message. Serialized as a JSON object whose `type`
/// field selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    // Outbound control
    #[serde(rename_all = "camelCase")]
    SessionAuth { participant_id: String, token: String },
    #[serde(rename_all = "camelCase")]
    Connect { target_user_id: String },
    Disconnect,

    // Relay notifications
    ConnectionInfo { message: String },
    UserListUpdate { users: Vec<UserEntry> },
    #[serde(rename_all = "camelCase")]
    ConnectAccepted { with_user_id: String },
    #[serde(rename_all = "camelCase")]
    ConnectRejected { with_user_id: String },
    #[serde(rename_all = "camelCase")]
    Disconnected { user_id: String },

    // File transfer, both directions. The sender fills `target_user_id`, the
    // relay stamps `from_user_id` when forwarding to the receiver.
    #[serde(rename_all = "camelCase")]
    FileSendBegin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_user_id: Option<String>,
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    FileSendComplete {
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Unstructured control lines from the older line protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacySignal {
    Ready,
    Failed(String),
}

/// Result of interpreting one inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Envelope(Envelope),
    /// Well-formed envelope with a `type` this client does not know.
    Unknown(String),
    Legacy(LegacySignal),
}

const KNOWN_TYPES: &[&str] = &[
    "session_auth",
    "connect",
    "disconnect",
    "connection_info",
    "user_list_update",
    "connect_accepted",
    "connect_rejected",
    "disconnected",
    "file_send_begin",
    "file_send_complete",
];

const READY_SIGNALS: &[&str] = &["file_receive_ready", "ready"];
const FAILED_PREFIXES: &[&str] = &["file_failed", "failed"];

impl Envelope {
    pub fn session_auth(participant_id: &str, token: &str) -> Self {
        Self::SessionAuth {
            participant_id: participant_id.to_string(),
            token: token.to_string(),
        }
    }

    pub fn connect(target_user_id: &str) -> Self {
        Self::Connect {
            target_user_id: target_user_id.to_string(),
        }
    }

    pub fn file_send_begin(target_user_id: &str, file_name: &str, file_size: u64) -> Self {
        Self::FileSendBegin {
            target_user_id: Some(target_user_id.to_string()),
            from_user_id: None,
            file_name: file_name.to_string(),
            file_size: Some(file_size),
        }
    }

    pub fn file_send_complete(target_user_id: &str, file_name: &str) -> Self {
        Self::FileSendComplete {
            file_name: file_name.to_string(),
            target_user_id: Some(target_user_id.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::SessionAuth { .. } => "session_auth",
            Envelope::Connect { .. } => "connect",
            Envelope::Disconnect => "disconnect",
            Envelope::ConnectionInfo { .. } => "connection_info",
            Envelope::UserListUpdate { .. } => "user_list_update",
            Envelope::ConnectAccepted { .. } => "connect_accepted",
            Envelope::ConnectRejected { .. } => "connect_rejected",
            Envelope::Disconnected { .. } => "disconnected",
            Envelope::FileSendBegin { .. } => "file_send_begin",
            Envelope::FileSendComplete { .. } => "file_send_complete",
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Interprets an inbound text message.
///
/// Text that is not JSON at all falls back to the legacy line protocol; only
/// the readiness and failure signals are recognized there. JSON without a
/// usable `type`, or a known type with missing fields, is a [`ProtocolError`].
pub fn decode_text(text: &str) -> Result<Inbound, ProtocolError> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            return decode_legacy(text).ok_or_else(|| ProtocolError::InvalidJson(e.to_string()))
        }
    };

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ProtocolError::Malformed {
            kind: "<none>".to_string(),
            reason: "missing string field 'type'".to_string(),
        })?
        .to_string();

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Ok(Inbound::Unknown(kind));
    }

    serde_json::from_value(value)
        .map(Inbound::Envelope)
        .map_err(|e| ProtocolError::Malformed {
            kind,
            reason: e.to_string(),
        })
}

fn decode_legacy(text: &str) -> Option<Inbound> {
    let line = text.trim();
    let lowered = line.to_ascii_lowercase();

    if READY_SIGNALS.contains(&lowered.as_str()) {
        return Some(Inbound::Legacy(LegacySignal::Ready));
    }
    if FAILED_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return Some(Inbound::Legacy(LegacySignal::Failed(line.to_string())));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_shapes() {
        let auth = Envelope::session_auth("p1", "tok").to_text().unwrap();
        let auth: serde_json::Value = serde_json::from_str(&auth).unwrap();
        assert_eq!(
            auth,
            json!({"type": "session_auth", "participantId": "p1", "token": "tok"})
        );

        let begin = Envelope::file_send_begin("p2", "a.txt", 10).to_text().unwrap();
        let begin: serde_json::Value = serde_json::from_str(&begin).unwrap();
        assert_eq!(
            begin,
            json!({"type": "file_send_begin", "targetUserId": "p2", "fileName": "a.txt", "fileSize": 10})
        );

        let disconnect = Envelope::Disconnect.to_text().unwrap();
        assert_eq!(disconnect, r#"{"type":"disconnect"}"#);
    }

    #[test]
    fn test_decode_user_list_with_optional_names() {
        let text = r#"{"type":"user_list_update","users":[{"userId":"a","userName":"Alice"},{"userId":"b"}]}"#;
        let decoded = decode_text(text).unwrap();
        assert_eq!(
            decoded,
            Inbound::Envelope(Envelope::UserListUpdate {
                users: vec![
                    UserEntry {
                        user_id: "a".to_string(),
                        user_name: Some("Alice".to_string()),
                    },
                    UserEntry {
                        user_id: "b".to_string(),
                        user_name: None,
                    },
                ]
            })
        );
    }

    #[test]
    fn test_decode_inbound_file_begin() {
        let text = r#"{"type":"file_send_begin","fromUserId":"peer","fileName":"x.bin"}"#;
        match decode_text(text).unwrap() {
            Inbound::Envelope(Envelope::FileSendBegin {
                from_user_id,
                file_name,
                file_size,
                ..
            }) => {
                assert_eq!(from_user_id.as_deref(), Some("peer"));
                assert_eq!(file_name, "x.bin");
                assert_eq!(file_size, None);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        assert_eq!(
            decode_text(r#"{"type":"chat","payload":"hi"}"#).unwrap(),
            Inbound::Unknown("chat".to_string())
        );
    }

    #[test]
    fn test_known_type_missing_field_is_malformed() {
        let err = decode_text(r#"{"type":"connect_accepted"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { ref kind, .. } if kind == "connect_accepted"));

        let err = decode_text(r#"{"message":"no type"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_legacy_signals() {
        assert_eq!(
            decode_text("file_receive_ready").unwrap(),
            Inbound::Legacy(LegacySignal::Ready)
        );
        assert_eq!(decode_text("ready\n").unwrap(), Inbound::Legacy(LegacySignal::Ready));
        assert_eq!(
            decode_text("FILE_FAILED: disk full").unwrap(),
            Inbound::Legacy(LegacySignal::Failed("FILE_FAILED: disk full".to_string()))
        );
        assert!(matches!(
            decode_text("hello there"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }
}
