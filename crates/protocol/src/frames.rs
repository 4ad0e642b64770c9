use serde::{Deserialize, Serialize};

use crate::types::Repository;

/// A single wire frame.
///
/// Serializes to one JSON object with a `type` tag and camelCase fields,
/// e.g. `{"type":"mobile_connect","pairingCode":"482931"}`. Frame types not
/// in the catalog deserialize to [`Frame::Unknown`] so a peer can keep
/// routing what it does not understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Frame {
    // Mobile → Relay
    MobileConnect {
        pairing_code: String,
    },
    InvalidatePairing {
        session_id: String,
    },

    // Agent → Relay
    AgentRegister {
        agent_token: String,
        version: String,
    },

    // Relay → Agent
    RegisterOk {
        pairing_code: String,
    },

    // Relay → Mobile
    SessionOk {
        session_token: String,
    },

    // Relay → either
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: String,
    },

    // Mobile → Agent (relay-stamped `sessionId`)
    RepoList {
        session_id: String,
    },
    ChatMessage {
        session_id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo_full_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch_name: Option<String>,
    },
    TaskStart {
        session_id: String,
        context: String,
        repo_full_name: String,
        base_branch: String,
    },
    Ping {
        session_id: String,
    },

    // Agent → Mobile (relay-routed by `sessionId`)
    RepoListResult {
        session_id: String,
        repos: Vec<Repository>,
    },
    StreamChunk {
        session_id: String,
        text: String,
    },
    StreamEnd {
        session_id: String,
    },
    TaskDone {
        session_id: String,
        pr_url: String,
        pr_title: String,
    },
    Pong {
        session_id: String,
    },

    /// Forward compatibility: unknown frame types deserialize here.
    #[serde(other)]
    Unknown,
}

impl Frame {
    /// Creates an error frame.
    pub fn error(session_id: Option<String>, message: impl Into<String>) -> Self {
        Frame::Error {
            session_id,
            message: message.into(),
        }
    }

    /// Returns the `sessionId` carried by this frame, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Frame::InvalidatePairing { session_id }
            | Frame::RepoList { session_id }
            | Frame::ChatMessage { session_id, .. }
            | Frame::TaskStart { session_id, .. }
            | Frame::Ping { session_id }
            | Frame::RepoListResult { session_id, .. }
            | Frame::StreamChunk { session_id, .. }
            | Frame::StreamEnd { session_id }
            | Frame::TaskDone { session_id, .. }
            | Frame::Pong { session_id } => Some(session_id),
            Frame::Error { session_id, .. } => session_id.as_deref(),
            Frame::MobileConnect { .. }
            | Frame::AgentRegister { .. }
            | Frame::RegisterOk { .. }
            | Frame::SessionOk { .. }
            | Frame::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: &Frame) -> Frame {
        let json = serde_json::to_string(frame).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn mobile_connect_wire_shape() {
        let frame = Frame::MobileConnect {
            pairing_code: "482931".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"mobile_connect","pairingCode":"482931"}"#);
    }

    #[test]
    fn agent_register_wire_shape() {
        let frame = Frame::AgentRegister {
            agent_token: "A1".into(),
            version: "0.1.0".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"type":"agent_register","agentToken":"A1","version":"0.1.0"}"#
        );
    }

    #[test]
    fn leading_zero_pairing_code_survives() {
        let frame = Frame::RegisterOk {
            pairing_code: "012345".into(),
        };
        let parsed = roundtrip(&frame);
        assert_eq!(
            parsed,
            Frame::RegisterOk {
                pairing_code: "012345".into()
            }
        );
    }

    #[test]
    fn error_omits_absent_session_id() {
        let frame = Frame::error(None, "boom");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("sessionId"));

        let frame = Frame::error(Some("U".into()), "boom");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"sessionId\":\"U\""));
    }

    #[test]
    fn chat_message_optional_fields() {
        let json = r#"{"type":"chat_message","sessionId":"U","text":"hi"}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        assert_eq!(
            frame,
            Frame::ChatMessage {
                session_id: "U".into(),
                text: "hi".into(),
                repo_full_name: None,
                branch_name: None,
            }
        );
    }

    #[test]
    fn catalog_roundtrips_are_identity() {
        let repo = Repository {
            id: 1,
            full_name: "owner/repo".into(),
            description: None,
            default_branch: "main".into(),
            language: Some("Rust".into()),
            is_private: true,
            updated_at: "2026-01-01T00:00:00Z".parse().unwrap(),
        };
        let frames = vec![
            Frame::MobileConnect {
                pairing_code: "000042".into(),
            },
            Frame::InvalidatePairing {
                session_id: "U".into(),
            },
            Frame::AgentRegister {
                agent_token: "A1".into(),
                version: "0.1.0".into(),
            },
            Frame::RegisterOk {
                pairing_code: "482931".into(),
            },
            Frame::SessionOk {
                session_token: "6e5ee9f0-a7a5-4a9a-9be7-0a1f0e5f9f9e".into(),
            },
            Frame::error(Some("U".into()), "No changes to commit"),
            Frame::RepoList {
                session_id: "U".into(),
            },
            Frame::ChatMessage {
                session_id: "U".into(),
                text: "list files".into(),
                repo_full_name: Some("owner/repo".into()),
                branch_name: None,
            },
            Frame::TaskStart {
                session_id: "U".into(),
                context: "fix the failing tests".into(),
                repo_full_name: "owner/repo".into(),
                base_branch: "main".into(),
            },
            Frame::Ping {
                session_id: "U".into(),
            },
            Frame::RepoListResult {
                session_id: "U".into(),
                repos: vec![repo],
            },
            Frame::StreamChunk {
                session_id: "U".into(),
                text: "a\n".into(),
            },
            Frame::StreamEnd {
                session_id: "U".into(),
            },
            Frame::TaskDone {
                session_id: "U".into(),
                pr_url: "https://github.com/owner/repo/pull/7".into(),
                pr_title: "fix the failing tests".into(),
            },
            Frame::Pong {
                session_id: "U".into(),
            },
        ];
        for frame in &frames {
            assert_eq!(&roundtrip(frame), frame, "roundtrip failed for {frame:?}");
        }
    }

    #[test]
    fn unknown_frame_type_deserializes() {
        let json = r#"{"type":"future_thing","sessionId":"U","blob":1}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        assert_eq!(frame, Frame::Unknown);
    }

    #[test]
    fn session_id_accessor() {
        let frame = Frame::StreamEnd {
            session_id: "U".into(),
        };
        assert_eq!(frame.session_id(), Some("U"));
        let frame = Frame::RegisterOk {
            pairing_code: "123456".into(),
        };
        assert_eq!(frame.session_id(), None);
    }
}
