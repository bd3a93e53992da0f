//! Signalling server wire messages.
//!
//! The server speaks a line protocol (`HELLO <id>`, `SESSION <peer>`,
//! `SESSION_OK`, `ERROR …`) and relays JSON objects between the peers: either
//! `{"sdp": {"type": …, "sdp": …}}` or `{"ice": {"candidate": …,
//! "sdpMLineIndex": …}}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Message received from the signalling server.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// Registration accepted.
    Hello,
    /// The server connected us with the requested peer.
    SessionOk,
    /// Error reported by the server; carries the whole text.
    Error(String),
    /// Session description relayed from the peer.
    Sdp(SessionDescription),
    /// ICE candidate relayed from the peer.
    Ice(IceCandidate),
    /// Anything else; carries the whole text.
    Unknown(String),
}

/// The `sdp` member of a JSON message. Members are optional here, the state
/// machine decides what a missing one means.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// `offer` or `answer`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// SDP text.
    pub sdp: Option<String>,
}

/// The `ice` member of a JSON message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line.
    pub candidate: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u32>,
}

impl ServerMessage {
    /// Parses a text frame received from the signalling server.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text {
            "HELLO" => return Self::Hello,
            "SESSION_OK" => return Self::SessionOk,
            _ if text.starts_with("ERROR") => return Self::Error(text.to_owned()),
            _ => {}
        }
        let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(text) else {
            return Self::Unknown(text.to_owned());
        };
        if let Some(sdp) = object.remove("sdp") {
            Self::Sdp(serde_json::from_value(sdp).unwrap_or_default())
        } else if let Some(ice) = object.remove("ice") {
            Self::Ice(serde_json::from_value(ice).unwrap_or_default())
        } else {
            Self::Unknown(text.to_owned())
        }
    }
}

/// Registers with the server under `id`.
#[must_use]
pub fn hello(id: u32) -> String {
    format!("HELLO {id}")
}

/// Asks the server to connect us with `peer_id`.
#[must_use]
pub fn session(peer_id: &str) -> String {
    format!("SESSION {peer_id}")
}

/// Sends a local SDP offer to the peer.
#[must_use]
pub fn offer(sdp: &str) -> String {
    json!({ "sdp": { "type": "offer", "sdp": sdp } }).to_string()
}

/// Sends a local ICE candidate to the peer.
#[must_use]
pub fn ice_candidate(sdp_m_line_index: u32, candidate: &str) -> String {
    json!({ "ice": { "candidate": candidate, "sdpMLineIndex": sdp_m_line_index } }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_lines() {
        assert_eq!(ServerMessage::parse("HELLO"), ServerMessage::Hello);
        assert_eq!(ServerMessage::parse("SESSION_OK"), ServerMessage::SessionOk);
        assert_eq!(
            ServerMessage::parse("ERROR peer '42' not found"),
            ServerMessage::Error("ERROR peer '42' not found".to_owned())
        );
        // Only the bare keyword counts.
        assert_eq!(ServerMessage::parse("HELLO 42"), ServerMessage::Unknown("HELLO 42".to_owned()));
    }

    #[test]
    fn sdp_answer() {
        let message = ServerMessage::parse(r#"{"sdp": {"type": "answer", "sdp": "v=0\r\n"}}"#);
        assert_eq!(
            message,
            ServerMessage::Sdp(SessionDescription {
                kind: Some("answer".to_owned()),
                sdp: Some("v=0\r\n".to_owned()),
            })
        );
    }

    #[test]
    fn sdp_without_type_keeps_the_gap() {
        let ServerMessage::Sdp(description) = ServerMessage::parse(r#"{"sdp": {"sdp": "v=0"}}"#)
        else {
            panic!("expected an SDP message");
        };
        assert_eq!(description.kind, None);
        assert_eq!(description.sdp.as_deref(), Some("v=0"));
    }

    #[test]
    fn ice() {
        let message = ServerMessage::parse(
            r#"{"ice": {"candidate": "candidate:1 1 UDP 2013266431 10.0.0.2 50000 typ host", "sdpMLineIndex": 0}}"#,
        );
        assert_eq!(
            message,
            ServerMessage::Ice(IceCandidate {
                candidate: Some("candidate:1 1 UDP 2013266431 10.0.0.2 50000 typ host".to_owned()),
                sdp_m_line_index: Some(0),
            })
        );
        let ServerMessage::Ice(candidate) = ServerMessage::parse(r#"{"ice": "garbage"}"#) else {
            panic!("expected an ICE message");
        };
        assert_eq!(candidate, IceCandidate::default());
    }

    #[test]
    fn ignorable_text() {
        assert!(matches!(ServerMessage::parse("not json"), ServerMessage::Unknown(_)));
        assert!(matches!(ServerMessage::parse("[1, 2]"), ServerMessage::Unknown(_)));
        assert!(matches!(ServerMessage::parse(r#"{"bye": true}"#), ServerMessage::Unknown(_)));
    }

    #[test]
    fn outgoing() {
        assert_eq!(hello(1234), "HELLO 1234");
        assert_eq!(session("5338"), "SESSION 5338");
        let offer: Value = serde_json::from_str(&offer("v=0\r\n")).unwrap();
        assert_eq!(offer["sdp"]["type"], "offer");
        assert_eq!(offer["sdp"]["sdp"], "v=0\r\n");
        let ice: Value = serde_json::from_str(&ice_candidate(1, "candidate:0")).unwrap();
        assert_eq!(ice["ice"]["candidate"], "candidate:0");
        assert_eq!(ice["ice"]["sdpMLineIndex"], 1);
    }
}
