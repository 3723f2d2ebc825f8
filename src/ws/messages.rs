//! Wire message types: envelope, outbound commands, session options.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of one session's physical connection.
///
/// `Degraded` covers every reconnect wait: the session is still alive
/// and will retry, but nothing is on the wire right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been created yet.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The socket is open and exchanging messages.
    Open,
    /// The socket dropped; the reconnect loop owns recovery.
    Degraded,
    /// Explicitly closed; only a new `create` revives the session.
    Closed,
}

/// Inbound message envelope: event name, optional payload, optional
/// server sequence number.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketEnvelope {
    /// Event name.
    pub t: String,
    /// Payload, absent for bare signals.
    #[serde(default)]
    pub d: Option<Value>,
    /// Server event sequence number, present on versioned events.
    #[serde(default)]
    pub v: Option<u64>,
}

/// Outbound client → server application message.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMessage {
    /// Command name.
    pub t: String,
    /// Payload, omitted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl ClientMessage {
    /// A bare command with no payload.
    #[must_use]
    pub fn new(t: impl Into<String>) -> Self {
        Self {
            t: t.into(),
            d: None,
        }
    }

    /// A command with a payload.
    #[must_use]
    pub fn with_data(t: impl Into<String>, d: Value) -> Self {
        Self {
            t: t.into(),
            d: Some(d),
        }
    }

    /// Tags the payload with an acknowledgement id the server echoes
    /// back in its `ack` event. A payload-less message gains an object
    /// payload holding only the tag.
    pub fn tag_ack(&mut self, id: u64) {
        match &mut self.d {
            Some(Value::Object(map)) => {
                map.insert("a".to_string(), Value::from(id));
            }
            Some(_) => {}
            None => {
                self.d = Some(serde_json::json!({ "a": id }));
            }
        }
    }
}

/// Per-send options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOpts {
    /// The message must be confirmed by a correlated inbound `ack`
    /// event; until then it is buffered and re-sent on every reconnect.
    pub ackable: bool,
}

impl SendOpts {
    /// Options for an acknowledgement-required send.
    #[must_use]
    pub const fn ackable() -> Self {
        Self { ackable: true }
    }
}

/// Behavior switches for one session, fixed at creation.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Context name, for logging.
    pub name: String,
    /// Verbose frame logging.
    pub debug: bool,
    /// Liveness ping interval.
    pub ping_delay: Duration,
    /// Event name sent automatically on every successful open.
    pub send_on_open: Option<String>,
    /// Inbound event names this session forwards; others are dropped.
    pub registered_events: Vec<String>,
    /// Silences the log line for unregistered event names.
    pub ignore_unknown_messages: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            debug: false,
            ping_delay: Duration::from_secs(2),
            send_on_open: None,
            registered_events: Vec::new(),
            ignore_unknown_messages: false,
        }
    }
}

/// Everything needed to open (and re-open) one logical session.
#[derive(Debug, Clone)]
pub struct CreateSession {
    /// Per-installation client id, carried as the `sri` query parameter.
    pub client_id: String,
    /// Scheme and host of the socket server (`ws://…`).
    pub endpoint: String,
    /// Context path on the socket server.
    pub url: String,
    /// Initial resume cursor.
    pub version: u64,
    /// Extra query parameters (user TV feeds).
    pub params: HashMap<String, String>,
    /// Behavior switches.
    pub options: SessionOptions,
}

impl CreateSession {
    /// Full connect URL for the given resume cursor.
    #[must_use]
    pub fn connect_url(&self, version: u64) -> String {
        let mut url = format!(
            "{}{}?sri={}&version={}",
            self.endpoint, self.url, self.client_id, version
        );
        for (key, value) in &self.params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(value);
        }
        url
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn client_message_skips_empty_payload() {
        let msg = ClientMessage::new("outoftime");
        let Ok(json) = serde_json::to_string(&msg) else {
            panic!("serialize");
        };
        assert_eq!(json, r#"{"t":"outoftime"}"#);
    }

    #[test]
    fn tag_ack_injects_into_object_payload() {
        let mut msg = ClientMessage::with_data("move", serde_json::json!({"from": "e2"}));
        msg.tag_ack(7);
        let Some(Value::Object(map)) = &msg.d else {
            panic!("object payload");
        };
        assert_eq!(map.get("a"), Some(&Value::from(7)));
        assert_eq!(map.get("from"), Some(&Value::from("e2")));
    }

    #[test]
    fn tag_ack_creates_payload_when_missing() {
        let mut msg = ClientMessage::new("ping-me");
        msg.tag_ack(3);
        assert!(msg.d.is_some());
    }

    #[test]
    fn connect_url_carries_cursor_and_params() {
        let mut params = HashMap::new();
        params.insert("userTv".to_string(), "ana".to_string());
        let create = CreateSession {
            client_id: "abc".to_string(),
            endpoint: "ws://example.org".to_string(),
            url: "/play/xyz/v2".to_string(),
            version: 5,
            params,
            options: SessionOptions::default(),
        };
        let url = create.connect_url(9);
        assert!(url.starts_with("ws://example.org/play/xyz/v2?sri=abc&version=9"));
        assert!(url.contains("userTv=ana"));
    }

    #[test]
    fn envelope_tolerates_missing_fields() {
        let Ok(env) = serde_json::from_str::<SocketEnvelope>(r#"{"t":"resync"}"#) else {
            panic!("bare envelope");
        };
        assert_eq!(env.t, "resync");
        assert!(env.d.is_none());
        assert!(env.v.is_none());
    }
}
