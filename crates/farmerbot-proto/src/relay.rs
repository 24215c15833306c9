//! Request/response envelopes multiplexed by twin id over the relay.

use serde::{Deserialize, Serialize};

/// An inbound request delivered by the relay.
///
/// The relay stamps `source_twin` from the authenticated sender; handlers
/// rely on it for authorization and must not trust anything in the payload
/// for identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlates the eventual [`Reply`] with this request.
    pub reference: String,
    /// Twin id of the caller.
    pub source_twin: u32,
    /// Session the request was addressed to, `farmerbot-{farm_id}`.
    pub session: String,
    /// Routing key, e.g. `farmerbot.nodemanager.findnode`.
    pub cmd: String,
    /// JSON arguments of the call.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// The response to an [`Envelope`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    /// Builds a success reply for the given request.
    #[must_use]
    pub fn ok(envelope: &Envelope, result: serde_json::Value) -> Self {
        Self {
            reference: envelope.reference.clone(),
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error reply for the given request.
    #[must_use]
    pub fn err(envelope: &Envelope, message: impl Into<String>) -> Self {
        Self {
            reference: envelope.reference.clone(),
            result: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            reference: "req-1".to_owned(),
            source_twin: 7,
            session: "farmerbot-1".to_owned(),
            cmd: "farmerbot.farmmanager.version".to_owned(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn envelope_roundtrip() {
        let env = envelope();
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn reply_echoes_reference() {
        let env = envelope();
        let ok = Reply::ok(&env, serde_json::json!(3));
        assert_eq!(ok.reference, "req-1");
        assert!(ok.error.is_none());

        let err = Reply::err(&env, "no suitable node");
        assert_eq!(err.reference, "req-1");
        assert!(err.result.is_none());
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let json = r#"{"reference":"r","source_twin":1,"session":"s","cmd":"c"}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert!(env.payload.is_null());
    }
}
