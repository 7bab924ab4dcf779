//! Wire messages exchanged between a sandbox worker and its host.
//!
//! Shape on the wire: `{ "type": "status" | "results" | "error", "payload": ... }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::runtime::suite::ExecutionResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub stack: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum WireMessage {
    /// Progress information; never ends a run.
    Status(Value),
    Results(ExecutionResult),
    Error(ErrorPayload),
}

impl WireMessage {
    pub fn error(message: impl Into<String>, stack: impl Into<String>) -> Self {
        WireMessage::Error(ErrorPayload {
            message: message.into(),
            stack: stack.into(),
        })
    }

    /// `results` and `error` end a run; at most one of them is honored.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WireMessage::Status(_))
    }

    /// Decodes a message posted from script code as `(type, payload)`.
    pub fn from_parts(kind: &str, payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "type": kind, "payload": payload }))
    }
}

/// A message stamped with the context it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub context_id: Uuid,
    #[serde(flatten)]
    pub message: WireMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_tagged_messages() {
        let status = WireMessage::from_parts("status", json!({ "phase": "start" })).expect("status");
        assert!(!status.is_terminal());

        let error = WireMessage::from_parts("error", json!({ "message": "boom" })).expect("error");
        assert_eq!(error, WireMessage::error("boom", ""));
        assert!(error.is_terminal());

        assert!(WireMessage::from_parts("bogus", json!({})).is_err());
        assert!(WireMessage::from_parts("results", json!({ "numTotalTests": 1 })).is_err());
    }

    #[test]
    fn results_payload_round_trips_wire_names() {
        let payload = json!({
            "numTotalTests": 1,
            "numPassedTests": 1,
            "numFailedTests": 0,
            "startTime": 1.0,
            "endTime": 2.0,
            "testResults": [{
                "name": "math",
                "status": "pass",
                "assertionResults": [{
                    "title": "adds",
                    "fullName": "math > adds",
                    "status": "pass",
                    "duration": 0.5,
                    "failureMessages": []
                }]
            }]
        });
        let message = WireMessage::from_parts("results", payload.clone()).expect("results");
        let wire = serde_json::to_value(&message).expect("encode");
        assert_eq!(wire["type"], "results");
        assert_eq!(wire["payload"], payload);
    }

    #[test]
    fn envelope_flattens_message() {
        let id = Uuid::new_v4();
        let envelope = Envelope {
            context_id: id,
            message: WireMessage::Status(json!({ "phase": "evaluating" })),
        };
        let wire = serde_json::to_value(&envelope).expect("encode");
        assert_eq!(wire["contextId"], json!(id.to_string()));
        assert_eq!(wire["type"], "status");
    }
}
