use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Associate this connection with a conversation thread
    AssociateThread { thread_id: String },
    Ping,
}

/// Control messages sent from server to client. Event frames bypass this
/// enum entirely; they arrive pre-serialized from the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "thread_associated")]
    ThreadAssociated { thread_id: String },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_frame(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_parses() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "Ping"})).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        let msg: ClientMessage = serde_json::from_value(
            json!({"type": "AssociateThread", "payload": {"thread_id": "t1"}}),
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::AssociateThread { thread_id } if thread_id == "t1"));
    }

    #[test]
    fn test_server_message_frames() {
        assert_eq!(ServerMessage::Pong.to_frame(), json!({"type": "pong"}));

        let frame = ServerMessage::error("BAD", "nope").to_frame();
        assert_eq!(frame["type"], json!("error"));
        assert_eq!(frame["code"], json!("BAD"));
    }
}
