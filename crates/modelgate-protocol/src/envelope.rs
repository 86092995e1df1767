//! Dialect error envelopes rendered to clients.

use serde_json::{Value, json};

/// Chat dialect: `{"error": {message, type, param, code}}`.
pub fn chat_error(message: &str, error_type: &str, code: &str) -> Value {
    json!({
        "error": {
            "message": message,
            "type": error_type,
            "param": Value::Null,
            "code": code,
        }
    })
}

/// Messages dialect: `{"type":"error","error":{type, message}}`.
pub fn messages_error(message: &str, error_type: &str) -> Value {
    json!({
        "type": "error",
        "error": {
            "type": error_type,
            "message": message,
        }
    })
}

/// Realtime dialect: an `error` event frame sent over the WebSocket.
pub fn realtime_error_event(message: &str, error_type: &str, code: &str) -> Value {
    json!({
        "type": "error",
        "error": {
            "type": error_type,
            "code": code,
            "message": message,
        }
    })
}

/// Task dialect: `{status_code, message, local_error, ...}`.
pub fn task_error(status_code: u16, message: &str, code: &str, local_error: bool) -> Value {
    json!({
        "status_code": status_code,
        "code": code,
        "message": message,
        "local_error": local_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_match_dialect_shapes() {
        let chat = chat_error("boom", "upstream_error", "bad_response");
        assert_eq!(chat["error"]["message"], "boom");
        assert!(chat["error"]["param"].is_null());

        let messages = messages_error("boom", "api_error");
        assert_eq!(messages["type"], "error");
        assert_eq!(messages["error"]["type"], "api_error");

        let task = task_error(429, "saturated", "upstream_error", false);
        assert_eq!(task["status_code"], 429);
        assert_eq!(task["local_error"], false);
    }
}
