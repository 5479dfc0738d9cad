// Wire protocol (4.4/4.6/6): request/response shapes shared by daemon and CLI. Records are
// plain JSON objects -- the "structured record encoded as text" of §4.4, the same
// serializable shape backing both the wire protocol and the on-disk session descriptors.
use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct Request {
    pub command: String,
    pub args: Map<String, Value>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Request { command: command.into(), args: Map::new() }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn into_json(self) -> Value {
        let mut m = self.args;
        m.insert("command".to_string(), Value::String(self.command));
        Value::Object(m)
    }

    /// Parses an incoming wire record into a `Request`. A missing/non-string `command`
    /// field is a protocol error (7): the dispatcher never guesses a handler.
    pub fn from_json(value: Value) -> Result<Request, String> {
        let mut map = match value {
            Value::Object(m) => m,
            _ => return Err("request must be a JSON object".to_string()),
        };
        let command = match map.remove("command") {
            Some(Value::String(s)) => s,
            _ => return Err("request is missing a string \"command\" field".to_string()),
        };
        Ok(Request { command, args: map })
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    pub fn u64_arg(&self, key: &str) -> Option<u64> {
        self.args.get(key).and_then(|v| v.as_u64())
    }
}

/// `{"status": "ok", ...fields}` (6).
pub fn ok(fields: Vec<(&str, Value)>) -> Value {
    let mut m = Map::new();
    m.insert("status".to_string(), json!("ok"));
    for (k, v) in fields {
        m.insert(k.to_string(), v);
    }
    Value::Object(m)
}

/// `{"error": "<message>"}`, optionally with a `traceback` field (6/7).
pub fn error(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

pub fn error_with_traceback(message: impl Into<String>, traceback: impl Into<String>) -> Value {
    json!({ "error": message.into(), "traceback": traceback.into() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = Request::new("break").with("file", "/tmp/x.script").with("line", 3u64);
        let json = req.into_json();
        let parsed = Request::from_json(json).unwrap();
        assert_eq!(parsed.command, "break");
        assert_eq!(parsed.str_arg("file"), Some("/tmp/x.script"));
        assert_eq!(parsed.u64_arg("line"), Some(3));
    }

    #[test]
    fn missing_command_is_a_protocol_error() {
        let err = Request::from_json(json!({"args": {}})).unwrap_err();
        assert!(err.contains("command"));
    }
}
