//! RPC envelope and HTTP response types.
//!
//! Request bodies are JSON objects of the form
//! `{"action": string, "version"?: int, "params"?: object, "key"?: string}`.
//! Successful replies depend on the caller's version: up to version 4 the
//! bare result is returned, later versions wrap it in
//! `{"result": ..., "error": ...}`. Failures always use the wrapped form.

use serde_json::{Map, Value, json};

use super::error::{ActionError, EnvelopeError};

/// Version assumed when a request does not name one.
pub const DEFAULT_VERSION: i64 = 4;

/// Last version that receives unwrapped replies.
const LEGACY_VERSION: i64 = 4;

/// A validated request body.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEnvelope {
    pub action: String,
    pub version: i64,
    pub params: Map<String, Value>,
    pub key: Option<String>,
}

impl RpcEnvelope {
    /// Parse and validate a request body.
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    /// Validate an already-decoded envelope.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut object) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let action = match object.remove("action") {
            None => return Err(EnvelopeError::MissingAction),
            Some(Value::String(action)) if !action.is_empty() => action,
            Some(_) => return Err(EnvelopeError::InvalidAction),
        };

        let version = match object.remove("version") {
            None => DEFAULT_VERSION,
            Some(version) => version.as_i64().ok_or(EnvelopeError::InvalidVersion)?,
        };

        let params = match object.remove("params") {
            None => Map::new(),
            Some(Value::Object(params)) => params,
            Some(_) => return Err(EnvelopeError::InvalidParams),
        };

        let key = match object.remove("key") {
            Some(Value::String(key)) => Some(key),
            _ => None,
        };

        Ok(Self {
            action,
            version,
            params,
            key,
        })
    }
}

/// Format a successful result for the caller's version.
pub fn success_reply(version: i64, result: Value) -> Value {
    if version <= LEGACY_VERSION {
        return result;
    }
    json!({ "result": result, "error": null })
}

/// Format a failure. The envelope is used at every version so that legacy
/// callers can tell an error from a string result.
pub fn error_reply(error: impl ToString) -> Value {
    json!({ "result": null, "error": error.to_string() })
}

/// Format the outcome of an action call.
pub fn format_reply(version: i64, outcome: Result<Value, ActionError>) -> Value {
    match outcome {
        Ok(result) => success_reply(version, result),
        Err(error) => error_reply(error),
    }
}

/// Status lines the server ever sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Forbidden,
}

impl Status {
    fn line(self) -> &'static str {
        match self {
            Status::Ok => "HTTP/1.1 200 OK",
            Status::Forbidden => "HTTP/1.1 403 Forbidden",
        }
    }
}

/// A response ready to be serialized onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: Status,
    pub cors_origin: String,
    pub private_network: bool,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(cors_origin: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            cors_origin: cors_origin.into(),
            private_network: false,
            body,
        }
    }

    /// JSON-encode `value` as the body of a 200 response.
    pub fn json(cors_origin: impl Into<String>, value: &Value) -> Self {
        Self::ok(cors_origin, value.to_string().into_bytes())
    }

    pub fn forbidden(cors_origin: impl Into<String>) -> Self {
        Self {
            status: Status::Forbidden,
            cors_origin: cors_origin.into(),
            private_network: false,
            body: Vec::new(),
        }
    }

    pub fn with_private_network(mut self) -> Self {
        self.private_network = true;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = String::new();
        head.push_str(self.status.line());
        head.push_str("\r\n");
        if self.status == Status::Ok {
            head.push_str("Content-Type: application/json\r\n");
        }
        head.push_str(&format!(
            "Access-Control-Allow-Origin: {}\r\n",
            self.cors_origin
        ));
        head.push_str("Access-Control-Allow-Headers: *\r\n");
        if self.private_network {
            head.push_str("Access-Control-Allow-Private-Network: true\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
