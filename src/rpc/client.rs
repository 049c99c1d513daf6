//! RPC client for talking to a running server.
//!
//! Sends one framed request per connection and reads until the server
//! closes the socket.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::API_VERSION;
use super::framer;

/// Error returned by RPC client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Communication error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to parse response: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("Response was truncated")]
    Truncated,
    #[error("Server answered with HTTP status {0}")]
    Status(u16),
    #[error("RPC error: {0}")]
    Rpc(String),
}

#[derive(Serialize)]
struct Request<'a> {
    action: &'a str,
    version: i64,
    params: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// RPC client speaking the current protocol version.
#[derive(Debug, Clone)]
pub struct RpcClient {
    addr: String,
    key: Option<String>,
    origin: Option<String>,
}

impl RpcClient {
    /// Create a client for `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            key: None,
            origin: None,
        }
    }

    /// Send the shared API key with every call.
    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    /// Declare an `Origin` header, as a browser would.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Call an action and decode its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: Map<String, Value>,
    ) -> Result<T, ClientError> {
        let result = self.call_value(action, params).await?;
        serde_json::from_value(result).map_err(ClientError::Parse)
    }

    /// Call an action with no parameters.
    pub async fn call_no_params<T: DeserializeOwned>(&self, action: &str) -> Result<T, ClientError> {
        self.call(action, Map::new()).await
    }

    /// Call an action and return the raw result value.
    pub async fn call_value(
        &self,
        action: &str,
        params: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        self.call_versioned(action, API_VERSION, params).await
    }

    /// Call an action at an explicit protocol version.
    pub async fn call_versioned(
        &self,
        action: &str,
        version: i64,
        params: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let body = serde_json::to_vec(&Request {
            action,
            version,
            params: &params,
            key: self.key.as_deref(),
        })
        .map_err(ClientError::Serialize)?;

        let raw = self.exchange(&body).await?;
        let (status, body) = split_response(&raw)?;
        if status != 200 {
            return Err(ClientError::Status(status));
        }

        let value: Value = serde_json::from_slice(&body).map_err(ClientError::Parse)?;
        if version <= 4 {
            return match legacy_error(&value) {
                Some(error) => Err(ClientError::Rpc(error.to_string())),
                None => Ok(value),
            };
        }
        let reply: Reply = serde_json::from_value(value).map_err(ClientError::Parse)?;
        match reply.error {
            Some(error) => Err(ClientError::Rpc(error)),
            None => Ok(reply.result),
        }
    }

    async fn exchange(&self, body: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut stream =
            TcpStream::connect(self.addr.as_str())
                .await
                .map_err(|source| ClientError::Connect {
                    addr: self.addr.clone(),
                    source,
                })?;

        let mut head = format!("POST / HTTP/1.1\r\nHost: {}\r\n", self.addr);
        if let Some(origin) = &self.origin {
            head.push_str(&format!("Origin: {origin}\r\n"));
        }
        head.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        ));

        stream.write_all(head.as_bytes()).await?;
        stream.write_all(body).await?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;
        Ok(raw)
    }
}

/// Legacy replies carry results bare; only failures come wrapped.
fn legacy_error(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    if object.len() != 2 || !object.get("result")?.is_null() {
        return None;
    }
    object.get("error")?.as_str()
}

/// Split a raw response into its status code and body.
fn split_response(raw: &[u8]) -> Result<(u16, Vec<u8>), ClientError> {
    let (response, _) = framer::try_parse(raw).ok_or(ClientError::Truncated)?;
    let status = raw
        .split(|&byte| byte == b'\n')
        .next()
        .and_then(|line| std::str::from_utf8(line).ok())
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or(ClientError::Truncated)?;
    Ok((status, response.body))
}
