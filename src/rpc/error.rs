//! Error types for the RPC server.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced while binding the listening socket.
///
/// These are the only fatal errors of the server; everything that goes
/// wrong on an accepted connection is isolated to that connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to resolve bind address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no addresses resolved for {host}:{port}")]
    ResolveEmpty { host: String, port: u16 },
    #[error("invalid listen backlog {backlog}")]
    Backlog { backlog: u32 },
    #[error("failed to bind listener at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
}

/// A request body that is not a valid RPC envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("request body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("'action' is a required property")]
    MissingAction,
    #[error("'action' must be a non-empty string")]
    InvalidAction,
    #[error("'version' must be an integer")]
    InvalidVersion,
    #[error("'params' must be an object")]
    InvalidParams,
}

/// Failure of an action call, embedded as a string in the reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("unsupported action")]
    UnsupportedAction,
    #[error("valid api key must be provided")]
    InvalidApiKey,
    #[error("{0}")]
    InvalidParams(String),
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidParams(error.to_string())
    }
}
