//! Embedded RPC server for external callers.
//!
//! Exposes the collection over a loopback TCP socket using JSON bodies in a
//! minimal HTTP-like framing, one request per connection.
//!
//! ## Architecture
//!
//! - `framer`: reconstructs requests from the accumulated byte stream
//! - `origin`: CORS allow-list decisions
//! - `protocol`: request envelope, version-dependent replies, response bytes
//! - `methods`: action registry with version aliases, and the dispatcher
//! - `pipeline`: preflight, authorization and dispatch for one request
//! - `connection`: per-socket read/write state machine
//! - `transport`: listener and the non-blocking `pump()` loop
//! - `client`: client for connecting to the server
//!
//! The server has no threads of its own; whatever loop embeds it must call
//! [`Server::pump`] regularly and never concurrently.

pub mod client;
pub mod connection;
pub mod error;
pub mod framer;
pub mod methods;
pub mod origin;
pub mod pipeline;
pub mod protocol;
mod transport;

pub use client::{ClientError, RpcClient};
pub use error::{ActionError, EnvelopeError, ServerError};
pub use methods::{
    ActionCall, ActionHandler, BOOTSTRAP_ACTION, Dispatcher, Invocation, MethodRegistry,
    MethodResult,
};
pub use origin::{OriginDecision, OriginPolicy};
pub use pipeline::Pipeline;
pub use transport::{Server, ServerOptions};

/// Protocol version spoken by this server.
pub const API_VERSION: i64 = 6;

/// Name reported in the plain-text banner.
pub const SERVER_NAME: &str = "AnkiLink";
