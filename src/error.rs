//! Error types for binance-mcp.
//!
//! Failures fall into four families:
//!
//! - **Transport**: the socket never opened or closed unexpectedly. Fatal to
//!   every request outstanding on that connection.
//! - **Protocol**: malformed envelope, version mismatch or unknown method.
//!   Reported as a response error code; the connection stays open.
//! - **Timeout**: no response before the deadline. Reported to the one
//!   caller only; the connection stays open.
//! - **Application**: a handler reported failure (bad arguments, upstream
//!   unavailable). Reported as a response error code.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::mcp::client::ConnectionState;
use crate::mcp::protocol::{ErrorCode, JsonRpcErrorData};

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Broad classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket failure; every pending request on the connection is lost.
    Transport,
    /// The peer rejected the envelope itself.
    Protocol,
    /// No response arrived in time.
    Timeout,
    /// The handler on the peer reported a failure.
    Application,
    /// The caller used the client in the wrong state.
    Usage,
}

/// The failure reason delivered to callers of the client engine.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The socket could not be opened or failed while in use.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection closed before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response arrived within the request deadline.
    #[error("request {method} timed out after {after:?}")]
    Timeout {
        /// Method of the request that timed out.
        method: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The peer answered with a JSON-RPC error.
    #[error("server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i32,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        data: Option<Value>,
    },

    /// The operation needs a `Ready` connection.
    #[error("client not ready (state: {0:?})")]
    NotReady(ConnectionState),

    /// `connect` was called on a connection that is not `Disconnected`.
    #[error("cannot connect from state {0:?}")]
    InvalidState(ConnectionState),

    /// The initialize exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(#[source] Box<ClientError>),

    /// The peer's result did not have the expected shape.
    #[error("unexpected result payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// Classifies the error into the transport/protocol/timeout/application taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::ConnectionClosed => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Rpc { code, .. } => {
                if ErrorCode::from_code(*code).is_protocol() {
                    ErrorKind::Protocol
                } else {
                    ErrorKind::Application
                }
            }
            Self::Decode(_) => ErrorKind::Protocol,
            Self::NotReady(_) | Self::InvalidState(_) => ErrorKind::Usage,
            Self::Handshake(inner) => inner.kind(),
        }
    }

    /// Returns the JSON-RPC error code, if the peer sent one.
    #[must_use]
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            Self::Handshake(inner) => inner.rpc_code(),
            _ => None,
        }
    }
}

impl From<JsonRpcErrorData> for ClientError {
    fn from(e: JsonRpcErrorData) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

/// Errors raised by the server outside of request handling.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Accepting or upgrading a connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the scripted host.
#[derive(Error, Debug)]
pub enum HostError {
    /// A request to the server failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A result could not be rendered.
    #[error("failed to render result: {0}")]
    Render(#[from] serde_json::Error),

    /// Writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
