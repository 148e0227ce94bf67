//! Model Context Protocol (MCP) engine, both ends of the wire.
//!
//! Client and server exchange JSON-RPC 2.0 envelopes over a WebSocket, one
//! envelope per text frame.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐                ┌──────────────────────────┐
//! │        McpClient         │                │        McpServer         │
//! │                          │                │                          │
//! │  ┌────────────────────┐  │   WebSocket    │  ┌────────────────────┐  │
//! │  │ RequestCorrelator  │  │◀──────────────▶│  │ Session (per conn) │  │
//! │  │ ids, timeouts      │  │  JSON-RPC 2.0  │  │ handshake gating   │  │
//! │  └────────────────────┘  │                │  └─────────┬──────────┘  │
//! │            │             │                │            ▼             │
//! │  ┌────────────────────┐  │                │  ┌────────────────────┐  │
//! │  │ RequestObserver    │  │                │  │ Dispatcher         │  │
//! │  └────────────────────┘  │                │  └─────────┬──────────┘  │
//! │                          │                │            ▼             │
//! │                          │                │  ┌────────────────────┐  │
//! │                          │                │  │ MethodRegistry     │  │
//! │                          │                │  └────────────────────┘  │
//! └──────────────────────────┘                └──────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod client;
pub mod correlator;
pub mod dispatch;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{ConnectionState, McpClient};
pub use correlator::{RequestCorrelator, TimeoutPolicy};
pub use observer::{Outcome, RecordingObserver, RequestObserver, RequestRecord, TracingObserver};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use registry::{MethodRegistry, PromptHandler, SamplingHandler, ToolHandler};
pub use server::McpServer;
