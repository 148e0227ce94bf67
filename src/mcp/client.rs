//! Client side of the MCP protocol engine.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingHandshake -> Ready -> Closed
//! ```
//!
//! [`McpClient::connect`] opens the socket, runs the `initialize` exchange
//! and sends the `initialized` notification. Every other operation requires
//! [`ConnectionState::Ready`] and fails with [`ClientError::NotReady`]
//! without touching the wire otherwise. `Closed` is terminal: a client whose
//! handshake failed, whose peer went away, or that was disconnected never
//! becomes ready again.
//!
//! # Concurrency
//!
//! Requests may be issued from any number of tasks at once. A single receive
//! task reads frames in arrival order and completes requests through the
//! [`RequestCorrelator`], so callers are woken in completion order.

use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::mcp::correlator::{RequestCorrelator, TimeoutPolicy};
use crate::mcp::observer::RequestObserver;
use crate::mcp::protocol::{
    parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, MCP_PROTOCOL_VERSION,
};
use crate::mcp::transport::{Connection, FrameReader, Outbound};
use crate::mcp::types::{
    CreateMessageOptions, CreateMessageParams, CreateMessageResult, GetPromptResult,
    InitializeParams, InitializeResult, Message, PromptDescriptor, PromptsListResult,
    ToolDescriptor, ToolsListResult,
};

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been attempted.
    Disconnected,
    /// The socket is being opened.
    Connecting,
    /// `initialize` sent, response not yet received.
    AwaitingHandshake,
    /// Handshake complete; requests are permitted.
    Ready,
    /// The connection is gone and will not come back.
    Closed,
}

/// Handles owned while a connection is open.
struct Link {
    outbound: Outbound,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// An MCP client bound to one server URL.
pub struct McpClient {
    url: String,
    correlator: Arc<RequestCorrelator>,
    state: Arc<watch::Sender<ConnectionState>>,
    link: Mutex<Option<Link>>,
    server: Mutex<Option<InitializeResult>>,
}

impl McpClient {
    /// Creates a disconnected client for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, policy: TimeoutPolicy) -> Self {
        Self::from_correlator(url.into(), RequestCorrelator::new(policy))
    }

    /// Creates a disconnected client that reports every request to `observer`.
    #[must_use]
    pub fn with_observer(
        url: impl Into<String>,
        policy: TimeoutPolicy,
        observer: Arc<dyn RequestObserver>,
    ) -> Self {
        Self::from_correlator(url.into(), RequestCorrelator::with_observer(policy, observer))
    }

    fn from_correlator(url: String, correlator: Arc<RequestCorrelator>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url,
            correlator,
            state: Arc::new(state),
            link: Mutex::new(None),
            server: Mutex::new(None),
        }
    }

    /// The current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// What the server reported during the handshake.
    #[must_use]
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Opens the connection and performs the handshake.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidState`] unless the client is `Disconnected`
    /// - [`ClientError::Transport`] if the socket cannot be opened; the client
    ///   returns to `Disconnected`
    /// - [`ClientError::Handshake`] if `initialize` is rejected, times out,
    ///   or the connection closes first; the client ends up `Closed`
    pub async fn connect(&self) -> Result<InitializeResult, ClientError> {
        let mut current = ConnectionState::Disconnected;
        let started = self.state.send_if_modified(|state| {
            current = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ClientError::InvalidState(current));
        }

        tracing::info!(url = %self.url, "Connecting to MCP server");

        let connection = match Connection::connect(&self.url).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Failed to connect");
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(ClientError::Transport(e.to_string()));
            }
        };

        let cancel = CancellationToken::new();
        let (reader, outbound, writer) = connection.split(cancel.clone());
        let reader = tokio::spawn(receive_loop(
            reader,
            outbound.clone(),
            Arc::clone(&self.correlator),
            Arc::clone(&self.state),
            cancel.clone(),
        ));

        *self.link.lock().unwrap_or_else(PoisonError::into_inner) = Some(Link {
            outbound: outbound.clone(),
            cancel,
            reader,
            writer,
        });
        self.advance(ConnectionState::Connecting, ConnectionState::AwaitingHandshake);

        match self.handshake(&outbound).await {
            Ok(result) => {
                tracing::info!(
                    server = %result.server_info.name,
                    version = result.server_info.version.as_deref().unwrap_or("unknown"),
                    "Handshake complete"
                );
                *self.server.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(result.clone());
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Handshake failed");
                self.close().await;
                Err(ClientError::Handshake(Box::new(e)))
            }
        }
    }

    async fn handshake(&self, outbound: &Outbound) -> Result<InitializeResult, ClientError> {
        let params = serde_json::to_value(InitializeParams::host())?;
        let value = self.send(outbound, "initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        if result.protocol_version != MCP_PROTOCOL_VERSION {
            return Err(ClientError::Rpc {
                code: ErrorCode::InvalidRequest.code(),
                message: format!(
                    "Unsupported protocol version: {} (expected {MCP_PROTOCOL_VERSION})",
                    result.protocol_version
                ),
                data: None,
            });
        }

        outbound
            .send_notification(&JsonRpcNotification::new("initialized", None))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if self.advance(ConnectionState::AwaitingHandshake, ConnectionState::Ready) {
            Ok(result)
        } else {
            Err(ClientError::ConnectionClosed)
        }
    }

    /// Lists the server's tools.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] before the handshake, or the
    /// failure reason of the request.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        let result: ToolsListResult = self.request_typed("tools/list", None).await?;
        Ok(result.tools)
    }

    /// Calls tool `name` with `arguments` (a JSON object) and returns its result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] before the handshake, or the
    /// failure reason of the request.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// Lists the server's prompts.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] before the handshake, or the
    /// failure reason of the request.
    pub async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, ClientError> {
        let result: PromptsListResult = self.request_typed("prompts/list", None).await?;
        Ok(result.prompts)
    }

    /// Renders prompt `name` with `arguments` (a JSON object).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] before the handshake, or the
    /// failure reason of the request.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<GetPromptResult, ClientError> {
        self.request_typed(
            "prompts/get",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// Requests generated text for `messages`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] before the handshake, or the
    /// failure reason of the request.
    pub async fn create_message(
        &self,
        messages: Vec<Message>,
        options: CreateMessageOptions,
    ) -> Result<CreateMessageResult, ClientError> {
        let params = serde_json::to_value(CreateMessageParams { messages, options })?;
        self.request_typed("sampling/createMessage", Some(params))
            .await
    }

    /// Checks that the server is responsive.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] before the handshake, or the
    /// failure reason of the request.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.request("ping", None).await.map(|_| ())
    }

    /// Sends an arbitrary request and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] before the handshake, or the
    /// failure reason of the request.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let outbound = self.ready_outbound()?;
        self.send(&outbound, method, params).await
    }

    /// Closes the connection. Outstanding requests fail with
    /// [`ClientError::ConnectionClosed`].
    pub async fn disconnect(&self) {
        tracing::info!(url = %self.url, "Disconnecting");
        self.close().await;
    }

    async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn ready_outbound(&self) -> Result<Outbound, ClientError> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(ClientError::NotReady(state));
        }
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or(ClientError::NotReady(state))
    }

    async fn send(
        &self,
        outbound: &Outbound,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        let (id, completion) = self.correlator.register(method).await;
        let request = JsonRpcRequest::new(id.clone(), method, params);

        tracing::debug!(method, id = %id, "Sending request");

        if let Err(e) = outbound.send_request(&request).await {
            self.correlator
                .fail(&id, ClientError::Transport(e.to_string()))
                .await;
        }

        completion.wait().await
    }

    fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    async fn close(&self) {
        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner).take();

        if link.is_some() || self.state() != ConnectionState::Disconnected {
            self.state.send_replace(ConnectionState::Closed);
        }

        if let Some(link) = &link {
            link.cancel.cancel();
        }

        self.correlator
            .reject_all(|| ClientError::ConnectionClosed)
            .await;

        if let Some(link) = link {
            link.reader.abort();
            let _ = link.writer.await;
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(link) = self
            .link
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            link.cancel.cancel();
            link.reader.abort();
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn receive_loop<S>(
    mut reader: FrameReader<S>,
    outbound: Outbound,
    correlator: Arc<RequestCorrelator>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => handle_frame(&frame, &outbound, &correlator).await,
            Ok(None) => {
                tracing::info!("Server closed the connection");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Connection failed");
                break;
            }
        }
    }

    state.send_replace(ConnectionState::Closed);
    cancel.cancel();
    correlator
        .reject_all(|| ClientError::ConnectionClosed)
        .await;
}

async fn handle_frame(frame: &str, outbound: &Outbound, correlator: &RequestCorrelator) {
    match parse_message(frame) {
        Ok(IncomingMessage::Response(response)) => match response.outcome {
            Ok(result) => {
                correlator.resolve(&response.id, result).await;
            }
            Err(error) => {
                correlator.reject(&response.id, error.into()).await;
            }
        },
        Ok(IncomingMessage::Request(request)) => {
            tracing::debug!(method = %request.method, "Rejecting server-initiated request");
            let reply = JsonRpcError::method_not_found(request.id, &request.method);
            if let Err(e) = outbound.send_error(&reply).await {
                tracing::warn!(error = %e, "Failed to answer server request");
            }
        }
        Ok(IncomingMessage::Notification(notification)) => {
            tracing::debug!(method = %notification.method, "Server notification");
        }
        Err(e) => {
            // A malformed reply to one of our requests still ends that request.
            let failed = match &e.id {
                Some(id) => {
                    let reason = ClientError::Rpc {
                        code: ErrorCode::InvalidRequest.code(),
                        message: format!("Malformed response from server: {}", e.error.message),
                        data: None,
                    };
                    correlator.fail(id, reason).await
                }
                None => false,
            };
            if !failed {
                tracing::warn!(error = %e.error, "Dropping malformed message from server");
            }
        }
    }
}
