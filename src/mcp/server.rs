//! Server side of the MCP protocol engine.
//!
//! This module implements the MCP server lifecycle, once per connection:
//!
//! 1. **Initialisation**: version check and capability advertisement
//! 2. **Operation**: routing tool, prompt and sampling requests
//! 3. **Shutdown**: the peer hangs up or the server is stopped
//!
//! # Architecture
//!
//! The listener accepts any number of connections and gives each its own
//! session task. A session reads frames in arrival order. Handshake
//! messages are handled inline so their state changes are ordered with the
//! frames that follow; every other request runs in its own task, so a slow
//! handler never delays answering an unrelated request.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::mcp::dispatch::{Dispatcher, Method};
use crate::mcp::protocol::{
    parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::mcp::registry::MethodRegistry;
use crate::mcp::transport::{Connection, Outbound};

/// Session state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize answered, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// The connection is closing.
    ShuttingDown,
}

/// An MCP server listening for WebSocket connections.
pub struct McpServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl McpServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: &str, registry: Arc<MethodRegistry>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        tracing::debug!(?registry, "Registry loaded");

        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(registry),
        })
    }

    /// The address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Open sessions are closed when the server stops.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept failures are logged and the
    /// loop continues.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let sessions = CancellationToken::new();
        tokio::pin!(shutdown);

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "MCP server listening");
        }

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutting down MCP server");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = self.dispatcher.clone();
                        let cancel = sessions.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = run_session(stream, peer, dispatcher, cancel).await {
                                tracing::warn!(%peer, error = %e, "Session failed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
                },
            }
        }

        sessions.cancel();
        Ok(())
    }

    /// Runs the server until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed.
    #[cfg(unix)]
    pub async fn run(self) -> Result<(), ServerError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        self.serve(async move {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
        })
        .await
    }

    /// Runs the server until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound.
    #[cfg(windows)]
    pub async fn run(self) -> Result<(), ServerError> {
        self.serve(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
        })
        .await
    }
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) -> io::Result<()> {
    let connection = Connection::accept(stream).await?;
    let (mut reader, outbound, writer) = connection.split(cancel.clone());
    let mut session = Session::new(dispatcher, outbound);

    tracing::info!(%peer, "Client connected");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,

            frame = reader.read_frame() => match frame {
                Ok(Some(frame)) => session.handle_frame(&frame).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "Connection failed");
                    break;
                }
            },
        }
    }

    session.shut_down(peer);

    cancel.cancel();
    let _ = writer.await;
    Ok(())
}

/// One connection's protocol state.
struct Session {
    state: ServerState,
    dispatcher: Dispatcher,
    outbound: Outbound,
}

impl Session {
    const fn new(dispatcher: Dispatcher, outbound: Outbound) -> Self {
        Self {
            state: ServerState::AwaitingInit,
            dispatcher,
            outbound,
        }
    }

    fn shut_down(&mut self, peer: SocketAddr) {
        let previous = std::mem::replace(&mut self.state, ServerState::ShuttingDown);
        tracing::info!(%peer, ?previous, "Client disconnected");
    }

    async fn handle_frame(&mut self, frame: &str) {
        let message = parse_message(frame);
        if let Ok(message) = &message {
            tracing::trace!(
                method = message.method().unwrap_or("-"),
                id = ?message.id(),
                state = ?self.state,
                "Frame received"
            );
        }

        match message {
            Ok(IncomingMessage::Request(request)) => self.handle_request(request).await,
            Ok(IncomingMessage::Notification(notification)) => {
                self.handle_notification(notification);
            }
            Ok(IncomingMessage::Response(response)) => {
                tracing::warn!(id = %response.id, "Discarding response: no requests are outstanding");
            }
            Err(error) if error.is_addressable() => {
                tracing::warn!(error = %error.error, "Rejecting malformed request");
                if let Err(e) = self.outbound.send_error(&error).await {
                    tracing::debug!(error = %e, "Failed to send error response");
                }
            }
            Err(error) => {
                tracing::warn!(error = %error.error, "Dropping malformed message");
            }
        }
    }

    async fn handle_request(&mut self, request: JsonRpcRequest) {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        tracing::debug!(method = %method, id = %id, "Request received");

        let Some(known) = Method::from_name(&method) else {
            let error = JsonRpcError::method_not_found(id, &method);
            send_error(&self.outbound, error).await;
            return;
        };

        if known.is_notification() {
            let error = JsonRpcErrorData::with_message(
                ErrorCode::InvalidRequest,
                format!("{method} must be sent as a notification"),
            );
            respond(&self.outbound, id, Err(error)).await;
            return;
        }

        match known {
            Method::Initialize => {
                let outcome = self.initialize(params);
                respond(&self.outbound, id, outcome).await;
            }
            Method::Ping => {
                let outcome = self.dispatcher.dispatch(known, params).await;
                respond(&self.outbound, id, outcome).await;
            }
            _ if self.state == ServerState::AwaitingInit && !known.allowed_before_init() => {
                let error =
                    JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server not initialised");
                respond(&self.outbound, id, Err(error)).await;
            }
            _ => {
                let dispatcher = self.dispatcher.clone();
                let outbound = self.outbound.clone();
                tokio::spawn(async move {
                    let outcome = dispatcher.dispatch(known, params).await;
                    respond(&outbound, id, outcome).await;
                });
            }
        }
    }

    fn initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcErrorData::with_message(
                ErrorCode::InvalidRequest,
                "Server already initialised",
            ));
        }

        let result = self.dispatcher.initialize(params)?;
        self.state = ServerState::Initialising;
        Ok(result)
    }

    fn handle_notification(&mut self, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;

        match Method::from_name(&method) {
            Some(Method::Initialized) => {
                if self.state == ServerState::Initialising {
                    self.state = ServerState::Running;
                    tracing::info!("Session running");
                } else {
                    tracing::debug!(state = ?self.state, "Ignoring initialized notification");
                }
            }
            Some(known) if self.state != ServerState::AwaitingInit => {
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.dispatch(known, params).await {
                        tracing::warn!(method = %method, error = %e, "Notification handler failed");
                    }
                });
            }
            Some(_) => {
                tracing::debug!(method = %method, "Ignoring notification before initialisation");
            }
            None => {
                tracing::debug!(method = %method, "Ignoring unknown notification");
            }
        }
    }
}

async fn respond(outbound: &Outbound, id: RequestId, outcome: Result<Value, JsonRpcErrorData>) {
    match outcome {
        Ok(result) => {
            if let Err(e) = outbound
                .send_response(&JsonRpcResponse::success(id, result))
                .await
            {
                tracing::debug!(error = %e, "Dropping response, connection is gone");
            }
        }
        Err(error) => {
            tracing::debug!(id = %id, error = %error, "Request failed");
            send_error(outbound, JsonRpcError::new(Some(id), error)).await;
        }
    }
}

async fn send_error(outbound: &Outbound, error: JsonRpcError) {
    if let Err(e) = outbound.send_error(&error).await {
        tracing::debug!(error = %e, "Dropping error response, connection is gone");
    }
}
