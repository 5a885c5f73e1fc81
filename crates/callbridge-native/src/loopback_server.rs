// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Loopback HTTP dispatcher -- lets web content reach native handlers through
// plain requests to `http://localhost:8472/`.
//
// # Request shape
//
//   POST /{target}/{action}[/{segment}...]?args=<urlencoded JSON>&callbackId=<id>
//
// The JSON request body, when present, supplies the arguments: an array is
// the argument list, any other value is a single argument.  Without a body
// the `args` query parameter is used, and a query of plain `key=value` pairs
// becomes one object argument.
//
// With `wire_format = "path"` the call is `POST /{target}/{action}/{arg}...`
// and has no body; with `"json"` it is `POST /` with the JSON envelope as
// the body.
//
// # Response shape
//
// The body is the URL-encoded JSON of `{code, data, msg?}` where code 42 is
// success and a negative code is failure.  Unknown capabilities are answered
// with HTTP 404, malformed requests with 400.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use callbridge_core::codec::{CallCodec, JsonCodec, PathCodec, UrlCodec, encode_component};
use callbridge_core::config::{BridgeConfig, WireFormat};
use callbridge_core::error::{BridgeError, Result};
use callbridge_core::types::{CallEnvelope, NativeResult, ResponseEnvelope};

use crate::dispatcher::{Dispatcher, HandlerEnv};
use crate::http::{HttpRequest, format_response, read_request};

/// Lifecycle of the loopback server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

/// State shared across all connection-handling tasks.
struct SharedState {
    dispatcher: Arc<Dispatcher>,
    config: Arc<BridgeConfig>,
    active_connections: Arc<AtomicU32>,
}

/// Embedded HTTP server exposing a [`Dispatcher`] on a loopback socket.
pub struct LoopbackServer {
    /// Requested bind address; port 0 picks a free port.
    addr: SocketAddr,
    /// Address actually bound while running.
    local_addr: Option<SocketAddr>,
    status: ServerStatus,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
}

impl LoopbackServer {
    /// Create a server for `addr` in `Stopped` state.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            local_addr: None,
            status: ServerStatus::Stopped,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Create a server for the configured host and port.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Ok(Self::new(config.socket_addr()?))
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// The bound address, available once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or cannot be bound.
    pub async fn start(
        &mut self,
        dispatcher: Arc<Dispatcher>,
        config: Arc<BridgeConfig>,
    ) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(addr = %self.addr, "loopback server already running");
            return Ok(());
        }

        self.status = ServerStatus::Starting;

        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(BridgeError::Transport(format!("bind {}: {e}", self.addr)));
            }
        };
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        info!(addr = %local_addr, "loopback dispatcher listening");

        let shared = Arc::new(SharedState {
            dispatcher,
            config,
            active_connections: Arc::clone(&self.active_connections),
        });
        let shutdown = Arc::clone(&self.shutdown_signal);

        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, shared).await;
        });

        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Signal the accept loop to exit and wait for it.
    ///
    /// Connections already being handled run to completion.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(addr = ?self.local_addr, "stopping loopback dispatcher");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| BridgeError::Transport(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        self.local_addr = None;
        info!("loopback dispatcher stopped");
        Ok(())
    }

    async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, shared: Arc<SharedState>) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "incoming bridge connection");
                            let state = Arc::clone(&shared);
                            tokio::spawn(async move {
                                state.active_connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = Self::handle_connection(stream, peer_addr, &state).await {
                                    warn!(peer = %peer_addr, error = %e, "connection handler error");
                                }
                                state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        state: &SharedState,
    ) -> Result<()> {
        let (status, body) = match read_request(&mut stream, state.config.max_request_bytes).await {
            Ok(request) => {
                let dispatcher = Arc::clone(&state.dispatcher);
                let config = Arc::clone(&state.config);
                // Handlers are synchronous and may block.
                tokio::task::spawn_blocking(move || {
                    route_request(&request, Some(peer_addr), &dispatcher, &config)
                })
                .await
                .map_err(|e| BridgeError::Handler(format!("dispatch task: {e}")))?
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "unreadable bridge request");
                error_response(400, &NativeResult::from_error(&e))
            }
        };

        stream.write_all(&format_response(status, &body)).await?;
        stream.flush().await?;

        debug!(peer = %peer_addr, status, bytes = body.len(), "bridge response sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request routing
// ---------------------------------------------------------------------------

/// Turn one HTTP request into an HTTP status and encoded response body.
pub fn route_request(
    request: &HttpRequest,
    peer: Option<SocketAddr>,
    dispatcher: &Dispatcher,
    config: &Arc<BridgeConfig>,
) -> (u16, Vec<u8>) {
    if request.method != "POST" && request.method != "GET" {
        let err = BridgeError::Decode(format!("method {} not allowed", request.method));
        return error_response(405, &NativeResult::from_error(&err));
    }

    let envelope = match decode_call(request, config.wire_format) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(path = %request.path, format = ?config.wire_format, error = %e, "malformed bridge request");
            return error_response(400, &NativeResult::from_error(&e));
        }
    };

    let mut env = HandlerEnv::new()
        .with_callback_id(envelope.callback_id.clone())
        .with_config(Arc::clone(config));
    env.origin = request.header("origin").map(str::to_owned);
    env.peer = peer;

    let result = dispatcher.handle(&envelope, &env);
    let status = if result.payload.get("code").and_then(Value::as_i64) == Some(404)
        && !result.status.is_success()
    {
        404
    } else {
        200
    };
    (status, encode_result(&result))
}

fn decode_call(request: &HttpRequest, format: WireFormat) -> Result<CallEnvelope> {
    match format {
        WireFormat::Url => {
            let mut envelope = UrlCodec.decode(&request.path)?;
            if !request.body.is_empty() {
                envelope.args = match serde_json::from_slice::<Value>(&request.body) {
                    Ok(Value::Array(args)) => args,
                    Ok(single) => vec![single],
                    Err(e) => {
                        return Err(BridgeError::Decode(format!("request body is not JSON: {e}")));
                    }
                };
            }
            Ok(envelope)
        }
        WireFormat::Path => PathCodec.decode(&request.path),
        WireFormat::Json => {
            let text = std::str::from_utf8(&request.body)
                .map_err(|e| BridgeError::Decode(format!("request body is not UTF-8: {e}")))?;
            JsonCodec.decode(text)
        }
    }
}

fn error_response(status: u16, result: &NativeResult) -> (u16, Vec<u8>) {
    (status, encode_result(result))
}

/// URL-encoded JSON of the response envelope.
fn encode_result(result: &NativeResult) -> Vec<u8> {
    let envelope = ResponseEnvelope::from_result(result);
    // Serializing a tree of plain JSON values cannot fail.
    let json = serde_json::to_string(&envelope).unwrap_or_else(|_| "{\"code\":-1}".into());
    encode_component(&json).into_bytes()
}
