// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Loopback transport -- posts calls to a `LoopbackServer` over HTTP.
//
// `send` never waits: the call joins an ordered outbound queue drained by a
// single writer task, which posts one call at a time in issue order.  Each
// response is routed back through the `ResultRouter` like any other native
// completion.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use callbridge_core::codec::{CallCodec, JsonCodec, PathCodec, UrlCodec, decode_component};
use callbridge_core::config::{BridgeConfig, WireFormat};
use callbridge_core::error::{BridgeError, Result};
use callbridge_core::types::{CallEnvelope, CallId, NativeResult, ResponseEnvelope};
use callbridge_native::http::{format_request, read_response};

use crate::router::ResultRouter;
use crate::traits::Transport;

/// Connect timeout for one call.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// One encoded call waiting for the writer.
struct Outbound {
    path: String,
    body: Vec<u8>,
    call: String,
    call_id: Option<CallId>,
}

pub struct LoopbackTransport {
    addr: SocketAddr,
    origin: Option<String>,
    max_response_bytes: usize,
    wire_format: WireFormat,
    router: ResultRouter,
    /// Started on the first send, inside the caller's runtime.
    writer: RefCell<Option<mpsc::UnboundedSender<Outbound>>>,
}

impl LoopbackTransport {
    pub fn new(addr: SocketAddr, router: ResultRouter) -> Self {
        Self {
            addr,
            origin: None,
            max_response_bytes: BridgeConfig::default().max_request_bytes,
            wire_format: WireFormat::Url,
            router,
            writer: RefCell::new(None),
        }
    }

    /// Target the configured host and port, speaking the configured wire
    /// format.
    pub fn from_config(config: &BridgeConfig, router: ResultRouter) -> Result<Self> {
        let mut transport = Self::new(config.socket_addr()?, router);
        transport.max_response_bytes = config.max_request_bytes;
        transport.wire_format = config.wire_format;
        Ok(transport)
    }

    /// `Origin` header sent with every call.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    /// Request path and body for `envelope`.
    fn encode(&self, envelope: &CallEnvelope) -> Result<(String, Vec<u8>)> {
        match self.wire_format {
            WireFormat::Url => {
                // Arguments travel in the body; the path carries target,
                // action and id.
                let mut bare = envelope.clone();
                bare.args.clear();
                Ok((UrlCodec.encode(&bare)?, serde_json::to_vec(&envelope.args)?))
            }
            WireFormat::Path => Ok((PathCodec.encode(envelope)?, Vec::new())),
            WireFormat::Json => Ok((String::new(), JsonCodec.encode(envelope)?.into_bytes())),
        }
    }

    fn enqueue(&self, outbound: Outbound) -> Result<()> {
        let mut writer = self.writer.borrow_mut();
        let outbound = match writer.as_ref() {
            Some(tx) => match tx.send(outbound) {
                Ok(()) => return Ok(()),
                // The writer's runtime went away; start a new one below.
                Err(mpsc::error::SendError(outbound)) => outbound,
            },
            None => outbound,
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::Transport(format!("loopback transport needs a runtime: {e}")))?;
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(write_loop(
            rx,
            self.addr,
            self.origin.clone(),
            self.max_response_bytes,
            self.router.clone(),
        ));
        debug!(addr = %self.addr, format = ?self.wire_format, "loopback writer started");

        tx.send(outbound)
            .map_err(|_| BridgeError::Transport("loopback writer stopped".into()))?;
        *writer = Some(tx);
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    fn send(&self, envelope: &CallEnvelope) -> Result<Option<NativeResult>> {
        let (path, body) = self.encode(envelope)?;
        self.enqueue(Outbound {
            path,
            body,
            call: envelope.qualified_name(),
            call_id: envelope.callback_id.clone(),
        })?;
        Ok(None)
    }
}

/// Post queued calls one at a time until every sender is gone.
async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    addr: SocketAddr,
    origin: Option<String>,
    max_bytes: usize,
    router: ResultRouter,
) {
    while let Some(outbound) = rx.recv().await {
        let result = match post(addr, &outbound.path, origin.as_deref(), &outbound.body, max_bytes).await {
            Ok(result) => result,
            Err(e) => {
                warn!(call = %outbound.call, error = %e, "loopback call failed");
                let err = match e {
                    BridgeError::Transport(_) => e,
                    other => BridgeError::Transport(other.to_string()),
                };
                NativeResult::from_error(&err)
            }
        };
        match outbound.call_id {
            Some(id) => router.on_native_callback(id, result),
            None => debug!(call = %outbound.call, status = ?result.status, "fire-and-forget call finished"),
        }
    }
    debug!(addr = %addr, "loopback writer stopped");
}

/// Post one call and decode the response envelope.
pub async fn post(
    addr: SocketAddr,
    path: &str,
    origin: Option<&str>,
    body: &[u8],
    max_bytes: usize,
) -> Result<NativeResult> {
    let mut stream = tokio::time::timeout(
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
        TcpStream::connect(addr),
    )
    .await
    .map_err(|_| {
        BridgeError::Transport(format!(
            "connection to {addr} timed out after {CONNECT_TIMEOUT_SECS}s"
        ))
    })?
    .map_err(|e| BridgeError::Transport(format!("connect to {addr}: {e}")))?;

    stream
        .write_all(&format_request(&addr.to_string(), path, origin, body))
        .await
        .map_err(|e| BridgeError::Transport(format!("write request: {e}")))?;

    let response = read_response(&mut stream, max_bytes).await?;
    let text = std::str::from_utf8(&response.body)
        .map_err(|e| BridgeError::Transport(format!("response is not UTF-8: {e}")))?;
    let envelope: ResponseEnvelope = serde_json::from_str(&decode_component(text)?)?;

    info!(addr = %addr, http_status = response.status, code = envelope.code, "loopback response");
    Ok(envelope.into_result())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::{Value, json};

    use callbridge_core::types::Status;
    use callbridge_native::dispatcher::Dispatcher;
    use callbridge_native::loopback_server::LoopbackServer;

    /// Echo handler that records the order calls reach it.
    fn recording_dispatcher(seen: Arc<Mutex<Vec<i64>>>) -> Arc<Dispatcher> {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler("Echo", "echo", move |reply, args, _| {
            let n = args
                .first()
                .and_then(|a| a.as_i64().or_else(|| a.as_str().and_then(|s| s.parse().ok())))
                .unwrap_or(-1);
            seen.lock().expect("seen poisoned").push(n);
            reply.success(Value::Array(args.to_vec()));
            Ok(())
        });
        Arc::new(dispatcher)
    }

    async fn start_server(dispatcher: Arc<Dispatcher>, format: WireFormat) -> LoopbackServer {
        let config = BridgeConfig {
            wire_format: format,
            ..Default::default()
        };
        let mut server = LoopbackServer::new("127.0.0.1:0".parse().expect("addr"));
        server.start(dispatcher, Arc::new(config)).await.expect("start");
        server
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn calls_reach_native_in_issue_order() {
        const CALLS: i64 = 100;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut server = start_server(recording_dispatcher(Arc::clone(&seen)), WireFormat::Url).await;
        let addr = server.local_addr().expect("bound");

        let (router, mut inbox) = ResultRouter::channel();
        let transport = LoopbackTransport::new(addr, router);
        for i in 0..CALLS {
            let envelope = CallEnvelope::new("Echo", "echo", vec![json!(i)])
                .with_callback_id(CallId(format!("Echo{i}")));
            assert!(transport.send(&envelope).expect("send").is_none());
        }

        for _ in 0..CALLS {
            let completion = tokio::time::timeout(Duration::from_secs(10), inbox.next())
                .await
                .expect("completion in time")
                .expect("router open");
            assert_eq!(completion.result.status, Status::Ok);
        }

        let seen = seen.lock().expect("seen poisoned").clone();
        assert_eq!(seen, (0..CALLS).collect::<Vec<_>>());
        server.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn configured_wire_formats_reach_the_handler() {
        for format in [WireFormat::Url, WireFormat::Path, WireFormat::Json] {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let mut server = start_server(recording_dispatcher(Arc::clone(&seen)), format).await;
            let addr = server.local_addr().expect("bound");

            let (router, mut inbox) = ResultRouter::channel();
            let transport = LoopbackTransport::new(addr, router).with_wire_format(format);
            let envelope = CallEnvelope::new("Echo", "echo", vec![json!(7), json!("x y")])
                .with_callback_id(CallId::from("Echo0"));
            transport.send(&envelope).expect("send");

            let completion = inbox.next().await.expect("completion");
            assert_eq!(completion.call_id.as_str(), "Echo0");
            assert_eq!(completion.result.status, Status::Ok, "{format:?}");
            let expected = match format {
                WireFormat::Path => json!(["7", "x y"]),
                _ => json!([7, "x y"]),
            };
            assert_eq!(completion.result.payload, expected, "{format:?}");
            assert_eq!(*seen.lock().expect("seen poisoned"), [7]);
            server.stop().await.expect("stop");
        }
    }
}
