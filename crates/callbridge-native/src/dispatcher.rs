// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Native-side request router.
//
// Capabilities register handlers under `target` + `action`.  An action may be
// a multi-level method path (`getReadOnlyFields/a/b`); the table stores it as
// a tree built at registration time and resolves it one segment at a time.
//
// A handler receives a `Reply` it may settle at most once.  The first
// settlement wins; later attempts are logged and dropped.  A handler that
// never settles produces NO_RESULT, the fire-and-forget outcome.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, instrument, warn};

use callbridge_core::codec::CallCodec;
use callbridge_core::config::BridgeConfig;
use callbridge_core::diagnostics::diagnose;
use callbridge_core::error::{BridgeError, Result, panic_message};
use callbridge_core::types::{CallEnvelope, CallId, NativeResult, ResultSink, Status};

/// Signature every native handler implements.
pub type HandlerFn = dyn Fn(&mut Reply, &[Value], &HandlerEnv) -> Result<()> + Send + Sync;

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// The one-shot result slot handed to a handler.
#[derive(Debug)]
pub struct Reply {
    qualified_name: String,
    settled: Option<(Status, Value)>,
    keep_callback: bool,
}

impl Reply {
    fn new(qualified_name: String) -> Self {
        Self {
            qualified_name,
            settled: None,
            keep_callback: false,
        }
    }

    pub fn success(&mut self, payload: Value) {
        self.settle(Status::Ok, payload);
    }

    pub fn failure(&mut self, code: i32, message: impl Into<String>) {
        let message = message.into();
        self.settle(
            Status::Error,
            serde_json::json!({ "code": code, "message": message }),
        );
    }

    /// Settle with an explicit legacy status, e.g. INVALID_ACTION.
    pub fn status(&mut self, status: Status, payload: Value) {
        self.settle(status, payload);
    }

    /// Keep the caller's callback registered after this result.
    pub fn keep_callback(&mut self) {
        self.keep_callback = true;
    }

    pub fn is_settled(&self) -> bool {
        self.settled.is_some()
    }

    fn settle(&mut self, status: Status, payload: Value) {
        if let Some((first, _)) = &self.settled {
            warn!(
                call = %self.qualified_name,
                first = ?first,
                ignored = ?status,
                "handler replied more than once; keeping the first reply"
            );
            return;
        }
        self.settled = Some((status, payload));
    }

    fn finish(self) -> NativeResult {
        let (status, payload) = self.settled.unwrap_or((Status::NoResult, Value::Null));
        NativeResult::new(status, payload, self.keep_callback)
    }
}

// ---------------------------------------------------------------------------
// Handler environment
// ---------------------------------------------------------------------------

/// Context a handler may need but the router itself does not.
#[derive(Clone, Default)]
pub struct HandlerEnv {
    pub callback_id: Option<CallId>,
    /// `Origin` of the web content that issued the call, when known.
    pub origin: Option<String>,
    pub peer: Option<SocketAddr>,
    pub config: Option<Arc<BridgeConfig>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl HandlerEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback_id(mut self, id: Option<CallId>) -> Self {
        self.callback_id = id;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_config(mut self, config: Arc<BridgeConfig>) -> Self {
        self.config = Some(config);
        self
    }

    /// A handle for delivering results after the handler returns.
    ///
    /// Returns `None` for fire-and-forget calls or when no sink is attached.
    pub fn responder(&self) -> Option<Responder> {
        Some(Responder {
            call_id: self.callback_id.clone()?,
            sink: Arc::clone(self.sink.as_ref()?),
        })
    }
}

impl std::fmt::Debug for HandlerEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEnv")
            .field("callback_id", &self.callback_id)
            .field("origin", &self.origin)
            .field("peer", &self.peer)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

/// Delivers later (asynchronous or repeating) results for one call.
#[derive(Clone)]
pub struct Responder {
    call_id: CallId,
    sink: Arc<dyn ResultSink>,
}

impl Responder {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn send(&self, result: NativeResult) {
        self.sink.deliver(self.call_id.clone(), result);
    }

    pub fn success(&self, payload: Value, keep_callback: bool) {
        self.send(NativeResult::new(Status::Ok, payload, keep_callback));
    }

    pub fn failure(&self, code: i32, message: impl Into<String>) {
        self.send(NativeResult::error(code, message));
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MethodNode {
    handler: Option<Arc<HandlerFn>>,
    children: HashMap<String, MethodNode>,
}

/// Handler table keyed by target, then by method path segment.
#[derive(Default)]
pub struct Dispatcher {
    targets: RwLock<HashMap<String, MethodNode>>,
    fallback: RwLock<Option<Arc<HandlerFn>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `target.action`.
    ///
    /// `action` may contain `/` to register a nested method path.  A later
    /// registration for the same path replaces the earlier one.  Names with
    /// an empty path segment are refused.
    pub fn register_handler<F>(&self, target: &str, action: &str, handler: F)
    where
        F: Fn(&mut Reply, &[Value], &HandlerEnv) -> Result<()> + Send + Sync + 'static,
    {
        if target.is_empty() || action.split('/').any(str::is_empty) {
            warn!(target_name = target, action, "handler not registered: empty name or path segment");
            return;
        }
        let mut targets = self.targets.write().expect("dispatcher table poisoned");
        let mut node = targets.entry(target.to_owned()).or_default();
        for segment in action.split('/') {
            node = node.children.entry(segment.to_owned()).or_default();
        }
        if node.handler.replace(Arc::new(handler)).is_some() {
            debug!(target_name = target, action, "handler replaced");
        } else {
            debug!(target_name = target, action, "handler registered");
        }
    }

    /// Handler for calls whose target has no registration.
    pub fn set_fallback<F>(&self, handler: F)
    where
        F: Fn(&mut Reply, &[Value], &HandlerEnv) -> Result<()> + Send + Sync + 'static,
    {
        *self.fallback.write().expect("dispatcher fallback poisoned") = Some(Arc::new(handler));
    }

    pub fn has_handler(&self, target: &str, action: &str) -> bool {
        self.lookup(target, action).is_ok()
    }

    /// Decode `raw` with `codec` and handle it.  Decode failures become an
    /// ERROR result without reaching any handler.
    pub fn handle_raw(&self, raw: &str, codec: &dyn CallCodec, env: &HandlerEnv) -> NativeResult {
        match codec.decode(raw) {
            Ok(envelope) => {
                let env = env.clone().with_callback_id(envelope.callback_id.clone());
                self.handle(&envelope, &env)
            }
            Err(e) => {
                warn!(error = %e, format = ?codec.format(), "dropping undecodable call");
                NativeResult::from_error(&e)
            }
        }
    }

    /// Resolve and run the handler for one call.
    #[instrument(skip_all, fields(service = %envelope.target, action = %envelope.action))]
    pub fn handle(&self, envelope: &CallEnvelope, env: &HandlerEnv) -> NativeResult {
        let handler = match self.resolve(&envelope.target, &envelope.action) {
            Ok(handler) => handler,
            Err(e) => {
                let diagnostic = diagnose(&e);
                warn!(
                    summary = %diagnostic.summary,
                    hint = %diagnostic.hint,
                    "call to unregistered capability"
                );
                return NativeResult::from_error(&e);
            }
        };

        let mut reply = Reply::new(envelope.qualified_name());
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&mut reply, &envelope.args, env)));

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(BridgeError::Handler(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };

        if let Some(err) = failure {
            if reply.is_settled() {
                warn!(error = %err, "handler failed after replying; keeping its reply");
            } else {
                warn!(error = %err, "handler failed");
                let mut result = NativeResult::from_error(&err);
                result.keep_callback = reply.keep_callback;
                return result;
            }
        }

        let result = reply.finish();
        debug!(status = ?result.status, keep = result.keep_callback, "handler finished");
        result
    }

    fn resolve(&self, target: &str, action: &str) -> Result<Arc<HandlerFn>> {
        match self.lookup(target, action) {
            Ok(handler) => Ok(handler),
            Err(e) => {
                let unknown_target = matches!(
                    &e,
                    BridgeError::HandlerNotFound { missing, .. } if missing == target
                );
                if unknown_target {
                    if let Some(fallback) =
                        self.fallback.read().expect("dispatcher fallback poisoned").clone()
                    {
                        debug!(target_name = target, "routing to fallback handler");
                        return Ok(fallback);
                    }
                }
                Err(e)
            }
        }
    }

    fn lookup(&self, target: &str, action: &str) -> Result<Arc<HandlerFn>> {
        let not_found = |missing: &str| BridgeError::HandlerNotFound {
            target: target.to_owned(),
            action: action.to_owned(),
            missing: missing.to_owned(),
        };

        let targets = self.targets.read().expect("dispatcher table poisoned");
        let mut node = targets.get(target).ok_or_else(|| not_found(target))?;
        for segment in action.split('/') {
            node = node.children.get(segment).ok_or_else(|| not_found(segment))?;
        }
        node.handler.clone().ok_or_else(|| not_found(action))
    }
}
