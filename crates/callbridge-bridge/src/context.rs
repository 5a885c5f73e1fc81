// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The bridge context: one per web view, constructed once at startup and
// handed to every capability shim.
//
// Everything here runs on a single execution context (the web side's event
// loop).  Native completions arrive through the `ResultRouter` and are only
// delivered when the owner calls `pump` or awaits `process_next`.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use callbridge_core::config::BridgeConfig;
use callbridge_core::error::Result;
use callbridge_core::types::{CallEnvelope, CallId, CallIdGenerator, NativeResult};

use crate::channel::{
    Channel, ChannelSet, DEVICE_READY, DOM_READY, NATIVE_READY, Readiness, ReadinessState,
};
use crate::deadline::{Deadline, DeadlineHandle};
use crate::registry::{CallbackRegistry, Callbacks, Delivery, Outstanding};
use crate::router::{Completion, ResultInbox, ResultRouter};
use crate::traits::Transport;

/// What happened to an issued call.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Handed to the transport; the result will come through the router.
    Sent { call_id: Option<CallId> },
    /// Held until native readiness.
    Queued { call_id: Option<CallId> },
    /// The transport answered synchronously.  Callbacks have already run.
    Completed {
        call_id: Option<CallId>,
        result: NativeResult,
    },
}

impl Invocation {
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Sent { call_id } | Self::Queued { call_id } | Self::Completed { call_id, .. } => {
                call_id.as_ref()
            }
        }
    }
}

pub struct BridgeContext {
    config: Arc<BridgeConfig>,
    registry: CallbackRegistry,
    channels: ChannelSet,
    readiness: Readiness,
    ids: CallIdGenerator,
    transport: Box<dyn Transport>,
    router: ResultRouter,
    inbox: tokio::sync::Mutex<ResultInbox>,
    outbox: RefCell<VecDeque<CallEnvelope>>,
    native_ready: Cell<bool>,
    deadlines: RefCell<HashMap<CallId, DeadlineHandle>>,
}

impl BridgeContext {
    /// Build a context.  `make_transport` receives the router its transport
    /// should deliver asynchronous results to.
    pub fn new<F>(config: BridgeConfig, make_transport: F) -> Self
    where
        F: FnOnce(ResultRouter) -> Box<dyn Transport>,
    {
        let (router, inbox) = ResultRouter::channel();
        let transport = make_transport(router.clone());
        let channels = ChannelSet::new();
        let readiness = Readiness::install(&channels, &config.ready_gates);

        info!(
            transport = transport.name(),
            wire_format = ?config.wire_format,
            duplicate_policy = ?config.duplicate_policy,
            "bridge context created"
        );

        Self {
            registry: CallbackRegistry::new(config.duplicate_policy),
            ids: CallIdGenerator::new(config.call_ids),
            config: Arc::new(config),
            channels,
            readiness,
            transport,
            router,
            inbox: tokio::sync::Mutex::new(inbox),
            outbox: RefCell::new(VecDeque::new()),
            native_ready: Cell::new(false),
            deadlines: RefCell::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Arc<BridgeConfig> {
        &self.config
    }

    /// A sender native code can complete calls through, from any thread.
    pub fn router(&self) -> ResultRouter {
        self.router.clone()
    }

    // -----------------------------------------------------------------------
    // Call submission
    // -----------------------------------------------------------------------

    /// Issue a call.  With no callbacks the call is fire-and-forget and
    /// carries no callback id.
    pub fn invoke(
        &self,
        target: &str,
        action: &str,
        args: Vec<Value>,
        callbacks: Callbacks,
    ) -> Result<Invocation> {
        self.invoke_with_id(None, target, action, args, callbacks)
    }

    /// Issue a call under an explicit id (e.g. the shared `"global"` watch).
    ///
    /// If the id is still outstanding the new caller's failure callback has
    /// already run when this returns `Err(DuplicateCallId)`.
    pub fn invoke_with_id(
        &self,
        id: Option<CallId>,
        target: &str,
        action: &str,
        args: Vec<Value>,
        callbacks: Callbacks,
    ) -> Result<Invocation> {
        let mut envelope = CallEnvelope::new(target, action, args);

        if !callbacks.is_empty() {
            let id = id.unwrap_or_else(|| self.ids.next_for(target));
            self.registry.register(id.clone(), callbacks)?;
            envelope.callback_id = Some(id);
        } else if let Some(id) = id {
            envelope.callback_id = Some(id);
        }

        if self.config.queue_until_native_ready && !self.native_ready.get() {
            debug!(call = %envelope.qualified_name(), "native not ready; call queued");
            let call_id = envelope.callback_id.clone();
            self.outbox.borrow_mut().push_back(envelope);
            return Ok(Invocation::Queued { call_id });
        }

        self.send(envelope)
    }

    /// Issue a call that fails with a timeout unless a result arrives first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn invoke_with_deadline(
        &self,
        target: &str,
        action: &str,
        args: Vec<Value>,
        callbacks: Callbacks,
        timeout: Duration,
    ) -> Result<Invocation> {
        let invocation = self.invoke(target, action, args, callbacks)?;
        if let Some(id) = invocation.call_id() {
            if self.registry.contains(id) {
                let handle = Deadline::start(self.router.clone(), id.clone(), timeout);
                self.deadlines.borrow_mut().insert(id.clone(), handle);
            }
        }
        Ok(invocation)
    }

    fn send(&self, envelope: CallEnvelope) -> Result<Invocation> {
        let call_id = envelope.callback_id.clone();
        match self.transport.send(&envelope) {
            Ok(Some(result)) => {
                if let Some(id) = &call_id {
                    self.complete(id, &result);
                }
                Ok(Invocation::Completed { call_id, result })
            }
            Ok(None) => Ok(Invocation::Sent { call_id }),
            Err(e) => {
                warn!(call = %envelope.qualified_name(), transport = self.transport.name(), error = %e, "send failed");
                if let Some(id) = &call_id {
                    self.complete(id, &NativeResult::from_error(&e));
                }
                Err(e)
            }
        }
    }

    /// Explicit cancellation (`clearWatch`, `stop`).  Idempotent.
    ///
    /// A call still held for native readiness is dropped from the queue and
    /// never sent.
    pub fn clear(&self, id: &CallId) -> bool {
        self.cancel_deadline(id);
        let unqueued = {
            let mut outbox = self.outbox.borrow_mut();
            let before = outbox.len();
            outbox.retain(|envelope| envelope.callback_id.as_ref() != Some(id));
            before - outbox.len()
        };
        if unqueued > 0 {
            debug!(call_id = %id, "queued call dropped before native ready");
        }
        self.registry.clear(id) || unqueued > 0
    }

    pub fn outstanding(&self) -> Vec<Outstanding> {
        self.registry.outstanding()
    }

    // -----------------------------------------------------------------------
    // Result delivery
    // -----------------------------------------------------------------------

    /// Deliver every completion already queued.  Returns how many ran.
    ///
    /// Does nothing while `process_next` is waiting on the queue.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = match self.inbox.try_lock() {
                Ok(mut inbox) => inbox.try_next(),
                Err(_) => None,
            };
            let Some(completion) = next else {
                break;
            };
            self.deliver(completion);
            delivered += 1;
        }
        delivered
    }

    /// Wait for one completion and deliver it.  Returns `false` once no
    /// router can send any more.
    pub async fn process_next(&self) -> bool {
        let next = self.inbox.lock().await.next().await;
        match next {
            Some(completion) => {
                self.deliver(completion);
                true
            }
            None => false,
        }
    }

    fn deliver(&self, completion: Completion) {
        self.complete(&completion.call_id, &completion.result);
    }

    fn complete(&self, id: &CallId, result: &NativeResult) {
        if self.registry.resolve(id, result) != Delivery::Retained {
            self.cancel_deadline(id);
        }
    }

    fn cancel_deadline(&self, id: &CallId) {
        let handle = self.deadlines.borrow_mut().remove(id);
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    // -----------------------------------------------------------------------
    // Readiness and channels
    // -----------------------------------------------------------------------

    pub fn dom_content_loaded(&self) {
        self.channels.get(DOM_READY).fire(&[]);
    }

    /// Signal that native code accepts calls: flush queued calls in issue
    /// order, then fire `nativeReady`.
    pub fn native_ready(&self) {
        if self.native_ready.replace(true) {
            debug!("native already ready");
            return;
        }

        let queued: Vec<CallEnvelope> = self.outbox.borrow_mut().drain(..).collect();
        if !queued.is_empty() {
            info!(count = queued.len(), "flushing calls queued before native ready");
        }
        for envelope in queued {
            // Failures were already routed to the call's failure callback.
            let _ = self.send(envelope);
        }

        self.channels.get(NATIVE_READY).fire(&[]);
    }

    pub fn channel(&self, name: &str) -> Rc<Channel> {
        self.channels.get(name)
    }

    /// Run `f` once the device is ready (immediately if it already is).
    pub fn on_device_ready(&self, mut f: impl FnMut() + 'static) {
        self.channels.get(DEVICE_READY).subscribe_once(move |_| {
            f();
            true
        });
    }

    pub fn readiness_state(&self) -> ReadinessState {
        self.readiness.state()
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("transport", &self.transport.name())
            .field("pending", &self.registry.len())
            .field("queued", &self.outbox.borrow().len())
            .field("readiness", &self.readiness.state())
            .finish()
    }
}
