// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Callback registry -- owns the lifecycle of every pending call.
//
// An entry is created when a call is issued and destroyed when a terminal
// result arrives, when the caller clears it, or never (for watches) until
// cleared.  User callbacks run with no registry borrow held, so they may
// issue or clear calls themselves.  A panicking callback is caught and
// logged; it never reaches the delivery loop.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, warn};

use callbridge_core::config::DuplicatePolicy;
use callbridge_core::error::{BridgeError, Result, panic_message};
use callbridge_core::types::{CallId, NativeResult, Status};

type CallbackFn = Box<dyn FnMut(&Value)>;

/// Success and failure handlers for one call.  Either may be absent.
#[derive(Default)]
pub struct Callbacks {
    on_success: Option<CallbackFn>,
    on_failure: Option<CallbackFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl FnMut(&Value) + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl FnMut(&Value) + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// True when neither handler is set (a fire-and-forget call).
    pub fn is_empty(&self) -> bool {
        self.on_success.is_none() && self.on_failure.is_none()
    }

    fn fail(&mut self, call_id: &CallId, payload: &Value) {
        if let Some(f) = self.on_failure.as_mut() {
            run_guarded(call_id, "failure", f, payload);
        }
    }

    fn succeed(&mut self, call_id: &CallId, payload: &Value) {
        if let Some(f) = self.on_success.as_mut() {
            run_guarded(call_id, "success", f, payload);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

fn run_guarded(call_id: &CallId, kind: &str, f: &mut CallbackFn, payload: &Value) {
    if let Err(caught) = catch_unwind(AssertUnwindSafe(|| f(payload))) {
        let err = BridgeError::Callback(panic_message(caught.as_ref()));
        error!(call_id = %call_id, kind, error = %err, "callback panicked");
    }
}

struct PendingCall {
    callbacks: Callbacks,
    issued_at: DateTime<Utc>,
    deliveries: u32,
}

/// What `resolve` did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No pending call had that id; nothing was invoked.
    Unknown,
    /// The entry was removed after delivery.
    Completed,
    /// The entry is still registered (keepCallback).
    Retained,
}

/// A still-pending call, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outstanding {
    pub call_id: CallId,
    pub issued_at: DateTime<Utc>,
    pub age: chrono::Duration,
    pub deliveries: u32,
}

/// Map from call id to its pending callbacks.
pub struct CallbackRegistry {
    pending: RefCell<HashMap<CallId, Rc<RefCell<PendingCall>>>>,
    policy: DuplicatePolicy,
}

impl CallbackRegistry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            pending: RefCell::new(HashMap::new()),
            policy,
        }
    }

    /// Register callbacks under `id`.
    ///
    /// Under [`DuplicatePolicy::Reject`] an id that is still pending fails
    /// the *new* caller: its failure callback runs immediately with the
    /// duplicate payload and the original entry is left untouched.
    pub fn register(&self, id: CallId, mut callbacks: Callbacks) -> Result<()> {
        let duplicate = self.pending.borrow().contains_key(&id);
        if duplicate {
            match self.policy {
                DuplicatePolicy::Reject => {
                    let err = BridgeError::DuplicateCallId(id.to_string());
                    warn!(call_id = %id, "rejecting call: id still outstanding");
                    callbacks.fail(&id, &err.to_payload());
                    return Err(err);
                }
                DuplicatePolicy::Overwrite => {
                    warn!(call_id = %id, "overwriting outstanding call");
                }
            }
        }

        let call = PendingCall {
            callbacks,
            issued_at: Utc::now(),
            deliveries: 0,
        };
        self.pending
            .borrow_mut()
            .insert(id.clone(), Rc::new(RefCell::new(call)));
        debug!(call_id = %id, "call registered");
        Ok(())
    }

    /// Route `result` to the callbacks registered under `id`.
    ///
    /// OK runs the success callback, NO_RESULT runs nothing, every other
    /// status runs the failure callback.  Unknown ids are logged and
    /// ignored: the result may have raced a clear.
    pub fn resolve(&self, id: &CallId, result: &NativeResult) -> Delivery {
        let entry = {
            let mut pending = self.pending.borrow_mut();
            if result.keep_callback {
                pending.get(id).cloned()
            } else {
                pending.remove(id)
            }
        };

        let Some(entry) = entry else {
            debug!(call_id = %id, status = ?result.status, "result for unknown call ignored");
            return Delivery::Unknown;
        };

        match entry.try_borrow_mut() {
            Ok(mut call) => {
                call.deliveries += 1;
                let elapsed = Utc::now() - call.issued_at;
                debug!(
                    call_id = %id,
                    status = ?result.status,
                    keep = result.keep_callback,
                    elapsed_ms = elapsed.num_milliseconds(),
                    delivery = call.deliveries,
                    "delivering result"
                );
                match result.status {
                    Status::Ok => call.callbacks.succeed(id, &result.payload),
                    Status::NoResult => {}
                    _ => call.callbacks.fail(id, &result.payload),
                }
            }
            Err(_) => {
                // Only reachable when a callback resolves its own id.
                warn!(call_id = %id, "re-entrant delivery skipped");
            }
        }

        if result.keep_callback {
            Delivery::Retained
        } else {
            Delivery::Completed
        }
    }

    /// Remove `id` without invoking anything.  Returns whether it existed.
    pub fn clear(&self, id: &CallId) -> bool {
        let removed = self.pending.borrow_mut().remove(id).is_some();
        if removed {
            debug!(call_id = %id, "call cleared");
        }
        removed
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.pending.borrow().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Pending calls, oldest first.
    pub fn outstanding(&self) -> Vec<Outstanding> {
        let now = Utc::now();
        let mut list: Vec<Outstanding> = self
            .pending
            .borrow()
            .iter()
            .filter_map(|(id, call)| {
                let call = call.try_borrow().ok()?;
                Some(Outstanding {
                    call_id: id.clone(),
                    issued_at: call.issued_at,
                    age: now - call.issued_at,
                    deliveries: call.deliveries,
                })
            })
            .collect();
        list.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then_with(|| a.call_id.cmp(&b.call_id)));
        list
    }
}
