// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-call deadlines.
//
// A deadline races a timer against a cancel signal.  If the timer wins, a
// timeout ERROR is routed to the call like any other native result; a real
// result arriving afterwards finds no entry and is ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use callbridge_core::error::BridgeError;
use callbridge_core::types::{CallId, NativeResult, ResultSink};

use crate::router::ResultRouter;

/// Starts deadline timers.
pub struct Deadline;

impl Deadline {
    /// Deliver a timeout for `call_id` after `timeout` unless cancelled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(router: ResultRouter, call_id: CallId, timeout: Duration) -> DeadlineHandle {
        let cancel = Arc::new(Notify::new());
        let signal = Arc::clone(&cancel);
        let id = call_id.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let err = BridgeError::Timeout(id.to_string());
                    warn!(call_id = %id, timeout_ms = timeout.as_millis() as u64, "call timed out");
                    router.deliver(id, NativeResult::from_error(&err));
                }
                _ = signal.notified() => {
                    debug!(call_id = %id, "deadline cancelled");
                }
            }
        });

        DeadlineHandle {
            call_id,
            cancel,
            task,
        }
    }
}

/// A running deadline.
#[derive(Debug)]
pub struct DeadlineHandle {
    call_id: CallId,
    cancel: Arc<Notify>,
    task: JoinHandle<()>,
}

impl DeadlineHandle {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the timer.  Has no effect once it has fired.
    pub fn cancel(self) {
        // notify_one stores a permit if the task is not yet waiting.
        self.cancel.notify_one();
    }
}
