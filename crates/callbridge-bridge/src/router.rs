// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Result router -- the single entry point for native-to-web completions.
//
// Native code may complete calls from any thread.  The router only enqueues;
// the bridge drains the queue on its own execution context, so registry
// lookups and user callbacks never run on a native thread.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use callbridge_core::types::{CallId, NativeResult, ResultSink, Status};

/// One completed (or progressing) native call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub call_id: CallId,
    pub result: NativeResult,
}

/// Cloneable, thread-safe sender side of the completion queue.
#[derive(Debug, Clone)]
pub struct ResultRouter {
    tx: mpsc::UnboundedSender<Completion>,
}

/// Receiving side, owned by the bridge context.
#[derive(Debug)]
pub struct ResultInbox {
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl ResultRouter {
    pub fn channel() -> (ResultRouter, ResultInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ResultRouter { tx }, ResultInbox { rx })
    }

    /// Host-facing form: `deliverResult(callId, status, payload, keepCallback)`.
    pub fn deliver_result(
        &self,
        call_id: impl Into<CallId>,
        status: Status,
        payload: Value,
        keep_callback: bool,
    ) {
        self.on_native_callback(
            call_id.into(),
            NativeResult::new(status, payload, keep_callback),
        );
    }

    pub fn on_native_callback(&self, call_id: CallId, result: NativeResult) {
        trace!(call_id = %call_id, status = ?result.status, "completion queued");
        if self.tx.send(Completion { call_id, result }).is_err() {
            warn!("bridge context is gone; completion dropped");
        }
    }
}

impl ResultSink for ResultRouter {
    fn deliver(&self, call_id: CallId, result: NativeResult) {
        self.on_native_callback(call_id, result);
    }
}

impl ResultInbox {
    /// Next queued completion, without waiting.
    pub fn try_next(&mut self) -> Option<Completion> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next completion.  `None` once every router is dropped.
    pub async fn next(&mut self) -> Option<Completion> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completions_keep_arrival_order() {
        let (router, mut inbox) = ResultRouter::channel();
        router.deliver_result("b", Status::Ok, json!(2), false);
        router.deliver_result("a", Status::Ok, json!(1), false);

        assert_eq!(inbox.try_next().expect("first").call_id.as_str(), "b");
        assert_eq!(inbox.try_next().expect("second").call_id.as_str(), "a");
        assert!(inbox.try_next().is_none());
    }

    #[test]
    fn delivery_from_another_thread() {
        let (router, mut inbox) = ResultRouter::channel();
        let remote = router.clone();
        std::thread::spawn(move || {
            remote.deliver(CallId::from("Camera0"), NativeResult::ok(json!("photo")));
        })
        .join()
        .expect("native thread");

        let completion = inbox.try_next().expect("queued");
        assert_eq!(completion.result, NativeResult::ok(json!("photo")));
    }

    #[tokio::test]
    async fn next_ends_when_routers_drop() {
        let (router, mut inbox) = ResultRouter::channel();
        drop(router);
        assert!(inbox.next().await.is_none());
    }
}
