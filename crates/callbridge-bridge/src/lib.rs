// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Callbridge Bridge — the web-facing half of the call bridge.
//
// A `BridgeContext` owns the callback registry, the event channels and the
// transport for one web view.  It is single-threaded by construction (`Rc`,
// `RefCell`); native code talks back to it only through the thread-safe
// `ResultRouter`.

pub mod channel;
pub mod context;
pub mod deadline;
pub mod in_process;
pub mod loopback;
pub mod registry;
pub mod router;
pub mod traits;

pub use channel::{Channel, ChannelSet, Readiness, ReadinessState, SubscriberId};
pub use context::{BridgeContext, Invocation};
pub use in_process::InProcessTransport;
pub use loopback::LoopbackTransport;
pub use registry::{CallbackRegistry, Callbacks, Delivery};
pub use router::{Completion, ResultInbox, ResultRouter};
pub use traits::Transport;
