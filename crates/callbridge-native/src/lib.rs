// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Callbridge Native — the handler table that native capabilities register
// into, and the loopback HTTP server that exposes it to web content.  This
// crate runs on any thread; results flow back to the web side through the
// `ResultSink` defined in `callbridge-core`.

pub mod dispatcher;
pub mod http;
pub mod loopback_server;

pub use dispatcher::{Dispatcher, HandlerEnv, Reply, Responder};
pub use loopback_server::{LoopbackServer, ServerStatus};
