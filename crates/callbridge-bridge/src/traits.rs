// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport abstraction between the web-side bridge and native code.

use callbridge_core::error::Result;
use callbridge_core::types::{CallEnvelope, NativeResult};

/// Hands an encoded call to native code.
///
/// A transport either answers immediately (`Ok(Some(result))`) or arranges
/// for the result to arrive later through the `ResultRouter` (`Ok(None)`).
/// Transports run on the bridge's single execution context and need not be
/// `Send`.
pub trait Transport {
    /// Short name for log lines (e.g. "in-process", "loopback").
    fn name(&self) -> &str;

    fn send(&self, envelope: &CallEnvelope) -> Result<Option<NativeResult>>;
}
