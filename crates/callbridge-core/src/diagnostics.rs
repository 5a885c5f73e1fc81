// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Developer-facing diagnostics for bridge errors.
//
// Most bridge failures are integration mistakes (a capability that was never
// registered, a shim reusing a watch id) rather than runtime faults. Each
// error is mapped to a one-line summary, a concrete hint and a severity that
// decides the log level.

use crate::error::BridgeError;

/// How a bridge error should be treated by whoever reads the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Wiring mistake between web content and native capabilities.
    Integration,
    /// Expected at runtime; the caller was told and can try again.
    Recoverable,
    /// Something broke inside a handler, callback or transport.
    Fault,
}

/// A summarised bridge error with an actionable hint.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub summary: String,
    pub hint: String,
    pub severity: Severity,
}

/// Explain a `BridgeError` to the developer wiring up capabilities.
pub fn diagnose(err: &BridgeError) -> Diagnostic {
    match err {
        BridgeError::HandlerNotFound {
            target,
            action,
            missing,
        } => {
            let hint = if missing == target {
                format!("No capability named `{target}` is registered. Register a handler for it before web content calls it.")
            } else {
                format!("`{target}` has no method `{action}` (segment `{missing}` is missing). Check the action name used by the shim.")
            };
            Diagnostic {
                summary: format!("{target}.{action} is not available"),
                hint,
                severity: Severity::Integration,
            }
        }

        BridgeError::Decode(detail) => Diagnostic {
            summary: "A call could not be decoded.".into(),
            hint: format!("Check that the caller and dispatcher use the same wire format. ({detail})"),
            severity: Severity::Integration,
        },

        BridgeError::DuplicateCallId(id) => Diagnostic {
            summary: format!("Call `{id}` is still outstanding."),
            hint: "Wait for the previous call to finish, or clear it before reusing the id.".into(),
            severity: Severity::Recoverable,
        },

        BridgeError::Timeout(id) => Diagnostic {
            summary: format!("Call `{id}` did not complete in time."),
            hint: "The native side never answered; a late answer will be ignored.".into(),
            severity: Severity::Recoverable,
        },

        BridgeError::Handler(detail) => Diagnostic {
            summary: "A native handler failed.".into(),
            hint: format!("The caller received an error result. ({detail})"),
            severity: Severity::Fault,
        },

        BridgeError::Callback(detail) => Diagnostic {
            summary: "A success or failure callback panicked.".into(),
            hint: format!("Delivery to other callers continues. ({detail})"),
            severity: Severity::Fault,
        },

        BridgeError::Transport(detail) => Diagnostic {
            summary: "The call could not reach the native side.".into(),
            hint: format!("Is the dispatcher running and reachable? ({detail})"),
            severity: Severity::Fault,
        },

        BridgeError::Config(detail) => Diagnostic {
            summary: "The bridge configuration is invalid.".into(),
            hint: detail.clone(),
            severity: Severity::Integration,
        },

        BridgeError::Io(e) => Diagnostic {
            summary: "A file or socket operation failed.".into(),
            hint: e.to_string(),
            severity: Severity::Fault,
        },

        BridgeError::Serialization(e) => Diagnostic {
            summary: "A value could not be converted to or from JSON.".into(),
            hint: e.to_string(),
            severity: Severity::Integration,
        },
    }
}
