// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Callbridge.

use serde_json::{Value, json};
use thiserror::Error;

/// Top-level error type for all bridge operations.
///
/// Every variant is recovered at the layer where it occurs; none of them is
/// allowed to escape to the host application.
#[derive(Debug, Error)]
pub enum BridgeError {
    // -- Wire --
    #[error("malformed call envelope: {0}")]
    Decode(String),

    // -- Dispatch --
    #[error("no handler for {target}.{action} (missing `{missing}`)")]
    HandlerNotFound {
        target: String,
        action: String,
        /// The first target or method path segment that did not resolve.
        missing: String,
    },

    #[error("handler failed: {0}")]
    Handler(String),

    // -- Callbacks --
    #[error("still waiting for previous call `{0}`")]
    DuplicateCallId(String),

    #[error("callback failed: {0}")]
    Callback(String),

    #[error("call `{0}` timed out")]
    Timeout(String),

    // -- Transport / host --
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Stable numeric code carried inside failure payloads.
    pub fn code(&self) -> i32 {
        match self {
            Self::Decode(_) | Self::Serialization(_) => 400,
            Self::HandlerNotFound { .. } => 404,
            Self::Timeout(_) => 408,
            Self::DuplicateCallId(_) => 409,
            Self::Handler(_) | Self::Callback(_) | Self::Config(_) | Self::Io(_) => 500,
            Self::Transport(_) => 503,
        }
    }

    /// The `{ "code", "message" }` object handed to failure callbacks.
    pub fn to_payload(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = BridgeError::HandlerNotFound {
            target: "Contacts".into(),
            action: "find".into(),
            missing: "Contacts".into(),
        };
        assert_eq!(err.code(), 404);
        assert_eq!(err.to_payload()["code"], 404);
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let caught = std::panic::catch_unwind(|| {
            if true {
                panic!("bad callback");
            }
        })
        .expect_err("panics");
        assert_eq!(panic_message(caught.as_ref()), "bad callback");

        let caught = std::panic::catch_unwind(|| {
            if true {
                panic!("{} {}", "formatted", 1);
            }
        })
        .expect_err("panics");
        assert_eq!(panic_message(caught.as_ref()), "formatted 1");
    }

    #[test]
    fn duplicate_payload_mentions_still_waiting() {
        let err = BridgeError::DuplicateCallId("global".into());
        let payload = err.to_payload();
        assert_eq!(payload["code"], 409);
        assert!(
            payload["message"]
                .as_str()
                .expect("message is a string")
                .contains("still waiting")
        );
    }
}
