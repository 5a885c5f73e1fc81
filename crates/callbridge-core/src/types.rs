// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the call bridge.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::CallIdScheme;
use crate::error::BridgeError;

/// Identifier of one outstanding asynchronous call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces fresh call ids.
///
/// The counter scheme yields `"{target}{n}"` from a single counter shared by
/// every target, so ids stay unique even across targets.
#[derive(Debug)]
pub struct CallIdGenerator {
    scheme: CallIdScheme,
    next: AtomicU64,
}

impl CallIdGenerator {
    pub fn new(scheme: CallIdScheme) -> Self {
        Self {
            scheme,
            next: AtomicU64::new(0),
        }
    }

    pub fn next_for(&self, target: &str) -> CallId {
        match self.scheme {
            CallIdScheme::Counter => {
                let n = self.next.fetch_add(1, Ordering::Relaxed);
                CallId(format!("{target}{n}"))
            }
            CallIdScheme::Uuid => CallId(Uuid::new_v4().to_string()),
        }
    }
}

/// One bridge call: capability namespace, operation, ordered arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    pub target: String,
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Present only when the caller expects an asynchronous response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<CallId>,
}

impl CallEnvelope {
    pub fn new(target: impl Into<String>, action: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            action: action.into(),
            args,
            callback_id: None,
        }
    }

    pub fn with_callback_id(mut self, id: CallId) -> Self {
        self.callback_id = Some(id);
        self
    }

    /// `Target.action`, for log lines.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.target, self.action)
    }
}

/// Outcome class of a native call, carrying the legacy numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Status {
    NoResult,
    Ok,
    ClassNotFound,
    InvalidAction,
    Error,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::NoResult => 0,
            Status::Ok => 1,
            Status::ClassNotFound => 2,
            Status::InvalidAction => 7,
            Status::Error => 9,
        }
    }

    /// OK and NO_RESULT take the success path; everything else fails.
    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::NoResult)
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for Status {
    type Error = BridgeError;

    fn try_from(code: u8) -> Result<Self, BridgeError> {
        match code {
            0 => Ok(Status::NoResult),
            1 => Ok(Status::Ok),
            2 => Ok(Status::ClassNotFound),
            7 => Ok(Status::InvalidAction),
            9 => Ok(Status::Error),
            other => Err(BridgeError::Decode(format!("unknown status code {other}"))),
        }
    }
}

/// Result produced by the native side for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeResult {
    pub status: Status,
    #[serde(default)]
    pub payload: Value,
    /// Keep the registry entry alive after delivery (repeating watches).
    #[serde(default)]
    pub keep_callback: bool,
}

impl NativeResult {
    pub fn new(status: Status, payload: Value, keep_callback: bool) -> Self {
        Self {
            status,
            payload,
            keep_callback,
        }
    }

    pub fn ok(payload: Value) -> Self {
        Self::new(Status::Ok, payload, false)
    }

    pub fn no_result() -> Self {
        Self::new(Status::NoResult, Value::Null, false)
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::new(
            Status::Error,
            json!({ "code": code, "message": message.into() }),
            false,
        )
    }

    pub fn from_error(err: &BridgeError) -> Self {
        Self::new(Status::Error, err.to_payload(), false)
    }

    pub fn keep(mut self) -> Self {
        self.keep_callback = true;
        self
    }
}

/// Success code of the loopback response envelope.
pub const RESPONSE_CODE_SUCCESS: i32 = 42;

/// Generic failure code of the loopback response envelope.
pub const RESPONSE_CODE_FAILURE: i32 = -1;

/// Loopback wire response: `{code, data, msg?, keepCallback?}`.
///
/// Code 42 is success and any negative code is failure. Other values are
/// passed through as a [`Status`] code so the caller can keep its callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub code: i32,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keep_callback: bool,
}

impl ResponseEnvelope {
    pub fn from_result(result: &NativeResult) -> Self {
        match result.status {
            Status::Ok if !result.keep_callback => Self {
                code: RESPONSE_CODE_SUCCESS,
                data: Some(result.payload.clone()),
                msg: None,
                keep_callback: false,
            },
            Status::Ok | Status::NoResult => Self {
                code: i32::from(result.status.code()),
                data: Some(result.payload.clone()),
                msg: None,
                keep_callback: result.keep_callback,
            },
            _ => {
                let code = result
                    .payload
                    .get("code")
                    .and_then(Value::as_i64)
                    .and_then(|c| i32::try_from(c).ok())
                    .filter(|c| *c != 0)
                    .map(|c| -c.saturating_abs())
                    .unwrap_or(RESPONSE_CODE_FAILURE);
                let msg = result
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| result.payload.to_string());
                Self {
                    code,
                    data: None,
                    msg: Some(msg),
                    keep_callback: result.keep_callback,
                }
            }
        }
    }

    pub fn into_result(self) -> NativeResult {
        if self.code == RESPONSE_CODE_SUCCESS {
            return NativeResult::ok(self.data.unwrap_or(Value::Null));
        }
        if self.code < 0 {
            let message = self.msg.unwrap_or_default();
            return NativeResult::new(
                Status::Error,
                json!({ "code": self.code.unsigned_abs(), "message": message }),
                self.keep_callback,
            );
        }
        let status = u8::try_from(self.code)
            .ok()
            .and_then(|c| Status::try_from(c).ok())
            .unwrap_or(Status::Error);
        let payload = if status.is_success() {
            self.data.unwrap_or(Value::Null)
        } else {
            json!({ "code": self.code, "message": self.msg.unwrap_or_default() })
        };
        NativeResult::new(status, payload, self.keep_callback)
    }
}

/// Receiver of native-originated completions.
///
/// Implementations must accept deliveries from any thread and hand them to
/// the bridge's single execution context.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, call_id: CallId, result: NativeResult);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_ids_are_scoped_by_target_and_unique() {
        let ids = CallIdGenerator::new(CallIdScheme::Counter);
        assert_eq!(ids.next_for("Camera").as_str(), "Camera0");
        assert_eq!(ids.next_for("Camera").as_str(), "Camera1");
        assert_eq!(ids.next_for("Compass").as_str(), "Compass2");
    }

    #[test]
    fn uuid_ids_differ() {
        let ids = CallIdGenerator::new(CallIdScheme::Uuid);
        assert_ne!(ids.next_for("Camera"), ids.next_for("Camera"));
    }

    #[test]
    fn status_serializes_as_legacy_number() {
        assert_eq!(serde_json::to_string(&Status::Error).expect("ser"), "9");
        let parsed: Status = serde_json::from_str("7").expect("de");
        assert_eq!(parsed, Status::InvalidAction);
        assert!(serde_json::from_str::<Status>("5").is_err());
    }

    #[test]
    fn success_response_uses_code_42() {
        let env = ResponseEnvelope::from_result(&NativeResult::ok(json!({"x": 1})));
        assert_eq!(env.code, RESPONSE_CODE_SUCCESS);
        assert_eq!(env.into_result(), NativeResult::ok(json!({"x": 1})));
    }

    #[test]
    fn failure_response_is_negative() {
        let env = ResponseEnvelope::from_result(&NativeResult::error(404, "Method x not found"));
        assert_eq!(env.code, -404);
        assert_eq!(env.msg.as_deref(), Some("Method x not found"));

        let back = env.into_result();
        assert_eq!(back.status, Status::Error);
        assert_eq!(back.payload["code"], 404);
    }

    #[test]
    fn failure_without_code_defaults_to_minus_one() {
        let result = NativeResult::new(Status::Error, json!("boom"), false);
        assert_eq!(ResponseEnvelope::from_result(&result).code, RESPONSE_CODE_FAILURE);
    }

    #[test]
    fn kept_no_result_passes_status_through() {
        let env = ResponseEnvelope::from_result(&NativeResult::no_result().keep());
        assert_eq!(env.code, 0);
        assert!(env.keep_callback);
        let back = env.into_result();
        assert_eq!(back.status, Status::NoResult);
        assert!(back.keep_callback);
    }

    #[test]
    fn extreme_failure_codes_do_not_overflow() {
        let env: ResponseEnvelope =
            serde_json::from_str(&format!("{{\"code\":{},\"msg\":\"x\"}}", i32::MIN))
                .expect("envelope");
        let back = env.into_result();
        assert_eq!(back.status, Status::Error);
        assert_eq!(back.payload["code"], 2_147_483_648u64);

        let result = NativeResult::new(Status::Error, json!({ "code": i32::MIN }), false);
        assert_eq!(ResponseEnvelope::from_result(&result).code, -i32::MAX);
    }

    #[test]
    fn envelope_json_uses_camel_case() {
        let env = CallEnvelope::new("Geolocation", "watchPosition", vec![json!(1)])
            .with_callback_id(CallId::from("Geolocation3"));
        let text = serde_json::to_string(&env).expect("ser");
        assert!(text.contains("\"callbackId\":\"Geolocation3\""));
    }
}
