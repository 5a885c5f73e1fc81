// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Demo capabilities served by `callbridge serve`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tracing::info;

use callbridge_core::error::BridgeError;
use callbridge_native::dispatcher::Dispatcher;

/// Register the built-in capabilities on `dispatcher`.
pub fn register_all(dispatcher: &Dispatcher) {
    dispatcher.register_handler("Device", "getInfo", |reply, _args, _env| {
        reply.success(device_info());
        Ok(())
    });

    dispatcher.register_handler("Device", "getReadOnlyFields/platform/os", |reply, _, _| {
        reply.success(json!(std::env::consts::OS));
        Ok(())
    });

    dispatcher.register_handler("Device", "getReadOnlyFields/platform/arch", |reply, _, _| {
        reply.success(json!(std::env::consts::ARCH));
        Ok(())
    });

    // Fire-and-forget: no reply, so the caller sees NO_RESULT.
    dispatcher.register_handler("Notification", "alert", |_reply, args, env| {
        let message = args.first().map(display_arg).unwrap_or_default();
        info!(message = %message, origin = ?env.origin, "alert");
        Ok(())
    });

    dispatcher.register_handler("Notification", "beep", |_reply, args, _env| {
        let times = args.first().and_then(Value::as_u64).unwrap_or(1);
        info!(times, "beep");
        Ok(())
    });

    dispatcher.register_handler("Echo", "echo", |reply, args, _env| {
        reply.success(Value::Array(args.to_vec()));
        Ok(())
    });

    dispatcher.register_handler("Echo", "fail", |_reply, args, _env| {
        let message = args.first().map(display_arg).unwrap_or_else(|| "requested failure".into());
        Err(BridgeError::Handler(message))
    });
}

fn device_info() -> Value {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    json!({
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "version": env!("CARGO_PKG_VERSION"),
        "name": "callbridge",
        "timestamp": now_ms,
    })
}

fn display_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::types::{CallEnvelope, Status};
    use callbridge_native::dispatcher::HandlerEnv;

    fn dispatcher() -> Dispatcher {
        let dispatcher = Dispatcher::new();
        register_all(&dispatcher);
        dispatcher
    }

    #[test]
    fn device_info_reports_platform() {
        let result = dispatcher().handle(&CallEnvelope::new("Device", "getInfo", vec![]), &HandlerEnv::new());
        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.payload["platform"], std::env::consts::OS);
    }

    #[test]
    fn nested_read_only_field() {
        let result = dispatcher().handle(
            &CallEnvelope::new("Device", "getReadOnlyFields/platform/arch", vec![]),
            &HandlerEnv::new(),
        );
        assert_eq!(result.payload, json!(std::env::consts::ARCH));
    }

    #[test]
    fn alert_is_fire_and_forget() {
        let result = dispatcher().handle(
            &CallEnvelope::new("Notification", "alert", vec![json!("hi")]),
            &HandlerEnv::new(),
        );
        assert_eq!(result.status, Status::NoResult);
    }

    #[test]
    fn echo_fail_reports_handler_error() {
        let result = dispatcher().handle(
            &CallEnvelope::new("Echo", "fail", vec![json!("nope")]),
            &HandlerEnv::new(),
        );
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.payload["code"], 500);
    }
}
