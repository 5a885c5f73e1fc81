// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Call encoders and decoders.
//
// Three wire shapes are supported:
//
//   - `UrlCodec`  : `Target/action/segments?args=<urlencoded JSON>&callbackId=<id>`
//   - `PathCodec` : `Target/action/arg/arg?callbackId=<id>`, every arg coerced
//                   to a string (the legacy cookie and `gap://` shape)
//   - `JsonCodec` : `{"target","action","args","callbackId"}`
//
// `UrlCodec` and `JsonCodec` are lossless. `PathCodec` is lossless modulo
// `coerce_args`: lone scalars become their string form and array arguments
// are joined with `/` before being percent-encoded as a single segment.

use serde_json::Value;
use url::form_urlencoded;

use crate::config::WireFormat;
use crate::error::{BridgeError, Result};
use crate::types::{CallEnvelope, CallId};

/// Query parameter carrying the JSON argument array.
const ARGS_PARAM: &str = "args";

/// Query parameter carrying the callback id.
const CALLBACK_PARAM: &str = "callbackId";

/// Delimiter used to join the elements of an array argument.
pub const ARRAY_DELIMITER: &str = "/";

/// Serializes envelopes for one transport and parses them back.
pub trait CallCodec: Send + Sync {
    fn format(&self) -> WireFormat;

    fn encode(&self, envelope: &CallEnvelope) -> Result<String>;

    fn decode(&self, raw: &str) -> Result<CallEnvelope>;
}

/// The codec for a configured wire format.
pub fn codec_for(format: WireFormat) -> Box<dyn CallCodec> {
    match format {
        WireFormat::Url => Box::new(UrlCodec),
        WireFormat::Path => Box::new(PathCodec),
        WireFormat::Json => Box::new(JsonCodec),
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl CallCodec for JsonCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Json
    }

    fn encode(&self, envelope: &CallEnvelope) -> Result<String> {
        check_names(envelope)?;
        Ok(serde_json::to_string(envelope)?)
    }

    fn decode(&self, raw: &str) -> Result<CallEnvelope> {
        let envelope: CallEnvelope = serde_json::from_str(raw)
            .map_err(|e| BridgeError::Decode(format!("json envelope: {e}")))?;
        check_names(&envelope)?;
        Ok(envelope)
    }
}

// ---------------------------------------------------------------------------
// URL: path segments + query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct UrlCodec;

impl CallCodec for UrlCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Url
    }

    fn encode(&self, envelope: &CallEnvelope) -> Result<String> {
        check_names(envelope)?;

        let mut out = encode_component(&envelope.target);
        for segment in envelope.action.split('/') {
            out.push('/');
            out.push_str(&encode_component(segment));
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair(ARGS_PARAM, &serde_json::to_string(&envelope.args)?);
        if let Some(id) = &envelope.callback_id {
            query.append_pair(CALLBACK_PARAM, id.as_str());
        }
        out.push('?');
        out.push_str(&query.finish());
        Ok(out)
    }

    fn decode(&self, raw: &str) -> Result<CallEnvelope> {
        let (path, query) = split_query(raw);
        let segments = decode_segments(path)?;
        if segments.len() < 2 {
            return Err(BridgeError::Decode(format!(
                "expected `target/action`, got `{path}`"
            )));
        }
        if let Some(i) = segments.iter().position(String::is_empty) {
            return Err(BridgeError::Decode(format!("empty path segment at position {i}")));
        }

        let target = segments[0].clone();
        let action = segments[1..].join("/");

        let mut args = None;
        let mut callback_id = None;
        let mut loose = serde_json::Map::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                ARGS_PARAM => {
                    let parsed: Vec<Value> = serde_json::from_str(&value)
                        .map_err(|e| BridgeError::Decode(format!("args is not a JSON array: {e}")))?;
                    args = Some(parsed);
                }
                CALLBACK_PARAM => callback_id = Some(CallId(value.into_owned())),
                _ => {
                    loose.insert(key.into_owned(), Value::String(value.into_owned()));
                }
            }
        }

        // A query of plain `key=value` pairs is the legacy object form and
        // becomes a single object argument.
        let args = match args {
            Some(args) => args,
            None if !loose.is_empty() => vec![Value::Object(loose)],
            None => Vec::new(),
        };

        Ok(CallEnvelope {
            target,
            action,
            args,
            callback_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Path: legacy string segments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct PathCodec;

impl CallCodec for PathCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Path
    }

    fn encode(&self, envelope: &CallEnvelope) -> Result<String> {
        check_names(envelope)?;

        let mut out = encode_component(&envelope.target);
        out.push('/');
        out.push_str(&encode_component(&envelope.action));
        for arg in &envelope.args {
            out.push('/');
            out.push_str(&encode_component(&coerce_arg(arg)));
        }
        if let Some(id) = &envelope.callback_id {
            let mut query = form_urlencoded::Serializer::new(String::new());
            query.append_pair(CALLBACK_PARAM, id.as_str());
            out.push('?');
            out.push_str(&query.finish());
        }
        Ok(out)
    }

    fn decode(&self, raw: &str) -> Result<CallEnvelope> {
        let (path, query) = split_query(raw);
        let mut segments = decode_segments(path)?.into_iter();
        let (Some(target), Some(action)) = (segments.next(), segments.next()) else {
            return Err(BridgeError::Decode(format!(
                "expected `target/action`, got `{path}`"
            )));
        };

        let callback_id = form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == CALLBACK_PARAM)
            .map(|(_, value)| CallId(value.into_owned()));

        let envelope = CallEnvelope {
            target,
            action,
            args: segments.map(Value::String).collect(),
            callback_id,
        };
        check_names(&envelope)?;
        Ok(envelope)
    }
}

/// Apply the path-style coercion rules to an argument list.
///
/// `PathCodec::decode(PathCodec::encode(e)).args == coerce_args(&e.args)`.
pub fn coerce_args(args: &[Value]) -> Vec<Value> {
    args.iter().map(|a| Value::String(coerce_arg(a))).collect()
}

/// One argument as it travels in a path segment.
fn coerce_arg(arg: &Value) -> String {
    match arg {
        Value::Array(items) => items
            .iter()
            .map(scalar_string)
            .collect::<Vec<_>>()
            .join(ARRAY_DELIMITER),
        other => scalar_string(other),
    }
}

/// String form of a value, following script string conversion except for
/// objects, which are written as JSON text.
fn scalar_string(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => scalar_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_names(envelope: &CallEnvelope) -> Result<()> {
    if envelope.target.is_empty() {
        return Err(BridgeError::Decode("target must not be empty".into()));
    }
    if envelope.action.is_empty() {
        return Err(BridgeError::Decode("action must not be empty".into()));
    }
    if envelope.action.split('/').any(str::is_empty) {
        return Err(BridgeError::Decode(format!(
            "action `{}` has an empty path segment",
            envelope.action
        )));
    }
    Ok(())
}

fn split_query(raw: &str) -> (&str, &str) {
    let raw = raw.trim_start_matches('/');
    raw.split_once('?').unwrap_or((raw, ""))
}

fn decode_segments(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    path.split('/').map(decode_component).collect()
}

/// Percent-encode one path segment or body (spaces become `+`).
pub fn encode_component(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// Reverse of [`encode_component`].
pub fn decode_component(raw: &str) -> Result<String> {
    // Encoded components never contain raw separators.
    if raw.contains(['=', '&', '?']) {
        return Err(BridgeError::Decode(format!("unescaped separator in `{raw}`")));
    }
    Ok(form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CallEnvelope {
        CallEnvelope::new(
            "Geolocation",
            "getCurrentPosition",
            vec![json!(0), json!(3600000), json!(false), Value::Null, json!("a b/c")],
        )
        .with_callback_id(CallId::from("Geolocation0"))
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let env = sample();
        let raw = JsonCodec.encode(&env).expect("encode");
        assert_eq!(JsonCodec.decode(&raw).expect("decode"), env);
    }

    #[test]
    fn url_round_trip_is_lossless() {
        let env = sample();
        let raw = UrlCodec.encode(&env).expect("encode");
        assert!(raw.starts_with("Geolocation/getCurrentPosition?args="));
        assert_eq!(UrlCodec.decode(&raw).expect("decode"), env);
    }

    #[test]
    fn url_keeps_multi_level_actions() {
        let env = CallEnvelope::new("Device", "getReadOnlyFields/a/b", vec![json!({"k": [1, 2]})]);
        let raw = UrlCodec.encode(&env).expect("encode");
        assert!(raw.starts_with("Device/getReadOnlyFields/a/b?"));
        assert_eq!(UrlCodec.decode(&raw).expect("decode"), env);
    }

    #[test]
    fn url_accepts_leading_slash() {
        let env = UrlCodec.decode("/Notification/alert?args=%5B%22hi%22%5D").expect("decode");
        assert_eq!(env.target, "Notification");
        assert_eq!(env.action, "alert");
        assert_eq!(env.args, vec![json!("hi")]);
        assert!(env.callback_id.is_none());
    }

    #[test]
    fn url_plain_query_becomes_object_argument() {
        let env = UrlCodec.decode("Camera/takePicture?quality=50&destinationType=1").expect("decode");
        assert_eq!(env.args, vec![json!({"quality": "50", "destinationType": "1"})]);
    }

    #[test]
    fn url_rejects_malformed_input() {
        assert!(matches!(UrlCodec.decode("Camera"), Err(BridgeError::Decode(_))));
        assert!(matches!(UrlCodec.decode(""), Err(BridgeError::Decode(_))));
        assert!(matches!(UrlCodec.decode("Camera//x"), Err(BridgeError::Decode(_))));
        assert!(matches!(
            UrlCodec.decode("Camera/take?args=%7Bnot-json"),
            Err(BridgeError::Decode(_))
        ));
        assert!(matches!(
            UrlCodec.decode("Camera/take?args=%7B%7D"),
            Err(BridgeError::Decode(_))
        ));
    }

    #[test]
    fn empty_action_segments_are_rejected_at_encode() {
        for action in ["a//b", "getInfo/", "/getInfo"] {
            let env = CallEnvelope::new("Device", action, vec![]);
            for format in [WireFormat::Url, WireFormat::Path, WireFormat::Json] {
                let codec = codec_for(format);
                assert!(
                    matches!(codec.encode(&env), Err(BridgeError::Decode(_))),
                    "{action:?} accepted by {format:?}"
                );
            }
        }
    }

    #[test]
    fn path_round_trip_follows_coercion_rules() {
        let env = CallEnvelope::new(
            "Accelerometer",
            "watch",
            vec![
                json!(100),
                json!(["x", "y", "z"]),
                json!(true),
                Value::Null,
                json!(""),
                json!("a/b?c=d&e"),
                json!({"frequency": 10}),
            ],
        )
        .with_callback_id(CallId::from("Accelerometer7"));

        let raw = PathCodec.encode(&env).expect("encode");
        let back = PathCodec.decode(&raw).expect("decode");

        assert_eq!(back.target, env.target);
        assert_eq!(back.action, env.action);
        assert_eq!(back.callback_id, env.callback_id);
        assert_eq!(back.args, coerce_args(&env.args));
        assert_eq!(
            back.args,
            vec![
                json!("100"),
                json!("x/y/z"),
                json!("true"),
                json!("null"),
                json!(""),
                json!("a/b?c=d&e"),
                json!("{\"frequency\":10}"),
            ]
        );
    }

    #[test]
    fn path_without_args_has_no_trailing_segment() {
        let env = CallEnvelope::new("Network", "getConnectionInfo", vec![]);
        let raw = PathCodec.encode(&env).expect("encode");
        assert_eq!(raw, "Network/getConnectionInfo");
        assert_eq!(PathCodec.decode(&raw).expect("decode"), env);
    }

    #[test]
    fn nested_arrays_use_comma_inside_segment() {
        assert_eq!(coerce_args(&[json!([1, [2, 3], null])]), vec![json!("1/2,3/null")]);
    }

    #[test]
    fn codec_for_matches_format() {
        for format in [WireFormat::Url, WireFormat::Path, WireFormat::Json] {
            assert_eq!(codec_for(format).format(), format);
        }
    }

    #[test]
    fn empty_names_are_rejected_on_encode() {
        let env = CallEnvelope::new("", "alert", vec![]);
        assert!(JsonCodec.encode(&env).is_err());
        assert!(UrlCodec.encode(&env).is_err());
        assert!(PathCodec.encode(&env).is_err());
    }
}
