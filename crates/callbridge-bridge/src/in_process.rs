// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process transport: calls a `Dispatcher` directly.
//
// Used for tests and for hosts that embed the native handlers in the same
// process.  With a codec attached, every call is encoded and decoded again
// so the wire format is exercised end to end.

use std::sync::Arc;

use tracing::debug;

use callbridge_core::codec::{CallCodec, codec_for};
use callbridge_core::config::BridgeConfig;
use callbridge_core::error::Result;
use callbridge_core::types::{CallEnvelope, NativeResult, ResultSink};
use callbridge_native::dispatcher::{Dispatcher, HandlerEnv};

use crate::router::ResultRouter;
use crate::traits::Transport;

pub struct InProcessTransport {
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn ResultSink>,
    codec: Option<Box<dyn CallCodec>>,
}

impl InProcessTransport {
    pub fn new(dispatcher: Arc<Dispatcher>, router: ResultRouter) -> Self {
        Self {
            dispatcher,
            sink: Arc::new(router),
            codec: None,
        }
    }

    /// Round-trip every call through the configured wire format.
    pub fn from_config(
        dispatcher: Arc<Dispatcher>,
        router: ResultRouter,
        config: &BridgeConfig,
    ) -> Self {
        Self::new(dispatcher, router).with_codec(codec_for(config.wire_format))
    }

    /// Round-trip every call through `codec`.
    pub fn with_codec(mut self, codec: Box<dyn CallCodec>) -> Self {
        self.codec = Some(codec);
        self
    }
}

impl Transport for InProcessTransport {
    fn name(&self) -> &str {
        "in-process"
    }

    fn send(&self, envelope: &CallEnvelope) -> Result<Option<NativeResult>> {
        let env = HandlerEnv::new()
            .with_callback_id(envelope.callback_id.clone())
            .with_sink(Arc::clone(&self.sink));

        let result = match &self.codec {
            Some(codec) => {
                let raw = codec.encode(envelope)?;
                debug!(format = ?codec.format(), bytes = raw.len(), "encoded call");
                self.dispatcher.handle_raw(&raw, codec.as_ref(), &env)
            }
            None => self.dispatcher.handle(envelope, &env),
        };
        Ok(Some(result))
    }
}
