// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Callbridge — Core types, errors, configuration and call codecs shared by
// the native dispatcher and the web-side bridge.

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod types;

pub use codec::{CallCodec, codec_for};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use types::*;
