// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Callbridge — command-line host for the call bridge.
//
// `serve` runs the loopback dispatcher with the demo capabilities; `call`
// issues a single call through a full bridge context and prints the result.

mod capabilities;
mod data_dir;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use callbridge_bridge::{BridgeContext, Callbacks, Invocation, LoopbackTransport};
use callbridge_core::config::BridgeConfig;
use callbridge_core::error::{BridgeError, Result};
use callbridge_native::dispatcher::Dispatcher;
use callbridge_native::loopback_server::LoopbackServer;

#[derive(Parser)]
#[command(name = "callbridge")]
#[command(about = "Native call bridge host", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo capabilities on the loopback dispatcher
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Issue one call to a running dispatcher and print the result
    Call {
        /// Capability namespace, e.g. Device
        target: String,
        /// Operation, e.g. getInfo or getReadOnlyFields/platform/os
        action: String,
        /// Arguments as a JSON array (a single value is wrapped)
        #[arg(long, default_value = "[]")]
        args: String,
        /// Fail the call if no result arrives in time
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
        /// Origin header to send
        #[arg(long)]
        origin: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

/// Filter in effect until the config file has been read.
const DEFAULT_LOG_FILTER: &str = "info";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// A fmt subscriber whose filter can be swapped once the config is known.
fn subscriber<W>(
    initial: EnvFilter,
    make_writer: W,
) -> (impl tracing::Subscriber + Send + Sync + 'static, FilterHandle)
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(initial);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(make_writer));
    (subscriber, handle)
}

/// Switch to the configured filter; an invalid one keeps the current filter.
fn apply_log_filter(handle: &FilterHandle, directives: &str) {
    match EnvFilter::try_new(directives) {
        Ok(filter) => {
            if let Err(e) = handle.reload(filter) {
                tracing::warn!(error = %e, "could not apply log filter");
            }
        }
        Err(e) => tracing::warn!(filter = directives, error = %e, "invalid log filter ignored"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging starts before the config is read so loading is logged too.
    let from_env = EnvFilter::try_from_default_env().ok();
    let env_filter_set = from_env.is_some();
    let (subscriber, filter_handle) = subscriber(
        from_env.unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER)),
        std::io::stderr,
    );
    subscriber.init();

    let config_path = cli.config.clone().unwrap_or_else(data_dir::default_config_path);
    let config = data_dir::load_config(&config_path)?;
    if !env_filter_set {
        apply_log_filter(&filter_handle, &config.log_filter);
    }

    match cli.command {
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
        Commands::Call {
            target,
            action,
            args,
            timeout_ms,
            origin,
        } => {
            let args = parse_args(&args)?;
            call(config, &target, &action, args, Duration::from_millis(timeout_ms), origin).await
        }
        Commands::Config { write } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if write {
                config.save(&config_path)?;
                tracing::info!(path = %config_path.display(), "config written");
            }
            Ok(())
        }
    }
}

async fn serve(config: BridgeConfig) -> Result<()> {
    config.validate()?;
    let dispatcher = Dispatcher::new();
    capabilities::register_all(&dispatcher);

    let mut server = LoopbackServer::from_config(&config)?;
    server.start(Arc::new(dispatcher), Arc::new(config)).await?;
    tracing::info!(addr = ?server.local_addr(), "Callbridge serving; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    server.stop().await
}

async fn call(
    config: BridgeConfig,
    target: &str,
    action: &str,
    args: Vec<Value>,
    timeout: Duration,
    origin: Option<String>,
) -> Result<()> {
    let addr = config.socket_addr()?;
    let wire_format = config.wire_format;
    let bridge = BridgeContext::new(config, move |router| {
        let transport = LoopbackTransport::new(addr, router).with_wire_format(wire_format);
        Box::new(match origin {
            Some(origin) => transport.with_origin(origin),
            None => transport,
        })
    });
    bridge.native_ready();
    bridge.dom_content_loaded();

    let outcome: Rc<RefCell<Option<std::result::Result<Value, Value>>>> =
        Rc::new(RefCell::new(None));
    let (ok, fail) = (Rc::clone(&outcome), Rc::clone(&outcome));
    let callbacks = Callbacks::new()
        .on_success(move |v| *ok.borrow_mut() = Some(Ok(v.clone())))
        .on_failure(move |v| *fail.borrow_mut() = Some(Err(v.clone())));

    let invocation = bridge.invoke_with_deadline(target, action, args, callbacks, timeout)?;
    if let Invocation::Sent { .. } = invocation {
        // A NO_RESULT reply drops the entry without running a callback.
        while outcome.borrow().is_none() && !bridge.outstanding().is_empty() {
            if !bridge.process_next().await {
                break;
            }
        }
    }

    let outcome = outcome.borrow_mut().take();
    match outcome {
        Some(Ok(value)) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Some(Err(payload)) => {
            eprintln!("{}", serde_json::to_string_pretty(&payload)?);
            Err(BridgeError::Handler(format!("{target}.{action} failed")))
        }
        // NO_RESULT: the call completed without a value.
        None => Ok(()),
    }
}

/// A JSON array is the argument list; any other JSON value is one argument.
fn parse_args(raw: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| BridgeError::Decode(format!("--args is not JSON: {e}")))?;
    Ok(match value {
        Value::Array(args) => args,
        single => vec![single],
    })
}
