// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Config file location and loading.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use callbridge_core::config::BridgeConfig;
use callbridge_core::error::Result;

const CONFIG_FILE: &str = "bridge.json";

/// Return the application data directory, creating it if needed.
pub fn data_dir() -> PathBuf {
    let dir = base_dir().join("callbridge");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(dir = %dir.display(), error = %e, "could not create data directory");
    }
    dir
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

/// Load `path`, or the defaults when it does not exist yet.
///
/// A file that exists but does not parse is an error rather than silently
/// replaced by defaults.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        info!(path = %path.display(), "no config file; using defaults");
        return Ok(BridgeConfig::default());
    }
    let config = BridgeConfig::load(path)?;
    info!(path = %path.display(), "config loaded");
    Ok(config)
}

fn base_dir() -> PathBuf {
    // Try XDG config dir, then fall back to home
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config");
    }
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").expect("write");
        assert!(load_config(&path).is_err());
    }
}
