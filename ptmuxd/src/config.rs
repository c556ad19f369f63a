//! Internal daemon tuning, loaded from an optional TOML file. This is
//! distinct from any user-facing configuration-persistence subsystem; it
//! only covers knobs the daemon itself needs (history size, queue depth,
//! timeouts).

use std::{fs, path::Path};

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::consts;

#[instrument(skip_all)]
pub fn read_config(config_file: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = config_file else {
        return Ok(Config::default());
    };
    if !path.exists() {
        info!("config file {:?} does not exist, using defaults", path);
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path).context("reading config toml")?;
    let config: Config = toml::from_str(&raw).context("parsing config file")?;
    Ok(config)
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Per-session scrollback cap in bytes.
    pub history_bytes: Option<usize>,

    /// Per-subscriber bounded outbound queue depth, in frames.
    pub queue_depth: Option<usize>,

    /// How long (ms) a subscriber's queue may stay full before the
    /// slow-consumer policy drops output for it.
    pub slow_consumer_window_ms: Option<u64>,

    /// Cap (bytes) on a single frame's declared length.
    pub max_frame_bytes: Option<u32>,

    /// How long (ms) a client waits for an auto-spawned daemon's socket
    /// to come up.
    pub autospawn_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            history_bytes: None,
            queue_depth: None,
            slow_consumer_window_ms: None,
            max_frame_bytes: None,
            autospawn_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn history_bytes(&self) -> usize {
        self.history_bytes.unwrap_or(consts::DEFAULT_HISTORY_BYTES)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(consts::DEFAULT_QUEUE_DEPTH)
    }

    pub fn slow_consumer_window(&self) -> std::time::Duration {
        self.slow_consumer_window_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(consts::DEFAULT_SLOW_CONSUMER_WINDOW)
    }

    pub fn max_frame_bytes(&self) -> u32 {
        self.max_frame_bytes.unwrap_or(consts::DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn autospawn_timeout(&self) -> std::time::Duration {
        self.autospawn_timeout_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(consts::AUTOSPAWN_TIMEOUT)
    }
}

/// Shared handle to the daemon's config, cheap to clone.
#[derive(Clone)]
pub struct Manager {
    config: std::sync::Arc<Config>,
}

impl Manager {
    pub fn new(config: Config) -> Self {
        Manager { config: std::sync::Arc::new(config) }
    }

    pub fn get(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ntest::timeout;

    #[test]
    #[timeout(30000)]
    fn parse() -> anyhow::Result<()> {
        let cases = vec![
            r#"
            history_bytes = 1024
            "#,
            r#"
            queue_depth = 256
            slow_consumer_window_ms = 500
            "#,
            "",
        ];

        for case in cases {
            let _: Config = toml::from_str(case)?;
        }

        Ok(())
    }

    #[test]
    fn defaults_apply_when_fields_absent() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.history_bytes(), consts::DEFAULT_HISTORY_BYTES);
        assert_eq!(config.queue_depth(), consts::DEFAULT_QUEUE_DEPTH);
    }
}
