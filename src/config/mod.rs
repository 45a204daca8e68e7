//! Configuration management

use crate::domain::session::media::{CallOptions, IceServer, PeerLinkConfig};
use crate::domain::session::tone::DtmfOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `PEERCALL__SESSION__TERMINATE_TIMEOUT_MS=200`
pub const ENV_PREFIX: &str = "PEERCALL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fallback delay before a locally requested termination is forced
    pub terminate_timeout_ms: u64,
    /// Buffered notifications per session before slow listeners lag
    pub event_capacity: usize,
    pub dtmf: DtmfConfig,
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtmfConfig {
    pub duration_ms: u64,
    pub gap_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: 150,
            event_capacity: 64,
            dtmf: DtmfConfig::default(),
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
        }
    }
}

impl Default for DtmfConfig {
    fn default() -> Self {
        Self {
            duration_ms: 100,
            gap_ms: 70,
        }
    }
}

impl SessionConfig {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub fn dtmf_options(&self) -> DtmfOptions {
        DtmfOptions::new(
            Duration::from_millis(self.dtmf.duration_ms),
            Duration::from_millis(self.dtmf.gap_ms),
        )
    }

    /// Peer link configuration for one call, honoring per-call ICE overrides
    pub fn peer_link_config(&self, options: &CallOptions) -> PeerLinkConfig {
        PeerLinkConfig {
            ice_servers: options
                .ice_servers
                .clone()
                .unwrap_or_else(|| self.ice_servers.clone()),
        }
    }
}

impl Config {
    /// Load from an optional file (any format the `config` crate detects by
    /// extension) layered under `PEERCALL__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
