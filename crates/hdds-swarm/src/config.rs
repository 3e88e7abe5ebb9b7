// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Swarm configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! [node]
//! timeout_ms = 250
//!
//! [rpc]
//! certain = true
//! generator = true
//!
//! [master]
//! public_in = "inproc://swarm.rep.0"
//! private_in = "inproc://swarm.rep.0"
//! public_out = "inproc://swarm.req.0"
//! private_out = "inproc://swarm.req.0"
//! ```

use crate::registry::MasterRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-node settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable name. Defaults to the role name.
    #[serde(default)]
    pub name: Option<String>,

    /// Fixed identity. A random UUID is generated when absent.
    #[serde(default)]
    pub identity: Option<String>,

    /// Upper bound on any single wait (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

impl NodeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            identity: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Default call mode for generic invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcDefaults {
    /// Resolve a closed provider set and wait for full coverage.
    #[serde(default = "default_true")]
    pub certain: bool,

    /// Stream responses instead of collecting them.
    #[serde(default = "default_true")]
    pub generator: bool,
}

impl Default for RpcDefaults {
    fn default() -> Self {
        Self {
            certain: true,
            generator: true,
        }
    }
}

/// Master bind vector.
///
/// Private endpoints are bound locally; public endpoints are what drones
/// are told to connect to. They differ when a proxy sits in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterEndpoints {
    pub public_in: String,
    pub private_in: String,
    pub public_out: String,
    pub private_out: String,
}

impl MasterEndpoints {
    /// Same endpoints published and bound.
    pub fn direct(inbound: impl Into<String>, outbound: impl Into<String>) -> Self {
        let inbound = inbound.into();
        let outbound = outbound.into();
        Self {
            public_in: inbound.clone(),
            private_in: inbound,
            public_out: outbound.clone(),
            private_out: outbound,
        }
    }

    /// Record advertised in the registry.
    pub fn record(&self) -> MasterRecord {
        MasterRecord {
            public_in: self.public_in.clone(),
            public_out: self.public_out.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("public_in", &self.public_in),
            ("private_in", &self.private_in),
            ("public_out", &self.public_out),
            ("private_out", &self.private_out),
        ];
        for (name, value) in fields {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("master.{} is empty", name)));
            }
        }
        Ok(())
    }
}

/// Top-level swarm configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub rpc: RpcDefaults,

    /// Bind vector for a master started from this file.
    #[serde(default)]
    pub master: Option<MasterEndpoints>,
}

impl SwarmConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with a specific poll timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            node: NodeConfig {
                timeout_ms: timeout.as_millis().max(1) as u64,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.timeout_ms == 0 {
            return Err(ConfigError::Invalid("node.timeout_ms must be > 0".into()));
        }
        if !self.rpc.certain && !self.rpc.generator {
            return Err(ConfigError::Invalid(
                "rpc defaults select an unsupported call mode (certain=false, generator=false)"
                    .into(),
            ));
        }
        if let Some(master) = &self.master {
            master.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SwarmConfig::default();
        assert_eq!(config.node.timeout(), Duration::from_millis(250));
        assert!(config.rpc.certain);
        assert!(config.rpc.generator);
        assert!(config.master.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full() {
        let config = SwarmConfig::from_toml(
            r#"
            [node]
            name = "master-0"
            timeout_ms = 100

            [rpc]
            generator = false

            [master]
            public_in = "inproc://pub.in"
            private_in = "inproc://priv.in"
            public_out = "inproc://pub.out"
            private_out = "inproc://priv.out"
            "#,
        )
        .expect("parse");
        assert_eq!(config.node.name.as_deref(), Some("master-0"));
        assert_eq!(config.node.timeout_ms, 100);
        assert!(config.rpc.certain);
        assert!(!config.rpc.generator);
        let master = config.master.expect("master");
        assert_eq!(master.record().public_in, "inproc://pub.in");
        assert_eq!(master.private_out, "inproc://priv.out");
    }

    #[test]
    fn test_reject_zero_timeout() {
        let result = SwarmConfig::from_toml("[node]\ntimeout_ms = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_reject_unsupported_rpc_defaults() {
        let result = SwarmConfig::from_toml("[rpc]\ncertain = false\ngenerator = false\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_reject_empty_endpoint() {
        let mut config = SwarmConfig::default();
        config.master = Some(MasterEndpoints::direct("", "inproc://out"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[node]\ntimeout_ms = 75").expect("write");
        let config = SwarmConfig::from_file(file.path()).expect("load");
        assert_eq!(config.node.timeout_ms, 75);
    }

    #[test]
    fn test_from_file_missing() {
        let result = SwarmConfig::from_file("/nonexistent/swarm.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_parse_error() {
        let result = SwarmConfig::from_toml("[node\n");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }
}
