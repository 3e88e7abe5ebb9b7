// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for swarm operations.
//!
//! Topology churn (failed binds, connects and disconnects) never shows up
//! here: it is absorbed by the component that observes it and reduced to a
//! boolean plus a log line. What remains are conditions the caller has to
//! act on.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::envelope::EnvelopeError;
use crate::registry::RegistryError;
use crate::transport::TransportError;
use thiserror::Error;

/// Result type for swarm operations.
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Errors surfaced at the swarm call boundary.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Nobody has ever registered (or answered for) this method.
    #[error("No providers of {0}")]
    NoProviders(String),

    /// `certain = false, generator = false` has no defined behavior.
    #[error("Unsupported call mode (certain={certain}, generator={generator})")]
    UnsupportedCallMode { certain: bool, generator: bool },

    /// The name belongs to a primitive node operation, not an RPC method.
    #[error("Method name is reserved for a node primitive: {0}")]
    ReservedMethod(String),
}

impl SwarmError {
    /// True for the "nobody provides this" discovery failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoProviders(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SwarmError::NoProviders("cats".to_string());
        assert!(err.to_string().contains("cats"));
        assert!(err.is_not_found());

        let err = SwarmError::UnsupportedCallMode {
            certain: false,
            generator: false,
        };
        assert!(err.to_string().contains("certain=false"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_from_transport() {
        let err: SwarmError = TransportError::Terminated.into();
        assert!(matches!(err, SwarmError::Transport(TransportError::Terminated)));
    }
}
