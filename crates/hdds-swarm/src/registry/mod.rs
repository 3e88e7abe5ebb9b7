// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coordination registry.
//!
//! Service discovery runs over a hierarchical, watch-capable store:
//!
//! ```text
//! /masters/<masterAddress>            value = pack((publicIn, publicOut))
//! /api/<methodName>/<providerAddress> value = empty
//! ```
//!
//! [`Coordinator`] is the store interface, [`MemoryEnsemble`] the in-process
//! implementation, and [`Registry`] the swarm-facing adapter that knows the
//! layout above.

mod memory;

pub use memory::{MemoryEnsemble, Session};

use crate::codec::{self, CodecError};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Root of the master records.
pub const MASTERS_PATH: &str = "/masters";

/// Root of the provider records.
pub const API_PATH: &str = "/api";

/// Reserved roll-call topic.
pub const ROLLCALL_METHOD: &str = "_rollcall";

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no node at {0}")]
    NoNode(String),

    #[error("node already exists at {0}")]
    NodeExists(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("ephemeral node cannot have children: {0}")]
    EphemeralParent(String),

    #[error("registry session lost")]
    SessionLost,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("record codec failed: {0}")]
    Codec(#[from] CodecError),
}

/// Node lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed when the creating session stops.
    Ephemeral,
}

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Suspended,
    Lost,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Lost => write!(f, "LOST"),
        }
    }
}

/// What happened at a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Deleted,
    Changed,
    /// Children of the watched path changed.
    Child,
}

/// Notification delivered to a one-shot watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub state: SessionState,
    pub path: String,
}

/// One-shot watch callback.
///
/// Called at most once, from whichever thread mutated the store, with no
/// store lock held. Registering the same `Arc` twice on one path keeps one.
pub type Watcher = Arc<dyn Fn(WatchedEvent) + Send + Sync>;

/// Hierarchical coordination store interface.
pub trait Coordinator: Send + Sync {
    fn state(&self) -> SessionState;

    /// (Re)connect. A lost session comes back under a fresh identity.
    fn start(&self) -> Result<(), RegistryError>;

    /// Disconnect. Ephemerals owned by this session are removed.
    fn stop(&self);

    /// Create `path` and any missing ancestors as persistent nodes.
    fn ensure_path(&self, path: &str) -> Result<(), RegistryError>;

    fn create(&self, path: &str, value: Vec<u8>, mode: CreateMode) -> Result<(), RegistryError>;

    fn exists(&self, path: &str) -> Result<bool, RegistryError>;

    /// Read a node's value, optionally leaving a data watch.
    fn get(&self, path: &str, watch: Option<Watcher>) -> Result<Vec<u8>, RegistryError>;

    fn set(&self, path: &str, value: Vec<u8>) -> Result<(), RegistryError>;

    /// List child names atomically, optionally leaving a child watch.
    fn get_children(
        &self,
        path: &str,
        watch: Option<Watcher>,
    ) -> Result<Vec<String>, RegistryError>;

    fn delete(&self, path: &str) -> Result<(), RegistryError>;
}

pub(crate) fn validate_path(path: &str) -> Result<(), RegistryError> {
    let valid = path == "/"
        || (path.starts_with('/')
            && !path.ends_with('/')
            && !path[1..].split('/').any(str::is_empty));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidPath(path.to_string()))
    }
}

/// Public endpoints advertised in a master record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MasterRecord {
    /// Where drones publish requests and replies.
    pub public_in: String,
    /// Where drones receive requests from.
    pub public_out: String,
}

impl MasterRecord {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::pack(&(&self.public_in, &self.public_out))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (public_in, public_out): (String, String) = codec::unpack(bytes)?;
        Ok(Self {
            public_in,
            public_out,
        })
    }
}

/// Swarm-facing registry adapter.
///
/// Cheap to clone; every node in a process may share one.
#[derive(Clone)]
pub struct Registry {
    coordinator: Arc<dyn Coordinator>,
}

impl Registry {
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    pub fn state(&self) -> SessionState {
        self.coordinator.state()
    }

    /// Restart a lost session. Returns the state after the attempt.
    pub fn ensure_session(&self) -> Result<SessionState, RegistryError> {
        if self.coordinator.state() == SessionState::Lost {
            tracing::info!("registry session lost, restarting");
            self.coordinator.start()?;
        }
        Ok(self.coordinator.state())
    }

    pub fn method_path(method: &str) -> String {
        format!("{}/{}", API_PATH, method)
    }

    pub fn provider_path(method: &str, address: &str) -> String {
        format!("{}/{}/{}", API_PATH, method, address)
    }

    pub fn master_path(address: &str) -> String {
        format!("{}/{}", MASTERS_PATH, address)
    }

    /// Advertise a master. Returns the record path.
    pub fn register_master(
        &self,
        address: &str,
        record: &MasterRecord,
    ) -> Result<String, RegistryError> {
        self.ensure_session()?;
        self.coordinator.ensure_path(MASTERS_PATH)?;
        let path = Self::master_path(address);
        self.coordinator
            .create(&path, record.encode()?, CreateMode::Ephemeral)?;
        tracing::debug!(%path, "master registered");
        Ok(path)
    }

    /// Remove a master record. `false` if it was already gone.
    pub fn deregister_master(&self, address: &str) -> Result<bool, RegistryError> {
        remove_if_present(&*self.coordinator, &Self::master_path(address))
    }

    /// Full paths of every advertised master, optionally leaving a child
    /// watch on `/masters`.
    pub fn masters(&self, watch: Option<Watcher>) -> Result<Vec<String>, RegistryError> {
        self.ensure_session()?;
        self.coordinator.ensure_path(MASTERS_PATH)?;
        let children = self.coordinator.get_children(MASTERS_PATH, watch)?;
        Ok(children
            .into_iter()
            .map(|child| Self::master_path(&child))
            .collect())
    }

    /// Read one master record, optionally leaving a data watch on it.
    pub fn master_record(
        &self,
        path: &str,
        watch: Option<Watcher>,
    ) -> Result<MasterRecord, RegistryError> {
        let bytes = self.coordinator.get(path, watch)?;
        Ok(MasterRecord::decode(&bytes)?)
    }

    /// Advertise `address` as a provider of `method`.
    ///
    /// An existing record for the same provider is left in place.
    pub fn register_provider(&self, method: &str, address: &str) -> Result<(), RegistryError> {
        self.ensure_session()?;
        self.coordinator.ensure_path(&Self::method_path(method))?;
        match self.coordinator.create(
            &Self::provider_path(method, address),
            Vec::new(),
            CreateMode::Ephemeral,
        ) {
            Ok(()) | Err(RegistryError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Withdraw a provider record. `false` if it was already gone.
    pub fn deregister_provider(&self, method: &str, address: &str) -> Result<bool, RegistryError> {
        remove_if_present(&*self.coordinator, &Self::provider_path(method, address))
    }

    /// Providers of `method`, or `None` if nobody ever registered it.
    pub fn providers(&self, method: &str) -> Result<Option<HashSet<String>>, RegistryError> {
        self.ensure_session()?;
        match self.coordinator.get_children(&Self::method_path(method), None) {
            Ok(children) => Ok(Some(children.into_iter().collect())),
            Err(RegistryError::NoNode(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("state", &self.coordinator.state())
            .finish()
    }
}

fn remove_if_present(coordinator: &dyn Coordinator, path: &str) -> Result<bool, RegistryError> {
    match coordinator.delete(path) {
        Ok(()) => Ok(true),
        Err(RegistryError::NoNode(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
