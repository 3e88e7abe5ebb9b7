// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Swarm RPC
//!
//! Many callers, many providers: masters invoke named methods that any
//! number of drones may answer, over publish/subscribe delivery with
//! registry-backed discovery.
//!
//! # Features
//!
//! - **Subscription addressing**: replies route back through a per-call
//!   correlation token the caller subscribes to
//! - **Dynamic topology**: drones follow `/masters` and connect or
//!   disconnect as masters come and go
//! - **Call strategies**: stream whoever answers, stream a known provider
//!   set, or collect a known provider set
//! - **Roll-call**: find live providers without the registry
//!
//! # Quick Start
//!
//! ```bash
//! # Random swarm, every master calls cats(name) on every drone
//! hdds-swarm-cats
//!
//! # Fixed size, with subscription sniffers on the masters
//! hdds-swarm-cats --masters 2 --drones 5 --sniff --log-level debug
//! ```
//!
//! # Configuration File
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

pub mod codec;
pub mod config;
pub mod drone;
pub mod envelope;
pub mod error;
pub mod master;
pub mod node;
pub mod registry;
pub mod transport;

pub use config::{ConfigError, MasterEndpoints, NodeConfig, RpcDefaults, SwarmConfig};
pub use drone::{Drone, DroneHandle, MethodHandler, RefreshStats, Reply, TopologyBook};
pub use envelope::{Envelope, Frames, Payload};
pub use error::{Result, SwarmError};
pub use master::{
    CallMode, CallOptions, CallOutcome, CallStream, Master, Response, Rollcall, RpcOverrides,
};
pub use node::{Channel, Node, NodeIdentity, Readiness, Role};
pub use registry::{
    Coordinator, MasterRecord, MemoryEnsemble, Registry, RegistryError, Session, SessionState,
};
pub use transport::{Context, TransportError};
