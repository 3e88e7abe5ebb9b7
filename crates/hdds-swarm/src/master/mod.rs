// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master: the calling side of the swarm.
//!
//! A master binds one channel pair, advertises itself under `/masters`, and
//! issues calls that any number of drones may answer. Four strategies are
//! selected by `(certain, generator)`:
//!
//! | certain | generator | strategy |
//! |---|---|---|
//! | false | true | stream every reply until the deadline |
//! | true | true | stream until the known providers have answered |
//! | true | false | collect the known providers into a map |
//! | false | false | unsupported, fails fast |
//!
//! # Example
//!
//! ```rust,no_run
//! use hdds_swarm::{Context, MasterEndpoints, Master, MemoryEnsemble, Registry, SwarmConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn example() -> hdds_swarm::Result<()> {
//! let ctx = Context::new();
//! let ensemble = MemoryEnsemble::new();
//! let registry = Registry::new(Arc::new(ensemble.session()));
//!
//! let mut master = Master::new(&ctx, registry, &SwarmConfig::default())?;
//! master.bind(&MasterEndpoints::direct("inproc://rep.0", "inproc://req.0"))?;
//!
//! let stream = master.stream_known_providers("cats", vec![json!("Squeak")], None, false, None)?;
//! for response in stream {
//!     let response = response?;
//!     println!("{}: {:?}", response.provider, response.value);
//! }
//! # Ok(())
//! # }
//! ```

mod call;
mod options;

pub use call::{CallStream, Response, Rollcall};
pub use options::{CallMode, CallOptions, CallOutcome, RpcOverrides, SYSTEM_METHODS};

use crate::config::{MasterEndpoints, RpcDefaults, SwarmConfig};
use crate::envelope::Payload;
use crate::error::{Result, SwarmError};
use crate::node::{Node, Role};
use crate::registry::{Registry, ROLLCALL_METHOD};
use crate::transport::Context;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Calling node.
pub struct Master {
    node: Node,
    registry: Registry,
    defaults: RpcDefaults,
    endpoints: Option<MasterEndpoints>,
    record: Option<String>,
}

impl Master {
    /// Create a master. Binds immediately if `config.master` is set.
    pub fn new(ctx: &Context, registry: Registry, config: &SwarmConfig) -> Result<Self> {
        config.validate()?;
        registry.ensure_session()?;
        let mut master = Self {
            node: Node::new(ctx, Role::Master, &config.node)?,
            registry,
            defaults: config.rpc,
            endpoints: None,
            record: None,
        };
        if let Some(endpoints) = &config.master {
            master.bind(endpoints)?;
        }
        Ok(master)
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn address(&self) -> &str {
        self.node.address()
    }

    pub fn endpoints(&self) -> Option<&MasterEndpoints> {
        self.endpoints.as_ref()
    }

    /// Bind the private endpoints and advertise the public ones.
    ///
    /// Returns `false` if the channels could not be bound; nothing is
    /// advertised in that case.
    pub fn bind(&mut self, endpoints: &MasterEndpoints) -> Result<bool> {
        if !self.node.bind(&endpoints.private_in, &endpoints.private_out) {
            return Ok(false);
        }
        let path = self
            .registry
            .register_master(self.node.address(), &endpoints.record())?;
        tracing::info!(
            master = %self.name(),
            %path,
            public_in = %endpoints.public_in,
            public_out = %endpoints.public_out,
            "master advertised"
        );
        self.endpoints = Some(endpoints.clone());
        self.record = Some(path);
        Ok(true)
    }

    /// Withdraw the master record. Also runs on drop.
    pub fn close(&mut self) {
        if self.record.take().is_some() {
            match self.registry.deregister_master(self.node.address()) {
                Ok(_) => tracing::debug!(master = %self.name(), "master withdrawn"),
                Err(e) => tracing::debug!(master = %self.name(), "withdraw failed: {}", e),
            }
        }
    }

    pub fn rpc_defaults(&self) -> RpcDefaults {
        self.defaults
    }

    /// Replace the defaults used by [`Master::invoke`].
    pub fn set_rpc_defaults(&mut self, defaults: RpcDefaults) {
        self.defaults = defaults;
    }

    /// Merge overrides into the defaults used by [`Master::invoke`].
    pub fn update_rpc_defaults(&mut self, overrides: RpcOverrides) {
        self.defaults = overrides.apply(self.defaults);
    }

    /// Providers of `method` according to the registry.
    pub fn providers_by_registry(&self, method: &str) -> Result<HashSet<String>> {
        self.registry
            .providers(method)?
            .ok_or_else(|| SwarmError::NoProviders(method.to_string()))
    }

    /// Ask the roll-call topic which live nodes provide `method`.
    ///
    /// Stops early after `max_providers` distinct answers (0 = no cap).
    pub fn providers_by_rollcall(
        &self,
        method: &str,
        max_providers: usize,
        timeout: Option<Duration>,
    ) -> Result<Rollcall<'_>> {
        let query = Value::Array(vec![Value::String(method.to_string())]);
        let token = self.node.publish_replyable(ROLLCALL_METHOD, query)?;
        let stream = CallStream::open(
            &self.node,
            token,
            ROLLCALL_METHOD,
            None,
            None,
            self.deadline(timeout),
        );
        Ok(Rollcall::new(stream, max_providers))
    }

    /// Full roll-call; fails with `NoProviders` if nobody answered.
    pub fn rollcall_all(&self, method: &str, timeout: Option<Duration>) -> Result<HashSet<String>> {
        let providers = self
            .providers_by_rollcall(method, 0, timeout)?
            .collect::<Result<HashSet<String>>>()?;
        if providers.is_empty() {
            return Err(SwarmError::NoProviders(method.to_string()));
        }
        Ok(providers)
    }

    /// Every reply to `method` until the deadline.
    pub fn stream_any_responses(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<CallStream<'_>> {
        let token = self.node.publish_replyable(method, request(args))?;
        Ok(CallStream::open(
            &self.node,
            token,
            method,
            None,
            None,
            self.deadline(timeout),
        ))
    }

    /// Replies from the known providers of `method`.
    ///
    /// Finishes early once every known provider has answered.
    pub fn stream_known_providers(
        &self,
        method: &str,
        args: Vec<Value>,
        providers: Option<Vec<String>>,
        only: bool,
        timeout: Option<Duration>,
    ) -> Result<CallStream<'_>> {
        let known = self.known_providers(method, providers)?;
        let token = self.node.publish_replyable(method, request(args))?;
        Ok(CallStream::open(
            &self.node,
            token,
            method,
            Some(3),
            Some((known, only)),
            self.deadline(timeout),
        ))
    }

    /// Replies from the known providers of `method`, collected.
    ///
    /// Every known provider appears in the result; `None` means it never
    /// answered. Unless `only` is set, other answering providers are
    /// included as well.
    pub fn collect_known_providers(
        &self,
        method: &str,
        args: Vec<Value>,
        providers: Option<Vec<String>>,
        only: bool,
        timeout: Option<Duration>,
    ) -> Result<HashMap<String, Option<Value>>> {
        let known = self.known_providers(method, providers)?;
        let token = self.node.publish_replyable(method, request(args))?;
        let stream = CallStream::open(
            &self.node,
            token,
            method,
            Some(3),
            Some((known.clone(), only)),
            self.deadline(timeout),
        );
        call::collect(stream, &known)
    }

    /// Call `method` with per-call overrides merged over the defaults.
    pub fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<CallOutcome<'_>> {
        if SYSTEM_METHODS.binary_search(&method).is_ok() {
            return Err(SwarmError::ReservedMethod(method.to_string()));
        }
        let mode = options.mode.apply(self.defaults);
        let CallOptions {
            providers,
            only,
            timeout,
            ..
        } = options;
        match CallMode::select(mode.certain, mode.generator)? {
            CallMode::StreamAny => self
                .stream_any_responses(method, args, timeout)
                .map(CallOutcome::Stream),
            CallMode::StreamKnown => self
                .stream_known_providers(method, args, providers, only, timeout)
                .map(CallOutcome::Stream),
            CallMode::CollectKnown => self
                .collect_known_providers(method, args, providers, only, timeout)
                .map(CallOutcome::Collected),
        }
    }

    fn known_providers(
        &self,
        method: &str,
        providers: Option<Vec<String>>,
    ) -> Result<HashSet<String>> {
        match providers {
            Some(providers) if !providers.is_empty() => Ok(providers.into_iter().collect()),
            _ => self.providers_by_registry(method),
        }
    }

    fn deadline(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.node.timeout())
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("node", &self.node)
            .field("defaults", &self.defaults)
            .field("record", &self.record)
            .finish()
    }
}

fn request(args: Vec<Value>) -> Payload {
    Payload::Value(Value::Array(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryEnsemble;
    use std::sync::Arc;

    fn master(ensemble: &MemoryEnsemble, ctx: &Context) -> Master {
        let registry = Registry::new(Arc::new(ensemble.session()));
        Master::new(ctx, registry, &SwarmConfig::with_timeout(Duration::from_millis(20)))
            .expect("master")
    }

    #[test]
    fn test_bind_advertises_record() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let observer = Registry::new(Arc::new(ensemble.session()));
        let mut master = master(&ensemble, &ctx);
        assert!(master
            .bind(&MasterEndpoints::direct("inproc://m.rep", "inproc://m.req"))
            .expect("bind"));

        let masters = observer.masters(None).expect("masters");
        assert_eq!(masters, vec![format!("/masters/{}", master.address())]);
        let record = observer.master_record(&masters[0], None).expect("record");
        assert_eq!(record.public_in, "inproc://m.rep");
        assert_eq!(record.public_out, "inproc://m.req");

        master.close();
        assert!(observer.masters(None).expect("masters").is_empty());
    }

    #[test]
    fn test_bind_failure_advertises_nothing() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let mut first = master(&ensemble, &ctx);
        let mut second = master(&ensemble, &ctx);
        let endpoints = MasterEndpoints::direct("inproc://dup.rep", "inproc://dup.req");
        assert!(first.bind(&endpoints).expect("bind"));
        assert!(!second.bind(&endpoints).expect("bind"));
        assert!(second.endpoints().is_none());
    }

    #[test]
    fn test_providers_by_registry_missing() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let master = master(&ensemble, &ctx);
        let err = master.providers_by_registry("cats").expect_err("no providers");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_no_providers_publishes_nothing() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let mut master = master(&ensemble, &ctx);
        assert!(master
            .bind(&MasterEndpoints::direct("inproc://np.rep", "inproc://np.req"))
            .expect("bind"));
        let listener = Node::new(&ctx, Role::Drone, &SwarmConfig::default().node).expect("node");
        assert!(listener.connect("inproc://np.req", "inproc://np.rep"));
        listener.subscribe("").expect("subscribe");

        let result = master.collect_known_providers("cats", vec![], None, false, None);
        assert!(matches!(result, Err(SwarmError::NoProviders(_))));
        let heard = listener
            .receive_matching(crate::node::Channel::In, None)
            .count();
        assert_eq!(heard, 0);
    }

    #[test]
    fn test_invoke_rejects_reserved() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let master = master(&ensemble, &ctx);
        assert!(matches!(
            master.invoke("publish", vec![], CallOptions::new()),
            Err(SwarmError::ReservedMethod(_))
        ));
    }

    #[test]
    fn test_invoke_unsupported_mode() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let master = master(&ensemble, &ctx);
        let options = CallOptions::new().certain(false).generator(false);
        assert!(matches!(
            master.invoke("cats", vec![], options),
            Err(SwarmError::UnsupportedCallMode { .. })
        ));
    }

    #[test]
    fn test_stream_any_without_drones_times_out() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let master = master(&ensemble, &ctx);
        let started = std::time::Instant::now();
        let mut stream = master
            .stream_any_responses("cats", vec![], Some(Duration::from_millis(60)))
            .expect("stream");
        let id = stream.correlation_id().expect("id").to_string();
        assert!(master.node().is_subscribed(&id));
        assert!(stream.next().is_none());
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(!master.node().is_subscribed(&id));
    }

    #[test]
    fn test_early_drop_releases_token() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let master = master(&ensemble, &ctx);
        let stream = master
            .stream_known_providers("cats", vec![], Some(vec!["drone=x".into()]), true, None)
            .expect("stream");
        let id = stream.correlation_id().expect("id").to_string();
        drop(stream);
        assert!(!master.node().is_subscribed(&id));
    }

    #[test]
    fn test_rpc_defaults_update() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let mut master = master(&ensemble, &ctx);
        master.update_rpc_defaults(RpcOverrides {
            certain: Some(false),
            generator: None,
        });
        assert_eq!(
            master.rpc_defaults(),
            RpcDefaults {
                certain: false,
                generator: true
            }
        );
        master.set_rpc_defaults(RpcDefaults::default());
        assert!(master.rpc_defaults().certain);
    }

    #[test]
    fn test_rollcall_all_nobody() {
        let ctx = Context::new();
        let ensemble = MemoryEnsemble::new();
        let master = master(&ensemble, &ctx);
        let result = master.rollcall_all("cats", Some(Duration::from_millis(30)));
        assert!(matches!(result, Err(SwarmError::NoProviders(_))));
    }
}
