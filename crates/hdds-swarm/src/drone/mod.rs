// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Drone: the providing side of the swarm.
//!
//! A drone follows `/masters` and keeps one connection per advertised
//! master, advertises each method it serves under `/api`, and answers
//! requests on its own thread.
//!
//! # Topology
//!
//! Registry watches only enqueue events; the drone thread applies them in
//! [`Drone::process_events`], so the topology book is never touched from a
//! registry callback.
//!
//! ```text
//! master.private_out  <--  drone In   (requests)
//! master.private_in   <--  drone Out  (replies)
//! ```

mod handler;
mod topology;

pub use handler::{MethodHandler, Reply};
pub use topology::{RefreshStats, TopologyBook};

use crate::codec;
use crate::config::SwarmConfig;
use crate::envelope::{Frames, FramesDisplay};
use crate::error::{Result, SwarmError};
use crate::node::{Channel, Node, Role};
use crate::registry::{
    EventKind, MasterRecord, Registry, RegistryError, SessionState, WatchedEvent, Watcher,
    ROLLCALL_METHOD,
};
use crate::transport::Context;
use crossbeam::channel::{self, Receiver};
use handler::Entry;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle for stopping a running drone from another thread.
#[derive(Debug, Clone)]
pub struct DroneHandle {
    running: Arc<AtomicBool>,
}

impl DroneHandle {
    /// Stop the drone loop after its current pass.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("drone stop requested");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Providing node.
pub struct Drone {
    node: Node,
    registry: Registry,
    methods: HashMap<String, Entry>,
    book: TopologyBook,
    events: Receiver<WatchedEvent>,
    watcher: Watcher,
    /// Registry events were skipped; `/masters` must be re-read.
    stale: bool,
    running: Arc<AtomicBool>,
}

impl Drone {
    /// Create a drone, connect to every advertised master and register the
    /// built-in roll-call responder.
    pub fn new(ctx: &Context, registry: Registry, config: &SwarmConfig) -> Result<Self> {
        config.validate()?;
        registry.ensure_session()?;
        let (tx, events) = channel::unbounded();
        let watcher: Watcher = Arc::new(move |event: WatchedEvent| {
            let _ = tx.send(event);
        });
        let mut drone = Self {
            node: Node::new(ctx, Role::Drone, &config.node)?,
            registry,
            methods: HashMap::new(),
            book: TopologyBook::new(),
            events,
            watcher,
            stale: false,
            running: Arc::new(AtomicBool::new(true)),
        };

        let stats = drone.refresh()?;
        if stats.failed > 0 {
            tracing::info!(
                drone = %drone.name(),
                "connected to {} masters ({} failed)",
                stats.added,
                stats.failed
            );
        } else {
            tracing::info!(drone = %drone.name(), "connected to {} masters", stats.added);
        }

        drone.install(ROLLCALL_METHOD, Entry::Rollcall)?;
        Ok(drone)
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

    pub fn book(&self) -> &TopologyBook {
        &self.book
    }

    pub fn is_registered(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Serve `method` with `handler`.
    ///
    /// Registering an already served method only swaps the handler.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler) -> Result<()> {
        self.install(method, Entry::User(Box::new(handler)))
    }

    /// Stop serving `method`. `false` if it was not served.
    pub fn deregister(&mut self, method: &str) -> Result<bool> {
        if self.methods.remove(method).is_none() {
            return Ok(false);
        }
        let withdrawn = self.registry.deregister_provider(method, self.node.address())?;
        self.node.unsubscribe(method)?;
        tracing::debug!(drone = %self.name(), method, withdrawn, "method deregistered");
        Ok(true)
    }

    fn install(&mut self, method: &str, entry: Entry) -> Result<()> {
        if self.methods.contains_key(method) {
            self.methods.insert(method.to_string(), entry);
            tracing::debug!(drone = %self.name(), method, "handler replaced");
            return Ok(());
        }
        self.registry.register_provider(method, self.node.address())?;
        self.node.subscribe(method)?;
        self.methods.insert(method.to_string(), entry);
        tracing::debug!(
            drone = %self.name(),
            path = %Registry::provider_path(method, self.node.address()),
            "method registered"
        );
        Ok(())
    }

    /// Reconcile the topology book with `/masters`.
    ///
    /// Leaves a child watch on `/masters` and a data watch on every newly
    /// connected master record.
    pub fn refresh(&mut self) -> Result<RefreshStats> {
        let current: HashSet<String> = self
            .registry
            .masters(Some(Arc::clone(&self.watcher)))?
            .into_iter()
            .collect();
        let (gone, new, unchanged) = self.book.plan(&current);
        let mut stats = RefreshStats {
            unchanged,
            ..Default::default()
        };

        for path in gone {
            tracing::info!(drone = %self.name(), %path, "deleting gone master");
            self.disconnect_master(&path);
            stats.removed += 1;
        }

        for path in new {
            tracing::info!(drone = %self.name(), %path, "adding new master");
            let record = match self
                .registry
                .master_record(&path, Some(Arc::clone(&self.watcher)))
            {
                Ok(record) => record,
                Err(RegistryError::SessionLost) => return Err(RegistryError::SessionLost.into()),
                Err(e) => {
                    tracing::warn!(drone = %self.name(), %path, "unreadable master record: {}", e);
                    stats.failed += 1;
                    continue;
                }
            };
            if self.connect_master(&path, record) {
                stats.added += 1;
            } else {
                stats.failed += 1;
            }
        }

        tracing::debug!(drone = %self.name(), ?stats, "topology refreshed");
        Ok(stats)
    }

    /// Connect to one master and book it.
    pub fn connect_master(&mut self, path: &str, record: MasterRecord) -> bool {
        if self.book.contains(path) {
            return true;
        }
        tracing::debug!(
            drone = %self.name(),
            path,
            public_in = %record.public_in,
            public_out = %record.public_out,
            "connect_master"
        );
        // endpoints are advertised from the master's perspective
        if self.node.connect(&record.public_out, &record.public_in) {
            self.book.insert(path, record);
            true
        } else {
            tracing::warn!(drone = %self.name(), path, "master is not available");
            false
        }
    }

    /// Disconnect from one master. The book entry is dropped either way.
    pub fn disconnect_master(&mut self, path: &str) -> bool {
        let Some(record) = self.book.remove(path) else {
            return false;
        };
        tracing::debug!(drone = %self.name(), path, "disconnect_master");
        let ok = self.node.disconnect(&record.public_out, &record.public_in);
        if !ok {
            tracing::debug!(drone = %self.name(), path, "couldn't disconnect (not connected?)");
        }
        ok
    }

    /// Apply queued registry events. Returns how many were taken.
    ///
    /// Events skipped while the session is not connected leave the drone
    /// stale; the next pass with a connected session re-reads `/masters`.
    /// A session lost during the re-read is retried on later passes.
    pub fn process_events(&mut self) -> Result<usize> {
        let events: Vec<WatchedEvent> = self.events.try_iter().collect();
        let mut refresh = false;
        for event in &events {
            let state = self.registry.state();
            if event.state != SessionState::Connected || state != SessionState::Connected {
                tracing::info!(
                    drone = %self.name(),
                    %state,
                    path = %event.path,
                    "ignoring registry event"
                );
                self.stale = true;
                continue;
            }
            match event.kind {
                EventKind::Deleted if self.book.contains(&event.path) => {
                    self.disconnect_master(&event.path);
                }
                EventKind::Child => refresh = true,
                _ => {
                    tracing::info!(drone = %self.name(), ?event, "unhandled registry event");
                }
            }
        }
        if self.stale && self.registry.state() == SessionState::Connected {
            refresh = true;
        }
        if refresh {
            match self.refresh() {
                Ok(_) => self.stale = false,
                Err(SwarmError::Registry(RegistryError::SessionLost)) => {
                    tracing::info!(drone = %self.name(), "session unavailable, refresh postponed");
                    self.stale = true;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(events.len())
    }

    /// Handle one inbound message.
    pub fn dispatch(&self, frames: Frames) -> Result<()> {
        match frames.len() {
            3 => self.dispatch_request(&frames),
            2 => {
                tracing::info!(drone = %self.name(), "broadcast {}", FramesDisplay(&frames));
                Ok(())
            }
            _ => {
                tracing::warn!(drone = %self.name(), "[?] {}", FramesDisplay(&frames));
                Ok(())
            }
        }
    }

    fn dispatch_request(&self, frames: &[Vec<u8>]) -> Result<()> {
        let (Ok(method), Ok(reply_to)) = (
            std::str::from_utf8(&frames[0]),
            std::str::from_utf8(&frames[1]),
        ) else {
            tracing::warn!(drone = %self.name(), "malformed request {}", FramesDisplay(frames));
            return Ok(());
        };
        let args = match codec::unpack_args(&frames[2]) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(drone = %self.name(), method, "undecodable arguments: {}", e);
                return Ok(());
            }
        };
        let reply = match self.methods.get(method) {
            Some(Entry::User(handler)) => {
                tracing::debug!(drone = %self.name(), method, "found method");
                handler.call(args)
            }
            Some(Entry::Rollcall) => self.rollcall(&args),
            None => {
                tracing::warn!(drone = %self.name(), method, ?args, "missing method");
                return Ok(());
            }
        };
        match reply.into_payload() {
            Some(payload) => {
                tracing::debug!(drone = %self.name(), method, reply_to, "replying");
                self.node.publish(reply_to, self.node.address(), payload)
            }
            None => {
                tracing::debug!(drone = %self.name(), method, "remaining silent");
                Ok(())
            }
        }
    }

    fn rollcall(&self, args: &[Value]) -> Reply {
        let asked = args.first().and_then(Value::as_str).unwrap_or_default();
        if self.methods.contains_key(asked) {
            tracing::debug!(drone = %self.name(), method = asked, "grok");
            Reply::Empty
        } else {
            tracing::debug!(drone = %self.name(), method = asked, "dunno");
            Reply::Silent
        }
    }

    /// Apply pending registry events, then serve one receive pass.
    ///
    /// Returns the number of messages handled.
    pub fn serve_once(&mut self) -> Result<usize> {
        self.process_events()?;
        let mut handled = 0;
        for frames in self.node.receive_matching(Channel::In, None) {
            self.dispatch(frames?)?;
            handled += 1;
        }
        Ok(handled)
    }

    pub fn handle(&self) -> DroneHandle {
        DroneHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Serve until [`DroneHandle::stop`] is called.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(drone = %self.name(), address = %self.address(), "drone serving");
        while self.running.load(Ordering::SeqCst) {
            self.serve_once()?;
        }
        tracing::info!(drone = %self.name(), "drone stopped");
        Ok(())
    }
}

impl Drop for Drone {
    fn drop(&mut self) {
        for method in self.methods.keys() {
            if let Err(e) = self.registry.deregister_provider(method, self.node.address()) {
                tracing::debug!(
                    drone = %self.node.name(),
                    method = %method,
                    "withdraw failed: {}",
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for Drone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drone")
            .field("node", &self.node)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("book", &self.book)
            .finish()
    }
}
