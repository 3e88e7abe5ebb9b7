// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared transport context: endpoint namespace and lifecycle.

use super::socket::{PubCore, PubSocket, SubCore, SubSocket};
use super::{validate_endpoint, TransportError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// What sits behind a bound endpoint.
#[derive(Clone)]
pub(crate) enum Bound {
    Publisher(Arc<PubCore>),
    Subscriber(Arc<SubCore>),
}

impl Bound {
    fn socket_id(&self) -> u64 {
        match self {
            Self::Publisher(core) => core.id,
            Self::Subscriber(core) => core.id,
        }
    }
}

struct ContextInner {
    endpoints: DashMap<String, Bound>,
    running: AtomicBool,
    next_id: AtomicU64,
}

/// In-process transport context.
///
/// Cloning is cheap; all clones share the same endpoint namespace. Many nodes
/// in one process are expected to share a single context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a running context with an empty endpoint namespace.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                endpoints: DashMap::new(),
                running: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Resume a stopped context. Endpoints released by `stop` stay released.
    pub fn start(&self) {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("transport context started");
        }
    }

    /// Terminate the context.
    ///
    /// Every endpoint is released and every socket operation fails with
    /// [`TransportError::Terminated`] until [`Context::start`] is called.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            let released = self.inner.endpoints.len();
            self.inner.endpoints.clear();
            tracing::debug!(released, "transport context stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Create a publish socket.
    pub fn pub_socket(&self) -> Result<PubSocket, TransportError> {
        self.ensure_running()?;
        Ok(PubSocket::new(self.clone(), self.next_id()))
    }

    /// Create a subscribe socket.
    pub fn sub_socket(&self) -> Result<SubSocket, TransportError> {
        self.ensure_running()?;
        Ok(SubSocket::new(self.clone(), self.next_id()))
    }

    pub(crate) fn ensure_running(&self) -> Result<(), TransportError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(TransportError::Terminated)
        }
    }

    pub(crate) fn bind(&self, endpoint: &str, bound: Bound) -> Result<(), TransportError> {
        self.ensure_running()?;
        validate_endpoint(endpoint)?;
        match self.inner.endpoints.entry(endpoint.to_string()) {
            Entry::Occupied(_) => Err(TransportError::AddressInUse(endpoint.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(bound);
                Ok(())
            }
        }
    }

    /// Release an endpoint, but only if `socket_id` still owns it.
    pub(crate) fn unbind(&self, endpoint: &str, socket_id: u64) {
        self.inner
            .endpoints
            .remove_if(endpoint, |_, bound| bound.socket_id() == socket_id);
    }

    pub(crate) fn lookup(&self, endpoint: &str) -> Result<Bound, TransportError> {
        self.ensure_running()?;
        validate_endpoint(endpoint)?;
        self.inner
            .endpoints
            .get(endpoint)
            .map(|bound| bound.value().clone())
            .ok_or_else(|| TransportError::ConnectionRefused(endpoint.to_string()))
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("endpoints", &self.inner.endpoints.len())
            .field("running", &self.is_running())
            .finish()
    }
}
