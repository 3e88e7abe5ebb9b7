// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish and subscribe sockets.
//!
//! Sockets are linked pairwise per endpoint. A link is recorded on both
//! sides so that either side can tear it down; no lock is ever held while
//! another core's lock is taken.

use super::context::{Bound, Context};
use super::{TransportError, CONTROL_HWM, SUBSCRIBE, UNSUBSCRIBE};
use crate::envelope::Frames;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Link<T> {
    endpoint: String,
    peer: Arc<T>,
}

/// Shared behavior of the two socket cores.
pub(crate) trait Linked: Sized {
    type Peer: Linked<Peer = Self>;

    fn id(&self) -> u64;
    fn peers(&self) -> &Mutex<Vec<Link<Self::Peer>>>;
    fn as_bound(self: &Arc<Self>) -> Bound;
    fn peer_behind(bound: Bound) -> Option<Arc<Self::Peer>>;
    fn attach(self: &Arc<Self>, peer: &Arc<Self::Peer>, endpoint: &str);
}

/// Publisher side: fans messages out to linked subscribers and collects
/// their subscription notices.
pub(crate) struct PubCore {
    pub(super) id: u64,
    peers: Mutex<Vec<Link<SubCore>>>,
    control_tx: Sender<Frames>,
    control_rx: Receiver<Frames>,
}

impl PubCore {
    fn new(id: u64) -> Self {
        let (control_tx, control_rx) = channel::bounded(CONTROL_HWM);
        Self {
            id,
            peers: Mutex::new(Vec::new()),
            control_tx,
            control_rx,
        }
    }

    fn notify(&self, kind: u8, topic: &[u8]) {
        let mut frame = Vec::with_capacity(topic.len() + 1);
        frame.push(kind);
        frame.extend_from_slice(topic);
        if let Err(TrySendError::Full(_)) = self.control_tx.try_send(vec![frame]) {
            tracing::trace!(socket = self.id, "control queue full, notice dropped");
        }
    }
}

impl Linked for PubCore {
    type Peer = SubCore;

    fn id(&self) -> u64 {
        self.id
    }

    fn peers(&self) -> &Mutex<Vec<Link<SubCore>>> {
        &self.peers
    }

    fn as_bound(self: &Arc<Self>) -> Bound {
        Bound::Publisher(Arc::clone(self))
    }

    fn peer_behind(bound: Bound) -> Option<Arc<SubCore>> {
        match bound {
            Bound::Subscriber(core) => Some(core),
            Bound::Publisher(_) => None,
        }
    }

    fn attach(self: &Arc<Self>, peer: &Arc<SubCore>, endpoint: &str) {
        link(self, peer, endpoint);
    }
}

/// Subscriber side: prefix filters plus an inbox.
pub(crate) struct SubCore {
    pub(super) id: u64,
    peers: Mutex<Vec<Link<PubCore>>>,
    filters: Mutex<HashMap<Vec<u8>, usize>>,
    inbox_tx: Sender<Frames>,
    inbox_rx: Receiver<Frames>,
}

impl SubCore {
    fn new(id: u64) -> Self {
        let (inbox_tx, inbox_rx) = channel::unbounded();
        Self {
            id,
            peers: Mutex::new(Vec::new()),
            filters: Mutex::new(HashMap::new()),
            inbox_tx,
            inbox_rx,
        }
    }

    fn accepts(&self, topic: &[u8]) -> bool {
        self.filters
            .lock()
            .keys()
            .any(|filter| topic.starts_with(filter))
    }

    fn deliver(&self, frames: Frames) {
        if self.inbox_tx.send(frames).is_err() {
            tracing::trace!(socket = self.id, "inbox closed, message dropped");
        }
    }

    fn publishers(&self) -> Vec<Arc<PubCore>> {
        self.peers
            .lock()
            .iter()
            .map(|link| Arc::clone(&link.peer))
            .collect()
    }
}

impl Linked for SubCore {
    type Peer = PubCore;

    fn id(&self) -> u64 {
        self.id
    }

    fn peers(&self) -> &Mutex<Vec<Link<PubCore>>> {
        &self.peers
    }

    fn as_bound(self: &Arc<Self>) -> Bound {
        Bound::Subscriber(Arc::clone(self))
    }

    fn peer_behind(bound: Bound) -> Option<Arc<PubCore>> {
        match bound {
            Bound::Publisher(core) => Some(core),
            Bound::Subscriber(_) => None,
        }
    }

    fn attach(self: &Arc<Self>, peer: &Arc<PubCore>, endpoint: &str) {
        link(peer, self, endpoint);
    }
}

/// Record the link on both sides, then replay the subscriber's filters.
fn link(publisher: &Arc<PubCore>, subscriber: &Arc<SubCore>, endpoint: &str) {
    publisher.peers.lock().push(Link {
        endpoint: endpoint.to_string(),
        peer: Arc::clone(subscriber),
    });
    subscriber.peers.lock().push(Link {
        endpoint: endpoint.to_string(),
        peer: Arc::clone(publisher),
    });
    let filters: Vec<Vec<u8>> = subscriber.filters.lock().keys().cloned().collect();
    for topic in filters {
        publisher.notify(SUBSCRIBE, &topic);
    }
}

/// Drop links on `endpoint` (or all links when `None`) from both sides.
fn detach<T: Linked>(core: &T, endpoint: Option<&str>) {
    let gone: Vec<Link<T::Peer>> = {
        let mut peers = core.peers().lock();
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *peers)
            .into_iter()
            .partition(|link| endpoint.map_or(true, |ep| link.endpoint == ep));
        *peers = kept;
        gone
    };
    for link in gone {
        link.peer
            .peers()
            .lock()
            .retain(|back| !(back.endpoint == link.endpoint && back.peer.id() == core.id()));
    }
}

fn remove_entry(list: &Mutex<Vec<String>>, endpoint: &str) -> bool {
    let mut list = list.lock();
    match list.iter().position(|ep| ep == endpoint) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

fn receive(
    rx: &Receiver<Frames>,
    timeout: Option<Duration>,
) -> Result<Option<Frames>, TransportError> {
    match timeout {
        Some(timeout) => match rx.recv_timeout(timeout) {
            Ok(frames) => Ok(Some(frames)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Terminated),
        },
        None => match rx.try_recv() {
            Ok(frames) => Ok(Some(frames)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Terminated),
        },
    }
}

/// Endpoint bookkeeping shared by both socket kinds.
struct Attachments<T: Linked> {
    ctx: Context,
    core: Arc<T>,
    bound: Mutex<Vec<String>>,
    connected: Mutex<Vec<String>>,
}

impl<T: Linked> Attachments<T> {
    fn new(ctx: Context, core: T) -> Self {
        Self {
            ctx,
            core: Arc::new(core),
            bound: Mutex::new(Vec::new()),
            connected: Mutex::new(Vec::new()),
        }
    }

    fn bind(&self, endpoint: &str) -> Result<(), TransportError> {
        self.ctx.bind(endpoint, self.core.as_bound())?;
        self.bound.lock().push(endpoint.to_string());
        Ok(())
    }

    fn unbind(&self, endpoint: &str) -> Result<(), TransportError> {
        if !remove_entry(&self.bound, endpoint) {
            return Err(TransportError::NotBound(endpoint.to_string()));
        }
        self.ctx.unbind(endpoint, self.core.id());
        detach(&*self.core, Some(endpoint));
        Ok(())
    }

    fn connect(&self, endpoint: &str) -> Result<(), TransportError> {
        let peer = T::peer_behind(self.ctx.lookup(endpoint)?)
            .ok_or_else(|| TransportError::ConnectionRefused(endpoint.to_string()))?;
        let linked = self
            .core
            .peers()
            .lock()
            .iter()
            .any(|link| link.endpoint == endpoint && link.peer.id() == peer.id());
        if !linked {
            self.core.attach(&peer, endpoint);
        }
        let mut connected = self.connected.lock();
        if !connected.iter().any(|ep| ep == endpoint) {
            connected.push(endpoint.to_string());
        }
        Ok(())
    }

    fn disconnect(&self, endpoint: &str) -> Result<(), TransportError> {
        if !remove_entry(&self.connected, endpoint) {
            return Err(TransportError::NotConnected(endpoint.to_string()));
        }
        detach(&*self.core, Some(endpoint));
        Ok(())
    }

    fn close(&self) {
        for endpoint in self.bound.lock().drain(..) {
            self.ctx.unbind(&endpoint, self.core.id());
        }
        self.connected.lock().clear();
        detach(&*self.core, None);
    }
}

impl<T: Linked> Drop for Attachments<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Publish socket.
///
/// Messages are delivered to every linked subscriber whose filter set
/// prefix-matches the first frame. Subscription notices from linked
/// subscribers are readable with [`PubSocket::recv_timeout`].
pub struct PubSocket {
    inner: Attachments<PubCore>,
}

impl PubSocket {
    pub(crate) fn new(ctx: Context, id: u64) -> Self {
        Self {
            inner: Attachments::new(ctx, PubCore::new(id)),
        }
    }

    pub fn bind(&self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.bind(endpoint)
    }

    pub fn unbind(&self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.unbind(endpoint)
    }

    pub fn connect(&self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.connect(endpoint)
    }

    pub fn disconnect(&self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.disconnect(endpoint)
    }

    /// Send one multi-frame message.
    pub fn send(&self, frames: Frames) -> Result<(), TransportError> {
        self.inner.ctx.ensure_running()?;
        let subscribers: Vec<Arc<SubCore>> = self
            .inner
            .core
            .peers
            .lock()
            .iter()
            .map(|link| Arc::clone(&link.peer))
            .collect();
        let topic: &[u8] = frames.first().map(Vec::as_slice).unwrap_or_default();
        let mut delivered: Vec<u64> = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            if delivered.contains(&subscriber.id) || !subscriber.accepts(topic) {
                continue;
            }
            delivered.push(subscriber.id);
            subscriber.deliver(frames.clone());
        }
        Ok(())
    }

    /// Wait up to `timeout` for a subscription notice.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Frames>, TransportError> {
        self.inner.ctx.ensure_running()?;
        receive(&self.inner.core.control_rx, Some(timeout))
    }

    pub fn try_recv(&self) -> Result<Option<Frames>, TransportError> {
        self.inner.ctx.ensure_running()?;
        receive(&self.inner.core.control_rx, None)
    }

    pub(crate) fn receiver(&self) -> &Receiver<Frames> {
        &self.inner.core.control_rx
    }

    /// Unbind and unlink everything. Also runs on drop.
    pub fn close(&self) {
        self.inner.close();
    }
}

/// Subscribe socket with counted prefix filters.
pub struct SubSocket {
    inner: Attachments<SubCore>,
}

impl SubSocket {
    pub(crate) fn new(ctx: Context, id: u64) -> Self {
        Self {
            inner: Attachments::new(ctx, SubCore::new(id)),
        }
    }

    pub fn bind(&self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.bind(endpoint)
    }

    pub fn unbind(&self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.unbind(endpoint)
    }

    pub fn connect(&self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.connect(endpoint)
    }

    pub fn disconnect(&self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.disconnect(endpoint)
    }

    /// Add a prefix filter and notify every linked publisher.
    pub fn subscribe(&self, topic: impl AsRef<[u8]>) -> Result<(), TransportError> {
        self.inner.ctx.ensure_running()?;
        let topic = topic.as_ref();
        *self
            .inner
            .core
            .filters
            .lock()
            .entry(topic.to_vec())
            .or_insert(0) += 1;
        for publisher in self.inner.core.publishers() {
            publisher.notify(SUBSCRIBE, topic);
        }
        Ok(())
    }

    /// Drop one reference to a prefix filter. Unknown filters are ignored.
    pub fn unsubscribe(&self, topic: impl AsRef<[u8]>) -> Result<(), TransportError> {
        self.inner.ctx.ensure_running()?;
        let topic = topic.as_ref();
        let removed = {
            let mut filters = self.inner.core.filters.lock();
            match filters.get_mut(topic) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    true
                }
                Some(_) => {
                    filters.remove(topic);
                    true
                }
                None => false,
            }
        };
        if removed {
            for publisher in self.inner.core.publishers() {
                publisher.notify(UNSUBSCRIBE, topic);
            }
        }
        Ok(())
    }

    pub fn is_subscribed(&self, topic: impl AsRef<[u8]>) -> bool {
        self.inner.core.filters.lock().contains_key(topic.as_ref())
    }

    /// Wait up to `timeout` for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Frames>, TransportError> {
        self.inner.ctx.ensure_running()?;
        receive(&self.inner.core.inbox_rx, Some(timeout))
    }

    pub fn try_recv(&self) -> Result<Option<Frames>, TransportError> {
        self.inner.ctx.ensure_running()?;
        receive(&self.inner.core.inbox_rx, None)
    }

    pub(crate) fn receiver(&self) -> &Receiver<Frames> {
        &self.inner.core.inbox_rx
    }

    /// Unbind and unlink everything. Also runs on drop.
    pub fn close(&self) {
        self.inner.close();
    }
}
