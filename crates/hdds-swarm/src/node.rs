// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport and addressing primitive shared by masters and drones.
//!
//! A node owns one outbound publish channel and one inbound subscribe
//! channel. Addressing is subscription-based: every node subscribes to its
//! own unique address at construction, and a caller expecting replies
//! subscribes to a fresh correlation token for the lifetime of the call.

use crate::config::NodeConfig;
use crate::envelope::{Envelope, Frames, FramesDisplay, Payload};
use crate::error::Result;
use crate::transport::{Context, PubSocket, SubSocket, TransportError};
use crossbeam::channel::{Receiver, RecvTimeoutError, Select, TryRecvError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Node role, used as the address prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Drone,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Drone => "drone",
        }
    }

    fn default_name(&self) -> &'static str {
        match self {
            Self::Master => "Master",
            Self::Drone => "Drone",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable node identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl NodeIdentity {
    pub fn new(role: Role, config: &NodeConfig) -> Self {
        Self {
            id: config
                .identity
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: config
                .name
                .clone()
                .unwrap_or_else(|| role.default_name().to_string()),
            role,
        }
    }

    /// Canonical subscription address: `role=id`.
    pub fn unique_address(&self) -> String {
        format!("{}={}", self.role, self.id)
    }
}

/// One of the node's two channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Subscribe side: requests (drone) or replies (master).
    In,
    /// Publish side: readable only for subscription notices.
    Out,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("In"),
            Self::Out => f.write_str("Out"),
        }
    }
}

/// Readiness of one channel after a poll.
///
/// The publish side never blocks a send, so only input readiness is
/// reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
}

/// Transport primitive: identity, two channels, bounded waits.
pub struct Node {
    identity: NodeIdentity,
    address: String,
    timeout: Duration,
    ctx: Context,
    inbound: SubSocket,
    outbound: PubSocket,
    /// Replies read on behalf of live correlation tokens, keyed by token.
    replies: Mutex<HashMap<String, VecDeque<Frames>>>,
}

impl Node {
    /// Create both channels and subscribe to the node's unique address.
    pub fn new(ctx: &Context, role: Role, config: &NodeConfig) -> Result<Self> {
        let identity = NodeIdentity::new(role, config);
        let address = identity.unique_address();
        let node = Self {
            inbound: ctx.sub_socket()?,
            outbound: ctx.pub_socket()?,
            ctx: ctx.clone(),
            timeout: config.timeout(),
            identity,
            address,
            replies: Mutex::new(HashMap::new()),
        };
        node.subscribe(&node.address)?;
        tracing::debug!(node = %node.identity.name, address = %node.address, "node created");
        Ok(node)
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// The node's unique address (`role=id`).
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Bind both channels. On failure nothing stays bound.
    pub fn bind(&self, in_ep: &str, out_ep: &str) -> bool {
        if let Err(e) = self.outbound.bind(out_ep) {
            tracing::warn!(node = %self.name(), endpoint = out_ep, "bind failed: {}", e);
            return false;
        }
        if let Err(e) = self.inbound.bind(in_ep) {
            tracing::warn!(node = %self.name(), endpoint = in_ep, "bind failed: {}", e);
            let _ = self.outbound.unbind(out_ep);
            return false;
        }
        tracing::debug!(node = %self.name(), in_ep, out_ep, "bound");
        true
    }

    /// Connect both channels. On failure nothing stays connected.
    pub fn connect(&self, in_ep: &str, out_ep: &str) -> bool {
        if let Err(e) = self.outbound.connect(out_ep) {
            tracing::warn!(node = %self.name(), endpoint = out_ep, "connect failed: {}", e);
            return false;
        }
        if let Err(e) = self.inbound.connect(in_ep) {
            tracing::warn!(node = %self.name(), endpoint = in_ep, "connect failed: {}", e);
            let _ = self.outbound.disconnect(out_ep);
            return false;
        }
        tracing::debug!(node = %self.name(), in_ep, out_ep, "connected");
        true
    }

    /// Disconnect both channels, best effort.
    ///
    /// Both sides are always attempted; `false` if either was not connected.
    pub fn disconnect(&self, in_ep: &str, out_ep: &str) -> bool {
        let mut ok = true;
        if let Err(e) = self.outbound.disconnect(out_ep) {
            tracing::debug!(node = %self.name(), endpoint = out_ep, "disconnect: {}", e);
            ok = false;
        }
        if let Err(e) = self.inbound.disconnect(in_ep) {
            tracing::debug!(node = %self.name(), endpoint = in_ep, "disconnect: {}", e);
            ok = false;
        }
        ok
    }

    pub fn subscribe(&self, topic: &str) -> Result<()> {
        self.inbound.subscribe(topic)?;
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.inbound.unsubscribe(topic)?;
        Ok(())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inbound.is_subscribed(topic)
    }

    /// Publish `[topic, reply_address(, payload)]`.
    pub fn publish(
        &self,
        topic: &str,
        reply_address: &str,
        payload: impl Into<Payload>,
    ) -> Result<()> {
        let envelope = Envelope::new(topic, reply_address, payload.into())?;
        let frames = envelope.into_frames();
        tracing::debug!(
            node = %self.name(),
            "publish -> {}",
            FramesDisplay(&frames)
        );
        self.outbound.send(frames)?;
        Ok(())
    }

    /// Publish with the node's own address as reply address.
    pub fn publish_with_id(&self, topic: &str, payload: impl Into<Payload>) -> Result<()> {
        self.publish(topic, &self.address, payload)
    }

    /// Publish under a fresh correlation token the node is subscribed to.
    ///
    /// The subscription lives as long as the returned token.
    pub fn publish_replyable(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
    ) -> Result<ReplyToken<'_>> {
        let id = Uuid::new_v4().to_string();
        self.replies.lock().insert(id.clone(), VecDeque::new());
        let token = ReplyToken {
            node: self,
            id,
            released: false,
        };
        self.subscribe(&token.id)?;
        self.publish(topic, &token.id, payload)?;
        Ok(token)
    }

    /// Queue a reply for the live token named by its first frame.
    ///
    /// Hands the frames back when no live token claims them.
    pub(crate) fn route_reply(&self, frames: Frames) -> Option<Frames> {
        let Some(token) = frames.first().and_then(|raw| std::str::from_utf8(raw).ok()) else {
            return Some(frames);
        };
        let mut replies = self.replies.lock();
        match replies.get_mut(token) {
            Some(queue) => {
                queue.push_back(frames);
                None
            }
            None => Some(frames),
        }
    }

    /// Replies already routed to `token` by other readers.
    pub(crate) fn take_routed(&self, token: &str) -> VecDeque<Frames> {
        self.replies
            .lock()
            .get_mut(token)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn forget_token(&self, token: &str) {
        if let Some(dropped) = self.replies.lock().remove(token) {
            if !dropped.is_empty() {
                tracing::debug!(
                    node = %self.name(),
                    token,
                    dropped = dropped.len(),
                    "late replies dropped"
                );
            }
        }
    }

    /// One bounded poll across both channels.
    ///
    /// Only channels with pending input appear; the map is empty on timeout.
    pub fn poll_once(&self) -> Result<HashMap<Channel, Readiness>> {
        self.ctx.ensure_running()?;
        let inbound = self.inbound.receiver();
        let outbound = self.outbound.receiver();
        let mut select = Select::new();
        select.recv(inbound);
        select.recv(outbound);
        let mut ready = HashMap::new();
        if select.ready_timeout(self.timeout).is_err() {
            return Ok(ready);
        }
        if !inbound.is_empty() {
            ready.insert(Channel::In, Readiness { readable: true });
        }
        if !outbound.is_empty() {
            ready.insert(Channel::Out, Readiness { readable: true });
        }
        Ok(ready)
    }

    /// Frames currently available on `channel`.
    ///
    /// Waits at most the node timeout for the first frame, then drains what
    /// is already queued. Frames of the wrong arity are logged and dropped.
    pub fn receive_matching(&self, channel: Channel, arity: Option<usize>) -> Incoming<'_> {
        self.receive_within(channel, arity, self.timeout)
    }

    pub(crate) fn receive_within(
        &self,
        channel: Channel,
        arity: Option<usize>,
        wait: Duration,
    ) -> Incoming<'_> {
        Incoming {
            node: self,
            rx: self.receiver(channel),
            channel,
            arity,
            first_wait: Some(wait),
            done: false,
        }
    }

    /// Diagnostic tap on one channel, usable from another thread.
    ///
    /// The tap competes with the node for frames; point it at a channel the
    /// node does not otherwise read.
    pub fn sniffer(&self, channel: Channel) -> Sniffer {
        Sniffer {
            name: self.identity.name.clone(),
            channel,
            ctx: self.ctx.clone(),
            rx: self.receiver(channel).clone(),
        }
    }

    /// Log one pass of frames on `channel`. Returns how many were seen.
    pub fn sniff_once(&self, channel: Channel) -> Result<usize> {
        self.sniffer(channel).sniff_once(self.timeout)
    }

    /// Poll once and log readiness transitions against `previous`.
    ///
    /// Returns `true` if anything changed.
    pub fn watch_readiness(&self, previous: &mut HashMap<Channel, Readiness>) -> Result<bool> {
        let current = self.poll_once()?;
        let mut changed = false;
        for channel in [Channel::In, Channel::Out] {
            let before = previous.get(&channel).copied().unwrap_or_default();
            let after = current.get(&channel).copied().unwrap_or_default();
            if before.readable != after.readable {
                let sign = if after.readable { '+' } else { '-' };
                tracing::debug!(node = %self.name(), "readywatcher: {}{},IN", sign, channel);
                changed = true;
            }
        }
        *previous = current;
        Ok(changed)
    }

    fn receiver(&self, channel: Channel) -> &Receiver<Frames> {
        match channel {
            Channel::In => self.inbound.receiver(),
            Channel::Out => self.outbound.receiver(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.identity.name)
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Correlation token of an outstanding call.
///
/// Holds the node's subscription to the token; dropping it unsubscribes.
pub struct ReplyToken<'a> {
    node: &'a Node,
    id: String,
    released: bool,
}

impl ReplyToken<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unsubscribe now, reporting transport failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.node.forget_token(&self.id);
        self.node.unsubscribe(&self.id)
    }
}

impl Drop for ReplyToken<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.node.forget_token(&self.id);
            if let Err(e) = self.node.unsubscribe(&self.id) {
                tracing::debug!(token = %self.id, "unsubscribe on drop failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for ReplyToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReplyToken").field(&self.id).finish()
    }
}

/// One receive pass over a channel.
pub struct Incoming<'a> {
    node: &'a Node,
    rx: &'a Receiver<Frames>,
    channel: Channel,
    arity: Option<usize>,
    first_wait: Option<Duration>,
    done: bool,
}

impl Iterator for Incoming<'_> {
    type Item = Result<Frames>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if let Err(e) = self.node.ctx.ensure_running() {
                self.done = true;
                return Some(Err(e.into()));
            }
            let received = match self.first_wait.take() {
                Some(wait) => match self.rx.recv_timeout(wait) {
                    Ok(frames) => Ok(Some(frames)),
                    Err(RecvTimeoutError::Timeout) => Ok(None),
                    Err(RecvTimeoutError::Disconnected) => Err(TransportError::Terminated),
                },
                None => match self.rx.try_recv() {
                    Ok(frames) => Ok(Some(frames)),
                    Err(TryRecvError::Empty) => Ok(None),
                    Err(TryRecvError::Disconnected) => Err(TransportError::Terminated),
                },
            };
            match received {
                Ok(Some(frames)) => match self.arity {
                    Some(arity) if frames.len() != arity => {
                        tracing::warn!(
                            node = %self.node.name(),
                            channel = %self.channel,
                            "discarding {}",
                            FramesDisplay(&frames)
                        );
                    }
                    _ => return Some(Ok(frames)),
                },
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}

/// Detached diagnostic reader on one node channel.
pub struct Sniffer {
    name: String,
    channel: Channel,
    ctx: Context,
    rx: Receiver<Frames>,
}

impl Sniffer {
    /// Wait up to `wait` for traffic, then log everything queued.
    pub fn sniff_once(&self, wait: Duration) -> Result<usize> {
        self.ctx.ensure_running()?;
        let mut seen = 0;
        let mut next = match self.rx.recv_timeout(wait) {
            Ok(frames) => Some(frames),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Terminated.into()),
        };
        while let Some(frames) = next {
            tracing::debug!(
                node = %self.name,
                "sniffer.{}: <- {}",
                self.channel,
                FramesDisplay(&frames)
            );
            seen += 1;
            next = self.rx.try_recv().ok();
        }
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WAIT: Duration = Duration::from_millis(50);

    fn config(timeout_ms: u64) -> NodeConfig {
        NodeConfig {
            timeout_ms,
            ..Default::default()
        }
    }

    /// A bound "hub" node and a connected "leaf" node, like master/drone.
    fn linked(ctx: &Context, tag: &str) -> (Node, Node) {
        let hub = Node::new(ctx, Role::Master, &config(50)).expect("hub");
        let leaf = Node::new(ctx, Role::Drone, &config(50)).expect("leaf");
        let hub_in = format!("inproc://{}.in", tag);
        let hub_out = format!("inproc://{}.out", tag);
        assert!(hub.bind(&hub_in, &hub_out));
        assert!(leaf.connect(&hub_out, &hub_in));
        (hub, leaf)
    }

    #[test]
    fn test_identity_defaults() {
        let identity = NodeIdentity::new(Role::Drone, &NodeConfig::default());
        assert_eq!(identity.name, "Drone");
        assert!(identity.unique_address().starts_with("drone="));
        assert_eq!(identity.id.len(), 36);
    }

    #[test]
    fn test_identity_fixed() {
        let config = NodeConfig {
            name: Some("master-0".into()),
            identity: Some("m0".into()),
            ..Default::default()
        };
        let identity = NodeIdentity::new(Role::Master, &config);
        assert_eq!(identity.name, "master-0");
        assert_eq!(identity.unique_address(), "master=m0");
    }

    #[test]
    fn test_subscribed_to_own_address() {
        let ctx = Context::new();
        let node = Node::new(&ctx, Role::Master, &config(10)).expect("node");
        assert!(node.is_subscribed(node.address()));
    }

    #[test]
    fn test_bind_rollback() {
        let ctx = Context::new();
        let squatter = Node::new(&ctx, Role::Master, &config(10)).expect("squatter");
        assert!(squatter.bind("inproc://rb.in.taken", "inproc://rb.out.a"));

        let node = Node::new(&ctx, Role::Master, &config(10)).expect("node");
        assert!(!node.bind("inproc://rb.in.taken", "inproc://rb.out.b"));
        // the outbound side was rolled back
        let other = Node::new(&ctx, Role::Master, &config(10)).expect("other");
        assert!(other.bind("inproc://rb.in.free", "inproc://rb.out.b"));
    }

    #[test]
    fn test_connect_rollback() {
        let ctx = Context::new();
        let hub = Node::new(&ctx, Role::Master, &config(10)).expect("hub");
        assert!(hub.bind("inproc://cr.in", "inproc://cr.out"));
        let leaf = Node::new(&ctx, Role::Drone, &config(10)).expect("leaf");
        assert!(!leaf.connect("inproc://cr.missing", "inproc://cr.in"));
        // nothing left connected, so disconnect reports failure
        assert!(!leaf.disconnect("inproc://cr.missing", "inproc://cr.in"));
    }

    #[test]
    fn test_disconnect_reports_unconnected() {
        let ctx = Context::new();
        let (_hub, leaf) = linked(&ctx, "dc");
        assert!(leaf.disconnect("inproc://dc.out", "inproc://dc.in"));
        assert!(!leaf.disconnect("inproc://dc.out", "inproc://dc.in"));
    }

    #[test]
    fn test_publish_request_and_reply() {
        let ctx = Context::new();
        let (hub, leaf) = linked(&ctx, "pr");
        leaf.subscribe("cats").expect("subscribe");

        let token = hub
            .publish_replyable("cats", json!(["Squeak"]))
            .expect("publish");
        let request: Vec<Frames> = leaf
            .receive_matching(Channel::In, Some(3))
            .collect::<Result<_>>()
            .expect("receive");
        assert_eq!(request.len(), 1);
        assert_eq!(request[0][1], token.id().as_bytes());

        leaf.publish(token.id(), leaf.address(), json!("sup, Squeak"))
            .expect("reply");
        let replies: Vec<Frames> = hub
            .receive_matching(Channel::In, None)
            .collect::<Result<_>>()
            .expect("receive");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0][1], leaf.address().as_bytes());
    }

    #[test]
    fn test_reply_token_drop_unsubscribes() {
        let ctx = Context::new();
        let (hub, _leaf) = linked(&ctx, "rt");
        let id = {
            let token = hub.publish_replyable("nobody", Payload::None).expect("publish");
            assert!(hub.is_subscribed(token.id()));
            token.id().to_string()
        };
        assert!(!hub.is_subscribed(&id));

        let token = hub.publish_replyable("nobody", Payload::Empty).expect("publish");
        let id = token.id().to_string();
        token.release().expect("release");
        assert!(!hub.is_subscribed(&id));
    }

    #[test]
    fn test_route_reply_to_live_token() {
        let ctx = Context::new();
        let node = Node::new(&ctx, Role::Master, &config(10)).expect("node");
        let token = node.publish_replyable("nobody", Payload::None).expect("publish");

        let reply = vec![token.id().as_bytes().to_vec(), b"drone=1".to_vec()];
        assert!(node.route_reply(reply.clone()).is_none());
        assert_eq!(
            node.route_reply(vec![b"stale".to_vec()]),
            Some(vec![b"stale".to_vec()])
        );

        let routed = node.take_routed(token.id());
        assert_eq!(routed, VecDeque::from(vec![reply]));
        assert!(node.take_routed(token.id()).is_empty());

        let id = token.id().to_string();
        drop(token);
        assert!(node.route_reply(vec![id.into_bytes()]).is_some());
    }

    #[test]
    fn test_receive_matching_drops_wrong_arity() {
        let ctx = Context::new();
        let (hub, leaf) = linked(&ctx, "ar");
        leaf.subscribe("t").expect("subscribe");
        hub.publish("t", "r", Payload::None).expect("two frames");
        hub.publish("t", "r", Payload::Empty).expect("three frames");

        std::thread::sleep(WAIT);
        let frames: Vec<Frames> = leaf
            .receive_matching(Channel::In, Some(3))
            .collect::<Result<_>>()
            .expect("receive");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 3);
    }

    #[test]
    fn test_receive_matching_empty_after_timeout() {
        let ctx = Context::new();
        let node = Node::new(&ctx, Role::Drone, &config(20)).expect("node");
        assert_eq!(node.receive_matching(Channel::In, None).count(), 0);
    }

    #[test]
    fn test_poll_once() {
        let ctx = Context::new();
        let (hub, leaf) = linked(&ctx, "po");
        assert!(!leaf.poll_once().expect("poll").contains_key(&Channel::In));

        leaf.subscribe("wake").expect("subscribe");
        let hub_ready = hub.poll_once().expect("poll");
        assert!(hub_ready
            .get(&Channel::Out)
            .map(|r| r.readable)
            .unwrap_or(false));
        hub.sniff_once(Channel::Out).expect("drain");
        // an idle publish side is not reported at all
        assert!(!hub.poll_once().expect("poll").contains_key(&Channel::Out));

        hub.publish("wake", "r", Payload::Empty).expect("publish");
        let leaf_ready = leaf.poll_once().expect("poll");
        assert!(leaf_ready.contains_key(&Channel::In));
    }

    #[test]
    fn test_sniff_control_frames() {
        let ctx = Context::new();
        let (hub, leaf) = linked(&ctx, "sn");
        leaf.subscribe("cats").expect("subscribe");
        let seen = hub.sniff_once(Channel::Out).expect("sniff");
        // the leaf's own address replayed on connect, then "cats"
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_watch_readiness_transitions() {
        let ctx = Context::new();
        let (hub, leaf) = linked(&ctx, "wr");
        let mut state = HashMap::new();
        leaf.subscribe("x").expect("subscribe");
        assert!(hub.watch_readiness(&mut state).expect("watch"));
        hub.sniff_once(Channel::Out).expect("drain");
        assert!(hub.watch_readiness(&mut state).expect("watch"));
        assert!(state.is_empty());
    }

    #[test]
    fn test_stopped_context_fails_receive() {
        let ctx = Context::new();
        let node = Node::new(&ctx, Role::Drone, &config(10)).expect("node");
        ctx.stop();
        let first = node.receive_matching(Channel::In, None).next();
        assert!(matches!(first, Some(Err(_))));
        assert!(node.publish_with_id("t", Payload::Empty).is_err());
    }
}
