// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process publish/subscribe substrate.
//!
//! Provides the capabilities the swarm protocol relies on and nothing more:
//!
//! - a publish socket and a subscribe socket per node, linked either by
//!   binding or by connecting to an `inproc://` endpoint
//! - topic-prefix filtering on the first frame of every message
//! - explicit subscribe/unsubscribe control frames (`0x01 + topic`,
//!   `0x00 + topic`) forwarded to every linked publisher, readable on the
//!   publisher side for diagnostics
//! - multi-frame messages with preserved frame boundaries
//! - readiness polling with a caller-supplied timeout
//!
//! # Architecture
//!
//! ```text
//! Context (shared, explicit)
//! +-- endpoints: DashMap<endpoint, Bound>
//!
//! PubSocket --links--> SubCore.filters  (checked at send time)
//! SubSocket --links--> PubCore.control  (subscription notifications)
//! ```
//!
//! A subscribe socket replays its whole filter set to every publisher it
//! becomes linked to, so late joiners see existing subscriptions.

mod context;
mod socket;

pub use context::Context;
pub use socket::{PubSocket, SubSocket};

use thiserror::Error;

/// Endpoint scheme accepted by the in-process substrate.
pub const INPROC_SCHEME: &str = "inproc://";

/// Leading byte of a subscribe control frame.
pub const SUBSCRIBE: u8 = 0x01;

/// Leading byte of an unsubscribe control frame.
pub const UNSUBSCRIBE: u8 = 0x00;

/// Pending control frames kept per publisher before new ones are dropped.
pub const CONTROL_HWM: usize = 1000;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport context terminated")]
    Terminated,

    #[error("unsupported endpoint: {0}")]
    UnsupportedEndpoint(String),

    #[error("address already in use: {0}")]
    AddressInUse(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("endpoint not connected: {0}")]
    NotConnected(String),

    #[error("endpoint not bound: {0}")]
    NotBound(String),
}

/// Check that an endpoint uses the supported scheme and names something.
pub(crate) fn validate_endpoint(endpoint: &str) -> Result<(), TransportError> {
    match endpoint.strip_prefix(INPROC_SCHEME) {
        Some(name) if !name.is_empty() => Ok(()),
        _ => Err(TransportError::UnsupportedEndpoint(endpoint.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(50);

    fn pair(ctx: &Context, endpoint: &str) -> (PubSocket, SubSocket) {
        let publisher = ctx.pub_socket().expect("pub");
        let subscriber = ctx.sub_socket().expect("sub");
        publisher.bind(endpoint).expect("bind");
        subscriber.connect(endpoint).expect("connect");
        (publisher, subscriber)
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("inproc://swarm").is_ok());
        assert!(validate_endpoint("inproc://").is_err());
        assert!(validate_endpoint("tcp://127.0.0.1:5555").is_err());
    }

    #[test]
    fn test_prefix_filtering() {
        let ctx = Context::new();
        let (publisher, subscriber) = pair(&ctx, "inproc://t.prefix");
        subscriber.subscribe("cat").expect("subscribe");

        publisher.send(vec![b"cats".to_vec(), b"r".to_vec()]).expect("send");
        publisher.send(vec![b"dogs".to_vec(), b"r".to_vec()]).expect("send");

        let frames = subscriber.recv_timeout(WAIT).expect("recv").expect("frames");
        assert_eq!(frames[0], b"cats");
        assert!(subscriber.try_recv().expect("recv").is_none());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let ctx = Context::new();
        let (publisher, subscriber) = pair(&ctx, "inproc://t.unsub");
        subscriber.subscribe("token").expect("subscribe");
        subscriber.unsubscribe("token").expect("unsubscribe");
        assert!(!subscriber.is_subscribed("token"));

        publisher.send(vec![b"token".to_vec()]).expect("send");
        assert!(subscriber.recv_timeout(WAIT).expect("recv").is_none());
    }

    #[test]
    fn test_subscriptions_replayed_on_late_link() {
        let ctx = Context::new();
        let publisher = ctx.pub_socket().expect("pub");
        let subscriber = ctx.sub_socket().expect("sub");
        subscriber.subscribe("echo").expect("subscribe");

        publisher.bind("inproc://t.late").expect("bind");
        subscriber.connect("inproc://t.late").expect("connect");

        let control = publisher.recv_timeout(WAIT).expect("recv").expect("control");
        assert_eq!(control, vec![b"\x01echo".to_vec()]);

        publisher.send(vec![b"echo".to_vec()]).expect("send");
        assert!(subscriber.recv_timeout(WAIT).expect("recv").is_some());
    }

    #[test]
    fn test_control_frames_visible_on_publisher() {
        let ctx = Context::new();
        let (publisher, subscriber) = pair(&ctx, "inproc://t.control");
        subscriber.subscribe("a").expect("subscribe");
        subscriber.unsubscribe("a").expect("unsubscribe");

        assert_eq!(publisher.try_recv().expect("recv"), Some(vec![b"\x01a".to_vec()]));
        assert_eq!(publisher.try_recv().expect("recv"), Some(vec![b"\x00a".to_vec()]));
    }

    #[test]
    fn test_bind_conflict() {
        let ctx = Context::new();
        let first = ctx.pub_socket().expect("pub");
        let second = ctx.sub_socket().expect("sub");
        first.bind("inproc://t.conflict").expect("bind");
        assert_eq!(
            second.bind("inproc://t.conflict"),
            Err(TransportError::AddressInUse("inproc://t.conflict".into()))
        );
    }

    #[test]
    fn test_connect_refused_without_binder() {
        let ctx = Context::new();
        let subscriber = ctx.sub_socket().expect("sub");
        assert!(matches!(
            subscriber.connect("inproc://t.nobody"),
            Err(TransportError::ConnectionRefused(_))
        ));
    }

    #[test]
    fn test_disconnect_unlinked_endpoint() {
        let ctx = Context::new();
        let (publisher, subscriber) = pair(&ctx, "inproc://t.disc");
        subscriber.subscribe("").expect("subscribe");
        subscriber.disconnect("inproc://t.disc").expect("disconnect");
        assert!(matches!(
            subscriber.disconnect("inproc://t.disc"),
            Err(TransportError::NotConnected(_))
        ));

        publisher.send(vec![b"x".to_vec()]).expect("send");
        assert!(subscriber.recv_timeout(WAIT).expect("recv").is_none());
    }

    #[test]
    fn test_drop_releases_endpoint() {
        let ctx = Context::new();
        {
            let publisher = ctx.pub_socket().expect("pub");
            publisher.bind("inproc://t.drop").expect("bind");
        }
        let again = ctx.pub_socket().expect("pub");
        assert!(again.bind("inproc://t.drop").is_ok());
    }

    #[test]
    fn test_stopped_context_rejects_sends() {
        let ctx = Context::new();
        let (publisher, _subscriber) = pair(&ctx, "inproc://t.stop");
        ctx.stop();
        assert!(!ctx.is_running());
        assert_eq!(
            publisher.send(vec![b"x".to_vec()]),
            Err(TransportError::Terminated)
        );
        assert!(ctx.pub_socket().is_err());

        ctx.start();
        assert!(ctx.pub_socket().is_ok());
    }
}
