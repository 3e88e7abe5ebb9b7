// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Call options and mode selection for generic invocations.

use super::call::CallStream;
use crate::config::RpcDefaults;
use crate::error::{Result, SwarmError};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Names of node primitives. They are typed methods, never RPC targets.
pub const SYSTEM_METHODS: &[&str] = &[
    "bind",
    "connect",
    "disconnect",
    "poll_once",
    "publish",
    "publish_replyable",
    "publish_with_id",
    "receive_matching",
    "set_rpc_defaults",
    "sniff_once",
    "subscribe",
    "timeout",
    "unique_address",
    "unsubscribe",
    "update_rpc_defaults",
    "watch_readiness",
];

/// Delivery strategy chosen by `(certain, generator)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Stream every reply until the deadline.
    StreamAny,
    /// Stream replies until the known providers have all answered.
    StreamKnown,
    /// Wait for the known providers, then return everything at once.
    CollectKnown,
}

impl CallMode {
    pub fn select(certain: bool, generator: bool) -> Result<Self> {
        match (certain, generator) {
            (false, true) => Ok(Self::StreamAny),
            (true, true) => Ok(Self::StreamKnown),
            (true, false) => Ok(Self::CollectKnown),
            (false, false) => Err(SwarmError::UnsupportedCallMode { certain, generator }),
        }
    }
}

/// Partial update of [`RpcDefaults`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcOverrides {
    pub certain: Option<bool>,
    pub generator: Option<bool>,
}

impl RpcOverrides {
    pub fn apply(&self, defaults: RpcDefaults) -> RpcDefaults {
        RpcDefaults {
            certain: self.certain.unwrap_or(defaults.certain),
            generator: self.generator.unwrap_or(defaults.generator),
        }
    }
}

/// Per-call overrides for [`super::Master::invoke`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub mode: RpcOverrides,
    /// Known provider set; resolved from the registry when absent or empty.
    pub providers: Option<Vec<String>>,
    /// Drop replies from outside the known set and repeated replies.
    pub only: bool,
    /// Call deadline; the node timeout when absent.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn certain(mut self, certain: bool) -> Self {
        self.mode.certain = Some(certain);
        self
    }

    pub fn generator(mut self, generator: bool) -> Self {
        self.mode.generator = Some(generator);
        self
    }

    pub fn providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn only(mut self, only: bool) -> Self {
        self.only = only;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a generic invocation.
pub enum CallOutcome<'a> {
    Stream(CallStream<'a>),
    Collected(HashMap<String, Option<Value>>),
}

impl<'a> CallOutcome<'a> {
    pub fn into_stream(self) -> Option<CallStream<'a>> {
        match self {
            Self::Stream(stream) => Some(stream),
            Self::Collected(_) => None,
        }
    }

    pub fn into_collected(self) -> Option<HashMap<String, Option<Value>>> {
        match self {
            Self::Stream(_) => None,
            Self::Collected(map) => Some(map),
        }
    }
}
