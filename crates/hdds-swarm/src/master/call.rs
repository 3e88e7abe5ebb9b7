// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timed reply collection.
//!
//! A [`CallStream`] owns the correlation token of one outstanding call and
//! yields replies until the deadline passes or, for calls against a known
//! provider set, until every provider has answered.
//!
//! Each receive pass waits at most `min(node timeout, time left)`. Once the
//! deadline has passed, one last non-waiting drain picks up replies that
//! arrived during the final pass.

use crate::codec;
use crate::envelope::{Frames, FramesDisplay};
use crate::error::Result;
use crate::node::{Channel, Node, ReplyToken};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// One reply to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Address of the answering node.
    pub provider: String,
    /// `None` when the reply carried no content frame.
    pub value: Option<Value>,
}

/// Known-provider bookkeeping for `certain` calls.
#[derive(Debug)]
struct Coverage {
    known: HashSet<String>,
    remaining: HashSet<String>,
    only: bool,
}

impl Coverage {
    fn new(known: HashSet<String>, only: bool) -> Self {
        Self {
            remaining: known.clone(),
            known,
            only,
        }
    }

    /// Record a reply from `provider`; `false` if it must be dropped.
    fn admit(&mut self, provider: &str) -> bool {
        if self.remaining.remove(provider) {
            tracing::debug!(provider, "registered response");
            true
        } else if self.known.contains(provider) {
            tracing::debug!(provider, "repeated response");
            !self.only
        } else {
            tracing::debug!(provider, "unexpected response");
            !self.only
        }
    }
}

/// Stream of replies to one call.
///
/// Dropping the stream early releases the correlation token.
pub struct CallStream<'a> {
    node: &'a Node,
    token: Option<ReplyToken<'a>>,
    method: String,
    arity: Option<usize>,
    coverage: Option<Coverage>,
    deadline: Instant,
    pending: VecDeque<Frames>,
    drained: bool,
}

impl<'a> CallStream<'a> {
    pub(crate) fn open(
        node: &'a Node,
        token: ReplyToken<'a>,
        method: &str,
        arity: Option<usize>,
        known: Option<(HashSet<String>, bool)>,
        timeout: Duration,
    ) -> Self {
        Self {
            node,
            token: Some(token),
            method: method.to_string(),
            arity,
            coverage: known.map(|(known, only)| Coverage::new(known, only)),
            deadline: Instant::now() + timeout,
            pending: VecDeque::new(),
            drained: false,
        }
    }

    /// Correlation id of the call, while it is outstanding.
    pub fn correlation_id(&self) -> Option<&str> {
        self.token.as_ref().map(ReplyToken::id)
    }

    pub fn is_finished(&self) -> bool {
        self.token.is_none()
    }

    /// Known providers that have not answered yet.
    pub fn remaining(&self) -> Option<&HashSet<String>> {
        self.coverage.as_ref().map(|c| &c.remaining)
    }

    /// Stop collecting and release the correlation token.
    pub fn finish(&mut self) {
        self.pending.clear();
        if let Some(token) = self.token.take() {
            let id = token.id().to_string();
            if let Err(e) = token.release() {
                tracing::debug!(method = %self.method, token = %id, "release failed: {}", e);
            }
        }
    }

    fn covered(&self) -> bool {
        self.coverage
            .as_ref()
            .map(|c| c.remaining.is_empty())
            .unwrap_or(false)
    }

    /// Fetch the next receive pass into `pending`. `false` when done.
    ///
    /// Replies for other calls outstanding on the same node are routed to
    /// their own queues; only replies nobody is waiting for are dropped.
    fn refill(&mut self) -> Result<bool> {
        let node = self.node;
        let Some(id) = self.token.as_ref().map(|token| token.id().to_string()) else {
            return Ok(false);
        };
        let routed = node.take_routed(&id);
        if !routed.is_empty() {
            self.pending.extend(routed);
            return Ok(true);
        }

        let now = Instant::now();
        let wait = if now >= self.deadline {
            if self.drained {
                tracing::debug!(method = %self.method, "no time left");
                return Ok(false);
            }
            self.drained = true;
            Duration::ZERO
        } else {
            self.node.timeout().min(self.deadline - now)
        };
        for frames in node.receive_within(Channel::In, None, wait) {
            let frames = frames?;
            if frames.first().map(Vec::as_slice) == Some(id.as_bytes()) {
                self.pending.push_back(frames);
            } else if let Some(stray) = node.route_reply(frames) {
                tracing::warn!(
                    method = %self.method,
                    "unexpected reply: {}",
                    FramesDisplay(&stray)
                );
            }
        }
        Ok(true)
    }

    fn accept(&mut self, frames: Frames) -> Option<Response> {
        if let Some(arity) = self.arity {
            if frames.len() != arity {
                tracing::warn!(
                    method = %self.method,
                    "discarding {}",
                    FramesDisplay(&frames)
                );
                return None;
            }
        }
        let provider = match frames.get(1).map(|raw| String::from_utf8(raw.clone())) {
            Some(Ok(provider)) => provider,
            _ => {
                tracing::warn!(
                    method = %self.method,
                    "reply without provider: {}",
                    FramesDisplay(&frames)
                );
                return None;
            }
        };
        let value = match frames.get(2) {
            Some(payload) => match codec::unpack_reply(payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(method = %self.method, %provider, "undecodable reply: {}", e);
                    return None;
                }
            },
            None => None,
        };
        if let Some(coverage) = self.coverage.as_mut() {
            if !coverage.admit(&provider) {
                return None;
            }
        }
        Some(Response { provider, value })
    }
}

impl Iterator for CallStream<'_> {
    type Item = Result<Response>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.is_finished() {
                return None;
            }
            if self.covered() {
                tracing::debug!(method = %self.method, "everybody responded");
                self.finish();
                return None;
            }
            if let Some(frames) = self.pending.pop_front() {
                if let Some(response) = self.accept(frames) {
                    return Some(Ok(response));
                }
                continue;
            }
            match self.refill() {
                Ok(true) => {}
                Ok(false) => {
                    self.finish();
                    return None;
                }
                Err(e) => {
                    self.finish();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Drop for CallStream<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Collect a known-provider call into `provider -> value`.
///
/// Every known provider is present; `None` means it never answered.
pub(crate) fn collect(
    mut stream: CallStream<'_>,
    known: &HashSet<String>,
) -> Result<HashMap<String, Option<Value>>> {
    let mut responses: HashMap<String, Option<Value>> =
        known.iter().map(|provider| (provider.clone(), None)).collect();
    for response in stream.by_ref() {
        let response = response?;
        responses.insert(response.provider, response.value);
    }
    Ok(responses)
}

/// Distinct respondents to a roll-call.
pub struct Rollcall<'a> {
    stream: CallStream<'a>,
    seen: HashSet<String>,
    max_providers: usize,
}

impl<'a> Rollcall<'a> {
    pub(crate) fn new(stream: CallStream<'a>, max_providers: usize) -> Self {
        Self {
            stream,
            seen: HashSet::new(),
            max_providers,
        }
    }
}

impl Iterator for Rollcall<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.max_providers > 0 && self.seen.len() >= self.max_providers {
            if !self.stream.is_finished() {
                tracing::debug!("roll-call reached its cap");
                self.stream.finish();
            }
            return None;
        }
        for response in self.stream.by_ref() {
            match response {
                Ok(response) => {
                    if self.seen.insert(response.provider.clone()) {
                        tracing::debug!(provider = %response.provider, "capable");
                        return Some(Ok(response.provider));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
