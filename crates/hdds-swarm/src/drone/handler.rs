// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Method handlers.

use crate::envelope::Payload;
use serde_json::Value;

/// What a handler sends back.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Reply {
    /// Send nothing at all.
    #[default]
    Silent,
    /// Answer with an empty content frame.
    Empty,
    /// Answer with a value.
    Value(Value),
}

impl Reply {
    /// Content to publish, or `None` to stay silent.
    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Silent => None,
            Self::Empty => Some(Payload::Empty),
            Self::Value(value) => Some(Payload::Value(value)),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Option<Value>> for Reply {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::Silent, Self::Value)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Value(Value::String(text))
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Value(Value::String(text.to_string()))
    }
}

/// Handler trait for drone methods.
///
/// Implement this trait to define a method, or pass a closure.
pub trait MethodHandler: Send + Sync + 'static {
    /// Handle one request. `args` is empty when the request carried none.
    fn call(&self, args: Vec<Value>) -> Reply;
}

/// A function-based method handler.
impl<F, R> MethodHandler for F
where
    F: Fn(Vec<Value>) -> R + Send + Sync + 'static,
    R: Into<Reply>,
{
    fn call(&self, args: Vec<Value>) -> Reply {
        self(args).into()
    }
}

/// Slot in the drone's method table.
pub(crate) enum Entry {
    /// Built-in roll-call responder.
    Rollcall,
    User(Box<dyn MethodHandler>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn boxed(handler: impl MethodHandler) -> Box<dyn MethodHandler> {
        Box::new(handler)
    }

    #[test]
    fn test_closure_handlers() {
        let greet = boxed(|args: Vec<Value>| {
            format!("sup, {}", args.first().and_then(Value::as_str).unwrap_or("cat"))
        });
        assert_eq!(greet.call(vec![json!("Squeak")]), Reply::from("sup, Squeak"));

        let silent = boxed(|_: Vec<Value>| None::<Value>);
        assert_eq!(silent.call(vec![]), Reply::Silent);

        let ack = boxed(|_: Vec<Value>| Reply::Empty);
        assert_eq!(ack.call(vec![]), Reply::Empty);
    }

    #[test]
    fn test_reply_payload() {
        assert_eq!(Reply::Silent.into_payload(), None);
        assert_eq!(Reply::Empty.into_payload(), Some(Payload::Empty));
        assert_eq!(
            Reply::Value(json!(1)).into_payload(),
            Some(Payload::Value(json!(1)))
        );
    }
}
