// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MessagePack codec for payloads and registry records.
//!
//! Values cross the wire as MessagePack so that argument lists, return
//! values and master records stay readable by any msgpack implementation.
//! `serde_json::Value` is the dynamic value type handed to handlers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Pack a value into MessagePack bytes.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Unpack MessagePack bytes into a typed value.
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Decode a reply payload.
///
/// An empty content frame is an acknowledgement without content and
/// decodes to `Value::Null`.
pub fn unpack_reply(bytes: &[u8]) -> Result<Value, CodecError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    unpack(bytes)
}

/// Decode a request payload into an argument list.
///
/// An empty payload means "no arguments". A non-array value is passed as a
/// single argument.
pub fn unpack_args(bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    match unpack::<Value>(bytes)? {
        Value::Array(args) => Ok(args),
        other => Ok(vec![other]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pack_string_pair() {
        let bytes = pack(&("inproc://a", "inproc://b")).expect("pack");
        // fixarray of two elements
        assert_eq!(bytes[0], 0x92);
        let (a, b): (String, String) = unpack(&bytes).expect("unpack");
        assert_eq!(a, "inproc://a");
        assert_eq!(b, "inproc://b");
    }

    #[test]
    fn test_unpack_args() {
        let bytes = pack(&json!(["hi", 3])).expect("pack");
        let args = unpack_args(&bytes).expect("args");
        assert_eq!(args, vec![json!("hi"), json!(3)]);

        assert!(unpack_args(&[]).expect("empty").is_empty());

        let scalar = pack(&json!("solo")).expect("pack");
        assert_eq!(unpack_args(&scalar).expect("scalar"), vec![json!("solo")]);
    }

    #[test]
    fn test_unpack_reply_empty_is_null() {
        assert_eq!(unpack_reply(&[]).expect("empty"), Value::Null);
        let bytes = pack(&json!({"sup": "cat"})).expect("pack");
        assert_eq!(unpack_reply(&bytes).expect("map"), json!({"sup": "cat"}));
    }

    #[test]
    fn test_unpack_garbage() {
        assert!(unpack_reply(&[0xc1]).is_err());
    }
}
