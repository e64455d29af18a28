// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payload codecs.
//!
//! The dispatcher never interprets argument payloads: it encodes them into the
//! item's blob fields on `later(...)` and decodes them right before handing
//! them to the target. A [`Codec`] names that `(encode, decode)` pair so that
//! producers and workers can agree on the wire format. [`JsonCodec`] is the
//! default.

use serde_json::Value;

use crate::error::Result;

/// A named encode/decode pair over [`serde_json::Value`].
pub trait Codec: Send + Sync {
    /// Stable name of the wire format, e.g. `"json"`.
    fn name(&self) -> &'static str;

    /// Encode a value into a blob suitable for an item field.
    fn encode(&self, value: &Value) -> Result<String>;

    /// Decode a blob produced by [`Codec::encode`].
    fn decode(&self, blob: &str) -> Result<Value>;
}

/// JSON text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(&self, blob: &str) -> Result<Value> {
        Ok(serde_json::from_str(blob)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_name() {
        assert_eq!(JsonCodec::new().name(), "json");
    }

    #[test]
    fn test_json_codec_round_trip() {
        let codec = JsonCodec::new();
        let value = json!({"x": 1, "nested": [1, 2, 3]});
        let blob = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&blob).unwrap(), value);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        assert!(JsonCodec::new().decode("not json").is_err());
    }
}
