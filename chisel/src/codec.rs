//! Batch serialization for channel bindings.
//!
//! The core hands batches to a channel as typed envelopes; a binding that
//! moves bytes picks a [`MessageCodec`]. The [`loopback`](crate::loopback)
//! network runs every batch through one, [`JsonCodec`] unless another is
//! given.
//!
//! # Example
//!
//! ```rust
//! use chisel::{JsonCodec, MessageCodec, RequestEnvelope};
//! use serde_json::json;
//!
//! let codec = JsonCodec;
//! let batch = vec![RequestEnvelope { id: 1, fqn: "eggs.ping".into(), payload: json!(42) }];
//!
//! let bytes = codec.encode(&batch).unwrap();
//! let decoded: Vec<RequestEnvelope> = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, batch);
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A batch could not be turned into bytes or back.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("{codec} encode failed: {source}")]
    Encode {
        /// [`MessageCodec::name`] of the failing codec.
        codec: &'static str,
        /// Underlying serializer error.
        #[source]
        source: BoxError,
    },

    /// The bytes were not a valid message of the expected shape.
    #[error("{codec} decode failed: {source}")]
    Decode {
        /// [`MessageCodec::name`] of the failing codec.
        codec: &'static str,
        /// Underlying deserializer error.
        #[source]
        source: BoxError,
    },
}

/// Byte format used by a channel binding.
pub trait MessageCodec: 'static {
    /// Short format name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Serialize a message.
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a message.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// `serde_json` text encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|err| CodecError::Encode {
            codec: self.name(),
            source: Box::new(err),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|err| CodecError::Decode {
            codec: self.name(),
            source: Box::new(err),
        })
    }
}
