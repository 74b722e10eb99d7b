use crate::core::errors::AseError;
use crate::core::types::Resp;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// Decoder trait for turning raw response bytes into a typed [`Resp`]
///
/// The transport never looks inside the payload; only `header.status` is
/// inspected to detect the end of a stream. Services whose payloads need
/// post-processing (base64 text, nested JSON) supply their own decoder.
pub trait Decoder: Send + Sync + 'static {
    /// The payload type produced for this service
    type Payload: Send + 'static;

    /// Decode one raw message (the body of a unary response or a WebSocket data frame)
    fn decode(&self, raw: &[u8]) -> Result<Resp<Self::Payload>, AseError>;
}

/// Default decoder: parses the message straight into `Resp<P>` with serde.
pub struct JsonDecoder<P = Value> {
    _payload: PhantomData<fn() -> P>,
}

impl<P> JsonDecoder<P> {
    pub const fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<P> Default for JsonDecoder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for JsonDecoder<P> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for JsonDecoder<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonDecoder")
    }
}

impl<P: DeserializeOwned + Send + 'static> Decoder for JsonDecoder<P> {
    type Payload = P;

    fn decode(&self, raw: &[u8]) -> Result<Resp<P>, AseError> {
        Resp::from_slice(raw)
    }
}
