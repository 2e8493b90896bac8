//! Payload codecs.
//!
//! The hub and endpoint never look inside a payload: they take a [`Codec`]
//! that turns application values into bytes and back.
//!
//! - [`MsgPackCodec`] - any serde type, MessagePack via `rmp-serde`
//! - [`RawCodec`] - bytes in, bytes out
//! - [`FnCodec`] - a plain encode/decode function pair
//!
//! # Example
//!
//! ```
//! use framehub::codec::{Codec, MsgPackCodec};
//!
//! let codec = MsgPackCodec::<String>::new();
//! let bytes = codec.encode(&"hello".to_string()).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), "hello");
//! ```

use std::{fmt::Debug, marker::PhantomData};

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::types::{BoxError, HubError, Result};

/// Encode/decode pair injected into a hub or endpoint.
pub trait Codec: Send + Sync + 'static {
    /// Application value carried by each message.
    type Message: Send + Sync + 'static;

    /// Serialize one value.
    fn encode(&self, message: &Self::Message) -> Result<Vec<u8>>;

    /// Deserialize one payload.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Message>;
}

/// MessagePack codec for serde types.
///
/// Structs are written as maps (`to_vec_named`) so field order changes on
/// one side do not break the other.
pub struct MsgPackCodec<M> {
    _message: PhantomData<fn() -> M>,
}

impl<M> MsgPackCodec<M> {
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<M> Default for MsgPackCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for MsgPackCodec<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M> Debug for MsgPackCodec<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MsgPackCodec")
    }
}

impl<M> Codec for MsgPackCodec<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Message = M;

    fn encode(&self, message: &M) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(message).map_err(HubError::encoding)
    }

    fn decode(&self, bytes: &[u8]) -> Result<M> {
        rmp_serde::from_slice(bytes).map_err(HubError::encoding)
    }
}

/// Pass-through codec for raw binary payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Message = Bytes;

    fn encode(&self, message: &Bytes) -> Result<Vec<u8>> {
        Ok(message.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// Codec built from two functions.
///
/// ```
/// use framehub::codec::{Codec, FnCodec};
///
/// let codec = FnCodec::new(
///     |s: &String| Ok(s.as_bytes().to_vec()),
///     |b: &[u8]| Ok(String::from_utf8(b.to_vec())?),
/// );
/// assert_eq!(codec.decode(b"hi").unwrap(), "hi");
/// ```
pub struct FnCodec<M, E, D> {
    encode: E,
    decode: D,
    _message: PhantomData<fn() -> M>,
}

impl<M, E, D> FnCodec<M, E, D>
where
    E: Fn(&M) -> std::result::Result<Vec<u8>, BoxError>,
    D: Fn(&[u8]) -> std::result::Result<M, BoxError>,
{
    pub fn new(encode: E, decode: D) -> Self {
        Self {
            encode,
            decode,
            _message: PhantomData,
        }
    }
}

impl<M, E, D> Codec for FnCodec<M, E, D>
where
    M: Send + Sync + 'static,
    E: Fn(&M) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    D: Fn(&[u8]) -> std::result::Result<M, BoxError> + Send + Sync + 'static,
{
    type Message = M;

    fn encode(&self, message: &M) -> Result<Vec<u8>> {
        (self.encode)(message).map_err(HubError::Encoding)
    }

    fn decode(&self, bytes: &[u8]) -> Result<M> {
        (self.decode)(bytes).map_err(HubError::Encoding)
    }
}
