//! Length-prefix message framing.
//!
//! A frame is a 4-byte little-endian `i32` length followed by exactly that
//! many payload bytes. A length of zero is a keepalive and carries no payload.
//!
//! [`Framer`] is a two-state machine fed with whatever chunks the socket
//! hands back:
//!
//! - awaiting length: filling the fixed 4-byte prefix buffer
//! - awaiting payload: filling a buffer sized by the prefix just parsed
//!
//! # Example
//!
//! ```
//! use framehub::framer::Framer;
//!
//! let mut framer = Framer::new(1024);
//! let frame = Framer::wrap(b"hello").unwrap();
//!
//! let mut messages = Vec::new();
//! framer.feed(&frame[..3], |m| messages.push(m)).unwrap();
//! framer.feed(&frame[3..], |m| messages.push(m)).unwrap();
//!
//! assert_eq!(messages.len(), 1);
//! assert_eq!(&messages[0][..], b"hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{HubError, Result};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum message size used when none is configured.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 500_000;

/// Upper bound on the up-front payload allocation; larger payloads grow as
/// their bytes arrive.
const PAYLOAD_PREALLOC_LIMIT: usize = 64 * 1024;

#[derive(Debug)]
enum State {
    AwaitingLength {
        prefix: [u8; LENGTH_PREFIX_SIZE],
        filled: usize,
    },
    AwaitingPayload {
        payload: BytesMut,
        expected: usize,
    },
    /// A protocol violation was seen; the framer must not be fed again.
    Failed { length: i64 },
}

impl State {
    fn awaiting_length() -> Self {
        State::AwaitingLength {
            prefix: [0; LENGTH_PREFIX_SIZE],
            filled: 0,
        }
    }
}

/// Per-connection framing state machine.
///
/// One instance per connection, fed by that connection's receive loop only.
#[derive(Debug)]
pub struct Framer {
    state: State,
    /// 0 means no limit.
    max_message_size: usize,
}

impl Framer {
    /// Create a framer rejecting messages longer than `max_message_size`.
    ///
    /// A maximum of 0 disables the limit.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            state: State::awaiting_length(),
            max_message_size,
        }
    }

    /// Create a framer without a message size limit.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// The configured limit, or `None` when unbounded.
    pub fn max_message_size(&self) -> Option<usize> {
        (self.max_message_size > 0).then_some(self.max_message_size)
    }

    /// Prefix `payload` with its length, producing a frame ready to write.
    ///
    /// # Errors
    ///
    /// [`HubError::ProtocolViolation`] if the payload is longer than `i32::MAX`.
    pub fn wrap(payload: &[u8]) -> Result<Bytes> {
        let length = i32::try_from(payload.len()).map_err(|_| HubError::ProtocolViolation {
            length: payload.len() as i64,
        })?;

        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        frame.put_i32_le(length);
        frame.put_slice(payload);
        Ok(frame.freeze())
    }

    /// A keepalive frame: a zero length prefix with no payload.
    pub fn wrap_keepalive() -> Bytes {
        Bytes::from_static(&[0; LENGTH_PREFIX_SIZE])
    }

    /// Consume `chunk`, calling `on_message` for every message it completes.
    ///
    /// The whole chunk is consumed before returning: it may complete several
    /// messages, or only part of one. Keepalives are reported as empty
    /// messages. An empty chunk is a no-op.
    ///
    /// # Errors
    ///
    /// [`HubError::ProtocolViolation`] when a prefix decodes to a negative
    /// length or one above the limit. The error is raised as soon as the
    /// prefix is complete, before any payload byte is taken. Every later call
    /// fails the same way; the connection has to be torn down.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_message: F) -> Result<()>
    where
        F: FnMut(Bytes),
    {
        let mut cursor = 0;

        while cursor < chunk.len() {
            let available = &chunk[cursor..];

            match &mut self.state {
                State::Failed { length } => {
                    return Err(HubError::ProtocolViolation { length: *length });
                }

                State::AwaitingLength { prefix, filled } => {
                    let take = (LENGTH_PREFIX_SIZE - *filled).min(available.len());
                    prefix[*filled..*filled + take].copy_from_slice(&available[..take]);
                    *filled += take;
                    cursor += take;

                    if *filled == LENGTH_PREFIX_SIZE {
                        let length = i32::from_le_bytes(*prefix);
                        self.begin_payload(length, &mut on_message)?;
                    }
                }

                State::AwaitingPayload { payload, expected } => {
                    let take = (*expected - payload.len()).min(available.len());
                    payload.extend_from_slice(&available[..take]);
                    cursor += take;

                    if payload.len() == *expected {
                        let message = std::mem::take(payload).freeze();
                        self.state = State::awaiting_length();
                        on_message(message);
                    }
                }
            }
        }

        Ok(())
    }

    /// Like [`Framer::feed`], collecting the completed messages.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        let mut messages = Vec::new();
        self.feed(chunk, |message| messages.push(message))?;
        Ok(messages)
    }

    /// `true` when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingLength { filled: 0, .. })
    }

    /// Number of bytes of the current, incomplete frame held in the active buffer.
    pub fn buffered(&self) -> usize {
        match &self.state {
            State::AwaitingLength { filled, .. } => *filled,
            State::AwaitingPayload { payload, .. } => payload.len(),
            State::Failed { .. } => 0,
        }
    }

    /// `true` once a protocol violation has been raised.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed { .. })
    }

    fn begin_payload<F>(&mut self, length: i32, on_message: &mut F) -> Result<()>
    where
        F: FnMut(Bytes),
    {
        let over_limit = self.max_message_size > 0 && length as i64 > self.max_message_size as i64;
        if length < 0 || over_limit {
            self.state = State::Failed {
                length: i64::from(length),
            };
            return Err(HubError::ProtocolViolation {
                length: i64::from(length),
            });
        }

        if length == 0 {
            self.state = State::awaiting_length();
            on_message(Bytes::new());
            return Ok(());
        }

        let expected = length as usize;
        self.state = State::AwaitingPayload {
            payload: BytesMut::with_capacity(expected.min(PAYLOAD_PREALLOC_LIMIT)),
            expected,
        };
        Ok(())
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}
