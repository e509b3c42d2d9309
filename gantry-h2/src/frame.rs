//! HTTP/2 frame head codec.
//!
//! Every frame starts with a fixed 9-byte head, big-endian on the wire:
//!
//! ```text
//! [0..3]  24-bit payload length
//! [3]     frame type
//! [4]     flags
//! [5..9]  stream identifier, top bit reserved (always cleared on read)
//! ```

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Wire size of a frame head.
pub const HEADER_LEN: usize = 9;

/// Default cap on a single frame's payload, per RFC 7540 SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// ACK flag carried by SETTINGS and PING frames.
pub const FLAG_ACK: u8 = 0x1;

/// END_HEADERS flag carried by HEADERS, PUSH_PROMISE and CONTINUATION.
pub const FLAG_END_HEADERS: u8 = 0x4;

/// Frame-level protocol errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// A full frame head was not available.
    #[error("short frame head")]
    Short,

    /// The advertised payload exceeds the negotiated maximum.
    #[error("frame payload of {0} bytes exceeds the maximum frame size")]
    Oversize(u32),

    /// A SETTINGS or PING frame used a non-zero stream identifier.
    #[error("invalid stream identifier for connection-level frame")]
    InvalidStreamId,

    /// A SETTINGS payload was not a round multiple of one setting entry.
    #[error("partial SETTINGS entry")]
    PartialSettingLength,

    /// A SETTINGS ACK carried a payload.
    #[error("SETTINGS ACK with payload")]
    InvalidPayloadAckSettings,

    /// A PING payload was not exactly eight bytes.
    #[error("bad PING frame size")]
    BadFrameSize,

    /// CONTINUATION discipline was violated around an open header run.
    #[error("unexpected frame while a header run is open")]
    ExpectedContinuation,

    /// A CONTINUATION frame arrived with no header run open.
    #[error("CONTINUATION without a preceding header block")]
    UnexpectedContinuation,

    /// The connection did not open with the client preface literal.
    #[error("bad connection preface")]
    BadPreface,

    /// The first frame after the preface was not a SETTINGS frame.
    #[error("expected the opening SETTINGS frame")]
    ExpectedSettings,
}

/// Frame type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Data = 0,
    Headers = 1,
    Priority = 2,
    RstStream = 3,
    Settings = 4,
    PushPromise = 5,
    Ping = 6,
    GoAway = 7,
    WindowUpdate = 8,
    Continuation = 9,
    /// Unknown types are tolerated and skipped.
    Unknown,
}

impl Kind {
    #[must_use]
    pub const fn from_type(byte: u8) -> Self {
        match byte {
            0 => Self::Data,
            1 => Self::Headers,
            2 => Self::Priority,
            3 => Self::RstStream,
            4 => Self::Settings,
            5 => Self::PushPromise,
            6 => Self::Ping,
            7 => Self::GoAway,
            8 => Self::WindowUpdate,
            9 => Self::Continuation,
            _ => Self::Unknown,
        }
    }

    /// Wire value; `Unknown` has none and encodes as 0xFF.
    #[must_use]
    pub const fn as_type(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Headers => 1,
            Self::Priority => 2,
            Self::RstStream => 3,
            Self::Settings => 4,
            Self::PushPromise => 5,
            Self::Ping => 6,
            Self::GoAway => 7,
            Self::WindowUpdate => 8,
            Self::Continuation => 9,
            Self::Unknown => 0xFF,
        }
    }

    /// Frames that open a header run unless END_HEADERS is set.
    #[must_use]
    pub const fn starts_header_block(self) -> bool {
        matches!(self, Self::Headers | Self::PushPromise)
    }
}

/// 31-bit stream identifier. The wire's top bit is reserved and cleared
/// on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    pub const CONNECTION: Self = Self(0);

    #[must_use]
    pub const fn is_connection(self) -> bool {
        self.0 == 0
    }
}

/// Parsed 9-byte frame head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub length: u32,
    pub kind: Kind,
    pub flag: u8,
    pub stream_id: StreamId,
}

impl FrameHead {
    #[must_use]
    pub const fn new(kind: Kind, flag: u8, stream_id: StreamId, length: u32) -> Self {
        Self {
            length,
            kind,
            flag,
            stream_id,
        }
    }

    /// Parse a head from the first [`HEADER_LEN`] bytes of `src`.
    pub fn parse(src: &[u8]) -> Result<Self, FrameError> {
        if src.len() < HEADER_LEN {
            return Err(FrameError::Short);
        }
        let length = u32::from(src[0]) << 16 | u32::from(src[1]) << 8 | u32::from(src[2]);
        let kind = Kind::from_type(src[3]);
        let flag = src[4];
        let stream_id =
            u32::from_be_bytes([src[5], src[6], src[7], src[8]]) & 0x7FFF_FFFF;

        Ok(Self {
            length,
            kind,
            flag,
            stream_id: StreamId(stream_id),
        })
    }

    /// Encode this head into its 9-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut dst = [0u8; HEADER_LEN];
        dst[0] = (self.length >> 16) as u8;
        dst[1] = (self.length >> 8) as u8;
        dst[2] = self.length as u8;
        dst[3] = self.kind.as_type();
        dst[4] = self.flag;
        dst[5..9].copy_from_slice(&(self.stream_id.0 & 0x7FFF_FFFF).to_be_bytes());
        dst
    }

    /// Encode head plus payload into a buffer.
    pub fn encode_with_payload(&self, payload: &[u8], dst: &mut BytesMut) {
        debug_assert_eq!(self.length as usize, payload.len());
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(&self.encode());
        dst.put_slice(payload);
    }

    #[must_use]
    pub const fn is_ack(&self) -> bool {
        (self.flag & FLAG_ACK) != 0
    }

    #[must_use]
    pub const fn is_end_headers(&self) -> bool {
        (self.flag & FLAG_END_HEADERS) != 0
    }

    /// Structural validation that does not depend on mux state.
    pub fn validate(&self, max_frame_size: u32) -> Result<(), FrameError> {
        if self.length > max_frame_size {
            return Err(FrameError::Oversize(self.length));
        }
        match self.kind {
            Kind::Settings => {
                if !self.stream_id.is_connection() {
                    return Err(FrameError::InvalidStreamId);
                }
                if self.is_ack() {
                    if self.length != 0 {
                        return Err(FrameError::InvalidPayloadAckSettings);
                    }
                } else if self.length % 6 != 0 {
                    return Err(FrameError::PartialSettingLength);
                }
            }
            Kind::Ping => {
                if !self.stream_id.is_connection() {
                    return Err(FrameError::InvalidStreamId);
                }
                if self.length != 8 {
                    return Err(FrameError::BadFrameSize);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
