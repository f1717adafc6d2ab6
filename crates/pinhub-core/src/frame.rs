//! # Frame Codec
//!
//! Turns the device byte stream into discrete [`Frame`]s and back.
//!
//! ## Decode Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FrameCodec::decode                               │
//! │                                                                         │
//! │  buffered < 5 bytes? ──────────────────────────► wait (Ok(None))       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  command == RESPONSE? ── yes ──► consume 5 bytes, third field = status │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  length > max_body? ─── yes ──► FramingError::BodyTooLarge (fatal)     │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  buffered < 5 + length? ───────────────────────► wait, nothing consumed │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  consume header + body ──► Frame::Message                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Encoding mirrors decoding byte for byte. A RESPONSE never carries a
//! length field; when a response needs a payload it is sent as an
//! *extended response*: a HARDWARE frame whose first two body bytes are the
//! big-endian status.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FramingError;
use crate::protocol::{Command, StatusCode, DEFAULT_MAX_BODY, HEADER_LEN};

// =============================================================================
// Frame
// =============================================================================

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Fixed-size status reply; never has a body.
    Response { message_id: u16, status: StatusCode },

    /// Any other command with its body.
    Message {
        command: Command,
        message_id: u16,
        body: Bytes,
    },
}

impl Frame {
    /// Builds a status reply.
    pub fn response(message_id: u16, status: StatusCode) -> Self {
        Frame::Response { message_id, status }
    }

    /// Builds a body-carrying frame.
    pub fn message(command: Command, message_id: u16, body: impl Into<Bytes>) -> Self {
        Frame::Message {
            command,
            message_id,
            body: body.into(),
        }
    }

    /// Builds a HARDWARE frame.
    pub fn hardware(message_id: u16, body: impl Into<Bytes>) -> Self {
        Frame::message(Command::Hardware, message_id, body)
    }

    /// Builds an extended response: HARDWARE layout, status in the first
    /// two body bytes, `payload` after it.
    pub fn extended_response(message_id: u16, status: StatusCode, payload: &[u8]) -> Self {
        let mut body = BytesMut::with_capacity(2 + payload.len());
        body.put_u16(status.code());
        body.put_slice(payload);
        Frame::hardware(message_id, body.freeze())
    }

    /// Splits an extended response into its status and payload.
    ///
    /// Returns `None` for anything that is not a HARDWARE frame with at
    /// least two body bytes.
    pub fn extended_status(&self) -> Option<(StatusCode, &[u8])> {
        match self {
            Frame::Message {
                command: Command::Hardware,
                body,
                ..
            } if body.len() >= 2 => {
                let status = StatusCode::from(u16::from_be_bytes([body[0], body[1]]));
                Some((status, &body[2..]))
            }
            _ => None,
        }
    }

    /// Returns the command of this frame.
    pub fn command(&self) -> Command {
        match self {
            Frame::Response { .. } => Command::Response,
            Frame::Message { command, .. } => *command,
        }
    }

    /// Returns the message id of this frame.
    pub fn message_id(&self) -> u16 {
        match self {
            Frame::Response { message_id, .. } | Frame::Message { message_id, .. } => *message_id,
        }
    }

    /// Returns the body, empty for responses.
    pub fn body(&self) -> &[u8] {
        match self {
            Frame::Response { .. } => &[],
            Frame::Message { body, .. } => body,
        }
    }

    /// Returns the status of a plain response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Frame::Response { status, .. } => Some(*status),
            Frame::Message { .. } => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Response { message_id, status } => {
                write!(f, "Response(id={}, status={})", message_id, status)
            }
            Frame::Message {
                command,
                message_id,
                body,
            } => write!(f, "{}(id={}, len={})", command, message_id, body.len()),
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Stateful per-connection codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_body: usize,
}

impl FrameCodec {
    /// Creates a codec with the default body limit.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY)
    }

    /// Creates a codec with a custom body limit.
    pub fn with_max_body(max_body: usize) -> Self {
        FrameCodec { max_body }
    }

    /// Returns the configured body limit.
    pub fn max_body(&self) -> usize {
        self.max_body
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let command = Command::from(src[0]);
        let message_id = u16::from_be_bytes([src[1], src[2]]);
        let length_or_status = u16::from_be_bytes([src[3], src[4]]);

        if command == Command::Response {
            src.advance(HEADER_LEN);
            return Ok(Some(Frame::Response {
                message_id,
                status: StatusCode::from(length_or_status),
            }));
        }

        let length = length_or_status as usize;
        if length > self.max_body {
            return Err(FramingError::BodyTooLarge {
                declared: length,
                max: self.max_body,
            });
        }

        let total = HEADER_LEN + length;
        if src.len() < total {
            // Header stays in the buffer until the whole body is here
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(length).freeze();

        Ok(Some(Frame::Message {
            command,
            message_id,
            body,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FramingError> {
        match frame {
            Frame::Response { message_id, status } => {
                dst.reserve(HEADER_LEN);
                dst.put_u8(Command::Response.code());
                dst.put_u16(message_id);
                dst.put_u16(status.code());
            }
            Frame::Message {
                command,
                message_id,
                body,
            } => {
                if command == Command::Response {
                    return Err(FramingError::ResponseWithBody);
                }
                if body.len() > self.max_body {
                    return Err(FramingError::BodyTooLarge {
                        declared: body.len(),
                        max: self.max_body,
                    });
                }
                let length = u16::try_from(body.len())
                    .map_err(|_| FramingError::BodyUnencodable(body.len()))?;
                dst.reserve(HEADER_LEN + body.len());
                dst.put_u8(command.code());
                dst.put_u16(message_id);
                dst.put_u16(length);
                dst.put_slice(&body);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    fn round_trip(frame: Frame) {
        let mut buf = encode(frame.clone());
        let decoded = FrameCodec::new().decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_round_trip_shapes() {
        round_trip(Frame::response(7, StatusCode::Success));
        round_trip(Frame::response(1, StatusCode::Other(4242)));
        round_trip(Frame::message(Command::Login, 1, &b"user1-100-7-secret"[..]));
        round_trip(Frame::message(Command::Ping, 65535, Bytes::new()));
        round_trip(Frame::hardware(3, &b"vw\x009\x0042"[..]));
        round_trip(Frame::message(Command::Other(200), 9, &b"x"[..]));
        round_trip(Frame::extended_response(12, StatusCode::IllegalCommandBody, b"detail"));
    }

    #[test]
    fn test_response_wire_layout() {
        let buf = encode(Frame::response(0x0102, StatusCode::InvalidToken));
        assert_eq!(&buf[..], &[0, 0x01, 0x02, 0, 8]);
    }

    #[test]
    fn test_message_wire_layout() {
        let buf = encode(Frame::hardware(1, &b"vw\x001\x002"[..]));
        assert_eq!(&buf[..5], &[20, 0, 1, 0, 6]);
        assert_eq!(&buf[5..], b"vw\x001\x002");
    }

    #[test]
    fn test_partial_header_waits() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[20u8, 0, 1][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_partial_body_is_not_consumed() {
        let mut codec = FrameCodec::new();
        let full = encode(Frame::hardware(4, &b"vr\x009"[..]));

        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), full.len() - 1);

        buf.put_u8(full[full.len() - 1]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.body(), b"vr\x009");
    }

    #[test]
    fn test_multiple_frames_in_one_buffer() {
        let mut buf = encode(Frame::message(Command::Ping, 1, Bytes::new()));
        buf.extend_from_slice(&encode(Frame::response(2, StatusCode::Success)));
        buf.extend_from_slice(&encode(Frame::hardware(3, &b"vr\x001"[..])));

        let mut codec = FrameCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command(), Command::Ping);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command(), Command::Response);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().message_id(), 3);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversize_body_is_fatal() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[20u8, 0, 1, 0x04, 0x01][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            FramingError::BodyTooLarge {
                declared: 1025,
                max: 1024
            }
        ));
    }

    #[test]
    fn test_body_at_limit_is_accepted() {
        let mut codec = FrameCodec::with_max_body(16);
        let mut buf = encode(Frame::hardware(1, vec![b'a'; 16]));
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_oversize_outbound_body_rejected() {
        let mut codec = FrameCodec::with_max_body(16);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Frame::hardware(1, vec![b'a'; 17]), &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            FramingError::BodyTooLarge {
                declared: 17,
                max: 16
            }
        ));
        assert!(buf.is_empty());

        codec.encode(Frame::hardware(2, vec![b'a'; 16]), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN + 16);
    }

    #[test]
    fn test_extended_response_accessor() {
        let frame = Frame::extended_response(5, StatusCode::NoData, b"none");
        let (status, payload) = frame.extended_status().unwrap();
        assert_eq!(status, StatusCode::NoData);
        assert_eq!(payload, b"none");
        assert!(Frame::response(5, StatusCode::Success).extended_status().is_none());
    }

    #[test]
    fn test_response_command_with_body_rejected() {
        let mut buf = BytesMut::new();
        let err = FrameCodec::new()
            .encode(Frame::message(Command::Response, 1, &b"x"[..]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, FramingError::ResponseWithBody));
    }
}
