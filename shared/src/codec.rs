//! Length-prefixed codec for the radio-bridge link
//!
//! All frames are:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ 1 byte: node id ][ N bytes: command-class payload ]
//! ```
//!
//! This preserves frame boundaries over TCP streams. The command-class
//! payload starts with the class id byte followed by the per-class command
//! id and its arguments.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{timing, wake_up_cmd, IntervalCapabilities, NodeId};

/// Maximum frame size. Command-class payloads are small; anything larger
/// is a framing error.
pub const MAX_FRAME_SIZE: u32 = 128;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Truncated payload: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown wake-up command: {0:#04x}")]
    UnknownCommand(u8),

    #[error("Command requires protocol version {required}, negotiated version is {negotiated}")]
    VersionMismatch { required: u8, negotiated: u8 },

    #[error("Wake interval {0}s does not fit the 3-byte wire field")]
    IntervalTooLarge(u32),
}

/// A single frame on the bridge link: one command-class payload for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub node: NodeId,
    pub payload: Bytes,
}

/// Encode a frame into a length-prefixed byte buffer
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(4 + 1 + frame.payload.len());
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame directly into a provided buffer
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), CodecError> {
    let body_len = 1 + frame.payload.len();

    if body_len > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    buf.reserve(4 + body_len);
    buf.put_u32(body_len as u32);
    buf.put_u8(frame.node);
    buf.extend_from_slice(&frame.payload);

    Ok(())
}

/// Try to decode a length-prefixed frame from a buffer
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if body_len == 0 || body_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(body_len));
    }

    let total_len = 4 + body_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let node = buf[0];
    buf.advance(1);
    let payload = buf.split_to(body_len as usize - 1).freeze();

    Ok(Some(Frame { node, payload }))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Encoder that batches frames into one output buffer
#[derive(Debug, Default)]
pub struct FrameEncoder {
    buffer: BytesMut,
}

impl FrameEncoder {
    /// Create a new frame encoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Encode a frame and append it to the output buffer
    pub fn encode(&mut self, frame: &Frame) -> Result<(), CodecError> {
        encode_into(frame, &mut self.buffer)
    }

    /// Take the encoded bytes, leaving an empty buffer
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Check if the encoder has any pending data
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Decoded wake-up command-class payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeUpCommand {
    /// Program the node's wake interval. The node id to notify on wake is
    /// a version-2 field.
    IntervalSet {
        seconds: u32,
        notify_node: Option<NodeId>,
    },
    IntervalGet,
    IntervalReport { seconds: u32 },
    /// The node announces it is awake. Version 2 may carry the node it
    /// notifies.
    Notification { notify_node: Option<NodeId> },
    NoMoreInformation,
    IntervalCapabilityGet,
    IntervalCapabilityReport(IntervalCapabilities),
}

/// Parse one wake-up payload. `data` starts at the command id byte; the
/// class id was consumed by the dispatcher. Fields added in version 2 are
/// only parsed when the negotiated version allows them.
pub fn parse_wake_up(data: &[u8], version: u8) -> Result<WakeUpCommand, CodecError> {
    let (&cmd, args) = data.split_first().ok_or(CodecError::Truncated {
        needed: 1,
        available: 0,
    })?;

    match cmd {
        wake_up_cmd::INTERVAL_SET => {
            let seconds = read_u24(args, 0)?;
            let notify_node = (version >= 2 && args.len() >= 4).then(|| args[3]);
            Ok(WakeUpCommand::IntervalSet {
                seconds,
                notify_node,
            })
        }
        wake_up_cmd::INTERVAL_GET => Ok(WakeUpCommand::IntervalGet),
        wake_up_cmd::INTERVAL_REPORT => Ok(WakeUpCommand::IntervalReport {
            seconds: read_u24(args, 0)?,
        }),
        wake_up_cmd::NOTIFICATION => {
            let notify_node = (version >= 2 && !args.is_empty()).then(|| args[0]);
            Ok(WakeUpCommand::Notification { notify_node })
        }
        wake_up_cmd::NO_MORE_INFORMATION => Ok(WakeUpCommand::NoMoreInformation),
        wake_up_cmd::INTERVAL_CAPABILITY_GET => {
            require_version(2, version)?;
            Ok(WakeUpCommand::IntervalCapabilityGet)
        }
        wake_up_cmd::INTERVAL_CAPABILITY_REPORT => {
            require_version(2, version)?;
            Ok(WakeUpCommand::IntervalCapabilityReport(
                IntervalCapabilities {
                    min_secs: read_u24(args, 0)?,
                    max_secs: read_u24(args, 3)?,
                    default_secs: read_u24(args, 6)?,
                    step_secs: read_u24(args, 9)?,
                },
            ))
        }
        other => Err(CodecError::UnknownCommand(other)),
    }
}

/// Encode one wake-up payload, starting at the command id byte. Encoding a
/// version-2-only command or field for a version-1 peer is an error: old
/// peers must never receive fields they cannot parse.
pub fn encode_wake_up(cmd: &WakeUpCommand, version: u8) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(16);

    match cmd {
        WakeUpCommand::IntervalSet {
            seconds,
            notify_node,
        } => {
            buf.put_u8(wake_up_cmd::INTERVAL_SET);
            put_u24(&mut buf, *seconds)?;
            if let Some(node) = notify_node {
                require_version(2, version)?;
                buf.put_u8(*node);
            }
        }
        WakeUpCommand::IntervalGet => buf.put_u8(wake_up_cmd::INTERVAL_GET),
        WakeUpCommand::IntervalReport { seconds } => {
            buf.put_u8(wake_up_cmd::INTERVAL_REPORT);
            put_u24(&mut buf, *seconds)?;
        }
        WakeUpCommand::Notification { notify_node } => {
            buf.put_u8(wake_up_cmd::NOTIFICATION);
            if let Some(node) = notify_node {
                require_version(2, version)?;
                buf.put_u8(*node);
            }
        }
        WakeUpCommand::NoMoreInformation => buf.put_u8(wake_up_cmd::NO_MORE_INFORMATION),
        WakeUpCommand::IntervalCapabilityGet => {
            require_version(2, version)?;
            buf.put_u8(wake_up_cmd::INTERVAL_CAPABILITY_GET);
        }
        WakeUpCommand::IntervalCapabilityReport(caps) => {
            require_version(2, version)?;
            buf.put_u8(wake_up_cmd::INTERVAL_CAPABILITY_REPORT);
            put_u24(&mut buf, caps.min_secs)?;
            put_u24(&mut buf, caps.max_secs)?;
            put_u24(&mut buf, caps.default_secs)?;
            put_u24(&mut buf, caps.step_secs)?;
        }
    }

    Ok(buf.freeze())
}

fn require_version(required: u8, negotiated: u8) -> Result<(), CodecError> {
    if negotiated < required {
        return Err(CodecError::VersionMismatch {
            required,
            negotiated,
        });
    }
    Ok(())
}

fn read_u24(args: &[u8], at: usize) -> Result<u32, CodecError> {
    if args.len() < at + 3 {
        return Err(CodecError::Truncated {
            needed: at + 3,
            available: args.len(),
        });
    }
    Ok(u32::from(args[at]) << 16 | u32::from(args[at + 1]) << 8 | u32::from(args[at + 2]))
}

fn put_u24(buf: &mut BytesMut, secs: u32) -> Result<(), CodecError> {
    if secs > timing::MAX_WAKE_INTERVAL_SECS {
        return Err(CodecError::IntervalTooLarge(secs));
    }
    buf.put_u8((secs >> 16) as u8);
    buf.put_u8((secs >> 8) as u8);
    buf.put_u8(secs as u8);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::COMMAND_CLASS_WAKE_UP;

    fn create_test_frame() -> Frame {
        Frame {
            node: 7,
            payload: Bytes::from_static(&[COMMAND_CLASS_WAKE_UP, wake_up_cmd::NOTIFICATION]),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = create_test_frame();

        let encoded = encode(&original).expect("encode failed");

        // Verify length prefix
        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - 4);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = decode(&mut buf).expect("decode failed").expect("no frame");

        assert_eq!(decoded, original);
        assert!(buf.is_empty(), "buffer should be empty after decode");
    }

    #[test]
    fn test_partial_decode() {
        let encoded = encode(&create_test_frame()).expect("encode failed");

        // Try decoding with only partial data
        let mut buf = BytesMut::from(&encoded[..3]);
        let result = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");

        // Buffer should be unchanged (data not consumed)
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_frame_decoder() {
        let encoded = encode(&create_test_frame()).expect("encode failed");

        let mut decoder = FrameDecoder::new();

        // Feed data in chunks
        decoder.extend(&encoded[..4]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&encoded[4..]);
        let decoded = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have frame");

        assert_eq!(decoded.node, 7);
    }

    #[test]
    fn test_frame_encoder_batches() {
        let mut encoder = FrameEncoder::new();
        assert!(encoder.is_empty());

        encoder.encode(&create_test_frame()).expect("encode failed");
        encoder.encode(&create_test_frame()).expect("encode failed");
        assert!(!encoder.is_empty());

        let batch = encoder.take();
        assert!(encoder.is_empty());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&batch);
        assert!(decoder.decode_next().expect("decode error").is_some());
        assert!(decoder.decode_next().expect("decode error").is_some());
        assert!(decoder.decode_next().expect("decode error").is_none());
    }

    #[test]
    fn test_multiple_frames() {
        let encoded1 = encode(&create_test_frame()).expect("encode failed");
        let encoded2 = encode(&create_test_frame()).expect("encode failed");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded1);
        decoder.extend(&encoded2);

        assert!(decoder.decode_next().expect("decode error").is_some());
        assert!(decoder.decode_next().expect("decode error").is_some());
        assert!(decoder.decode_next().expect("decode error").is_none());
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_bytes(0, 16);

        let result = decode(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(_))));
    }

    #[test]
    fn test_zero_length_frame() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);

        let result = decode(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(0))));
    }

    #[test]
    fn test_notification_v1_has_no_fields() {
        let encoded =
            encode_wake_up(&WakeUpCommand::Notification { notify_node: None }, 1).unwrap();
        assert_eq!(&encoded[..], &[wake_up_cmd::NOTIFICATION]);

        let parsed = parse_wake_up(&encoded, 1).unwrap();
        assert_eq!(parsed, WakeUpCommand::Notification { notify_node: None });
    }

    #[test]
    fn test_notification_v2_carries_notified_node() {
        let cmd = WakeUpCommand::Notification {
            notify_node: Some(1),
        };
        let encoded = encode_wake_up(&cmd, 2).unwrap();
        assert_eq!(&encoded[..], &[wake_up_cmd::NOTIFICATION, 1]);
        assert_eq!(parse_wake_up(&encoded, 2).unwrap(), cmd);

        // A v1 parser must ignore the trailing version-2 field
        assert_eq!(
            parse_wake_up(&encoded, 1).unwrap(),
            WakeUpCommand::Notification { notify_node: None }
        );
    }

    #[test]
    fn test_v2_field_rejected_for_v1_peer() {
        let result = encode_wake_up(
            &WakeUpCommand::Notification {
                notify_node: Some(1),
            },
            1,
        );
        assert!(matches!(
            result,
            Err(CodecError::VersionMismatch {
                required: 2,
                negotiated: 1
            })
        ));

        let result = encode_wake_up(&WakeUpCommand::IntervalCapabilityGet, 1);
        assert!(matches!(result, Err(CodecError::VersionMismatch { .. })));
    }

    #[test]
    fn test_interval_set_roundtrip() {
        let cmd = WakeUpCommand::IntervalSet {
            seconds: 3_600,
            notify_node: Some(1),
        };
        let encoded = encode_wake_up(&cmd, 2).unwrap();
        assert_eq!(
            &encoded[..],
            &[wake_up_cmd::INTERVAL_SET, 0x00, 0x0E, 0x10, 1]
        );
        assert_eq!(parse_wake_up(&encoded, 2).unwrap(), cmd);
    }

    #[test]
    fn test_interval_report_roundtrip() {
        let cmd = WakeUpCommand::IntervalReport { seconds: 600 };
        let encoded = encode_wake_up(&cmd, 1).unwrap();
        assert_eq!(parse_wake_up(&encoded, 1).unwrap(), cmd);
    }

    #[test]
    fn test_capability_report_roundtrip() {
        let cmd = WakeUpCommand::IntervalCapabilityReport(IntervalCapabilities {
            min_secs: 60,
            max_secs: 86_400,
            default_secs: 3_600,
            step_secs: 60,
        });
        let encoded = encode_wake_up(&cmd, 2).unwrap();
        assert_eq!(encoded.len(), 13);
        assert_eq!(parse_wake_up(&encoded, 2).unwrap(), cmd);
    }

    #[test]
    fn test_interval_too_large() {
        let result = encode_wake_up(
            &WakeUpCommand::IntervalReport {
                seconds: timing::MAX_WAKE_INTERVAL_SECS + 1,
            },
            1,
        );
        assert!(matches!(result, Err(CodecError::IntervalTooLarge(_))));
    }

    #[test]
    fn test_unknown_command() {
        let result = parse_wake_up(&[0x7F], 2);
        assert!(matches!(result, Err(CodecError::UnknownCommand(0x7F))));
    }

    #[test]
    fn test_truncated_report() {
        let result = parse_wake_up(&[wake_up_cmd::INTERVAL_REPORT, 0x01], 1);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));

        let result = parse_wake_up(&[], 1);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }
}
