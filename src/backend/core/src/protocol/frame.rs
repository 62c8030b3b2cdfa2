//! Framing for the concatenated-JSON control stream.
//!
//! Control sockets carry a stream of back-to-back JSON objects with no
//! delimiter. The codec scans for balanced braces with full string and
//! escape awareness (a `}` inside a string must not close the object),
//! emits each complete object, and leaves partial bytes buffered until
//! the next read. No object is ever partially consumed.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::SwarmError;
use crate::protocol::WireMessage;

/// Stateful scanner over the inbound byte stream.
///
/// Scan state survives partial reads, so each `decode` call resumes where
/// the previous one stopped instead of rescanning the buffer.
#[derive(Debug, Default)]
pub struct JsonFrameCodec {
    /// Next unexamined byte offset into the buffer
    scanned: usize,
    /// Open-brace depth at `scanned`
    depth: usize,
    /// Whether `scanned` is inside a string literal
    in_string: bool,
    /// Whether the previous byte was a backslash inside a string
    escaped: bool,
    /// Whether an object has been opened
    started: bool,
}

impl JsonFrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.started = false;
    }
}

impl Decoder for JsonFrameCodec {
    type Item = WireMessage;
    type Error = SwarmError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>, SwarmError> {
        loop {
            // Discard anything before the opening brace of the next object.
            if !self.started {
                match src.iter().position(|&b| b == b'{') {
                    Some(0) => {}
                    Some(pos) => src.advance(pos),
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
                self.reset();
                self.started = true;
            }

            let mut frame_end = None;
            for idx in self.scanned..src.len() {
                let b = src[idx];
                if self.in_string {
                    if self.escaped {
                        self.escaped = false;
                    } else if b == b'\\' {
                        self.escaped = true;
                    } else if b == b'"' {
                        self.in_string = false;
                    }
                } else {
                    match b {
                        b'"' => self.in_string = true,
                        b'{' => self.depth += 1,
                        b'}' => {
                            self.depth -= 1;
                            if self.depth == 0 {
                                frame_end = Some(idx);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }

            let Some(end) = frame_end else {
                self.scanned = src.len();
                return Ok(None);
            };

            let frame = src.split_to(end + 1);
            self.reset();

            match serde_json::from_slice::<WireMessage>(&frame) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    // Protocol error: log, discard the object, keep reading.
                    tracing::warn!(
                        error = %e,
                        frame_len = frame.len(),
                        "Discarding malformed frame"
                    );
                }
            }
        }
    }
}

impl Encoder<WireMessage> for JsonFrameCodec {
    type Error = SwarmError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), SwarmError> {
        let payload = serde_json::to_vec(&item)?;
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Encoder<&WireMessage> for JsonFrameCodec {
    type Error = SwarmError;

    fn encode(&mut self, item: &WireMessage, dst: &mut BytesMut) -> Result<(), SwarmError> {
        let payload = serde_json::to_vec(item)?;
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{status, MessageType};

    fn decode_all(codec: &mut JsonFrameCodec, buf: &mut BytesMut) -> Vec<WireMessage> {
        let mut out = Vec::new();
        while let Some(msg) = codec.decode(buf).unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_single_frame() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::new();
        let msg = WireMessage::new(MessageType::SlmPrompt).with_text("hello");
        codec.encode(&msg, &mut buf).unwrap();

        let out = decode_all(&mut codec, &mut buf);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, MessageType::SlmPrompt);
        assert_eq!(out[0].text(), "hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_concatenated_frames() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::new();
        for i in 0..5 {
            let msg = WireMessage::ack(status::SUCCESS).with_agent(format!("w{}", i));
            codec.encode(msg, &mut buf).unwrap();
        }

        let out = decode_all(&mut codec, &mut buf);
        assert_eq!(out.len(), 5);
        assert_eq!(out[4].agent_id, "w4");
    }

    #[test]
    fn test_brace_inside_string_does_not_close() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::new();
        let msg = WireMessage::new(MessageType::SlmPrompt).with_text(r#"tricky } { "quoted" \ text"#);
        codec.encode(&msg, &mut buf).unwrap();

        let out = decode_all(&mut codec, &mut buf);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), r#"tricky } { "quoted" \ text"#);
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(r#"{"type":"ACK","agent_id":"a\"}b"}"#);

        let out = decode_all(&mut codec, &mut buf);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].agent_id, "a\"}b");
    }

    #[test]
    fn test_partial_frame_stays_buffered() {
        let mut codec = JsonFrameCodec::new();
        let msg = WireMessage::new(MessageType::SlmPrompt).with_text("split across reads");
        let bytes = serde_json::to_vec(&msg).unwrap();

        // Feed byte by byte; exactly one message must come out, at the end.
        let mut buf = BytesMut::new();
        let mut got = Vec::new();
        for b in &bytes {
            buf.extend_from_slice(&[*b]);
            if let Some(m) = codec.decode(&mut buf).unwrap() {
                got.push(m);
            }
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text(), "split across reads");
    }

    #[test]
    fn test_every_split_point_yields_identical_frames() {
        let msgs = vec![
            WireMessage::new(MessageType::SlmBidRequest).with_text("p1"),
            WireMessage::ack(status::ERR_UNAVAILABLE),
            WireMessage::new(MessageType::SlmBidResponse)
                .with_bid(0.1, 0.2, 0.3, 0.4, 0.25)
                .with_endpoint("127.0.0.1", 1),
        ];
        let mut stream = Vec::new();
        for m in &msgs {
            stream.extend_from_slice(&serde_json::to_vec(m).unwrap());
        }

        for split in 0..=stream.len() {
            let mut codec = JsonFrameCodec::new();
            let mut buf = BytesMut::new();
            let mut got = Vec::new();

            buf.extend_from_slice(&stream[..split]);
            while let Some(m) = codec.decode(&mut buf).unwrap() {
                got.push(m);
            }
            buf.extend_from_slice(&stream[split..]);
            while let Some(m) = codec.decode(&mut buf).unwrap() {
                got.push(m);
            }

            assert_eq!(got.len(), msgs.len(), "split at {}", split);
            for (a, b) in got.iter().zip(&msgs) {
                assert_eq!(
                    serde_json::to_string(a).unwrap(),
                    serde_json::to_string(b).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_leading_garbage_is_discarded() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from("\n\r  junk");
        buf.extend_from_slice(br#"{"type":"ACK","status":200}"#);

        let out = decode_all(&mut codec, &mut buf);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, MessageType::Ack);
    }

    #[test]
    fn test_malformed_object_is_skipped() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(r#"{"not a message": true}{"type":"ACK","status":200}"#);

        let out = decode_all(&mut codec, &mut buf);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, MessageType::Ack);
    }
}
