//! WebSocket frame codec (RFC 6455 subset).
//!
//! Single frames are capped at 65 535 payload bytes so the length field never
//! needs the 8-byte form; larger logical messages arrive as fragments and are
//! reassembled by [`MessageAssembler`].

use bytes::{Bytes, BytesMut};

/// Maximum payload carried by one frame, in either direction.
pub const MAX_FRAME_PAYLOAD: usize = 65_535;

#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("frame payload of {0} bytes exceeds the 65535-byte cap")]
    PayloadTooLarge(u64),
    #[error("continuation frame without an initial fragment")]
    UnexpectedContinuation,
    #[error("control frame must not be fragmented")]
    FragmentedControl,
    #[error("cannot encode opcode {0:#x}")]
    UnencodableOpcode(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcode observed on the wire; the relay logs and skips these.
    Other(u8),
}

impl Opcode {
    pub fn from_wire(value: u8) -> Self {
        match value {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xa => Opcode::Pong,
            other => Opcode::Other(other),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xa,
            Opcode::Other(value) => value,
        }
    }

    pub fn is_control(self) -> bool {
        self.to_wire() >= 0x8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// Builds one frame with FIN set. `mask` must be `Some` for client-to-server
/// frames and `None` for server-to-client frames.
pub fn encode_frame(
    opcode: Opcode,
    payload: &[u8],
    mask: Option<[u8; 4]>,
) -> Result<Vec<u8>, WsError> {
    if matches!(opcode, Opcode::Other(_)) {
        return Err(WsError::UnencodableOpcode(opcode.to_wire()));
    }
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(WsError::PayloadTooLarge(payload.len() as u64));
    }

    let mut out = Vec::with_capacity(payload.len() + 8);
    out.push(0x80 | opcode.to_wire());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload.len() < 126 {
        out.push(mask_bit | payload.len() as u8);
    } else {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(
                payload
                    .iter()
                    .enumerate()
                    .map(|(i, byte)| byte ^ key[i % 4]),
            );
        }
        None => out.extend_from_slice(payload),
    }
    Ok(out)
}

/// Client-side text frame with a fresh random mask key.
pub fn masked_text_frame(payload: &[u8]) -> Result<Vec<u8>, WsError> {
    encode_frame(Opcode::Text, payload, Some(rand::random()))
}

pub fn masked_pong_frame(payload: &[u8]) -> Result<Vec<u8>, WsError> {
    encode_frame(Opcode::Pong, payload, Some(rand::random()))
}

pub fn masked_close_frame(code: u16) -> Result<Vec<u8>, WsError> {
    encode_frame(Opcode::Close, &code.to_be_bytes(), Some(rand::random()))
}

/// Buffering frame parser: feed arbitrary slices of the inbound byte stream,
/// pull complete frames out. A read that delivers half a frame just leaves
/// the bytes buffered for the next feed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, WsError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let b0 = self.buf[0];
        let b1 = self.buf[1];
        let fin = b0 & 0x80 != 0;
        let opcode = Opcode::from_wire(b0 & 0x0f);
        let masked = b1 & 0x80 != 0;
        let len7 = (b1 & 0x7f) as u64;

        let mut offset = 2usize;
        let payload_len = match len7 {
            126 => {
                if self.buf.len() < offset + 2 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([self.buf[offset], self.buf[offset + 1]]) as u64;
                offset += 2;
                len
            }
            127 => {
                if self.buf.len() < offset + 8 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&self.buf[offset..offset + 8]);
                // The 8-byte form only appears for payloads past the cap.
                return Err(WsError::PayloadTooLarge(u64::from_be_bytes(bytes)));
            }
            len => len,
        };
        if payload_len > MAX_FRAME_PAYLOAD as u64 {
            return Err(WsError::PayloadTooLarge(payload_len));
        }

        let mask = if masked {
            if self.buf.len() < offset + 4 {
                return Ok(None);
            }
            let key = [
                self.buf[offset],
                self.buf[offset + 1],
                self.buf[offset + 2],
                self.buf[offset + 3],
            ];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let total = offset + payload_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let _ = self.buf.split_to(offset);
        let mut payload = self.buf.split_to(payload_len as usize);
        if let Some(key) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

/// Reassembles fragmented data frames into logical messages. Control frames
/// pass straight through; they may legally interleave with fragments.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    pending: Option<(Opcode, Vec<u8>)>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) -> Result<Option<(Opcode, Bytes)>, WsError> {
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(WsError::FragmentedControl);
            }
            return Ok(Some((frame.opcode, frame.payload)));
        }

        match frame.opcode {
            Opcode::Continuation => {
                let Some((initial, mut buf)) = self.pending.take() else {
                    return Err(WsError::UnexpectedContinuation);
                };
                buf.extend_from_slice(&frame.payload);
                if frame.fin {
                    Ok(Some((initial, Bytes::from(buf))))
                } else {
                    self.pending = Some((initial, buf));
                    Ok(None)
                }
            }
            opcode => {
                if frame.fin {
                    Ok(Some((opcode, frame.payload)))
                } else {
                    self.pending = Some((opcode, frame.payload.to_vec()));
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Frame {
        let mut decoder = FrameDecoder::new();
        decoder.extend(bytes);
        decoder.next_frame().unwrap().unwrap()
    }

    #[test]
    fn short_payload_uses_one_length_byte() {
        let frame = encode_frame(Opcode::Text, &[b'x'; 125], None).unwrap();
        assert_eq!(frame[1], 125);
        assert_eq!(frame.len(), 2 + 125);
    }

    #[test]
    fn extended_payload_uses_two_length_bytes() {
        for len in [126usize, 127, MAX_FRAME_PAYLOAD] {
            let frame = encode_frame(Opcode::Binary, &vec![0u8; len], None).unwrap();
            assert_eq!(frame[1], 126, "len {len}");
            assert_eq!(
                u16::from_be_bytes([frame[2], frame[3]]) as usize,
                len,
                "len {len}"
            );
        }
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        assert!(matches!(
            encode_frame(Opcode::Binary, &payload, None),
            Err(WsError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn eight_byte_length_is_rejected_on_decode() {
        let mut raw = vec![0x82, 127];
        raw.extend_from_slice(&65_536u64.to_be_bytes());
        let mut decoder = FrameDecoder::new();
        decoder.extend(&raw);
        assert!(matches!(
            decoder.next_frame(),
            Err(WsError::PayloadTooLarge(65_536))
        ));
    }

    #[test]
    fn masked_round_trip() {
        let raw = masked_text_frame(b"hello relay").unwrap();
        let frame = decode_one(&raw);
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"hello relay");
    }

    #[test]
    fn partial_delivery_waits_for_more() {
        let raw = encode_frame(Opcode::Text, b"split me", None).unwrap();
        let mut decoder = FrameDecoder::new();
        for byte in &raw[..raw.len() - 1] {
            decoder.extend(std::slice::from_ref(byte));
            assert!(decoder.next_frame().unwrap().is_none());
        }
        decoder.extend(&raw[raw.len() - 1..]);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"split me");
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut raw = encode_frame(Opcode::Text, b"one", None).unwrap();
        raw.extend(encode_frame(Opcode::Text, b"two", None).unwrap());
        let mut decoder = FrameDecoder::new();
        decoder.extend(&raw);
        assert_eq!(&decoder.next_frame().unwrap().unwrap().payload[..], b"one");
        assert_eq!(&decoder.next_frame().unwrap().unwrap().payload[..], b"two");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn fragments_reassemble_with_initial_opcode() {
        let mut assembler = MessageAssembler::new();
        let first = Frame {
            fin: false,
            opcode: Opcode::Text,
            payload: Bytes::from_static(b"hel"),
        };
        let middle = Frame {
            fin: false,
            opcode: Opcode::Continuation,
            payload: Bytes::from_static(b"lo "),
        };
        let last = Frame {
            fin: true,
            opcode: Opcode::Continuation,
            payload: Bytes::from_static(b"world"),
        };
        assert!(assembler.push(first).unwrap().is_none());
        assert!(assembler.push(middle).unwrap().is_none());
        let (opcode, payload) = assembler.push(last).unwrap().unwrap();
        assert_eq!(opcode, Opcode::Text);
        assert_eq!(&payload[..], b"hello world");
    }

    #[test]
    fn control_frames_interleave_with_fragments() {
        let mut assembler = MessageAssembler::new();
        assembler
            .push(Frame {
                fin: false,
                opcode: Opcode::Binary,
                payload: Bytes::from_static(b"a"),
            })
            .unwrap();
        let (opcode, payload) = assembler
            .push(Frame {
                fin: true,
                opcode: Opcode::Ping,
                payload: Bytes::from_static(b"beat"),
            })
            .unwrap()
            .unwrap();
        assert_eq!(opcode, Opcode::Ping);
        assert_eq!(&payload[..], b"beat");
        let (opcode, payload) = assembler
            .push(Frame {
                fin: true,
                opcode: Opcode::Continuation,
                payload: Bytes::from_static(b"b"),
            })
            .unwrap()
            .unwrap();
        assert_eq!(opcode, Opcode::Binary);
        assert_eq!(&payload[..], b"ab");
    }

    #[test]
    fn bare_continuation_is_an_error() {
        let mut assembler = MessageAssembler::new();
        let frame = Frame {
            fin: true,
            opcode: Opcode::Continuation,
            payload: Bytes::new(),
        };
        assert!(matches!(
            assembler.push(frame),
            Err(WsError::UnexpectedContinuation)
        ));
    }
}
