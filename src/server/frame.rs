//! Binary wire frame shared by the TCP and WebSocket adapters.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! [magic u8][flag u8][request_id i32][path_len u16][body_len u32][path][body]
//! ```
//!
//! The magic byte doubles as the demux discriminator: it is outside the
//! ASCII range, so a framed connection can never be mistaken for an HTTP
//! request line.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Error, Result};

/// First byte of every frame.
pub const FRAME_MAGIC: u8 = 0x88;

/// Frame flag bit: unsolicited broadcast payload.
pub const FLAG_BROADCAST: u8 = 1;

const HEADER_LEN: usize = 1 + 1 + 4 + 2 + 4;
const MAX_PATH_LEN: usize = 1024;
const MAX_BODY_LEN: usize = 4 * 1024 * 1024;

/// One message on a framed connection, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Flag bits, see [`FLAG_BROADCAST`].
    pub flag: u8,
    /// Correlation id; replies echo the request's, pushes carry 0 or a
    /// negated push counter.
    pub request_id: i32,
    /// Request path, may carry a query string.
    pub path: String,
    /// Payload bytes.
    pub body: Bytes,
}

impl Frame {
    /// A reply frame correlated to a request.
    #[must_use]
    pub fn reply(request_id: i32, path: &str, body: Bytes) -> Self {
        Self {
            flag: 0,
            request_id,
            path: path.to_string(),
            body,
        }
    }

    /// Decode one whole frame from a buffer (WebSocket binary messages
    /// carry exactly one frame each).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::from(buf);
        match codec.decode(&mut bytes)? {
            Some(frame) if bytes.is_empty() => Ok(frame),
            Some(_) => Err(Error::Transport("trailing bytes after frame".into())),
            None => Err(Error::Transport("truncated frame".into())),
        }
    }

    /// Encode into a standalone buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut bytes = BytesMut::with_capacity(HEADER_LEN + self.path.len() + self.body.len());
        FrameCodec::new().encode(self.clone(), &mut bytes)?;
        Ok(bytes.freeze())
    }
}

/// Streaming codec for framed TCP connections.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        if src[0] != FRAME_MAGIC {
            return Err(Error::Transport(format!(
                "bad frame magic: 0x{:02x}",
                src[0]
            )));
        }
        let path_len = usize::from(u16::from_be_bytes([src[6], src[7]]));
        let body_len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
        if path_len > MAX_PATH_LEN {
            return Err(Error::Transport(format!("frame path too long: {path_len}")));
        }
        if body_len > MAX_BODY_LEN {
            return Err(Error::Transport(format!("frame body too large: {body_len}")));
        }
        let total = HEADER_LEN + path_len + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(1);
        let flag = src.get_u8();
        let request_id = src.get_i32();
        src.advance(2 + 4);
        let path = src.split_to(path_len);
        let path = std::str::from_utf8(&path)
            .map_err(|_| Error::Transport("frame path is not utf-8".into()))?
            .to_string();
        let body = src.split_to(body_len).freeze();
        Ok(Some(Frame {
            flag,
            request_id,
            path,
            body,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.path.len() > MAX_PATH_LEN {
            return Err(Error::Transport(format!(
                "frame path too long: {}",
                frame.path.len()
            )));
        }
        if frame.body.len() > MAX_BODY_LEN {
            return Err(Error::Transport(format!(
                "frame body too large: {}",
                frame.body.len()
            )));
        }
        dst.reserve(HEADER_LEN + frame.path.len() + frame.body.len());
        dst.put_u8(FRAME_MAGIC);
        dst.put_u8(frame.flag);
        dst.put_i32(frame.request_id);
        dst.put_u16(frame.path.len() as u16);
        dst.put_u32(frame.body.len() as u32);
        dst.put_slice(frame.path.as_bytes());
        dst.put_slice(&frame.body);
        Ok(())
    }
}
