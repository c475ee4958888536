use std::io::Read;
use anyhow::{bail, Context, Result};

pub const PREFIX: u32 = 0x0000_55AA;
pub const SUFFIX: u32 = 0x0000_AA55;

pub const HEADER_LEN: usize = 16;
/// CRC + suffix
pub const TRAILER_LEN: usize = 8;

pub const CMD_UDP: u32 = 0;
pub const CMD_CONTROL: u32 = 7;
pub const CMD_UDP_NEW: u32 = 0x13;

/// Replies are small; anything bigger is a framing error
const MAX_BODY_LEN: usize = 64 * 1024;

/// A 55AA message: prefix, seq, cmd, length, payload, crc32, suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u32,
    pub cmd: u32,
    pub payload: Vec<u8>,
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let length = (self.payload.len() + TRAILER_LEN) as u32;

        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + TRAILER_LEN);
        out.extend_from_slice(&PREFIX.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.cmd.to_be_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&self.payload);

        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        out.extend_from_slice(&SUFFIX.to_be_bytes());
        out
    }

    /// Decode one frame from the front of `buf`, returning it with the bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Frame, usize)> {
        if buf.len() < HEADER_LEN + TRAILER_LEN {
            bail!("truncated frame: {} bytes", buf.len());
        }
        if read_u32(buf, 0) != PREFIX {
            bail!("bad prefix {:#010x}", read_u32(buf, 0));
        }

        let seq = read_u32(buf, 4);
        let cmd = read_u32(buf, 8);
        let length = read_u32(buf, 12) as usize;
        if length < TRAILER_LEN || length > MAX_BODY_LEN {
            bail!("bad frame length {}", length);
        }

        let total = HEADER_LEN + length;
        if buf.len() < total {
            bail!("truncated frame: need {} bytes, have {}", total, buf.len());
        }

        let body_end = total - TRAILER_LEN;
        let expected = read_u32(buf, body_end);
        let actual = crc32fast::hash(&buf[..body_end]);
        if expected != actual {
            bail!("crc mismatch: frame says {:#010x}, computed {:#010x}", expected, actual);
        }
        if read_u32(buf, body_end + 4) != SUFFIX {
            bail!("bad suffix");
        }

        let frame = Frame {
            seq,
            cmd,
            payload: buf[HEADER_LEN..body_end].to_vec(),
        };
        Ok((frame, total))
    }

    /// Device-originated payloads usually start with a 4-byte return code.
    /// A leading word whose top three bytes are zero is treated as one.
    pub fn split_return_code(&self) -> (Option<u32>, &[u8]) {
        let p = &self.payload;
        if p.len() >= 4 && p[..3] == [0, 0, 0] {
            (Some(read_u32(p, 0)), &p[4..])
        } else {
            (None, p)
        }
    }
}

/// Read exactly one frame from a stream
pub fn read_frame(reader: &mut impl Read) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .context("Failed to read frame header")?;

    if read_u32(&header, 0) != PREFIX {
        bail!("bad prefix {:#010x}", read_u32(&header, 0));
    }
    let length = read_u32(&header, 12) as usize;
    if length < TRAILER_LEN || length > MAX_BODY_LEN {
        bail!("bad frame length {}", length);
    }

    let mut buf = header.to_vec();
    buf.resize(HEADER_LEN + length, 0);
    reader
        .read_exact(&mut buf[HEADER_LEN..])
        .context("Failed to read frame body")?;

    let (frame, _) = Frame::decode(&buf)?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame {
            seq: 3,
            cmd: CMD_CONTROL,
            payload: b"3.3\0\0\0\0\0\0\0\0\0\0\0\0payload".to_vec(),
        }
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample().encode();
        assert_eq!(&bytes[..4], &[0x00, 0x00, 0x55, 0xAA]);
        assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x00, 0xAA, 0x55]);
        // Length covers payload plus trailer
        assert_eq!(read_u32(&bytes, 12) as usize, sample().payload.len() + TRAILER_LEN);
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let mut bytes = sample().encode();
        let frame_len = bytes.len();
        bytes.extend_from_slice(b"trailing garbage");

        let (frame, used) = Frame::decode(&bytes).unwrap();
        assert_eq!(frame, sample());
        assert_eq!(used, frame_len);
    }

    #[test]
    fn test_decode_detects_corruption() {
        let mut bytes = sample().encode();
        bytes[HEADER_LEN] ^= 0xFF;
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("crc"));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = sample().encode();
        assert!(Frame::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(Frame::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_split_return_code() {
        let reply = Frame { seq: 1, cmd: CMD_CONTROL, payload: vec![0, 0, 0, 1, b'{', b'}'] };
        assert_eq!(reply.split_return_code(), (Some(1), &b"{}"[..]));

        let bare = Frame { seq: 1, cmd: CMD_CONTROL, payload: b"{}".to_vec() };
        assert_eq!(bare.split_return_code(), (None, &b"{}"[..]));
    }

    #[test]
    fn test_read_frame_from_stream() {
        let bytes = sample().encode();
        let mut cursor = std::io::Cursor::new(bytes);
        assert_eq!(read_frame(&mut cursor).unwrap(), sample());
    }
}
