//! Pkt-line framing codec.
//!
//! A pkt-line is either a 4-hex-digit length prefix `LLLL` followed by
//! `LLLL - 4` payload bytes, or one of three control packets whose length
//! prefix is a reserved sentinel: `0000` flush, `0001` delim, `0002`
//! response-end. `0003` is invalid. All length fields are ASCII hex; payload
//! content is not validated here.

use std::io::{ErrorKind, Read, Write};

use bytes::Bytes;

use crate::errors::GitError;

/// Largest payload a single pkt-line can carry (header max 65524).
pub const MAX_PKT_PAYLOAD: usize = 65520;

const FLUSH_PKT: &[u8; 4] = b"0000";
const DELIM_PKT: &[u8; 4] = b"0001";
const RESPONSE_END_PKT: &[u8; 4] = b"0002";

/// One decoded pkt-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// `0000`, the section/stream terminator.
    Flush,
    /// `0001`, the protocol-v2 section separator.
    Delim,
    /// `0002`, the protocol-v2 response terminator.
    ResponseEnd,
    /// A data packet with its raw payload.
    Data(Bytes),
}

impl Packet {
    /// Payload bytes of a data packet.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Packet::Data(payload) => Some(payload),
            _ => None,
        }
    }

    /// Payload of a data packet as text with one trailing LF stripped. The
    /// protocol treats the terminator permissively, so decoding goes through
    /// this helper rather than comparing raw bytes.
    pub fn text(&self) -> Option<String> {
        self.data().map(|payload| {
            let payload = match payload.last() {
                Some(b'\n') => &payload[..payload.len() - 1],
                _ => payload,
            };
            String::from_utf8_lossy(payload).into_owned()
        })
    }

    /// True for the `0000` flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Packet::Flush)
    }
}

/// Emit one data pkt-line. Fails when the payload exceeds [`MAX_PKT_PAYLOAD`].
pub fn write_data(w: &mut dyn Write, payload: &[u8]) -> Result<(), GitError> {
    if payload.len() > MAX_PKT_PAYLOAD {
        return Err(GitError::PayloadTooLong(payload.len()));
    }
    let header = format!("{:04x}", payload.len() + 4);
    w.write_all(header.as_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Emit one data pkt-line from text. The caller includes any trailing LF.
pub fn write_text(w: &mut dyn Write, text: &str) -> Result<(), GitError> {
    write_data(w, text.as_bytes())
}

/// Emit the `0000` flush packet.
pub fn write_flush(w: &mut dyn Write) -> Result<(), GitError> {
    w.write_all(FLUSH_PKT)?;
    Ok(())
}

/// Emit the `0001` delim packet.
pub fn write_delim(w: &mut dyn Write) -> Result<(), GitError> {
    w.write_all(DELIM_PKT)?;
    Ok(())
}

/// Emit the `0002` response-end packet.
pub fn write_response_end(w: &mut dyn Write) -> Result<(), GitError> {
    w.write_all(RESPONSE_END_PKT)?;
    Ok(())
}

/// Pkt-line reader with single-packet lookahead.
///
/// The lookahead is held inside the reader itself, so peeking works over any
/// byte stream without requiring 64 KiB of external buffering.
pub struct PktReader<R: Read> {
    inner: R,
    peeked: Option<Packet>,
}

impl<R: Read> PktReader<R> {
    pub fn new(inner: R) -> PktReader<R> {
        PktReader {
            inner,
            peeked: None,
        }
    }

    /// Read exactly one pkt-line. Clean EOF at a packet boundary is an
    /// `UnexpectedEof` I/O error; use [`PktReader::try_read_packet`] where the
    /// stream is allowed to end.
    pub fn read_packet(&mut self) -> Result<Packet, GitError> {
        if let Some(packet) = self.peeked.take() {
            return Ok(packet);
        }
        match self.read_raw()? {
            Some(packet) => Ok(packet),
            None => Err(GitError::IOError(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "expected pkt-line, found end of stream",
            ))),
        }
    }

    /// Read one pkt-line, or `None` on a clean end of stream.
    pub fn try_read_packet(&mut self) -> Result<Option<Packet>, GitError> {
        if let Some(packet) = self.peeked.take() {
            return Ok(Some(packet));
        }
        self.read_raw()
    }

    /// Look at the next pkt-line without consuming it.
    pub fn peek_packet(&mut self) -> Result<&Packet, GitError> {
        if self.peeked.is_none() {
            let packet = self.read_packet()?;
            self.peeked = Some(packet);
        }
        Ok(self.peeked.as_ref().expect("lookahead populated above"))
    }

    /// Hand back the underlying stream, e.g. to switch from pkt-line framing
    /// to a raw pack stream. Any unconsumed lookahead is discarded, so only
    /// call this at a framing boundary.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Borrow the underlying stream at a framing boundary.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    fn read_raw(&mut self) -> Result<Option<Packet>, GitError> {
        let mut header = [0u8; 4];
        match read_exact_or_eof(&mut self.inner, &mut header)? {
            false => return Ok(None),
            true => {}
        }

        let header_str = std::str::from_utf8(&header)
            .map_err(|_| GitError::InvalidPktLen(format!("{header:02x?}")))?;
        let length = usize::from_str_radix(header_str, 16)
            .map_err(|_| GitError::InvalidPktLen(header_str.to_string()))?;

        match length {
            0 => Ok(Some(Packet::Flush)),
            1 => Ok(Some(Packet::Delim)),
            2 => Ok(Some(Packet::ResponseEnd)),
            3 => Err(GitError::InvalidPktLen(header_str.to_string())),
            4..=65524 => {
                let mut payload = vec![0u8; length - 4];
                self.inner.read_exact(&mut payload)?;
                Ok(Some(Packet::Data(payload.into())))
            }
            _ => Err(GitError::InvalidPktLen(header_str.to_string())),
        }
    }
}

/// Fill `buf` completely, reporting `false` on EOF before the first byte.
fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<bool, GitError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(GitError::IOError(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "pkt-line header truncated",
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Payloads survive a write/read cycle byte-for-byte.
    #[test]
    fn round_trip_data() {
        let mut buf = Vec::new();
        write_data(&mut buf, b"hello\n").unwrap();
        assert_eq!(buf, b"000ahello\n");

        let mut reader = PktReader::new(buf.as_slice());
        let packet = reader.read_packet().unwrap();
        assert_eq!(packet.data(), Some(b"hello\n".as_ref()));
        assert_eq!(packet.text().as_deref(), Some("hello"));
    }

    /// Control packets decode with no payload.
    #[test]
    fn control_packets() {
        let mut buf = Vec::new();
        write_flush(&mut buf).unwrap();
        write_delim(&mut buf).unwrap();
        write_response_end(&mut buf).unwrap();

        let mut reader = PktReader::new(buf.as_slice());
        assert_eq!(reader.read_packet().unwrap(), Packet::Flush);
        assert_eq!(reader.read_packet().unwrap(), Packet::Delim);
        assert_eq!(reader.read_packet().unwrap(), Packet::ResponseEnd);
        assert!(reader.try_read_packet().unwrap().is_none());
    }

    /// Header `0003` is reserved and must be rejected.
    #[test]
    fn length_three_is_invalid() {
        let mut reader = PktReader::new(b"0003".as_slice());
        assert!(matches!(
            reader.read_packet(),
            Err(GitError::InvalidPktLen(_))
        ));
    }

    /// Non-hex headers are rejected.
    #[test]
    fn garbage_header_is_invalid() {
        let mut reader = PktReader::new(b"zzzzpayload".as_slice());
        assert!(matches!(
            reader.read_packet(),
            Err(GitError::InvalidPktLen(_))
        ));
    }

    /// Oversize payloads fail at write time.
    #[test]
    fn oversize_payload_rejected() {
        let payload = vec![0u8; MAX_PKT_PAYLOAD + 1];
        let mut buf = Vec::new();
        assert!(matches!(
            write_data(&mut buf, &payload),
            Err(GitError::PayloadTooLong(_))
        ));
        // The maximum itself is legal.
        write_data(&mut buf, &vec![0u8; MAX_PKT_PAYLOAD]).unwrap();
    }

    /// Peeking does not consume, and repeated peeks agree.
    #[test]
    fn peek_is_stable() {
        let mut buf = Vec::new();
        write_text(&mut buf, "want abc\n").unwrap();
        write_flush(&mut buf).unwrap();

        let mut reader = PktReader::new(buf.as_slice());
        assert_eq!(reader.peek_packet().unwrap().text().as_deref(), Some("want abc"));
        assert_eq!(reader.peek_packet().unwrap().text().as_deref(), Some("want abc"));
        assert_eq!(reader.read_packet().unwrap().text().as_deref(), Some("want abc"));
        assert!(reader.read_packet().unwrap().is_flush());
    }

    /// A truncated payload is an I/O error, not silent success.
    #[test]
    fn truncated_payload_errors() {
        let mut reader = PktReader::new(b"0009hi".as_slice());
        assert!(reader.read_packet().is_err());
    }

    quickcheck::quickcheck! {
        /// Codec round-trip law: any payload within bounds survives.
        fn qc_round_trip(payload: Vec<u8>) -> bool {
            let payload = &payload[..payload.len().min(MAX_PKT_PAYLOAD)];
            let mut buf = Vec::new();
            write_data(&mut buf, payload).unwrap();
            let mut reader = PktReader::new(buf.as_slice());
            reader.read_packet().unwrap().data() == Some(payload)
        }
    }
}
