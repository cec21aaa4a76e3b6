//! Sideband multiplexing, a framing layer carried within pkt-lines.
//!
//! Each pkt-line payload is a one-byte channel tag followed by channel data:
//! channel 1 carries pack data, channel 2 progress text, channel 3 a fatal
//! error that aborts the transfer. Two frame sizes exist, selected by the
//! negotiated capability: `side-band` (1000 bytes including the tag) and
//! `side-band-64k` (65520 bytes including the tag).

use std::io::{Read, Write};

use bytes::Bytes;

use crate::errors::GitError;
use crate::protocol::capability::{Capability, CapabilityList};
use crate::protocol::pktline::{self, Packet, PktReader};

/// Maximum frame size (tag byte included) for `side-band`.
pub const SIDEBAND_LIMIT: usize = 1000;

/// Maximum frame size (tag byte included) for `side-band-64k`.
pub const SIDEBAND_64K_LIMIT: usize = 65520;

/// Sideband channel tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandChannel {
    /// Channel 1 carries packfile data.
    PackData,
    /// Channel 2 carries progress text.
    Progress,
    /// Channel 3 carries a fatal error message.
    Error,
}

impl SidebandChannel {
    pub fn value(&self) -> u8 {
        match self {
            SidebandChannel::PackData => 1,
            SidebandChannel::Progress => 2,
            SidebandChannel::Error => 3,
        }
    }
}

/// Pick the frame limit for a negotiated capability set, preferring the
/// 64k variant. `None` when no sideband was negotiated.
pub fn negotiated_limit(caps: &CapabilityList) -> Option<usize> {
    if caps.supports(&Capability::SideBand64k) {
        Some(SIDEBAND_64K_LIMIT)
    } else if caps.supports(&Capability::SideBand) {
        Some(SIDEBAND_LIMIT)
    } else {
        None
    }
}

/// Sideband writer. Channel 1 input is split into frames no larger than the
/// configured maximum; channel 2 and 3 writes are each exactly one pkt-line.
pub struct Muxer<W: Write> {
    writer: W,
    max_frame: usize,
}

impl<W: Write> Muxer<W> {
    pub fn new(writer: W, max_frame: usize) -> Muxer<W> {
        Muxer { writer, max_frame }
    }

    /// Send pack data, splitting into as many frames as needed.
    pub fn write_pack_data(&mut self, mut data: &[u8]) -> Result<(), GitError> {
        let chunk = self.max_frame - 1;
        while !data.is_empty() {
            let n = data.len().min(chunk);
            self.write_frame(SidebandChannel::PackData, &data[..n])?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Send one progress message. Must fit a single frame.
    pub fn write_progress(&mut self, text: &str) -> Result<(), GitError> {
        self.write_single(SidebandChannel::Progress, text.as_bytes())
    }

    /// Send one fatal error message. Must fit a single frame.
    pub fn write_error(&mut self, text: &str) -> Result<(), GitError> {
        self.write_single(SidebandChannel::Error, text.as_bytes())
    }

    fn write_single(&mut self, channel: SidebandChannel, data: &[u8]) -> Result<(), GitError> {
        if data.len() + 1 > self.max_frame {
            return Err(GitError::MaxPackedExceeded(data.len() + 1, self.max_frame));
        }
        self.write_frame(channel, data)
    }

    fn write_frame(&mut self, channel: SidebandChannel, data: &[u8]) -> Result<(), GitError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(channel.value());
        frame.extend_from_slice(data);
        pktline::write_data(&mut self.writer, &frame)
    }

    pub fn flush(&mut self) -> Result<(), GitError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Write for Muxer<W> {
    /// Plain `Write` routes to channel 1, so a pack encoder can write through
    /// the muxer unchanged.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_pack_data(buf)
            .map_err(std::io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Sideband reader. Owns the underlying packet reader; the value itself is a
/// plain byte-stream view of channel 1. Channel 2 goes to the optional
/// progress sink, channel 3 aborts the stream with the peer's message.
pub struct Demuxer<R: Read> {
    reader: PktReader<R>,
    max_frame: usize,
    progress: Option<Box<dyn Write + Send>>,
    pending: Bytes,
    done: bool,
    fatal: Option<GitError>,
    sink_error: Option<std::io::Error>,
}

impl<R: Read> Demuxer<R> {
    pub fn new(
        reader: R,
        max_frame: usize,
        progress: Option<Box<dyn Write + Send>>,
    ) -> Demuxer<R> {
        Demuxer {
            reader: PktReader::new(reader),
            max_frame,
            progress,
            pending: Bytes::new(),
            done: false,
            fatal: None,
            sink_error: None,
        }
    }

    /// The error that aborted the stream, if any. Consulted by callers to
    /// replace a generic I/O failure with the peer-reported reason.
    pub fn take_error(&mut self) -> Option<GitError> {
        self.fatal.take()
    }

    /// Progress-sink writes are best-effort; the first failure is retained
    /// here while pack data keeps flowing.
    pub fn sink_error(&self) -> Option<&std::io::Error> {
        self.sink_error.as_ref()
    }

    fn next_frame(&mut self) -> Result<usize, GitError> {
        loop {
            let packet = match self.reader.try_read_packet()? {
                None | Some(Packet::Flush) => {
                    self.done = true;
                    return Ok(0);
                }
                Some(Packet::Delim) | Some(Packet::ResponseEnd) => {
                    return Err(GitError::InvalidResponse(
                        "unexpected control packet inside sideband stream".to_string(),
                    ));
                }
                Some(Packet::Data(payload)) => payload,
            };

            if packet.is_empty() {
                return Err(GitError::InvalidResponse(
                    "empty sideband frame".to_string(),
                ));
            }
            let channel = packet[0];
            let body = packet.slice(1..);
            match channel {
                1 => {
                    if packet.len() > self.max_frame {
                        return Err(GitError::MaxPackedExceeded(packet.len(), self.max_frame));
                    }
                    self.pending = body;
                    return Ok(self.pending.len());
                }
                2 => {
                    if let Some(sink) = self.progress.as_mut() {
                        if let Err(e) = sink.write_all(&body) {
                            if self.sink_error.is_none() {
                                tracing::warn!(error = %e, "progress sink failed, continuing");
                                self.sink_error = Some(e);
                            }
                        }
                    }
                }
                3 => {
                    let reason = String::from_utf8_lossy(&body).trim_end().to_string();
                    return Err(GitError::Remote(reason));
                }
                other => return Err(GitError::InvalidSidebandChannel(other)),
            }
        }
    }
}

impl<R: Read> Read for Demuxer<R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            if self.done {
                return Ok(0);
            }
            match self.next_frame() {
                Ok(0) => return Ok(0),
                Ok(_) => {}
                Err(e) => {
                    let msg = e.to_string();
                    self.fatal = Some(e);
                    return Err(std::io::Error::other(msg));
                }
            }
        }
        let n = out.len().min(self.pending.len());
        out[..n].copy_from_slice(&self.pending[..n]);
        self.pending = self.pending.slice(n..);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A shared Vec the demuxer can use as a progress sink in tests.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Pack bytes split across frames reassemble; progress routes to the sink.
    #[test]
    fn mux_demux_round_trip() {
        let mut wire = Vec::new();
        {
            let mut mux = Muxer::new(&mut wire, SIDEBAND_LIMIT);
            mux.write_progress("counting objects\n").unwrap();
            mux.write_pack_data(&vec![0xAB; 2500]).unwrap();
        }
        pktline::write_flush(&mut wire).unwrap();

        let sink = SharedSink::default();
        let mut demux = Demuxer::new(
            wire.as_slice(),
            SIDEBAND_LIMIT,
            Some(Box::new(sink.clone())),
        );
        let mut data = Vec::new();
        demux.read_to_end(&mut data).unwrap();
        assert_eq!(data, vec![0xAB; 2500]);
        assert_eq!(
            String::from_utf8_lossy(&sink.0.lock().unwrap()),
            "counting objects\n"
        );
    }

    /// A channel-3 frame mid-stream aborts with the peer's message.
    #[test]
    fn channel_three_aborts() {
        let mut wire = Vec::new();
        {
            let mut mux = Muxer::new(&mut wire, SIDEBAND_LIMIT);
            mux.write_pack_data(b"PACK").unwrap();
            mux.write_error("access denied\n").unwrap();
        }

        let mut demux = Demuxer::new(wire.as_slice(), SIDEBAND_LIMIT, None);
        let mut data = Vec::new();
        let err = demux.read_to_end(&mut data).unwrap_err();
        assert!(err.to_string().contains("access denied"));
        assert!(matches!(demux.take_error(), Some(GitError::Remote(msg)) if msg == "access denied"));
        // Bytes before the fatal frame were delivered.
        assert_eq!(data, b"PACK");
    }

    /// Frames above the negotiated maximum are rejected.
    #[test]
    fn oversize_frame_rejected() {
        let mut wire = Vec::new();
        {
            // Mux with the 64k limit, demux with the small one.
            let mut mux = Muxer::new(&mut wire, SIDEBAND_64K_LIMIT);
            mux.write_pack_data(&vec![1u8; 4000]).unwrap();
        }
        let mut demux = Demuxer::new(wire.as_slice(), SIDEBAND_LIMIT, None);
        let mut data = Vec::new();
        assert!(demux.read_to_end(&mut data).is_err());
        assert!(matches!(
            demux.take_error(),
            Some(GitError::MaxPackedExceeded(_, _))
        ));
    }

    /// Unknown channels are a fatal decoding error.
    #[test]
    fn unknown_channel_rejected() {
        let mut wire = Vec::new();
        pktline::write_data(&mut wire, &[9, b'x']).unwrap();
        let mut demux = Demuxer::new(wire.as_slice(), SIDEBAND_LIMIT, None);
        let mut data = Vec::new();
        assert!(demux.read_to_end(&mut data).is_err());
        assert!(matches!(
            demux.take_error(),
            Some(GitError::InvalidSidebandChannel(9))
        ));
    }

    /// Capability selection prefers the 64k frames.
    #[test]
    fn limit_selection() {
        let both = CapabilityList::decode("side-band side-band-64k").unwrap();
        assert_eq!(negotiated_limit(&both), Some(SIDEBAND_64K_LIMIT));
        let small = CapabilityList::decode("side-band").unwrap();
        assert_eq!(negotiated_limit(&small), Some(SIDEBAND_LIMIT));
        let none = CapabilityList::decode("ofs-delta").unwrap();
        assert_eq!(negotiated_limit(&none), None);
    }
}
