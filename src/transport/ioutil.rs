//! Cancellation-aware I/O plumbing.
//!
//! Sockets, pipes and child-process handles do not honor cancellation on
//! their own, so reads and writes are forwarded onto a worker thread and the
//! caller races the worker's answer against the [`CancelFlag`].
//!
//! Leak contract: cancelling does NOT terminate the underlying channel or
//! its worker. The worker stays parked in its blocking call (holding the
//! reader or writer) until that call returns, and any bytes it produces
//! afterwards are dropped. Callers must still close the owning connection to
//! release OS resources.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread;
use std::time::Duration;

use crate::errors::GitError;

/// How often a blocked caller re-checks the flag while its worker is silent.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// A thread-safe cancellation flag shared between the caller and every
/// operation of one connection. Once set it cannot be cleared.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    /// Signal cancellation. Idempotent and thread-safe.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Error out when cancellation has been requested. Called at every
    /// blocking-loop boundary in the pipelines.
    pub fn check(&self) -> Result<(), GitError> {
        if self.is_cancelled() {
            Err(GitError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn cancelled_io() -> std::io::Error {
    std::io::Error::other(GitError::Cancelled)
}

/// Reader whose blocking reads race the cancel flag.
///
/// The worker reads into its own scratch buffer and ships the bytes over a
/// channel; they are copied into the caller's buffer only on delivery. This
/// keeps the caller's buffer out of reach of a worker that is still stalled
/// in a read after cancellation.
pub struct CancelReader {
    flag: CancelFlag,
    requests: Sender<usize>,
    responses: Receiver<std::io::Result<Vec<u8>>>,
}

impl CancelReader {
    pub fn new(mut inner: Box<dyn Read + Send>, flag: CancelFlag) -> CancelReader {
        let (req_tx, req_rx) = channel::<usize>();
        let (resp_tx, resp_rx) = channel::<std::io::Result<Vec<u8>>>();
        thread::Builder::new()
            .name("git-wire-read".to_string())
            .spawn(move || {
                while let Ok(want) = req_rx.recv() {
                    let mut scratch = vec![0u8; want];
                    let result = inner.read(&mut scratch).map(|n| {
                        scratch.truncate(n);
                        scratch
                    });
                    if resp_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .expect("spawning reader worker");
        CancelReader {
            flag,
            requests: req_tx,
            responses: resp_rx,
        }
    }
}

impl Read for CancelReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.flag.is_cancelled() {
            return Err(cancelled_io());
        }
        if out.is_empty() {
            return Ok(0);
        }
        if self.requests.send(out.len()).is_err() {
            return Ok(0); // worker gone: the channel reached its end
        }
        loop {
            match self.responses.recv_timeout(CANCEL_POLL) {
                Ok(Ok(bytes)) => {
                    out[..bytes.len()].copy_from_slice(&bytes);
                    return Ok(bytes.len());
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    if self.flag.is_cancelled() {
                        // The worker (and the bytes it may still produce)
                        // are abandoned here; see the module-level contract.
                        return Err(cancelled_io());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
    }
}

enum WriteOp {
    Data(Vec<u8>),
    Flush,
    /// Drop the writer, closing the write half of the channel.
    Finish,
}

/// Writer whose blocking writes race the cancel flag, with an explicit
/// [`CancelWriter::finish`] that releases the underlying writer (closing a
/// child's stdin, completing a buffered exchange).
pub struct CancelWriter {
    flag: CancelFlag,
    requests: Sender<WriteOp>,
    responses: Receiver<std::io::Result<()>>,
    finished: bool,
}

impl CancelWriter {
    pub fn new(inner: Box<dyn Write + Send>, flag: CancelFlag) -> CancelWriter {
        let (req_tx, req_rx) = channel::<WriteOp>();
        let (resp_tx, resp_rx) = channel::<std::io::Result<()>>();
        thread::Builder::new()
            .name("git-wire-write".to_string())
            .spawn(move || {
                let mut inner = Some(inner);
                while let Ok(op) = req_rx.recv() {
                    let result = match (&mut inner, op) {
                        (Some(w), WriteOp::Data(bytes)) => w.write_all(&bytes),
                        (Some(w), WriteOp::Flush) => w.flush(),
                        (Some(_), WriteOp::Finish) => {
                            let done = inner.take().map(|mut w| w.flush());
                            done.unwrap_or(Ok(()))
                        }
                        (None, _) => Err(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "write half already finished",
                        )),
                    };
                    if resp_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .expect("spawning writer worker");
        CancelWriter {
            flag,
            requests: req_tx,
            responses: resp_rx,
            finished: false,
        }
    }

    fn roundtrip(&mut self, op: WriteOp) -> std::io::Result<()> {
        if self.flag.is_cancelled() {
            return Err(cancelled_io());
        }
        if self.requests.send(op).is_err() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "writer worker gone",
            ));
        }
        loop {
            match self.responses.recv_timeout(CANCEL_POLL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if self.flag.is_cancelled() {
                        return Err(cancelled_io());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "writer worker gone",
                    ));
                }
            }
        }
    }

    /// Flush and drop the underlying writer. For a child process this closes
    /// its stdin; the peer observes EOF on its read side.
    pub fn finish(&mut self) -> Result<(), GitError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.roundtrip(WriteOp::Finish)?;
        Ok(())
    }
}

impl Write for CancelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.roundtrip(WriteOp::Data(buf.to_vec()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.roundtrip(WriteOp::Flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reads pass through untouched while the flag is clear.
    #[test]
    fn reader_passthrough() {
        let flag = CancelFlag::new();
        let mut reader = CancelReader::new(Box::new(&b"hello"[..]), flag);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    /// A cancelled flag fails the next read promptly.
    #[test]
    fn reader_cancel_fails_fast() {
        let flag = CancelFlag::new();
        let mut reader = CancelReader::new(Box::new(&b"data"[..]), flag.clone());
        flag.cancel();
        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
    }

    /// A read blocked on a silent channel returns once cancelled.
    #[test]
    fn reader_cancel_unblocks() {
        // A reader that blocks forever.
        struct Stalled;
        impl Read for Stalled {
            fn read(&mut self, _out: &mut [u8]) -> std::io::Result<usize> {
                thread::sleep(Duration::from_secs(3600));
                Ok(0)
            }
        }
        let flag = CancelFlag::new();
        let mut reader = CancelReader::new(Box::new(Stalled), flag.clone());
        let canceller = flag.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });
        let mut buf = [0u8; 1];
        let start = std::time::Instant::now();
        assert!(reader.read(&mut buf).is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    /// Writes pass through; finish closes the write half exactly once.
    #[test]
    fn writer_passthrough_and_finish() {
        let flag = CancelFlag::new();
        let (tx, rx) = channel::<u8>();
        struct ChanWriter(Sender<u8>);
        impl Write for ChanWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                for b in buf {
                    let _ = self.0.send(*b);
                }
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = CancelWriter::new(Box::new(ChanWriter(tx)), flag);
        writer.write_all(b"ab").unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![b'a', b'b']);
        // Writing after finish is a broken pipe.
        assert!(writer.write_all(b"c").is_err());
    }

    /// The flag itself: set-once, checked everywhere.
    #[test]
    fn flag_check() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());
        flag.cancel();
        flag.cancel();
        assert!(matches!(flag.check(), Err(GitError::Cancelled)));
    }
}
