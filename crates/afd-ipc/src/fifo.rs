//! Fifo I/O primitives.
//!
//! Senders open both ends (`O_RDWR`) so `open(2)` never blocks and a write
//! never fails with `ENXIO` while the consumer restarts. Readers open
//! non-blocking and collect bytes into a [`RingBuffer`] from which whole
//! frames are taken.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use afd_config::log_ipc_debug;

use crate::message::Frame;
use crate::{IpcError, Result, PIPE_BUF};

/// Create a fifo; an existing one is left alone
pub fn make_fifo(path: &Path) -> Result<()> {
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o600)) {
        Ok(()) => Ok(()),
        Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Open a fifo with both ends so neither `open` nor `write` depends on a peer
pub fn open_fifo_rw(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}

/// Write one frame to a fifo in a single atomic write
pub fn send<F: Frame>(path: &Path, frame: &F) -> Result<()> {
    send_bytes(path, &frame.encode())
}

/// Write raw bytes (a single opcode or pre-encoded frame) atomically
pub fn send_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if bytes.len() > PIPE_BUF {
        return Err(IpcError::Frame(format!(
            "message of {} bytes exceeds PIPE_BUF ({})",
            bytes.len(),
            PIPE_BUF
        )));
    }
    let mut fifo = open_fifo_rw(path)?;
    let written = fifo.write(bytes)?;
    if written != bytes.len() {
        return Err(IpcError::Frame(format!(
            "short write to {}: {} of {} bytes",
            path.display(),
            written,
            bytes.len()
        )));
    }
    log_ipc_debug!("sent fifo message", fifo = path.display().to_string(), len = bytes.len());
    Ok(())
}

/// Bounded byte ring that accumulates partial frames between reads
#[derive(Debug)]
pub struct RingBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Room left before the ring is full
    pub fn free(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    /// Append bytes; returns how many fit
    pub fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        self.bytes.extend(&data[..n]);
        n
    }

    /// Take the next frame if one is fully buffered
    pub fn take_frame<F: Frame>(&mut self) -> Result<Option<F>> {
        if self.bytes.is_empty() {
            return Ok(None);
        }
        let decoded = F::decode(self.bytes.make_contiguous());
        match decoded {
            Ok(Some((frame, used))) => {
                self.bytes.drain(..used);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                // Resynchronise: drop the offending byte so the next read
                // starts on what is hopefully a frame boundary.
                self.bytes.pop_front();
                Err(e)
            }
        }
    }

    /// Take one raw opcode byte
    pub fn take_byte(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }
}

/// Non-blocking reader over one fifo
pub struct FifoReader {
    path: PathBuf,
    file: File,
    ring: RingBuffer,
}

impl FifoReader {
    /// Open (creating if needed) a fifo for non-blocking reads
    pub fn open(path: &Path) -> Result<Self> {
        make_fifo(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            ring: RingBuffer::with_capacity(4 * PIPE_BUF),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_fd(&self) -> i32 {
        self.file.as_raw_fd()
    }

    /// Drain whatever the kernel holds into the ring; returns bytes read
    pub fn fill(&mut self) -> Result<usize> {
        let mut total = 0;
        let mut chunk = [0u8; PIPE_BUF];
        loop {
            let want = chunk.len().min(self.ring.free());
            if want == 0 {
                break;
            }
            match self.file.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    self.ring.push(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// Take the next complete frame from buffered bytes
    pub fn next_frame<F: Frame>(&mut self) -> Result<Option<F>> {
        self.ring.take_frame()
    }

    /// Take the next single-byte opcode
    pub fn next_byte(&mut self) -> Option<u8> {
        self.ring.take_byte()
    }

    /// Wait up to `timeout` for data; true when the fifo is readable
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        let ready = poll_readable(&[self.raw_fd()], timeout)?;
        Ok(!ready.is_empty())
    }
}

/// Wait on several fds; returns the indices that became readable
pub fn poll_readable(fds: &[i32], timeout: Duration) -> Result<Vec<usize>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = Errno::last();
        if err == Errno::EINTR {
            return Ok(Vec::new());
        }
        return Err(err.into());
    }
    Ok(pollfds
        .iter()
        .enumerate()
        .filter(|(_, p)| p.revents & libc::POLLIN != 0)
        .map(|(i, _)| i)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FdDeleteMessage, PositionMessage};

    #[test]
    fn test_ring_buffer_bounded() {
        let mut ring = RingBuffer::with_capacity(4);
        assert_eq!(ring.push(b"abcdef"), 4);
        assert_eq!(ring.free(), 0);
        assert_eq!(ring.take_byte(), Some(b'a'));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_ring_buffer_frames_across_pushes() {
        let mut ring = RingBuffer::with_capacity(64);
        let bytes = PositionMessage(9).encode();
        ring.push(&bytes[..2]);
        assert!(ring.take_frame::<PositionMessage>().unwrap().is_none());
        ring.push(&bytes[2..]);
        assert_eq!(
            ring.take_frame::<PositionMessage>().unwrap(),
            Some(PositionMessage(9))
        );
        assert!(ring.is_empty());
    }

    #[test]
    fn test_fifo_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("fd_delete.fifo");
        let mut reader = FifoReader::open(&path).unwrap();

        let msg = FdDeleteMessage::AllJobsFromHost("site".into());
        send(&path, &msg).unwrap();

        assert!(reader.wait(Duration::from_millis(500)).unwrap());
        assert_eq!(reader.fill().unwrap(), 2 + "site".len());
        assert_eq!(reader.next_frame::<FdDeleteMessage>().unwrap(), Some(msg));
        assert!(reader.next_frame::<FdDeleteMessage>().unwrap().is_none());
    }

    #[test]
    fn test_wait_times_out_when_empty() {
        let temp = tempfile::tempdir().unwrap();
        let reader = FifoReader::open(&temp.path().join("idle.fifo")).unwrap();
        assert!(!reader.wait(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("big.fifo");
        make_fifo(&path).unwrap();
        let big = vec![b'x'; PIPE_BUF + 1];
        assert!(matches!(send_bytes(&path, &big), Err(IpcError::Frame(_))));
    }
}
