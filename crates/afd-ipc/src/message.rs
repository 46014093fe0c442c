//! Message framing.
//!
//! Frames are decoded from a byte stream: `decode` returns `Ok(None)` until
//! a complete frame is buffered, then the frame and the bytes it consumed.

use crate::opcodes::{DELETE_ALL_JOBS_FROM_HOST, DELETE_RETRIEVES_FROM_DIR};
use crate::{IpcError, Result, PIPE_BUF};

/// A message that can travel through a fifo
pub trait Frame: Sized {
    /// Serialize into one atomic write
    fn encode(&self) -> Vec<u8>;

    /// Try to take one frame off the front of `buf`
    fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>>;
}

/// Read a NUL-terminated string starting at `buf[start]`
fn take_cstr(buf: &[u8], start: usize) -> Result<Option<(String, usize)>> {
    match buf[start..].iter().position(|&b| b == 0) {
        Some(end) => {
            let s = std::str::from_utf8(&buf[start..start + end])
                .map_err(|e| IpcError::Frame(format!("invalid UTF-8 in payload: {}", e)))?;
            Ok(Some((s.to_string(), start + end + 1)))
        }
        None if buf.len() - start > PIPE_BUF => {
            Err(IpcError::Frame("unterminated string payload".into()))
        }
        None => Ok(None),
    }
}

/// Messages on `FD_DELETE_FIFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FdDeleteMessage {
    /// Drop every queued job for a host
    AllJobsFromHost(String),
    /// Drop every pending retrieve for a directory
    RetrievesFromDir(String),
}

impl Frame for FdDeleteMessage {
    fn encode(&self) -> Vec<u8> {
        let (opcode, alias) = match self {
            FdDeleteMessage::AllJobsFromHost(a) => (DELETE_ALL_JOBS_FROM_HOST, a),
            FdDeleteMessage::RetrievesFromDir(a) => (DELETE_RETRIEVES_FROM_DIR, a),
        };
        let mut out = Vec::with_capacity(alias.len() + 2);
        out.push(opcode);
        out.extend_from_slice(alias.as_bytes());
        out.push(0);
        out
    }

    fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&opcode) = buf.first() else {
            return Ok(None);
        };
        if opcode != DELETE_ALL_JOBS_FROM_HOST && opcode != DELETE_RETRIEVES_FROM_DIR {
            return Err(IpcError::UnknownOpcode {
                fifo: crate::FD_DELETE_FIFO,
                opcode,
            });
        }
        Ok(take_cstr(buf, 1)?.map(|(alias, used)| {
            let msg = if opcode == DELETE_ALL_JOBS_FROM_HOST {
                FdDeleteMessage::AllJobsFromHost(alias)
            } else {
                FdDeleteMessage::RetrievesFromDir(alias)
            };
            (msg, used)
        }))
    }
}

/// A bare `host_alias\0` (used on `DEL_TIME_JOB_FIFO`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAliasMessage(pub String);

impl Frame for HostAliasMessage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() + 1);
        out.extend_from_slice(self.0.as_bytes());
        out.push(0);
        out
    }

    fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(take_cstr(buf, 0)?.map(|(alias, used)| (HostAliasMessage(alias), used)))
    }
}

/// A 4-byte FSA/MSA position (used on `RETRY_FD_FIFO` and `RETRY_MON_FIFO.<N>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionMessage(pub i32);

impl Frame for PositionMessage {
    fn encode(&self) -> Vec<u8> {
        self.0.to_ne_bytes().to_vec()
    }

    fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let pos = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Ok(Some((PositionMessage(pos), 4)))
    }
}

/// Size of one encoded [`FdMessage`]
pub const FD_MESSAGE_SIZE: usize = 40;

/// "Batch ready" notification written by the AMG to `MSG_FIFO`.
///
/// Layout (native endian, 40 bytes):
/// ```text
/// offset  field              size
///  0      creation_time       8
///  8      file_size           8
/// 16      job_id              4
/// 20      split_job_counter   4
/// 24      files_to_send       4
/// 28      dir_no              4
/// 32      unique_number       4
/// 36      priority            1
/// 37      originator          1
/// 38      _pad                2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdMessage {
    pub creation_time: i64,
    pub file_size: i64,
    pub job_id: u32,
    pub split_job_counter: u32,
    pub files_to_send: u32,
    pub dir_no: u32,
    pub unique_number: u32,
    pub priority: u8,
    pub originator: u8,
}

impl Frame for FdMessage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FD_MESSAGE_SIZE);
        out.extend_from_slice(&self.creation_time.to_ne_bytes());
        out.extend_from_slice(&self.file_size.to_ne_bytes());
        out.extend_from_slice(&self.job_id.to_ne_bytes());
        out.extend_from_slice(&self.split_job_counter.to_ne_bytes());
        out.extend_from_slice(&self.files_to_send.to_ne_bytes());
        out.extend_from_slice(&self.dir_no.to_ne_bytes());
        out.extend_from_slice(&self.unique_number.to_ne_bytes());
        out.push(self.priority);
        out.push(self.originator);
        out.extend_from_slice(&[0, 0]);
        out
    }

    fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < FD_MESSAGE_SIZE {
            return Ok(None);
        }
        let i64_at = |o: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[o..o + 8]);
            i64::from_ne_bytes(b)
        };
        let u32_at = |o: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&buf[o..o + 4]);
            u32::from_ne_bytes(b)
        };
        let msg = FdMessage {
            creation_time: i64_at(0),
            file_size: i64_at(8),
            job_id: u32_at(16),
            split_job_counter: u32_at(20),
            files_to_send: u32_at(24),
            dir_no: u32_at(28),
            unique_number: u32_at(32),
            priority: buf[36],
            originator: buf[37],
        };
        Ok(Some((msg, FD_MESSAGE_SIZE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_all_jobs_byte_count() {
        let msg = FdDeleteMessage::AllJobsFromHost("site1".into());
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 2 + "site1".len());
        assert_eq!(bytes[0], DELETE_ALL_JOBS_FROM_HOST);
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let bytes = FdDeleteMessage::RetrievesFromDir("dir_a".into()).encode();
        assert!(FdDeleteMessage::decode(&bytes[..3]).unwrap().is_none());
        let (msg, used) = FdDeleteMessage::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(msg, FdDeleteMessage::RetrievesFromDir("dir_a".into()));
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut bytes = FdDeleteMessage::AllJobsFromHost("h1".into()).encode();
        bytes.extend(FdDeleteMessage::RetrievesFromDir("d2".into()).encode());
        let (first, used) = FdDeleteMessage::decode(&bytes).unwrap().unwrap();
        let (second, _) = FdDeleteMessage::decode(&bytes[used..]).unwrap().unwrap();
        assert_eq!(first, FdDeleteMessage::AllJobsFromHost("h1".into()));
        assert_eq!(second, FdDeleteMessage::RetrievesFromDir("d2".into()));
    }

    #[test]
    fn test_bad_delete_opcode() {
        assert!(FdDeleteMessage::decode(&[0x7f, b'a', 0]).is_err());
    }

    #[test]
    fn test_position_message() {
        let bytes = PositionMessage(17).encode();
        assert_eq!(bytes.len(), 4);
        assert_eq!(PositionMessage::decode(&bytes).unwrap(), Some((PositionMessage(17), 4)));
    }

    #[test]
    fn test_fd_message_layout() {
        let msg = FdMessage {
            creation_time: 1_700_000_000,
            file_size: 900,
            job_id: 0xdeadbeef,
            split_job_counter: 3,
            files_to_send: 2,
            dir_no: 1,
            unique_number: 42,
            priority: b'5',
            originator: 0,
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), FD_MESSAGE_SIZE);
        assert_eq!(FdMessage::decode(&bytes).unwrap(), Some((msg, FD_MESSAGE_SIZE)));
    }
}
