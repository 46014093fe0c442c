//! Single-byte opcodes.

use crate::IpcError;

/// Commands for init_afd on `AFD_CMD_FIFO`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AfdCommand {
    Shutdown = 1,
    StartAmg = 4,
    StopAmg = 5,
    StartFd = 6,
    StopFd = 7,
}

impl AfdCommand {
    pub fn from_byte(b: u8) -> Result<Self, IpcError> {
        Ok(match b {
            1 => AfdCommand::Shutdown,
            4 => AfdCommand::StartAmg,
            5 => AfdCommand::StopAmg,
            6 => AfdCommand::StartFd,
            7 => AfdCommand::StopFd,
            _ => {
                return Err(IpcError::UnknownOpcode {
                    fifo: crate::AFD_CMD_FIFO,
                    opcode: b,
                })
            }
        })
    }
}

/// Commands for FD on `FD_CMD_FIFO`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FdCommand {
    ForceRemoteDirCheck = 17,
    CheckFsaEntries = 18,
}

impl FdCommand {
    pub fn from_byte(b: u8) -> Result<Self, IpcError> {
        Ok(match b {
            17 => FdCommand::ForceRemoteDirCheck,
            18 => FdCommand::CheckFsaEntries,
            _ => {
                return Err(IpcError::UnknownOpcode {
                    fifo: crate::FD_CMD_FIFO,
                    opcode: b,
                })
            }
        })
    }
}

/// Commands for dir_check on `DC_CMD_FIFO`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DcCommand {
    CheckFileDir = 30,
    RereadLocInterfaceFile = 31,
    SrExecStat = 32,
    SearchOldFiles = 33,
}

impl DcCommand {
    pub fn from_byte(b: u8) -> Result<Self, IpcError> {
        Ok(match b {
            30 => DcCommand::CheckFileDir,
            31 => DcCommand::RereadLocInterfaceFile,
            32 => DcCommand::SrExecStat,
            33 => DcCommand::SearchOldFiles,
            _ => {
                return Err(IpcError::UnknownOpcode {
                    fifo: crate::DC_CMD_FIFO,
                    opcode: b,
                })
            }
        })
    }
}

/// Commands for archive_watch on `AW_CMD_FIFO`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AwCommand {
    Retry = 40,
}

impl AwCommand {
    pub fn from_byte(b: u8) -> Result<Self, IpcError> {
        match b {
            40 => Ok(AwCommand::Retry),
            _ => Err(IpcError::UnknownOpcode {
                fifo: crate::AW_CMD_FIFO,
                opcode: b,
            }),
        }
    }
}

/// Opcode prefixes on `FD_DELETE_FIFO`
pub const DELETE_ALL_JOBS_FROM_HOST: u8 = 1;
pub const DELETE_RETRIEVES_FROM_DIR: u8 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_afd_command_roundtrip() {
        for cmd in [
            AfdCommand::Shutdown,
            AfdCommand::StartAmg,
            AfdCommand::StopAmg,
            AfdCommand::StartFd,
            AfdCommand::StopFd,
        ] {
            assert_eq!(AfdCommand::from_byte(cmd as u8).unwrap(), cmd);
        }
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(matches!(
            DcCommand::from_byte(0xff),
            Err(IpcError::UnknownOpcode { opcode: 0xff, .. })
        ));
        assert!(FdCommand::from_byte(0).is_err());
        assert!(AwCommand::from_byte(1).is_err());
    }
}
