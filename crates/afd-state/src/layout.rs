//! On-disk layout shared by every status database.
//!
//! Any field change here MUST keep `#[repr(C)]` ABI stability: the files
//! are mapped by several processes at once.

use std::borrow::Cow;

// ---------------------------------------------------------------------------
// Sizes
// ---------------------------------------------------------------------------

pub const MAX_HOSTNAME_LENGTH: usize = 8;
pub const MAX_REAL_HOSTNAME_LENGTH: usize = 64;
pub const MAX_DIR_ALIAS_LENGTH: usize = 10;
pub const MAX_TOGGLE_STR_LENGTH: usize = 5;
pub const MAX_FILENAME_LENGTH: usize = 256;
pub const MAX_RECIPIENT_LENGTH: usize = 256;
pub const MAX_OPTION_LENGTH: usize = 256;
pub const MAX_PATH_LENGTH: usize = 1024;
pub const MAX_USER_NAME_LENGTH: usize = 80;
pub const MAX_MSG_NAME_LENGTH: usize = 32;
pub const MAX_NO_PARALLEL_JOBS: usize = 5;
pub const MAX_FRA_TIME_ENTRIES: usize = 12;
pub const MAX_PASSWD_LENGTH: usize = 80;

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

pub const AFD_VERSION_MAJOR: u8 = 1;
pub const AFD_VERSION_MINOR: u8 = 4;

pub const CURRENT_FSA_VERSION: u8 = 5;
pub const CURRENT_FRA_VERSION: u8 = 7;
pub const CURRENT_JID_VERSION: u8 = 3;
pub const CURRENT_DNB_VERSION: u8 = 1;
pub const CURRENT_FMD_VERSION: u8 = 1;
pub const CURRENT_DCL_VERSION: u8 = 1;
pub const CURRENT_PWB_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// DbHeader: the first AFD_WORD_OFFSET bytes of every database
// ---------------------------------------------------------------------------

/// Bytes reserved in front of the record array
pub const AFD_WORD_OFFSET: usize = 24;

/// Byte holding the feature-flag word of FSA/FRA
pub const AFD_FEATURE_FLAG_OFFSET: usize = 4;

/// Last byte of the feature-flag block (`first_errors_offline`)
pub const AFD_FEATURE_FLAG_OFFSET_END: usize = 5;

/// Database header.
///
/// Layout (24 bytes):
/// ```text
/// offset  field                  size
/// ------  --------------------   ----
///  0      record_count            4
///  4      feature_flags           1   (FSA/FRA only)
///  5      first_errors_offline    1   (FSA only)
///  6      _reserved0              2
///  8      mapped_size             4   (file size after the last resize)
/// 12      _reserved1              3
/// 15      version_major           1
/// 16      version_minor           1
/// 17      record_version          1
/// 18      _reserved2              6
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DbHeader {
    pub record_count: u32,
    pub feature_flags: u8,
    pub first_errors_offline: u8,
    pub _reserved0: [u8; 2],
    pub mapped_size: u32,
    pub _reserved1: [u8; 3],
    pub version_major: u8,
    pub version_minor: u8,
    pub record_version: u8,
    pub _reserved2: [u8; 6],
}

const _: () = assert!(std::mem::size_of::<DbHeader>() == AFD_WORD_OFFSET);

impl DbHeader {
    pub fn new(record_version: u8, mapped_size: usize) -> Self {
        Self {
            record_count: 0,
            mapped_size: mapped_size as u32,
            version_major: AFD_VERSION_MAJOR,
            version_minor: AFD_VERSION_MINOR,
            record_version,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Feature flags
// ---------------------------------------------------------------------------

/// FSA feature flags
pub const DISABLE_ARCHIVE: u8 = 1;
pub const DISABLE_RETRIEVE: u8 = 2;
pub const DISABLE_HOST_WARN_TIME: u8 = 4;
pub const DISABLE_CREATE_SOURCE_DIR: u8 = 8;
pub const ENABLE_CREATE_TARGET_DIR: u8 = 16;
pub const ENABLE_SIMULATE_SEND_MODE: u8 = 32;

/// FRA feature flags
pub const DISABLE_DIR_WARN_TIME: u8 = 1;

// ---------------------------------------------------------------------------
// Fixed-width string fields
// ---------------------------------------------------------------------------

/// Read a NUL-terminated string out of a fixed field
pub fn cstr(field: &[u8]) -> Cow<'_, str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end])
}

/// Store `value` NUL-terminated in a fixed field.
///
/// Returns false when the value had to be truncated.
pub fn set_cstr(field: &mut [u8], value: &str) -> bool {
    field.fill(0);
    if field.is_empty() {
        return value.is_empty();
    }
    let bytes = value.as_bytes();
    let n = bytes.len().min(field.len() - 1);
    field[..n].copy_from_slice(&bytes[..n]);
    n == bytes.len()
}

/// Split a `\0`-separated list of `count` entries
pub fn split_nul_list(field: &[u8], count: usize) -> Vec<String> {
    field
        .split(|&b| b == 0)
        .take(count)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Pack entries into a `\0`-separated field; false when they do not fit
pub fn set_nul_list(field: &mut [u8], entries: &[String]) -> bool {
    field.fill(0);
    let mut pos = 0;
    for entry in entries {
        let bytes = entry.as_bytes();
        if pos + bytes.len() + 1 > field.len() {
            return false;
        }
        field[pos..pos + bytes.len()].copy_from_slice(bytes);
        pos += bytes.len() + 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_version_bytes_at_fixed_offsets() {
        let header = DbHeader::new(CURRENT_JID_VERSION, 4096);
        let bytes = unsafe {
            std::slice::from_raw_parts(&header as *const DbHeader as *const u8, AFD_WORD_OFFSET)
        };
        assert_eq!(bytes[15], AFD_VERSION_MAJOR);
        assert_eq!(bytes[16], AFD_VERSION_MINOR);
        assert_eq!(bytes[17], CURRENT_JID_VERSION);
        assert_eq!(&bytes[8..12], &4096u32.to_ne_bytes());
    }

    #[test]
    fn test_cstr_truncates_and_terminates() {
        let mut field = [0xffu8; 5];
        assert!(!set_cstr(&mut field, "abcdef"));
        assert_eq!(cstr(&field), "abcd");
        assert_eq!(field[4], 0);
        assert!(set_cstr(&mut field, "ab"));
        assert_eq!(cstr(&field), "ab");
    }

    #[test]
    fn test_nul_list() {
        let mut field = [0u8; 16];
        let entries = vec!["basename".to_string(), "toupper".to_string()];
        assert!(set_nul_list(&mut field, &entries));
        assert_eq!(split_nul_list(&field, 2), entries);
        assert!(!set_nul_list(&mut [0u8; 4], &entries));
    }
}
