//! Cross-handle behaviour of the status databases.

use afd_state::fsa::{Fsa, FsaRecord, FSA_FILE, STOP_TRANSFER_STAT};
use afd_state::layout::{DISABLE_ARCHIVE, ENABLE_SIMULATE_SEND_MODE};
use afd_state::password::{decode, encode, PasswordEncoding};
use afd_state::StateError;
use proptest::prelude::*;
use tempfile::tempdir;

#[test]
fn test_reader_follows_writer_across_resize() {
    let temp = tempdir().unwrap();
    let path = temp.path().join(FSA_FILE);
    let mut writer = Fsa::create(&path).unwrap();
    let mut reader = Fsa::attach(&path).unwrap();

    for i in 0..10 {
        writer
            .push(FsaRecord::new(&format!("host{}", i), "example.org", 2))
            .unwrap();
    }
    reader.refresh().unwrap();
    assert_eq!(reader.len(), 10);
    assert_eq!(reader.position("host9"), Some(9));

    writer.toggle_host_status(9, STOP_TRANSFER_STAT).unwrap();
    assert_eq!(reader.get(9).unwrap().host_status, STOP_TRANSFER_STAT);
}

#[test]
fn test_lookups_follow_resize_without_refresh() {
    let temp = tempdir().unwrap();
    let path = temp.path().join(FSA_FILE);
    let mut writer = Fsa::create(&path).unwrap();
    let mut reader = Fsa::attach(&path).unwrap();
    let before = reader.capacity();

    let hosts = before + 3;
    for i in 0..hosts {
        writer
            .push(FsaRecord::new(&format!("host{}", i), "example.org", 2))
            .unwrap();
    }
    assert_eq!(reader.position(&format!("host{}", hosts - 1)), Some(hosts - 1));
    assert_eq!(reader.records().len(), hosts);
    assert!(reader.capacity() > before);
    assert_eq!(reader.get(hosts - 1).unwrap().host_alias(), format!("host{}", hosts - 1));
}

#[test]
fn test_feature_flags_visible_to_second_handle() {
    let temp = tempdir().unwrap();
    let path = temp.path().join(FSA_FILE);
    let mut a = Fsa::create(&path).unwrap();
    let b = Fsa::attach(&path).unwrap();

    a.set_feature_flags(DISABLE_ARCHIVE | ENABLE_SIMULATE_SEND_MODE, true)
        .unwrap();
    assert_eq!(b.feature_flags().unwrap(), DISABLE_ARCHIVE | ENABLE_SIMULATE_SEND_MODE);
}

#[test]
fn test_wrong_database_kind_refused() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("fra_status");
    afd_state::Fra::create(&path).unwrap();
    assert!(matches!(Fsa::attach(&path), Err(StateError::Version { .. })));
}

proptest! {
    #[test]
    fn prop_password_encodings_reversible(pw in "[ -~]{0,24}") {
        for enc in [PasswordEncoding::Plain, PasswordEncoding::Legacy, PasswordEncoding::Xor] {
            let coded = encode(&pw, enc).unwrap();
            prop_assert_eq!(decode(&coded).unwrap(), pw.clone());
        }
    }
}
