//! Password encodings stored in the password buffer.
//!
//! Every stored value starts with a `$T$` tag. None of these encodings is
//! encryption in any meaningful sense; they only keep passwords out of
//! casual sight.
//!
//! * `$0$` plaintext
//! * `$1$` legacy position-dependent shift
//! * `$2$` lowercase hex of the XOR with a fixed keystream

use crate::{Result, StateError};

/// Seed of the XOR keystream
const XOR_KEY_SEED: u64 = 0x5afd_c0de_2718_2818;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordEncoding {
    Plain,
    Legacy,
    #[default]
    Xor,
}

impl PasswordEncoding {
    pub fn tag(self) -> u8 {
        match self {
            PasswordEncoding::Plain => b'0',
            PasswordEncoding::Legacy => b'1',
            PasswordEncoding::Xor => b'2',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'0' => Some(PasswordEncoding::Plain),
            b'1' => Some(PasswordEncoding::Legacy),
            b'2' => Some(PasswordEncoding::Xor),
            _ => None,
        }
    }
}

/// XOR `data` in place with the shared keystream (xorshift64*)
pub fn xor_encrypt(data: &mut [u8]) {
    let mut state = XOR_KEY_SEED;
    for chunk in data.chunks_mut(8) {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        let key = state.wrapping_mul(0x2545_f491_4f6c_dd1d).to_le_bytes();
        for (b, k) in chunk.iter_mut().zip(key.iter()) {
            *b ^= k;
        }
    }
}

fn legacy_shift(i: usize) -> u8 {
    if i % 2 == 0 {
        (24i64 - i as i64).rem_euclid(256) as u8
    } else {
        (11i64 - i as i64).rem_euclid(256) as u8
    }
}

fn legacy_encode(plain: &[u8]) -> Result<Vec<u8>> {
    let out: Vec<u8> = plain
        .iter()
        .enumerate()
        .map(|(i, &c)| c.wrapping_sub(legacy_shift(i)))
        .collect();
    if out.contains(&0) {
        return Err(StateError::Corrupt(
            "password cannot be stored with the legacy encoding".into(),
        ));
    }
    Ok(out)
}

fn legacy_decode(coded: &[u8]) -> Vec<u8> {
    coded
        .iter()
        .enumerate()
        .map(|(i, &c)| c.wrapping_add(legacy_shift(i)))
        .collect()
}

/// Encode a password including its `$T$` tag
pub fn encode(plain: &str, encoding: PasswordEncoding) -> Result<Vec<u8>> {
    if plain.as_bytes().contains(&0) {
        return Err(StateError::Corrupt("password contains NUL".into()));
    }
    let mut out = vec![b'$', encoding.tag(), b'$'];
    match encoding {
        PasswordEncoding::Plain => out.extend_from_slice(plain.as_bytes()),
        PasswordEncoding::Legacy => out.extend(legacy_encode(plain.as_bytes())?),
        PasswordEncoding::Xor => {
            let mut bytes = plain.as_bytes().to_vec();
            xor_encrypt(&mut bytes);
            out.extend_from_slice(hex::encode(bytes).as_bytes());
        }
    }
    Ok(out)
}

/// Decode a stored password. Untagged values are taken as plaintext.
pub fn decode(stored: &[u8]) -> Result<String> {
    let tagged = stored.len() >= 3 && stored[0] == b'$' && stored[2] == b'$';
    let (encoding, body) = match tagged.then(|| PasswordEncoding::from_tag(stored[1])) {
        Some(Some(enc)) => (enc, &stored[3..]),
        Some(None) => {
            return Err(StateError::Corrupt(format!(
                "unknown password encoding '{}'",
                stored[1] as char
            )))
        }
        None => (PasswordEncoding::Plain, stored),
    };
    let plain = match encoding {
        PasswordEncoding::Plain => body.to_vec(),
        PasswordEncoding::Legacy => legacy_decode(body),
        PasswordEncoding::Xor => {
            let mut bytes = hex::decode(body)
                .map_err(|e| StateError::Corrupt(format!("bad password hex: {}", e)))?;
            xor_encrypt(&mut bytes);
            bytes
        }
    };
    String::from_utf8(plain).map_err(|_| StateError::Corrupt("password is not UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_matches_reference_formula() {
        let coded = encode("secret", PasswordEncoding::Legacy).unwrap();
        assert_eq!(&coded[..3], b"$1$");
        // p[i] = c - (24 - i) for even i, c - (11 - i) for odd i
        assert_eq!(coded[3], b's' - 24);
        assert_eq!(coded[4], b'e' - 10);
        assert_eq!(coded[5], b'c' - 22);
        assert_eq!(decode(&coded).unwrap(), "secret");
    }

    #[test]
    fn test_legacy_long_password_wraps() {
        let long: String = (0..40).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let coded = encode(&long, PasswordEncoding::Legacy).unwrap();
        assert_eq!(decode(&coded).unwrap(), long);
    }

    #[test]
    fn test_xor_is_hex_and_reversible() {
        let coded = encode("hunter2", PasswordEncoding::Xor).unwrap();
        assert_eq!(&coded[..3], b"$2$");
        assert_eq!(coded.len(), 3 + 2 * "hunter2".len());
        assert!(coded[3..].iter().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(&coded[3..], hex::encode("hunter2").as_bytes());
        assert_eq!(decode(&coded).unwrap(), "hunter2");
    }

    #[test]
    fn test_plain_and_untagged() {
        assert_eq!(encode("pw", PasswordEncoding::Plain).unwrap(), b"$0$pw".to_vec());
        assert_eq!(decode(b"$0$pw").unwrap(), "pw");
        assert_eq!(decode(b"bare").unwrap(), "bare");
        assert!(decode(b"$7$x").is_err());
    }

    #[test]
    fn test_xor_encrypt_involution() {
        let mut data = b"0123456789abcdefXYZ".to_vec();
        xor_encrypt(&mut data);
        xor_encrypt(&mut data);
        assert_eq!(data, b"0123456789abcdefXYZ");
    }
}
