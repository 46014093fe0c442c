//! WMO bulletin framing.
//!
//! A framed bulletin looks like
//!
//! ```text
//! SOH CR CR LF [nnn CR CR LF] TTAAii CCCC YYGGgg [BBB] CR CR LF <text> CR CR LF ETX
//! ```
//!
//! and on WMO sockets it is preceded by a 10 byte header: the message
//! length as 8 ASCII digits followed by a 2 digit format identifier.

pub const SOH: u8 = 0x01;
pub const ETX: u8 = 0x03;

/// Line end inside a bulletin
pub const CRCRLF: &[u8] = b"\r\r\n";

pub const WMO_HEADER_LENGTH: usize = 10;

/// Format identifier of binary data (GRIB, BUFR, fax)
pub const FORMAT_BINARY: u8 = 0;
/// Format identifier of alphanumeric bulletins
pub const FORMAT_TEXT: u8 = 1;

/// Largest length the 8 digit header can carry
pub const MAX_WMO_LENGTH: usize = 99_999_999;

/// `TTAAii CCCC YYGGgg [BBB]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub ttaaii: String,
    pub cccc: String,
    pub yygggg: String,
    pub bbb: Option<String>,
}

impl Heading {
    /// `TTAAii_CCCC_YYGGgg[_BBB]`
    pub fn file_name(&self) -> String {
        let mut name = format!("{}_{}_{}", self.ttaaii, self.cccc, self.yygggg);
        if let Some(bbb) = &self.bbb {
            name.push('_');
            name.push_str(bbb);
        }
        name
    }

    /// The heading as it appears in a bulletin
    pub fn line(&self) -> String {
        match &self.bbb {
            Some(bbb) => format!("{} {} {} {}", self.ttaaii, self.cccc, self.yygggg, bbb),
            None => format!("{} {} {}", self.ttaaii, self.cccc, self.yygggg),
        }
    }

    /// Data type designator `TT`
    pub fn tt(&self) -> &str {
        &self.ttaaii[..2]
    }

    /// Report type named by `TT`, falling back to `TT` itself
    pub fn report_type(&self) -> &str {
        match self.tt() {
            "SA" => "METAR",
            "SP" => "SPECI",
            "FC" | "FT" => "TAF",
            "SM" | "SI" | "SN" => "SYNOP",
            "US" | "UK" | "UL" | "UE" => "TEMP",
            "UP" | "UG" | "UH" | "UQ" => "PILOT",
            "WS" => "SIGMET",
            "FA" => "GAMET",
            "WA" => "AIRMET",
            "CS" => "CLIMAT",
            other => other,
        }
    }
}

fn token(bytes: &[u8], len: usize, pred: impl Fn(u8) -> bool) -> Option<(String, &[u8])> {
    if bytes.len() < len || !bytes[..len].iter().all(|&b| pred(b)) {
        return None;
    }
    Some((String::from_utf8_lossy(&bytes[..len]).into_owned(), &bytes[len..]))
}

fn skip_noise(mut bytes: &[u8]) -> &[u8] {
    while let Some((&b, rest)) = bytes.split_first() {
        if b == SOH || b == b'\r' || b == b'\n' || b == b' ' {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Parse the abbreviated heading at the start of `data`.
///
/// Leading SOH, line ends and a three digit sequence number line are
/// skipped.
pub fn parse_heading(data: &[u8]) -> Option<Heading> {
    let mut rest = skip_noise(data);
    if rest.len() > 3 && rest[..3].iter().all(u8::is_ascii_digit) && matches!(rest[3], b'\r' | b'\n') {
        rest = skip_noise(&rest[3..]);
    }

    let is_upper_alnum = |b: u8| b.is_ascii_uppercase() || b.is_ascii_digit();
    let (ttaaii, rest) = token(rest, 6, is_upper_alnum)?;
    if !ttaaii.as_bytes()[..2].iter().all(u8::is_ascii_uppercase) {
        return None;
    }
    let rest = rest.strip_prefix(b" ")?;
    let (cccc, rest) = token(rest, 4, |b| b.is_ascii_uppercase())?;
    let rest = rest.strip_prefix(b" ")?;
    let (yygggg, rest) = token(rest, 6, |b| b.is_ascii_digit())?;

    let bbb = match rest.strip_prefix(b" ") {
        Some(after) => match token(after, 3, |b| b.is_ascii_uppercase()) {
            Some((bbb, tail)) if tail.first().map_or(true, |&b| matches!(b, b'\r' | b'\n' | b' ')) => {
                Some(bbb)
            }
            _ => None,
        },
        None => None,
    };
    if bbb.is_none() && !rest.first().map_or(true, |&b| matches!(b, b'\r' | b'\n' | b' ')) {
        return None;
    }

    Some(Heading {
        ttaaii,
        cccc,
        yygggg,
        bbb,
    })
}

pub fn is_framed(data: &[u8]) -> bool {
    data.first() == Some(&SOH) && data.last() == Some(&ETX)
}

/// Wrap `body` in SOH/ETX. Already framed data is returned as is.
pub fn add_soh_etx(body: &[u8]) -> Vec<u8> {
    if is_framed(body) {
        return body.to_vec();
    }
    let mut out = Vec::with_capacity(body.len() + 8);
    out.push(SOH);
    out.extend_from_slice(CRCRLF);
    out.extend_from_slice(body);
    if !body.ends_with(CRCRLF) {
        out.extend_from_slice(CRCRLF);
    }
    out.push(ETX);
    out
}

/// Remove SOH/ETX framing and the line ends directly inside it
pub fn strip_soh_etx(data: &[u8]) -> &[u8] {
    let mut body = data;
    if let Some(rest) = body.strip_prefix(&[SOH]) {
        body = rest.strip_prefix(CRCRLF).unwrap_or(rest);
    }
    if let Some(rest) = body.strip_suffix(&[ETX]) {
        body = rest.strip_suffix(CRCRLF).unwrap_or(rest);
    }
    body
}

/// Insert the `nnn` sequence line. Framed data gets it right after the
/// SOH line, anything else at the very start.
pub fn insert_sequence(data: &[u8], sequence: u64) -> Vec<u8> {
    let line = format!("{:03}\r\r\n", sequence % 1000);
    let mut out = Vec::with_capacity(data.len() + line.len());
    let at = if data.starts_with(&[SOH]) {
        if data[1..].starts_with(CRCRLF) {
            1 + CRCRLF.len()
        } else {
            out.extend_from_slice(&data[..1]);
            out.extend_from_slice(CRCRLF);
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(&data[1..]);
            return out;
        }
    } else {
        0
    };
    out.extend_from_slice(&data[..at]);
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(&data[at..]);
    out
}

/// 8 digit length and 2 digit format identifier
pub fn wmo_header(length: usize, format: u8) -> [u8; WMO_HEADER_LENGTH] {
    let mut header = [0u8; WMO_HEADER_LENGTH];
    let text = format!("{:08}{:02}", length.min(MAX_WMO_LENGTH), format % 100);
    header.copy_from_slice(text.as_bytes());
    header
}

/// Decode a 10 byte header into `(length, format)`
pub fn parse_wmo_header(bytes: &[u8]) -> Option<(usize, u8)> {
    let header = bytes.get(..WMO_HEADER_LENGTH)?;
    if !header.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let text = std::str::from_utf8(header).ok()?;
    Some((text[..8].parse().ok()?, text[8..].parse().ok()?))
}

/// Prefix `body` with a WMO header
pub fn with_wmo_header(body: &[u8], format: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + WMO_HEADER_LENGTH);
    out.extend_from_slice(&wmo_header(body.len(), format));
    out.extend_from_slice(body);
    out
}

/// Text bulletins get format 01, everything else 00
pub fn format_of(data: &[u8]) -> u8 {
    let text = data
        .iter()
        .all(|&b| b == SOH || b == ETX || b == b'\r' || b == b'\n' || b == b'\t' || (0x20..0x7f).contains(&b));
    if text {
        FORMAT_TEXT
    } else {
        FORMAT_BINARY
    }
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub fn find_byte(haystack: &[u8], byte: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == byte)
}
