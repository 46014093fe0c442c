//! Split binary files holding GRIB, BUFR or BLOK messages.
//!
//! Every message starts with its four letter magic, carries its total
//! length in the section after it and ends with `7777`. Text found between
//! two messages is searched for a WMO heading, which then names the
//! message.

use std::ops::Range;

use afd_config::log_amg_warn;

use crate::wmo::{self, Heading};
use crate::{AmgError, Result};

const END_MARKER: &[u8] = b"7777";

/// Bytes of the record length prefix used by MRZ files
pub const MRZ_PREFIX_LENGTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Grib,
    Bufr,
    Blok,
}

impl MessageKind {
    fn magic(self) -> &'static [u8] {
        match self {
            MessageKind::Grib => b"GRIB",
            MessageKind::Bufr => b"BUFR",
            MessageKind::Blok => b"BLOK",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Grib => "grib",
            MessageKind::Bufr => "bufr",
            MessageKind::Blok => "blok",
        }
    }
}

/// One message found in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    /// Byte range of the message, magic to `7777` inclusive
    pub range: Range<usize>,
    pub heading: Option<Heading>,
}

impl Message {
    /// Heading based name, else `<stem>-<kind>-<n>`
    pub fn file_name(&self, stem: &str, n: usize) -> String {
        match &self.heading {
            Some(heading) => heading.file_name(),
            None => format!("{}-{}-{}", stem, self.kind.name(), n),
        }
    }
}

fn be(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
}

/// Next magic at or after `from`
fn next_magic(data: &[u8], from: usize) -> Option<(usize, MessageKind)> {
    let window = data.get(from..)?;
    [MessageKind::Grib, MessageKind::Bufr, MessageKind::Blok]
        .into_iter()
        .filter_map(|kind| wmo::find(window, kind.magic()).map(|at| (from + at, kind)))
        .min_by_key(|(at, _)| *at)
}

/// Declared total length of the message starting at `data[0]`
fn message_length(kind: MessageKind, data: &[u8]) -> Option<usize> {
    match kind {
        MessageKind::Grib if data.get(7) == Some(&2) => data.get(8..16).map(be),
        _ => data.get(4..7).map(be),
    }
}

/// Find all messages in `data`.
///
/// A magic whose declared length runs past the end or does not end in
/// `7777` is logged and skipped.
pub fn chop(data: &[u8]) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut pos = 0;
    let mut gap_start = 0;

    while let Some((start, kind)) = next_magic(data, pos) {
        let end = message_length(kind, &data[start..])
            .filter(|&len| len > 8)
            .map(|len| start + len)
            .filter(|&end| end <= data.len() && data[..end].ends_with(END_MARKER));
        let Some(end) = end else {
            log_amg_warn!("Broken message skipped", kind = kind.name(), offset = start);
            pos = start + 4;
            continue;
        };
        messages.push(Message {
            kind,
            range: start..end,
            heading: wmo::parse_heading(&data[gap_start..start]),
        });
        pos = end;
        gap_start = end;
    }
    messages
}

/// Split an MRZ file: records prefixed by a 4 byte big-endian length,
/// each chopped on its own. Ranges refer to `data`.
pub fn chop_mrz(data: &[u8]) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let prefix = data
            .get(pos..pos + MRZ_PREFIX_LENGTH)
            .ok_or_else(|| AmgError::parse("MRZ", format!("truncated record prefix at {}", pos)))?;
        let len = be(prefix);
        let body = pos + MRZ_PREFIX_LENGTH;
        if body + len > data.len() {
            return Err(AmgError::parse(
                "MRZ",
                format!("record at {} claims {} bytes, {} left", pos, len, data.len() - body),
            ));
        }
        messages.extend(chop(&data[body..body + len]).into_iter().map(|mut m| {
            m.range = m.range.start + body..m.range.end + body;
            m
        }));
        pos = body + len;
    }
    Ok(messages)
}
