//! Format converters: `tiff2gts`, `fax2gts`, `gts2tiff`, `grib2wmo`,
//! `wmo2ascii` and `afw2wmo`.
//!
//! GTS fax products are raw CCITT T.4 data. TIFF files carry the same
//! data in one or more strips.

use crate::batch::Batch;
use crate::chopper::{self, MessageKind};
use crate::convert::{crcrlf2lf, transform_each};
use crate::options::FormatConversion;
use crate::pipeline::{JobContext, OptionReport, Pipeline};
use crate::wmo::{self, CRCRLF, ETX, SOH};
use crate::{AmgError, Result};

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

/// Scan line width of a GTS fax
pub const FAX_WIDTH: u32 = 1728;

/// CCITT T.4 compression
const COMPRESSION_T4: u32 = 3;

/// Centre used by `grib2wmo` when none is given
pub const DEFAULT_CCCC: &str = "XXXX";

fn tiff_error(reason: impl Into<String>) -> AmgError {
    AmgError::parse("tiff", reason)
}

struct TiffReader<'a> {
    data: &'a [u8],
    little: bool,
}

impl TiffReader<'_> {
    fn u16_at(&self, at: usize) -> Result<u16> {
        let b = self
            .data
            .get(at..at + 2)
            .ok_or_else(|| tiff_error(format!("offset {} out of range", at)))?;
        Ok(if self.little {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        })
    }

    fn u32_at(&self, at: usize) -> Result<u32> {
        let b = self
            .data
            .get(at..at + 4)
            .ok_or_else(|| tiff_error(format!("offset {} out of range", at)))?;
        Ok(if self.little {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        })
    }

    /// Values of the IFD entry at `entry`
    fn values(&self, entry: usize) -> Result<Vec<u32>> {
        let kind = self.u16_at(entry + 2)?;
        let count = self.u32_at(entry + 4)? as usize;
        let width = match kind {
            TYPE_SHORT => 2,
            TYPE_LONG => 4,
            other => return Err(tiff_error(format!("unsupported field type {}", other))),
        };
        let base = if count * width <= 4 {
            entry + 8
        } else {
            self.u32_at(entry + 8)? as usize
        };
        (0..count)
            .map(|i| match kind {
                TYPE_SHORT => self.u16_at(base + i * 2).map(u32::from),
                _ => self.u32_at(base + i * 4),
            })
            .collect()
    }
}

/// Concatenated image strips of a TIFF file
pub fn tiff2gts(data: &[u8]) -> Result<Vec<u8>> {
    let little = match data.get(..4) {
        Some(b"II*\0") => true,
        Some(b"MM\0*") => false,
        _ => return Err(tiff_error("not a TIFF file")),
    };
    let tiff = TiffReader { data, little };
    let ifd = tiff.u32_at(4)? as usize;
    let entries = tiff.u16_at(ifd)? as usize;

    let mut offsets = None;
    let mut counts = None;
    for i in 0..entries {
        let entry = ifd + 2 + i * 12;
        match tiff.u16_at(entry)? {
            TAG_STRIP_OFFSETS => offsets = Some(tiff.values(entry)?),
            TAG_STRIP_BYTE_COUNTS => counts = Some(tiff.values(entry)?),
            _ => {}
        }
    }
    let (Some(offsets), Some(counts)) = (offsets, counts) else {
        return Err(tiff_error("no strip offsets or byte counts"));
    };
    if offsets.len() != counts.len() {
        return Err(tiff_error("strip offsets and byte counts differ in number"));
    }

    let mut out = Vec::with_capacity(counts.iter().map(|&c| c as usize).sum());
    for (&offset, &count) in offsets.iter().zip(&counts) {
        let (start, len) = (offset as usize, count as usize);
        let strip = data
            .get(start..start + len)
            .ok_or_else(|| tiff_error(format!("strip at {} runs past the end", start)))?;
        out.extend_from_slice(strip);
    }
    Ok(out)
}

/// Drop the first `skip` bytes of a fax file
pub fn fax2gts(data: &[u8], skip: usize) -> Result<Vec<u8>> {
    data.get(skip..)
        .filter(|rest| !rest.is_empty())
        .map(<[u8]>::to_vec)
        .ok_or_else(|| AmgError::parse("fax2gts", format!("file shorter than {} bytes", skip)))
}

/// T.4 end-of-line codes (eleven zero bits and a one) in `data`
pub fn count_eols(data: &[u8]) -> u32 {
    let mut zeros = 0u32;
    let mut eols = 0;
    for &byte in data {
        for bit in (0..8).rev() {
            if byte & (1 << bit) == 0 {
                zeros += 1;
            } else {
                if zeros >= 11 {
                    eols += 1;
                }
                zeros = 0;
            }
        }
    }
    eols
}

/// Wrap raw T.4 data in a single strip little-endian TIFF
pub fn gts2tiff(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(AmgError::parse("gts2tiff", "empty fax"));
    }
    let rows = count_eols(data).max(1);
    let entries: [(u16, u16, u32); 9] = [
        (TAG_IMAGE_WIDTH, TYPE_LONG, FAX_WIDTH),
        (TAG_IMAGE_LENGTH, TYPE_LONG, rows),
        (TAG_BITS_PER_SAMPLE, TYPE_SHORT, 1),
        (TAG_COMPRESSION, TYPE_SHORT, COMPRESSION_T4),
        (TAG_PHOTOMETRIC, TYPE_SHORT, 0),
        (TAG_STRIP_OFFSETS, TYPE_LONG, 0),
        (TAG_SAMPLES_PER_PIXEL, TYPE_SHORT, 1),
        (TAG_ROWS_PER_STRIP, TYPE_LONG, rows),
        (TAG_STRIP_BYTE_COUNTS, TYPE_LONG, data.len() as u32),
    ];
    let ifd_len = 2 + entries.len() * 12 + 4;
    let data_offset = (8 + ifd_len) as u32;

    let mut out = Vec::with_capacity(8 + ifd_len + data.len());
    out.extend_from_slice(b"II*\0");
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (tag, kind, value) in entries {
        let value = if tag == TAG_STRIP_OFFSETS { data_offset } else { value };
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        if kind == TYPE_SHORT {
            out.extend_from_slice(&(value as u16).to_le_bytes());
            out.extend_from_slice(&[0, 0]);
        } else {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(data);
    Ok(out)
}

/// Give every GRIB message a WMO heading `HXXX00 CCCC DDHHMM`
pub fn grib2wmo(data: &[u8], cccc: Option<&str>, ddhhmm: &str) -> Result<Vec<u8>> {
    let messages: Vec<_> = chopper::chop(data)
        .into_iter()
        .filter(|m| m.kind == MessageKind::Grib)
        .collect();
    if messages.is_empty() {
        return Err(AmgError::parse("grib2wmo", "no GRIB message found"));
    }
    let heading = format!("HXXX00 {} {}", cccc.unwrap_or(DEFAULT_CCCC), ddhhmm);
    let mut out = Vec::with_capacity(data.len() + messages.len() * 48);
    for m in messages {
        let mut body = Vec::with_capacity(m.range.len() + 32);
        body.push(SOH);
        body.extend_from_slice(CRCRLF);
        body.extend_from_slice(heading.as_bytes());
        body.extend_from_slice(CRCRLF);
        body.extend_from_slice(&data[m.range]);
        body.extend_from_slice(CRCRLF);
        body.push(ETX);
        out.extend_from_slice(&wmo::with_wmo_header(&body, wmo::FORMAT_BINARY));
    }
    Ok(out)
}

/// Plain text from a WMO bulletin: no framing, no header, LF line ends
pub fn wmo2ascii(data: &[u8]) -> Result<Vec<u8>> {
    let body = match wmo::parse_wmo_header(data) {
        Some((len, _)) if len + wmo::WMO_HEADER_LENGTH == data.len() => &data[wmo::WMO_HEADER_LENGTH..],
        _ => data,
    };
    let text = crcrlf2lf(wmo::strip_soh_etx(body));
    Ok(text.into_iter().filter(|&b| b != b'\r').collect())
}

/// Reframe an AFW text bulletin as a WMO bulletin
pub fn afw2wmo(data: &[u8]) -> Result<Vec<u8>> {
    let text = String::from_utf8_lossy(data);
    let mut lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
    while lines.last().is_some_and(|l| l.trim().is_empty() || l.trim() == "NNNN") {
        lines.pop();
    }
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    let Some(first) = lines.first() else {
        return Err(AmgError::parse("afw2wmo", "empty bulletin"));
    };
    if wmo::parse_heading(first.as_bytes()).is_none() {
        return Err(AmgError::parse("afw2wmo", format!("no WMO heading in `{}`", first)));
    }
    let mut body = Vec::with_capacity(data.len() + lines.len() * 2);
    for line in lines {
        body.extend_from_slice(line.as_bytes());
        body.extend_from_slice(CRCRLF);
    }
    Ok(wmo::add_soh_etx(&body))
}

pub(crate) fn run(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    conversion: &FormatConversion,
    option: &str,
) -> Result<OptionReport> {
    let ddhhmm = chrono::Utc::now().format("%d%H%M").to_string();
    transform_each(p, ctx, batch, option, |_, data| match conversion {
        FormatConversion::Tiff2Gts => tiff2gts(data),
        FormatConversion::Fax2Gts(skip) => fax2gts(data, *skip),
        FormatConversion::Gts2Tiff => gts2tiff(data),
        FormatConversion::Grib2Wmo(cccc) => grib2wmo(data, cccc.as_deref(), &ddhhmm),
        FormatConversion::Wmo2Ascii => wmo2ascii(data),
        FormatConversion::Afw2Wmo => afw2wmo(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gts_tiff_round_trip() {
        // Two EOL codes: 0x00 0x1 then 0x00 0x1
        let fax = [0x00, 0x10, 0xaa, 0x00, 0x10, 0x55];
        assert_eq!(count_eols(&fax), 2);
        let tiff = gts2tiff(&fax).unwrap();
        assert!(tiff.starts_with(b"II*\0"));
        assert_eq!(tiff2gts(&tiff).unwrap(), fax);
    }

    #[test]
    fn test_tiff2gts_big_endian_multi_strip() {
        let mut t = b"MM\0*".to_vec();
        t.extend_from_slice(&8u32.to_be_bytes());
        t.extend_from_slice(&2u16.to_be_bytes());
        // StripOffsets: 2 SHORT values inline
        t.extend_from_slice(&TAG_STRIP_OFFSETS.to_be_bytes());
        t.extend_from_slice(&TYPE_SHORT.to_be_bytes());
        t.extend_from_slice(&2u32.to_be_bytes());
        t.extend_from_slice(&40u16.to_be_bytes());
        t.extend_from_slice(&44u16.to_be_bytes());
        // StripByteCounts: 2 SHORT values inline
        t.extend_from_slice(&TAG_STRIP_BYTE_COUNTS.to_be_bytes());
        t.extend_from_slice(&TYPE_SHORT.to_be_bytes());
        t.extend_from_slice(&2u32.to_be_bytes());
        t.extend_from_slice(&2u16.to_be_bytes());
        t.extend_from_slice(&3u16.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());
        t.resize(40, 0);
        t.extend_from_slice(b"ab..cde");
        assert_eq!(tiff2gts(&t).unwrap(), b"abcde");
        assert!(tiff2gts(b"GIF89a").is_err());
    }

    #[test]
    fn test_fax2gts() {
        assert_eq!(fax2gts(b"HDRdata", 3).unwrap(), b"data");
        assert!(fax2gts(b"HDR", 3).is_err());
    }

    #[test]
    fn test_grib2wmo() {
        let grib = crate::chopper::tests::grib1(24);
        let out = grib2wmo(&grib, Some("EDZW"), "011200").unwrap();
        let (len, format) = wmo::parse_wmo_header(&out).unwrap();
        assert_eq!(format, wmo::FORMAT_BINARY);
        assert_eq!(len + 10, out.len());
        let heading = wmo::parse_heading(&out[10..]).unwrap();
        assert_eq!(heading.line(), "HXXX00 EDZW 011200");
        assert!(grib2wmo(b"no grib here", None, "011200").is_err());
    }

    #[test]
    fn test_wmo2ascii_and_afw2wmo() {
        let framed = wmo::with_wmo_header(b"\x01\r\r\nSAXX31 EDZW 011200\r\r\nTEXT\r\r\n\x03", 1);
        assert_eq!(wmo2ascii(&framed).unwrap(), b"SAXX31 EDZW 011200\nTEXT");

        let afw = b"\nFTXX01 KAWN 011200\nLINE ONE\nNNNN\n";
        let out = afw2wmo(afw).unwrap();
        assert_eq!(out, b"\x01\r\r\nFTXX01 KAWN 011200\r\r\nLINE ONE\r\r\n\x03");
        assert!(afw2wmo(b"no heading\n").is_err());
    }
}
