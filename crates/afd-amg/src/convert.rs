//! The `convert` option: rewrite each file in place.
//!
//! A file that cannot be converted is removed from the batch and logged
//! with `CONVERSION_FAILED`. The format converters share this loop.

use std::fs;

use afd_config::log_amg_warn;
use afd_log::{DeleteReason, ProductionRecord};

use crate::assemble::SEQUENCE_WIDTH;
use crate::batch::{write_file, Batch};
use crate::chopper;
use crate::naming::{CounterFile, SEQUENCE_COUNTER};
use crate::options::{ConvertSpec, ConvertType};
use crate::pipeline::{JobContext, OptionReport, Pipeline};
use crate::wmo::{self, CRCRLF, ETX, SOH};
use crate::{AmgError, Result};

/// Replace every file of the batch by `f(name, contents)`.
///
/// On error the file is unlinked and a `CONVERSION_FAILED` delete record
/// written.
pub(crate) fn transform_each<F>(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    option: &str,
    mut f: F,
) -> Result<OptionReport>
where
    F: FnMut(&str, &[u8]) -> Result<Vec<u8>>,
{
    let dir = batch.dir().to_path_buf();
    let mut report = OptionReport::default();
    let mut names = Vec::with_capacity(batch.len());
    let mut sizes = Vec::with_capacity(batch.len());

    for (name, size) in batch.entries() {
        let converted = fs::read(dir.join(&name))
            .map_err(AmgError::from)
            .and_then(|data| f(&name, &data))
            .and_then(|out| write_file(&dir, &name, &out));
        match converted {
            Ok(out_size) => {
                p.logs().production(&ProductionRecord {
                    in_name: name.clone(),
                    in_size: size,
                    out_name: name.clone(),
                    out_size,
                    ..ctx.production_record(option)
                });
                names.push(name);
                sizes.push(out_size);
            }
            Err(e) => {
                log_amg_warn!("Conversion failed", file = name.as_str(), option = option, error = e.to_string());
                report.failures += 1;
                p.discard(ctx, &dir, &name, size, DeleteReason::ConversionFailed, option);
            }
        }
    }
    batch.replace(names, sizes);
    Ok(report)
}

fn latin1_to_ascii(b: u8, out: &mut Vec<u8>) {
    let mapped: &[u8] = match b {
        0xc4 => b"Ae",
        0xd6 => b"Oe",
        0xdc => b"Ue",
        0xe4 => b"ae",
        0xf6 => b"oe",
        0xfc => b"ue",
        0xdf => b"ss",
        0xc6 => b"AE",
        0xe6 => b"ae",
        0xc0..=0xc5 => b"A",
        0xc7 => b"C",
        0xc8..=0xcb => b"E",
        0xcc..=0xcf => b"I",
        0xd0 => b"D",
        0xd1 => b"N",
        0xd2..=0xd5 | 0xd8 => b"O",
        0xd7 => b"x",
        0xd9..=0xdb => b"U",
        0xdd => b"Y",
        0xe0..=0xe5 => b"a",
        0xe7 => b"c",
        0xe8..=0xeb => b"e",
        0xec..=0xef => b"i",
        0xf1 => b"n",
        0xf2..=0xf5 | 0xf8 => b"o",
        0xf9..=0xfb => b"u",
        0xfd | 0xff => b"y",
        0xa0 => b" ",
        _ => b"?",
    };
    out.extend_from_slice(mapped);
}

pub fn iso8859_to_ascii(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if b < 0x80 {
            out.push(b);
        } else {
            latin1_to_ascii(b, &mut out);
        }
    }
    out
}

/// Rewrite every line end. Any CRs directly before an LF are replaced by
/// `eol`; a lone CR is kept.
fn rewrite_line_ends(data: &[u8], eol: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 16);
    let mut pending_cr = 0;
    for &b in data {
        match b {
            b'\r' => pending_cr += 1,
            b'\n' => {
                pending_cr = 0;
                out.extend_from_slice(eol);
            }
            _ => {
                out.extend(std::iter::repeat(b'\r').take(pending_cr));
                pending_cr = 0;
                out.push(b);
            }
        }
    }
    out.extend(std::iter::repeat(b'\r').take(pending_cr));
    out
}

pub fn dos2unix(data: &[u8]) -> Vec<u8> {
    replace_all(data, b"\r\n", b"\n")
}

pub fn unix2dos(data: &[u8]) -> Vec<u8> {
    rewrite_line_ends(data, b"\r\n")
}

pub fn lf2crcrlf(data: &[u8]) -> Vec<u8> {
    rewrite_line_ends(data, CRCRLF)
}

pub fn crcrlf2lf(data: &[u8]) -> Vec<u8> {
    replace_all(data, CRCRLF, b"\n")
}

fn replace_all(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(at) = wmo::find(rest, from) {
        out.extend_from_slice(&rest[..at]);
        out.extend_from_slice(to);
        rest = &rest[at + from.len()..];
    }
    out.extend_from_slice(rest);
    out
}

/// Every message of an MRZ file as its own WMO message
fn mrz2wmo(data: &[u8]) -> Result<Vec<u8>> {
    let messages = chopper::chop_mrz(data)?;
    if messages.is_empty() {
        return Err(AmgError::parse("mrz2wmo", "no GRIB, BUFR or BLOK message found"));
    }
    let mut out = Vec::with_capacity(data.len() + messages.len() * 40);
    for m in messages {
        let mut body = Vec::with_capacity(m.range.len() + 40);
        if let Some(heading) = &m.heading {
            body.push(SOH);
            body.extend_from_slice(CRCRLF);
            body.extend_from_slice(heading.line().as_bytes());
            body.extend_from_slice(CRCRLF);
            body.extend_from_slice(&data[m.range]);
            body.extend_from_slice(CRCRLF);
            body.push(ETX);
        } else {
            body.extend_from_slice(&data[m.range]);
        }
        out.extend_from_slice(&wmo::with_wmo_header(&body, wmo::FORMAT_BINARY));
    }
    Ok(out)
}

/// Convert one file. `sequence` is the `+nnn` number, if requested.
pub fn convert(kind: ConvertType, data: &[u8], sequence: Option<u64>) -> Result<Vec<u8>> {
    let numbered = |d: Vec<u8>| match sequence {
        Some(n) => wmo::insert_sequence(&d, n),
        None => d,
    };
    Ok(match kind {
        ConvertType::SohEtx => numbered(wmo::add_soh_etx(data)),
        ConvertType::SohEtxWmo => {
            wmo::with_wmo_header(&numbered(wmo::add_soh_etx(data)), wmo::FORMAT_TEXT)
        }
        ConvertType::SohEtx2Wmo0 => {
            wmo::with_wmo_header(&numbered(wmo::strip_soh_etx(data).to_vec()), wmo::FORMAT_BINARY)
        }
        ConvertType::SohEtx2Wmo1 => {
            wmo::with_wmo_header(&numbered(wmo::strip_soh_etx(data).to_vec()), wmo::FORMAT_TEXT)
        }
        ConvertType::Wmo => wmo::with_wmo_header(&numbered(data.to_vec()), wmo::FORMAT_BINARY),
        ConvertType::Mrz2Wmo => mrz2wmo(data)?,
        ConvertType::Iso8859ToAscii => numbered(iso8859_to_ascii(data)),
        ConvertType::Dos2Unix => numbered(dos2unix(data)),
        ConvertType::Unix2Dos => numbered(unix2dos(data)),
        ConvertType::Lf2CrCrLf => numbered(lf2crcrlf(data)),
        ConvertType::CrCrLf2Lf => numbered(crcrlf2lf(data)),
    })
}

pub(crate) fn run(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    spec: &ConvertSpec,
    option: &str,
) -> Result<OptionReport> {
    let sequence = spec.numbered.then(|| {
        CounterFile::for_job(&p.work().fifo_dir(), SEQUENCE_COUNTER, SEQUENCE_WIDTH, ctx.job_id)
    });
    transform_each(p, ctx, batch, option, |_, data| {
        let n = match &sequence {
            Some(counter) => Some(counter.next()?),
            None => None,
        };
        convert(spec.kind, data, n)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_config::testing::TestEnvironment;
    use afd_log::LogSinks;
    use std::sync::Arc;

    #[test]
    fn test_line_ends() {
        assert_eq!(dos2unix(b"a\r\nb\rc\r\n"), b"a\nb\rc\n");
        assert_eq!(unix2dos(b"a\nb\r\nc"), b"a\r\nb\r\nc");
        assert_eq!(lf2crcrlf(b"a\nb\r\n"), b"a\r\r\nb\r\r\n");
        assert_eq!(crcrlf2lf(b"a\r\r\nb\r\n"), b"a\nb\r\n");
    }

    #[test]
    fn test_iso8859() {
        assert_eq!(iso8859_to_ascii(b"Gr\xfc\xdfe \xe9t\xe9"), b"Gruesse ete");
    }

    #[test]
    fn test_wmo_conversions() {
        let out = convert(ConvertType::SohEtx2Wmo1, b"\x01\r\r\nTEXT\r\r\n\x03", None).unwrap();
        assert_eq!(out, b"0000000401TEXT");
        let out = convert(ConvertType::SohEtxWmo, b"TEXT", Some(5)).unwrap();
        assert_eq!(&out[..10], b"0000001801");
        assert_eq!(&out[10..], b"\x01\r\r\n005\r\r\nTEXT\r\r\n\x03");
    }

    #[test]
    fn test_mrz2wmo() {
        let grib = crate::chopper::tests::grib1(20);
        let mut mrz = (grib.len() as u32).to_be_bytes().to_vec();
        mrz.extend(&grib);
        let out = convert(ConvertType::Mrz2Wmo, &mrz, None).unwrap();
        assert_eq!(&out[..10], b"0000002000");
        assert_eq!(&out[10..], &grib[..]);
        assert!(convert(ConvertType::Mrz2Wmo, b"\0\0\0\x02ab", None).is_err());
    }

    #[test]
    fn test_failed_conversion_is_discarded() {
        let env = TestEnvironment::new().unwrap();
        let dir = env
            .create_batch("c", &[("good", b"a\nb\n"), ("junk.mrz", b"\0\0\0\x09x")])
            .unwrap();
        let mut batch = Batch::scan(&dir).unwrap();
        let (sinks, logs) = LogSinks::memory();
        let p = Pipeline::new(env.layout(), Default::default(), Arc::new(Default::default()), sinks);

        let spec = ConvertSpec {
            kind: ConvertType::Unix2Dos,
            numbered: false,
        };
        run(&p, &JobContext::default(), &mut batch, &spec, "convert unix2dos").unwrap();
        assert_eq!(batch.sizes(), &[6, 5]);

        let spec = ConvertSpec {
            kind: ConvertType::Mrz2Wmo,
            numbered: false,
        };
        let report = run(&p, &JobContext::default(), &mut batch, &spec, "convert mrz2wmo").unwrap();
        assert_eq!(report.failures, 2);
        assert!(batch.is_empty());
        assert!(!dir.join("junk.mrz").exists());
        let deletes = logs.delete.records();
        assert_eq!(deletes.len(), 2);
        assert!(deletes.iter().all(|d| d.reason == DeleteReason::ConversionFailed));
    }
}
