//! The `extract` option: split container files into one file per bulletin.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use afd_config::{log_amg_debug, log_amg_warn};
use afd_log::ProductionRecord;

use crate::batch::Batch;
use crate::chopper;
use crate::naming::CounterFile;
use crate::options::{ExtractFlags, ExtractSpec, ExtractType};
use crate::pipeline::{JobContext, OptionReport, Pipeline};
use crate::pmatch::{Filter, MatchResult};
use crate::wmo::{self, Heading, ETX, SOH};
use crate::{AmgError, Result, MAX_COLLISION_SUFFIX};

/// A bulletin cut out of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bulletin<'a> {
    pub bytes: &'a [u8],
    pub heading: Option<Heading>,
}

impl<'a> Bulletin<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            heading: wmo::parse_heading(bytes),
        }
    }
}

/// Bulletins found before an error, and the error
pub type Split<'a> = (Vec<Bulletin<'a>>, Option<AmgError>);

fn truncated(kind: &str, offset: usize) -> AmgError {
    AmgError::parse(kind, format!("truncated bulletin at offset {}", offset))
}

fn split_length_prefixed(data: &[u8], kind: ExtractType) -> Split<'_> {
    let (prefix, name) = match kind {
        ExtractType::Vax => (2, "VAX"),
        ExtractType::Lbf => (4, "LBF"),
        ExtractType::Hbf => (4, "HBF"),
        _ => (4, "MSS"),
    };
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let Some(p) = data.get(pos..pos + prefix) else {
            if data[pos..].iter().all(|&b| b == 0) {
                break;
            }
            return (out, Some(truncated(name, pos)));
        };
        let len = match kind {
            ExtractType::Vax => u16::from_le_bytes([p[0], p[1]]) as usize,
            ExtractType::Lbf => u32::from_le_bytes([p[0], p[1], p[2], p[3]]) as usize,
            ExtractType::Hbf => u32::from_be_bytes([p[0], p[1], p[2], p[3]]) as usize,
            _ => u32::from_be_bytes([0, p[1], p[2], p[3]]) as usize,
        };
        if len == 0 {
            break;
        }
        let body = pos + prefix;
        let Some(bytes) = data.get(body..body + len) else {
            return (out, Some(truncated(name, pos)));
        };
        out.push(Bulletin::new(bytes));
        pos = body + len;
    }
    (out, None)
}

fn split_wmo(data: &[u8], check: bool) -> Split<'_> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let Some((len, format)) = wmo::parse_wmo_header(&data[pos..]) else {
            return (out, Some(AmgError::parse("WMO", format!("bad length header at {}", pos))));
        };
        let body = pos + wmo::WMO_HEADER_LENGTH;
        let Some(bytes) = data.get(body..body + len) else {
            return (out, Some(truncated("WMO", pos)));
        };
        if check && (format > wmo::FORMAT_TEXT || !wmo::is_framed(bytes)) {
            return (
                out,
                Some(AmgError::parse("WMO+CHK", format!("bulletin at {} is not framed", pos))),
            );
        }
        out.push(Bulletin::new(bytes));
        pos = body + len;
    }
    (out, None)
}

/// SOH up to the terminator, `inclusive` keeping the framing
fn split_delimited<'a>(data: &'a [u8], end: &[u8], inclusive: bool, name: &str) -> Split<'a> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(start) = wmo::find_byte(&data[pos..], SOH).map(|i| pos + i) {
        let Some(stop) = wmo::find(&data[start + 1..], end).map(|i| start + 1 + i) else {
            return (out, Some(truncated(name, start)));
        };
        let bytes = if inclusive {
            &data[start..stop + end.len()]
        } else {
            wmo::strip_soh_etx(&data[start..stop + end.len()])
        };
        out.push(Bulletin::new(bytes));
        pos = stop + end.len();
    }
    (out, None)
}

fn split_zczc(data: &[u8]) -> Split<'_> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(start) = wmo::find(&data[pos..], b"ZCZC").map(|i| pos + i) {
        let Some(stop) = wmo::find(&data[start..], b"NNNN").map(|i| start + i) else {
            return (out, Some(truncated("ZCZC", start)));
        };
        let mut body = &data[start + 4..stop];
        if let Some(eol) = wmo::find_byte(body, b'\n') {
            body = &body[eol + 1..];
        }
        while let [rest @ .., b'\r' | b'\n'] = body {
            body = rest;
        }
        out.push(Bulletin::new(body));
        pos = stop + 4;
    }
    (out, None)
}

fn from_messages(data: &[u8], messages: Vec<chopper::Message>) -> Vec<Bulletin<'_>> {
    messages
        .into_iter()
        .map(|m| Bulletin {
            bytes: &data[m.range],
            heading: m.heading,
        })
        .collect()
}

/// Cut `data` into bulletins according to `kind`
pub fn split(data: &[u8], kind: ExtractType) -> Split<'_> {
    match kind {
        ExtractType::Vax | ExtractType::Lbf | ExtractType::Hbf | ExtractType::Mss => {
            split_length_prefixed(data, kind)
        }
        ExtractType::Wmo => split_wmo(data, false),
        ExtractType::WmoChk => split_wmo(data, true),
        ExtractType::Ascii => split_delimited(data, &[ETX], true, "ASCII"),
        ExtractType::Binary => split_delimited(data, b"\r\r\n\x03", true, "BINARY"),
        ExtractType::SpChar => split_delimited(data, &[ETX], false, "SP_CHAR"),
        ExtractType::Zczc => split_zczc(data),
        ExtractType::Grib => (from_messages(data, chopper::chop(data)), None),
        ExtractType::Mrz => match chopper::chop_mrz(data) {
            Ok(messages) => (from_messages(data, messages), None),
            Err(e) => (Vec::new(), Some(e)),
        },
    }
}

/// Output name of bulletin `n` of container `stem`
pub fn bulletin_name(
    bulletin: &Bulletin<'_>,
    stem: &str,
    n: usize,
    flags: ExtractFlags,
    year_month: &str,
    unique: Option<u64>,
) -> String {
    let mut name = match &bulletin.heading {
        Some(h) if flags.full_date => {
            let mut full = h.clone();
            full.yygggg = format!("{}{}", year_month, h.yygggg);
            full.file_name()
        }
        Some(h) => h.file_name(),
        None => format!("{}-{}", stem, n),
    };
    if flags.report_type {
        if let Some(h) = &bulletin.heading {
            name.push('_');
            name.push_str(h.report_type());
        }
    }
    if let Some(unique) = unique {
        name.push_str(&format!("_{:04x}", unique));
    }
    if flags.crc {
        name.push_str(&format!("_{:08x}", crc32fast::hash(bulletin.bytes)));
    }
    name
}

/// `name`, or the first free `name-N`
fn free_target(dir: &Path, taken: &HashSet<String>, name: &str) -> Option<String> {
    let free = |candidate: &String| !taken.contains(candidate) && !dir.join(candidate).exists();
    let plain = name.to_string();
    if free(&plain) {
        return Some(plain);
    }
    (0..=MAX_COLLISION_SUFFIX)
        .map(|n| format!("{}-{}", name, n))
        .find(|c| free(c))
}

pub(crate) fn run(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    spec: &ExtractSpec,
    option: &str,
) -> Result<OptionReport> {
    let dir = batch.dir().to_path_buf();
    let filter = spec.filter.as_deref().map(Filter::parse);
    let year_month = chrono::Utc::now().format("%Y%m").to_string();
    let unique_counter = CounterFile::unique(&p.work().fifo_dir());
    let mut report = OptionReport::default();
    let mut names = Vec::with_capacity(batch.len());
    let mut sizes = Vec::with_capacity(batch.len());

    for (name, size) in batch.entries() {
        if filter.as_ref().is_some_and(|f| f.evaluate(&name) != MatchResult::Match) {
            names.push(name);
            sizes.push(size);
            continue;
        }
        let data = match fs::read(dir.join(&name)) {
            Ok(data) => data,
            Err(e) => {
                log_amg_warn!("Cannot read container", file = name.as_str(), error = e.to_string());
                report.failures += 1;
                names.push(name);
                sizes.push(size);
                continue;
            }
        };

        let (bulletins, error) = split(&data, spec.kind);
        if let Some(e) = &error {
            log_amg_warn!("Extract stopped early", file = name.as_str(), error = e.to_string());
            report.failures += 1;
            if bulletins.is_empty() {
                names.push(name);
                sizes.push(size);
                continue;
            }
        }

        let mut taken: HashSet<String> = names.iter().cloned().collect();
        let mut written = Vec::with_capacity(bulletins.len());
        let mut failed: Option<String> = None;
        for (n, bulletin) in bulletins.iter().enumerate() {
            let unique = if spec.flags.unique {
                match unique_counter.next() {
                    Ok(v) => Some(v % crate::naming::MAX_MSG_PER_SEC),
                    Err(e) => {
                        failed = Some(e.to_string());
                        break;
                    }
                }
            } else {
                None
            };
            let wanted = bulletin_name(bulletin, &name, n, spec.flags, &year_month, unique);
            let Some(target) = free_target(&dir, &taken, &wanted) else {
                log_amg_warn!("No free name for bulletin", file = name.as_str(), target = wanted.as_str());
                report.failures += 1;
                continue;
            };
            let bytes = if spec.flags.soh_etx {
                wmo::add_soh_etx(bulletin.bytes)
            } else {
                bulletin.bytes.to_vec()
            };
            taken.insert(target.clone());
            written.push((target.clone(), bytes.len() as i64));
            if let Err(e) = fs::write(dir.join(&target), &bytes) {
                failed = Some(format!("{}: {}", target, e));
                break;
            }
        }
        if failed.is_none() {
            if let Err(e) = fs::remove_file(dir.join(&name)) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    failed = Some(format!("cannot remove container: {}", e));
                }
            }
        }

        // All or nothing per container: the container stays, its bulletins go.
        if let Some(error) = failed {
            log_amg_warn!("Extract failed, container kept", file = name.as_str(), error = error);
            report.failures += 1;
            for (target, _) in &written {
                if let Err(e) = fs::remove_file(dir.join(target)) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log_amg_warn!("Cannot remove bulletin", file = target.as_str(), error = e.to_string());
                    }
                }
            }
            names.push(name);
            sizes.push(size);
            continue;
        }
        log_amg_debug!("Extracted", file = name.as_str(), bulletins = written.len());
        let out_count = written.len() as u32;
        for (target, out_size) in written {
            p.logs().production(&ProductionRecord {
                out_count,
                in_name: name.clone(),
                in_size: size,
                out_name: target.clone(),
                out_size,
                ..ctx.production_record(option)
            });
            names.push(target);
            sizes.push(out_size);
        }
    }

    batch.replace(names, sizes);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_config::testing::TestEnvironment;
    use afd_log::LogSinks;
    use std::sync::Arc;

    fn wmo_bulletin(heading: &str, len: usize) -> Vec<u8> {
        let mut body = vec![SOH];
        body.extend_from_slice(wmo::CRCRLF);
        body.extend_from_slice(heading.as_bytes());
        body.extend_from_slice(wmo::CRCRLF);
        body.resize(len - 4, b'X');
        body.extend_from_slice(wmo::CRCRLF);
        body.push(ETX);
        body
    }

    #[test]
    fn test_split_length_prefixed() {
        let mut data = Vec::new();
        for text in [&b"abc"[..], b"de"] {
            data.extend_from_slice(&(text.len() as u16).to_le_bytes());
            data.extend_from_slice(text);
        }
        let (b, err) = split(&data, ExtractType::Vax);
        assert!(err.is_none());
        assert_eq!(b.iter().map(|b| b.bytes).collect::<Vec<_>>(), vec![&b"abc"[..], b"de"]);

        let mut mss = vec![0, 0, 0, 3];
        mss.extend_from_slice(b"xyz");
        mss.extend_from_slice(&[0, 0, 0, 9, b'q']);
        let (b, err) = split(&mss, ExtractType::Mss);
        assert_eq!(b.len(), 1);
        assert!(err.is_some());
    }

    #[test]
    fn test_split_ascii_and_zczc() {
        let data = b"\x01\r\r\nSAXX31 EDZW 011200\r\r\nA\r\r\n\x03junk\x01\r\r\nB\r\r\n\x03";
        let (b, err) = split(data, ExtractType::Ascii);
        assert!(err.is_none());
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].heading.as_ref().map(|h| h.file_name()).as_deref(), Some("SAXX31_EDZW_011200"));

        let (b, _) = split(data, ExtractType::SpChar);
        assert_eq!(b[1].bytes, b"B");

        let zczc = b"ZCZC 001\r\nFTXX01 EDZW 011200\r\nTEXT\r\nNNNN\r\nZCZC 002\r\nX\r\nNNNN";
        let (b, err) = split(zczc, ExtractType::Zczc);
        assert!(err.is_none());
        assert_eq!(b[0].bytes, b"FTXX01 EDZW 011200\r\nTEXT");
        assert_eq!(b[1].bytes, b"X");
    }

    #[test]
    fn test_bulletin_name_flags() {
        let data = b"SAXX31 EDZW 011200\r\r\nMETAR";
        let bulletin = Bulletin::new(data);
        let flags = ExtractFlags {
            full_date: true,
            report_type: true,
            ..Default::default()
        };
        assert_eq!(
            bulletin_name(&bulletin, "c", 0, flags, "202401", Some(10)),
            "SAXX31_EDZW_202401011200_METAR_000a"
        );
        let anon = Bulletin::new(b"\xff\xfe");
        assert_eq!(bulletin_name(&anon, "c", 2, ExtractFlags::default(), "", None), "c-2");
    }

    #[test]
    fn test_extract_wmo_container() {
        let env = TestEnvironment::new().unwrap();
        let mut container = Vec::new();
        for heading in ["SAXX31 EDZW 011200", "SAXX32 EDZW 011200", "FTXX33 EDZW 011200"] {
            container.extend(wmo::with_wmo_header(&wmo_bulletin(heading, 290), wmo::FORMAT_TEXT));
        }
        assert_eq!(container.len(), 900);
        let dir = env.create_batch("x", &[("container", container.as_slice())]).unwrap();
        let mut batch = Batch::scan(&dir).unwrap();

        let (sinks, logs) = LogSinks::memory();
        let p = Pipeline::new(env.layout(), Default::default(), Arc::new(Default::default()), sinks);
        let spec = ExtractSpec {
            flags: ExtractFlags {
                crc: true,
                ..Default::default()
            },
            kind: ExtractType::Wmo,
            filter: None,
        };
        let report = run(&p, &JobContext::default(), &mut batch, &spec, "extract -c WMO").unwrap();
        assert_eq!(report.failures, 0);
        assert_eq!(batch.files_to_send(), 3);
        assert_eq!(batch.file_size(), 900 - 3 * 10);
        assert!(!dir.join("container").exists());
        assert!(batch.names()[0].starts_with("SAXX31_EDZW_011200_"));
        assert_eq!(logs.production.len(), 3);
    }

    #[test]
    fn test_failed_write_rolls_back_container() {
        let env = TestEnvironment::new().unwrap();
        let mut container = b"\x01\r\r\nSAXX31 EDZW 011200\r\r\nA\r\r\n\x03".to_vec();
        container.extend_from_slice(b"\x01\r\r\nB\r\r\n\x03");
        // The second bulletin has no heading; `<container>-1` exceeds NAME_MAX.
        let long = "c".repeat(254);
        let dir = env.create_batch("x", &[(long.as_str(), container.as_slice())]).unwrap();
        let mut batch = Batch::scan(&dir).unwrap();
        let (sinks, logs) = LogSinks::memory();
        let p = Pipeline::new(env.layout(), Default::default(), Arc::new(Default::default()), sinks);
        let spec = ExtractSpec {
            flags: ExtractFlags::default(),
            kind: ExtractType::Ascii,
            filter: None,
        };
        let report = run(&p, &JobContext::default(), &mut batch, &spec, "extract ASCII").unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(batch.names(), &[long.clone()]);
        assert_eq!(fs::read(dir.join(&long)).unwrap(), container);
        assert!(!dir.join("SAXX31_EDZW_011200").exists());
        assert_eq!(Batch::scan(&dir).unwrap().len(), 1);
        assert!(logs.production.is_empty());
    }

    #[test]
    fn test_broken_container_kept() {
        let env = TestEnvironment::new().unwrap();
        let dir = env.create_batch("x", &[("bad", b"00000999")]).unwrap();
        let mut batch = Batch::scan(&dir).unwrap();
        let p = Pipeline::new(env.layout(), Default::default(), Arc::new(Default::default()), LogSinks::null());
        let spec = ExtractSpec {
            flags: ExtractFlags::default(),
            kind: ExtractType::Wmo,
            filter: None,
        };
        let report = run(&p, &JobContext::default(), &mut batch, &spec, "extract WMO").unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(batch.names(), &["bad"]);
        assert!(dir.join("bad").exists());
    }
}
