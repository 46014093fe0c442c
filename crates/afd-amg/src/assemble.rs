//! The `assemble` option: concatenate the whole batch into one file.

use std::fs;

use afd_config::{log_amg_debug, log_amg_warn};
use afd_log::ProductionRecord;

use crate::batch::{write_file, Batch};
use crate::naming::{create_assembled_name, CounterFile, NameContext, ASSEMBLE_COUNTER, SEQUENCE_COUNTER};
use crate::options::{AssembleSpec, AssembleType};
use crate::pipeline::{JobContext, OptionReport, Pipeline};
use crate::wmo;
use crate::{AmgError, Result};

/// Digits of the `+nnn` sequence number
pub const SEQUENCE_WIDTH: usize = 3;

/// Append one bulletin to `out` in the framing of `kind`
pub fn frame_into(out: &mut Vec<u8>, kind: AssembleType, bulletin: &[u8]) -> Result<()> {
    let too_long = || AmgError::parse("assemble", format!("bulletin of {} bytes too long", bulletin.len()));
    match kind {
        AssembleType::Vax => {
            let len = u16::try_from(bulletin.len()).map_err(|_| too_long())?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(bulletin);
        }
        AssembleType::Lbf | AssembleType::Hbf => {
            let len = u32::try_from(bulletin.len()).map_err(|_| too_long())?;
            if kind == AssembleType::Lbf {
                out.extend_from_slice(&len.to_le_bytes());
            } else {
                out.extend_from_slice(&len.to_be_bytes());
            }
            out.extend_from_slice(bulletin);
        }
        AssembleType::Mss => {
            if bulletin.len() > 0x00ff_ffff {
                return Err(too_long());
            }
            out.push(0);
            out.extend_from_slice(&(bulletin.len() as u32).to_be_bytes()[1..]);
            out.extend_from_slice(bulletin);
        }
        AssembleType::Wmo => {
            if bulletin.len() > wmo::MAX_WMO_LENGTH {
                return Err(too_long());
            }
            out.extend_from_slice(&wmo::with_wmo_header(bulletin, wmo::format_of(bulletin)));
        }
        AssembleType::Ascii | AssembleType::Binary => {
            out.extend_from_slice(&wmo::add_soh_etx(bulletin));
        }
    }
    Ok(())
}

pub(crate) fn run(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    spec: &AssembleSpec,
    option: &str,
) -> Result<OptionReport> {
    let mut report = OptionReport::default();
    let fifo_dir = p.work().fifo_dir();
    let name = create_assembled_name(
        &spec.name_template,
        &NameContext::new(&fifo_dir, ctx.job_id, ASSEMBLE_COUNTER),
    )?;
    if name.is_empty() {
        log_amg_warn!("Assembled name is empty, batch left as is", template = spec.name_template.as_str());
        report.failures += 1;
        return Ok(report);
    }

    let dir = batch.dir().to_path_buf();
    let sequence = CounterFile::for_job(&fifo_dir, SEQUENCE_COUNTER, SEQUENCE_WIDTH, ctx.job_id);
    let mut out = Vec::with_capacity(batch.file_size().max(0) as usize);
    let mut used = Vec::with_capacity(batch.len());

    for (file, size) in batch.entries() {
        let data = match fs::read(dir.join(&file)) {
            Ok(data) => data,
            Err(e) => {
                log_amg_warn!("Cannot read file", file = file.as_str(), error = e.to_string());
                report.failures += 1;
                continue;
            }
        };
        let framed = if spec.numbered {
            wmo::insert_sequence(&wmo::add_soh_etx(&data), sequence.next()?)
        } else {
            data
        };
        if let Err(e) = frame_into(&mut out, spec.kind, &framed) {
            log_amg_warn!("File not assembled", file = file.as_str(), error = e.to_string());
            report.failures += 1;
            continue;
        }
        used.push((file, size));
    }

    if used.is_empty() {
        return Ok(report);
    }
    // Inputs go only once the output is in place.
    let out_size = match write_file(&dir, &name, &out) {
        Ok(size) => size,
        Err(e) => {
            log_amg_warn!(
                "Cannot write assembled file, inputs kept",
                file = name.as_str(),
                error = e.to_string()
            );
            report.failures += 1;
            return Ok(report);
        }
    };
    let mut kept = Vec::new();
    for (file, _) in used.iter().filter(|(f, _)| *f != name) {
        if let Err(e) = fs::remove_file(dir.join(file)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log_amg_warn!("Cannot remove assembled input", file = file.as_str(), error = e.to_string());
                report.failures += 1;
                kept.push(file.clone());
            }
        }
    }
    log_amg_debug!("Assembled", job_id = ctx.job_id, file = name.as_str(), inputs = used.len());

    p.logs().production(&ProductionRecord {
        in_count: used.len() as u32,
        in_name: used[0].0.clone(),
        in_size: used.iter().map(|(_, s)| s).sum(),
        out_name: name.clone(),
        out_size,
        ..ctx.production_record(option)
    });

    let (mut names, mut sizes): (Vec<_>, Vec<_>) = batch
        .entries()
        .into_iter()
        .filter(|(n, _)| *n != name && (kept.contains(n) || !used.iter().any(|(u, _)| u == n)))
        .unzip();
    names.push(name);
    sizes.push(out_size);
    batch.replace(names, sizes);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract;
    use crate::options::ExtractType;
    use afd_config::testing::TestEnvironment;
    use afd_log::LogSinks;
    use std::sync::Arc;

    #[test]
    fn test_frame_lengths() {
        let mut out = Vec::new();
        frame_into(&mut out, AssembleType::Vax, b"abc").unwrap();
        frame_into(&mut out, AssembleType::Hbf, b"de").unwrap();
        frame_into(&mut out, AssembleType::Mss, b"f").unwrap();
        assert_eq!(out, b"\x03\x00abc\x00\x00\x00\x02de\x00\x00\x00\x01f");
        assert!(frame_into(&mut Vec::new(), AssembleType::Vax, &vec![0u8; 70_000]).is_err());
    }

    #[test]
    fn test_assembled_wmo_extracts_back() {
        let mut out = Vec::new();
        frame_into(&mut out, AssembleType::Wmo, b"\x01\r\r\nSAXX31 EDZW 011200\r\r\nA\r\r\n\x03").unwrap();
        frame_into(&mut out, AssembleType::Wmo, b"\x01\r\r\nB\r\r\n\x03").unwrap();
        let (bulletins, err) = extract::split(&out, ExtractType::WmoChk);
        assert!(err.is_none());
        assert_eq!(bulletins.len(), 2);
        assert!(bulletins[0].heading.is_some());
    }

    #[test]
    fn test_assemble_batch() {
        let env = TestEnvironment::new().unwrap();
        let dir = env.create_batch("a", &[("one", b"AAA"), ("two", b"BB")]).unwrap();
        let mut batch = Batch::scan(&dir).unwrap();
        let (sinks, logs) = LogSinks::memory();
        let p = Pipeline::new(env.layout(), Default::default(), Arc::new(Default::default()), sinks);
        let spec = AssembleSpec {
            kind: AssembleType::Lbf,
            numbered: false,
            name_template: "bundle_%04d".into(),
        };
        let ctx = JobContext {
            job_id: 0x51,
            ..Default::default()
        };
        run(&p, &ctx, &mut batch, &spec, "assemble LBF bundle_%04d").unwrap();
        assert_eq!(batch.names(), &["bundle_0000"]);
        assert_eq!(batch.file_size(), 4 + 3 + 4 + 2);
        assert!(!dir.join("one").exists());

        let records = logs.production.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].in_count, 2);
        assert_eq!(records[0].in_size, 5);
    }

    #[test]
    fn test_long_output_name() {
        let env = TestEnvironment::new().unwrap();
        let dir = env.create_batch("long", &[("in1", b"AA"), ("in2", b"B")]).unwrap();
        let mut batch = Batch::scan(&dir).unwrap();
        let p = Pipeline::new(env.layout(), Default::default(), Arc::new(Default::default()), LogSinks::null());
        let long = "n".repeat(252);
        let spec = AssembleSpec {
            kind: AssembleType::Lbf,
            numbered: false,
            name_template: long.clone(),
        };
        let report = run(&p, &JobContext::default(), &mut batch, &spec, "assemble LBF long").unwrap();
        assert_eq!(report.failures, 0);
        assert_eq!(batch.names(), &[long.clone()]);
        assert_eq!(fs::read(dir.join(&long)).unwrap().len(), 4 + 2 + 4 + 1);
        assert!(!dir.join("in1").exists());
    }

    #[test]
    fn test_failed_write_keeps_inputs() {
        let env = TestEnvironment::new().unwrap();
        let dir = env.create_batch("blocked", &[("in1", b"AA"), ("in2", b"B")]).unwrap();
        // A directory in the way makes the final rename fail.
        fs::create_dir(dir.join("bundle")).unwrap();
        let mut batch = Batch::scan(&dir).unwrap();
        let before = batch.clone();
        let p = Pipeline::new(env.layout(), Default::default(), Arc::new(Default::default()), LogSinks::null());
        let spec = AssembleSpec {
            kind: AssembleType::Lbf,
            numbered: false,
            name_template: "bundle".into(),
        };
        let report = run(&p, &JobContext::default(), &mut batch, &spec, "assemble LBF bundle").unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(batch, before);
        assert_eq!(fs::read(dir.join("in1")).unwrap(), b"AA");
        assert_eq!(fs::read(dir.join("in2")).unwrap(), b"B");
        assert_eq!(Batch::scan(&dir).unwrap(), before);
    }

    #[test]
    fn test_numbered_assemble() {
        let env = TestEnvironment::new().unwrap();
        let dir = env.create_batch("n", &[("m", b"TEXT")]).unwrap();
        let mut batch = Batch::scan(&dir).unwrap();
        let p = Pipeline::new(env.layout(), Default::default(), Arc::new(Default::default()), LogSinks::null());
        let spec = AssembleSpec {
            kind: AssembleType::Ascii,
            numbered: true,
            name_template: "seq".into(),
        };
        run(&p, &JobContext::default(), &mut batch, &spec, "assemble ASCII+nnn seq").unwrap();
        let data = fs::read(dir.join("seq")).unwrap();
        assert_eq!(data, b"\x01\r\r\n000\r\r\nTEXT\r\r\n\x03");
    }
}
