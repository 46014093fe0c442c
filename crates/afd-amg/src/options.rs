//! Local option parsing.
//!
//! One option per string, as stored in the JID `loptions` list. Options
//! are recognised by their leading keyword, case-sensitively, after
//! leading whitespace.

use crate::{AmgError, Result};

/// Modifiers shared by `rename`, `srename`, `basename` and `extension`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameFlags {
    pub overwrite: bool,
    pub with_path: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecLock {
    /// `-l`: one exec at a time for this job
    Job,
    /// `-L`: one exec at a time across all jobs
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    /// `d`: remove each file once its exec ran
    pub delete_each: bool,
    /// `D`: remove the whole batch when an exec fails
    pub delete_all_on_error: bool,
    /// `-t N` seconds
    pub timeout: Option<u64>,
    pub lock: Option<ExecLock>,
    /// `-s`: keep failed files under `files/store`
    pub save_failed: bool,
    pub command: String,
}

impl ExecSpec {
    /// Number of `%s` markers in the command
    pub fn substitutions(&self) -> usize {
        self.command.matches("%s").count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixAction {
    Add,
    Del,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatConversion {
    Tiff2Gts,
    /// Number of leading fax header bytes to drop
    Fax2Gts(usize),
    Gts2Tiff,
    /// Originating centre for the generated heading
    Grib2Wmo(Option<String>),
    Wmo2Ascii,
    Afw2Wmo,
}

impl FormatConversion {
    pub fn name(&self) -> &'static str {
        match self {
            FormatConversion::Tiff2Gts => "tiff2gts",
            FormatConversion::Fax2Gts(_) => "fax2gts",
            FormatConversion::Gts2Tiff => "gts2tiff",
            FormatConversion::Grib2Wmo(_) => "grib2wmo",
            FormatConversion::Wmo2Ascii => "wmo2ascii",
            FormatConversion::Afw2Wmo => "afw2wmo",
        }
    }
}

/// Container layouts understood by `extract`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractType {
    /// 2 byte little-endian length
    Vax,
    /// 4 byte little-endian length
    Lbf,
    /// 4 byte big-endian length
    Hbf,
    /// 4 byte header, 24 bit big-endian length
    Mss,
    /// GRIB/BUFR inside 4 byte length records
    Mrz,
    Grib,
    /// 8 digit length + 2 digit type
    Wmo,
    WmoChk,
    Ascii,
    Binary,
    Zczc,
    SpChar,
}

impl ExtractType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "VAX" => ExtractType::Vax,
            "LBF" => ExtractType::Lbf,
            "HBF" => ExtractType::Hbf,
            "MSS" => ExtractType::Mss,
            "MRZ" => ExtractType::Mrz,
            "GRIB" => ExtractType::Grib,
            "WMO" => ExtractType::Wmo,
            "WMO+CHK" => ExtractType::WmoChk,
            "ASCII" => ExtractType::Ascii,
            "BINARY" => ExtractType::Binary,
            "ZCZC" => ExtractType::Zczc,
            "SP_CHAR" => ExtractType::SpChar,
            _ => return None,
        })
    }
}

/// Additions to names generated by `extract`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractFlags {
    /// `-c` CRC-32 of the bulletin
    pub crc: bool,
    /// `-n` unique number
    pub unique: bool,
    /// `-f` full date instead of day of month
    pub full_date: bool,
    /// `-s` frame each bulletin with SOH/ETX
    pub soh_etx: bool,
    /// `-r` report type
    pub report_type: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSpec {
    pub flags: ExtractFlags,
    pub kind: ExtractType,
    /// Only files matching this filter are split
    pub filter: Option<String>,
}

/// Framing used by `assemble`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssembleType {
    Vax,
    Lbf,
    Hbf,
    Mss,
    Wmo,
    Ascii,
    Binary,
}

impl AssembleType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "VAX" => AssembleType::Vax,
            "LBF" => AssembleType::Lbf,
            "HBF" => AssembleType::Hbf,
            "MSS" => AssembleType::Mss,
            "WMO" => AssembleType::Wmo,
            "ASCII" => AssembleType::Ascii,
            "BINARY" => AssembleType::Binary,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleSpec {
    pub kind: AssembleType,
    /// `+nnn`: number each bulletin
    pub numbered: bool,
    pub name_template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertType {
    SohEtx,
    SohEtxWmo,
    SohEtx2Wmo0,
    SohEtx2Wmo1,
    Wmo,
    Mrz2Wmo,
    Iso8859ToAscii,
    Dos2Unix,
    Unix2Dos,
    Lf2CrCrLf,
    CrCrLf2Lf,
}

impl ConvertType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "sohetx" => ConvertType::SohEtx,
            "sohetxwmo" => ConvertType::SohEtxWmo,
            "sohetx2wmo0" => ConvertType::SohEtx2Wmo0,
            "sohetx2wmo1" => ConvertType::SohEtx2Wmo1,
            "wmo" => ConvertType::Wmo,
            "mrz2wmo" => ConvertType::Mrz2Wmo,
            "iso8859_2ascii" => ConvertType::Iso8859ToAscii,
            "dos2unix" => ConvertType::Dos2Unix,
            "unix2dos" => ConvertType::Unix2Dos,
            "lf2crcrlf" => ConvertType::Lf2CrCrLf,
            "crcrlf2lf" => ConvertType::CrCrLf2Lf,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertSpec {
    pub kind: ConvertType,
    pub numbered: bool,
}

/// One parsed local option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOption {
    Rename { rule: String, flags: RenameFlags },
    SRename {
        filter: String,
        rename_to: String,
        flags: RenameFlags,
    },
    Exec(ExecSpec),
    Basename { overwrite: bool },
    Extension { overwrite: bool },
    Prefix { action: PrefixAction, prefix: String },
    ToUpper,
    ToLower,
    Lchmod(u32),
    Format(FormatConversion),
    Extract(ExtractSpec),
    Assemble(AssembleSpec),
    Convert(ConvertSpec),
}

/// Split `typ[+nnn]`
fn numbered(token: &str) -> (&str, bool) {
    match token.split_once('+') {
        Some((kind, "nnn")) => (kind, true),
        _ => (token, false),
    }
}

fn rename_flags(input: &str, words: &[&str]) -> Result<RenameFlags> {
    let mut flags = RenameFlags::default();
    for w in words {
        match *w {
            "overwrite" => flags.overwrite = true,
            "with_path" => flags.with_path = true,
            other => {
                return Err(AmgError::parse(input, format!("unknown modifier `{}`", other)));
            }
        }
    }
    Ok(flags)
}

fn overwrite_only(input: &str, words: &[&str]) -> Result<bool> {
    match words {
        [] => Ok(false),
        ["overwrite"] => Ok(true),
        _ => Err(AmgError::parse(input, "only `overwrite` may follow")),
    }
}

/// Parse an octal mode of 3 or 4 digits
pub fn parse_mode(s: &str) -> Option<u32> {
    if !(3..=4).contains(&s.len()) || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    u32::from_str_radix(s, 8).ok()
}

fn parse_exec(input: &str, keyword: &str, rest: &str) -> Result<ExecSpec> {
    let mut spec = ExecSpec {
        delete_each: false,
        delete_all_on_error: false,
        timeout: None,
        lock: None,
        save_failed: false,
        command: String::new(),
    };
    for c in keyword["exec".len()..].chars() {
        match c {
            'd' => spec.delete_each = true,
            'D' => spec.delete_all_on_error = true,
            _ => return Err(AmgError::parse(input, "unknown exec variant")),
        }
    }

    let mut rest = rest.trim_start();
    loop {
        let Some(arg) = rest.strip_prefix('-') else {
            break;
        };
        let (word, tail) = arg.split_once(char::is_whitespace).unwrap_or((arg, ""));
        match word {
            "d" => spec.delete_each = true,
            "D" => spec.delete_all_on_error = true,
            "s" => spec.save_failed = true,
            "l" => spec.lock = Some(ExecLock::Job),
            "L" => spec.lock = Some(ExecLock::All),
            "t" => {
                let tail = tail.trim_start();
                let (secs, after) = tail.split_once(char::is_whitespace).unwrap_or((tail, ""));
                spec.timeout = Some(
                    secs.parse()
                        .map_err(|_| AmgError::parse(input, "-t needs a number of seconds"))?,
                );
                rest = after.trim_start();
                continue;
            }
            w if w.starts_with('t') && w[1..].bytes().all(|b| b.is_ascii_digit()) => {
                spec.timeout = w[1..].parse().ok();
            }
            _ => break,
        }
        rest = tail.trim_start();
    }
    if rest.is_empty() {
        return Err(AmgError::parse(input, "exec without a command"));
    }
    spec.command = rest.to_string();
    Ok(spec)
}

impl LocalOption {
    pub fn parse(input: &str) -> Result<Self> {
        let line = input.trim_start();
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let words: Vec<&str> = rest.split_whitespace().collect();

        let option = match keyword {
            "rename" => {
                let Some((rule, mods)) = words.split_first() else {
                    return Err(AmgError::parse(input, "rename needs a rule name"));
                };
                LocalOption::Rename {
                    rule: rule.to_string(),
                    flags: rename_flags(input, mods)?,
                }
            }
            "srename" => {
                let [filter, to, mods @ ..] = words.as_slice() else {
                    return Err(AmgError::parse(input, "srename needs a filter and a target"));
                };
                LocalOption::SRename {
                    filter: filter.to_string(),
                    rename_to: to.to_string(),
                    flags: rename_flags(input, mods)?,
                }
            }
            k if k.starts_with("exec") => LocalOption::Exec(parse_exec(input, k, rest)?),
            "basename" => LocalOption::Basename {
                overwrite: overwrite_only(input, &words)?,
            },
            "extension" => LocalOption::Extension {
                overwrite: overwrite_only(input, &words)?,
            },
            "prefix" => match words.as_slice() {
                ["add", p] => LocalOption::Prefix {
                    action: PrefixAction::Add,
                    prefix: p.to_string(),
                },
                ["del", p] => LocalOption::Prefix {
                    action: PrefixAction::Del,
                    prefix: p.to_string(),
                },
                _ => return Err(AmgError::parse(input, "expected `prefix add|del <p>`")),
            },
            "toupper" => LocalOption::ToUpper,
            "tolower" => LocalOption::ToLower,
            "lchmod" => match words.as_slice() {
                [mode] => LocalOption::Lchmod(
                    parse_mode(mode).ok_or_else(|| AmgError::parse(input, "invalid mode"))?,
                ),
                _ => return Err(AmgError::parse(input, "lchmod needs one mode")),
            },
            "tiff2gts" => LocalOption::Format(FormatConversion::Tiff2Gts),
            "gts2tiff" => LocalOption::Format(FormatConversion::Gts2Tiff),
            "wmo2ascii" => LocalOption::Format(FormatConversion::Wmo2Ascii),
            "afw2wmo" => LocalOption::Format(FormatConversion::Afw2Wmo),
            "fax2gts" => {
                let skip = match words.first() {
                    Some(n) => n
                        .parse()
                        .map_err(|_| AmgError::parse(input, "fax2gts takes a byte count"))?,
                    None => 0,
                };
                LocalOption::Format(FormatConversion::Fax2Gts(skip))
            }
            "grib2wmo" => {
                let cccc = words.first().map(|c| c.to_string());
                if cccc.as_ref().is_some_and(|c| c.len() != 4) {
                    return Err(AmgError::parse(input, "grib2wmo centre must be 4 letters"));
                }
                LocalOption::Format(FormatConversion::Grib2Wmo(cccc))
            }
            "extract" => {
                let mut flags = ExtractFlags::default();
                let mut iter = words.iter().peekable();
                while let Some(w) = iter.peek() {
                    let Some(letters) = w.strip_prefix('-') else {
                        break;
                    };
                    for c in letters.chars() {
                        match c {
                            'c' => flags.crc = true,
                            'n' => flags.unique = true,
                            'f' => flags.full_date = true,
                            's' => flags.soh_etx = true,
                            'r' => flags.report_type = true,
                            _ => {
                                return Err(AmgError::parse(
                                    input,
                                    format!("unknown extract flag `{}`", c),
                                ))
                            }
                        }
                    }
                    iter.next();
                }
                let Some(kind) = iter.next() else {
                    return Err(AmgError::parse(input, "extract needs a type"));
                };
                let kind = ExtractType::parse(kind)
                    .ok_or_else(|| AmgError::parse(input, "unknown extract type"))?;
                LocalOption::Extract(ExtractSpec {
                    flags,
                    kind,
                    filter: iter.next().map(|f| f.to_string()),
                })
            }
            "assemble" => {
                let [kind, template] = words.as_slice() else {
                    return Err(AmgError::parse(input, "assemble needs a type and a name"));
                };
                let (kind, numbered) = numbered(kind);
                LocalOption::Assemble(AssembleSpec {
                    kind: AssembleType::parse(kind)
                        .ok_or_else(|| AmgError::parse(input, "unknown assemble type"))?,
                    numbered,
                    name_template: template.to_string(),
                })
            }
            "convert" => {
                let [kind] = words.as_slice() else {
                    return Err(AmgError::parse(input, "convert needs one type"));
                };
                let (kind, numbered) = numbered(kind);
                LocalOption::Convert(ConvertSpec {
                    kind: ConvertType::parse(kind)
                        .ok_or_else(|| AmgError::parse(input, "unknown convert type"))?,
                    numbered,
                })
            }
            _ => return Err(AmgError::parse(input, "unknown option")),
        };
        Ok(option)
    }

    /// Keyword used in production log records
    pub fn keyword(&self) -> &'static str {
        match self {
            LocalOption::Rename { .. } => "rename",
            LocalOption::SRename { .. } => "srename",
            LocalOption::Exec(_) => "exec",
            LocalOption::Basename { .. } => "basename",
            LocalOption::Extension { .. } => "extension",
            LocalOption::Prefix { .. } => "prefix",
            LocalOption::ToUpper => "toupper",
            LocalOption::ToLower => "tolower",
            LocalOption::Lchmod(_) => "lchmod",
            LocalOption::Format(f) => f.name(),
            LocalOption::Extract(_) => "extract",
            LocalOption::Assemble(_) => "assemble",
            LocalOption::Convert(_) => "convert",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_variants() {
        assert_eq!(
            LocalOption::parse("  rename r1 overwrite").unwrap(),
            LocalOption::Rename {
                rule: "r1".into(),
                flags: RenameFlags {
                    overwrite: true,
                    with_path: false
                }
            }
        );
        let opt = LocalOption::parse("srename *.txt %*1.dat with_path").unwrap();
        assert!(matches!(
            opt,
            LocalOption::SRename { ref filter, flags: RenameFlags { with_path: true, .. }, .. } if filter == "*.txt"
        ));
        assert!(LocalOption::parse("rename").is_err());
        assert!(LocalOption::parse("rename r1 bogus").is_err());
    }

    #[test]
    fn test_exec_modifiers() {
        let LocalOption::Exec(spec) = LocalOption::parse("execD -t 30 -L -s gzip %s").unwrap() else {
            panic!("not exec");
        };
        assert!(spec.delete_all_on_error);
        assert!(!spec.delete_each);
        assert_eq!(spec.timeout, Some(30));
        assert_eq!(spec.lock, Some(ExecLock::All));
        assert!(spec.save_failed);
        assert_eq!(spec.command, "gzip %s");
        assert_eq!(spec.substitutions(), 1);

        let LocalOption::Exec(spec) = LocalOption::parse("exec -d -s /bin/false %s").unwrap() else {
            panic!("not exec");
        };
        assert!(spec.delete_each && spec.save_failed);
        assert_eq!(spec.command, "/bin/false %s");

        let LocalOption::Exec(spec) = LocalOption::parse("execd -t5 cat %s %s").unwrap() else {
            panic!("not exec");
        };
        assert!(spec.delete_each);
        assert_eq!(spec.timeout, Some(5));
        assert_eq!(spec.substitutions(), 2);

        assert!(LocalOption::parse("exec -s").is_err());
        assert!(LocalOption::parse("execx ls").is_err());
    }

    #[test]
    fn test_lchmod_modes() {
        assert_eq!(LocalOption::parse("lchmod 644").unwrap(), LocalOption::Lchmod(0o644));
        assert_eq!(LocalOption::parse("lchmod 4755").unwrap(), LocalOption::Lchmod(0o4755));
        assert!(LocalOption::parse("lchmod 648").is_err());
        assert!(LocalOption::parse("lchmod 64").is_err());
    }

    #[test]
    fn test_extract_assemble_convert() {
        let opt = LocalOption::parse("extract -cn -r WMO+CHK S*").unwrap();
        let LocalOption::Extract(spec) = opt else { panic!() };
        assert!(spec.flags.crc && spec.flags.unique && spec.flags.report_type);
        assert_eq!(spec.kind, ExtractType::WmoChk);
        assert_eq!(spec.filter.as_deref(), Some("S*"));

        let LocalOption::Assemble(spec) = LocalOption::parse("assemble ASCII+nnn all_%04d").unwrap() else {
            panic!()
        };
        assert!(spec.numbered);
        assert_eq!(spec.kind, AssembleType::Ascii);

        let LocalOption::Convert(spec) = LocalOption::parse("convert dos2unix").unwrap() else {
            panic!()
        };
        assert_eq!(spec.kind, ConvertType::Dos2Unix);
        assert!(!spec.numbered);

        assert!(LocalOption::parse("extract XYZ").is_err());
        assert!(LocalOption::parse("convert sohetx+abc").is_err());
    }

    #[test]
    fn test_formats_and_unknown() {
        assert_eq!(
            LocalOption::parse("fax2gts 128").unwrap(),
            LocalOption::Format(FormatConversion::Fax2Gts(128))
        );
        assert_eq!(
            LocalOption::parse("grib2wmo EDZW").unwrap(),
            LocalOption::Format(FormatConversion::Grib2Wmo(Some("EDZW".into())))
        );
        assert!(LocalOption::parse("grib2wmo TOOLONG").is_err());
        assert!(LocalOption::parse("Toupper").is_err());
        assert!(matches!(
            LocalOption::parse("frobnicate"),
            Err(AmgError::Parse { .. })
        ));
    }
}
