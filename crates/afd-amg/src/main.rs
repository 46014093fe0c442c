//! # amg
//!
//! Automatic Message Generator: runs the local options of AFD jobs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use afd_amg::daemon::{self, Daemon};
use afd_amg::{Batch, JobContext, Pipeline, RuleSet};
use afd_config::logging::{init_logging, LogLevel};
use afd_config::Config;
use afd_log::LogSinks;

/// Exit code of a fatal error
const INCORRECT: u8 = 255;

#[derive(Parser)]
#[command(name = "amg")]
#[command(version, about, long_about = None)]
struct Cli {
    /// AFD work directory (default: $AFD_WORK_DIR, then ~/.afd)
    #[arg(short = 'w', long, global = true, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process pool batches until SIGINT/SIGTERM
    Daemon,

    /// Run a list of options once against one batch directory
    Process {
        /// Batch directory
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Job id (hex)
        #[arg(long, value_parser = parse_hex, default_value = "0")]
        job_id: u32,

        /// Host alias used in delete records
        #[arg(long, default_value = "")]
        host_alias: String,

        /// Source directory URL for `with_path`
        #[arg(long, default_value = "")]
        dir_url: String,

        /// Local option, repeat in order
        #[arg(short = 'o', long = "option", value_name = "OPTION")]
        options: Vec<String>,
    },
}

fn parse_hex(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("amg: {:#}", e);
            ExitCode::from(INCORRECT)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let work_dir = Config::resolve_work_dir(cli.work_dir.as_deref());
    let config = Config::load_from(&work_dir)
        .with_context(|| format!("Failed to load configuration from {}", work_dir.display()))?;

    match cli.command {
        Commands::Daemon => {
            daemon::install_signal_handlers()?;
            let mut daemon = Daemon::new(config).context("Failed to start AMG")?;
            daemon.run()?;
            Ok(0)
        }
        Commands::Process {
            dir,
            job_id,
            host_alias,
            dir_url,
            options,
        } => process(&config, &dir, job_id, host_alias, dir_url, &options),
    }
}

fn process(
    config: &Config,
    dir: &Path,
    job_id: u32,
    host_alias: String,
    dir_url: String,
    options: &[String],
) -> Result<u8> {
    let work = config.work_dir();
    let rules = RuleSet::load(&work.rename_rule_file()).context("Failed to load rename rules")?;
    let logs = LogSinks::files(&work.log_dir(), &config.log).context("Failed to open log files")?;
    let pipeline = Pipeline::new(work, config.exec.clone(), Arc::new(rules), logs);

    let mut batch = Batch::scan(dir).with_context(|| format!("Failed to scan {}", dir.display()))?;
    let ctx = JobContext {
        job_id,
        host_alias,
        dir_url,
        priority: b'9',
        creation_time: afd_log::now(),
        ..Default::default()
    };
    let outcome = pipeline.run(&ctx, options, &mut batch);

    println!(
        "{} file(s), {} byte(s), {} failure(s), {} option(s) skipped{}",
        outcome.files_to_send,
        outcome.file_size,
        outcome.failures,
        outcome.skipped,
        if outcome.aborted { ", aborted" } else { "" }
    );
    Ok((outcome.failures + outcome.skipped).min(254) as u8)
}
