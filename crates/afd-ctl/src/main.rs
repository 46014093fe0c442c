//! # afdctl
//!
//! Operator commands for a running AFD.

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use afd_config::logging::{init_logging, LogLevel};
use afd_config::paths::WorkDir;
use afd_config::Config;
use afd_ctl::afdcfg::{AfdCfg, Feature};
use afd_ctl::permissions::{get_permissions, PermissionStatus, Permissions};
use afd_ctl::{
    check_afd_heartbeat, current_user, exit_code, jobs, passwd, Controller, CtlError, Verb, CFG_FILE_ERROR, INCORRECT,
    PERMISSION_DENIED_STR,
};
use afd_log::LogSinks;
use afd_state::{PasswordEncoding, AFD_ACTIVE_FILE};

#[derive(Parser)]
#[command(name = "afdctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// AFD work directory (default: $AFD_WORK_DIR, then ~/.afd)
    #[arg(short = 'w', long, global = true, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Look up this afd.users profile instead of the login name
    #[arg(short = 'u', long, global = true)]
    profile: Option<String>,

    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commands on destination hosts (FSA)
    Host {
        #[arg(value_enum)]
        action: HostAction,
        #[arg(required = true, value_name = "HOST_ALIAS")]
        aliases: Vec<String>,
    },

    /// Commands on scanned directories (FRA)
    Dir {
        #[arg(value_enum)]
        action: DirAction,
        #[arg(required = true, value_name = "DIR_ALIAS")]
        aliases: Vec<String>,
    },

    /// Start or stop the AMG
    Amg {
        #[arg(value_enum)]
        action: StartStop,
    },

    /// Start or stop the FD
    Fd {
        #[arg(value_enum)]
        action: StartStop,
    },

    /// Ask init_afd to shut everything down
    Shutdown,

    /// Replace one of a host's real hostnames
    RealHostname {
        alias: String,
        /// 0 for the first, 1 for the second hostname
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        index: u8,
        name: String,
    },

    /// Global feature switches
    Cfg {
        #[command(subcommand)]
        command: CfgCommand,
    },

    /// Store a password for user@host
    SetPw {
        user: String,
        host: String,
        /// 0 plain, 1 legacy, 2 XOR
        #[arg(short, long, default_value = "2")]
        encoding: char,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Show a stored password
    ViewPw { user: String, host: String },

    /// Probe the AFD heartbeat (exit 0 none, 1 active, 2 timeout, 3 stopped)
    Heartbeat {
        /// Seconds to wait for the heartbeat to move
        #[arg(long)]
        wait: Option<u64>,
        /// Expected command name of init_afd
        #[arg(long)]
        name: Option<String>,
    },

    /// List known jobs
    Jobs {
        #[arg(long)]
        host: Option<String>,
        /// One JSON document instead of text lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HostAction {
    Enable,
    Disable,
    StartTransfer,
    StopTransfer,
    StartQueue,
    StopQueue,
    Switch,
    Retry,
    Debug,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirAction {
    Enable,
    Disable,
    Start,
    Stop,
    Rescan,
}

#[derive(Clone, Copy, ValueEnum)]
enum StartStop {
    Start,
    Stop,
}

#[derive(Clone, Copy, ValueEnum)]
enum FeatureArg {
    Archive,
    Retrieve,
    HostWarnTime,
    CreateSourceDir,
    CreateTargetDir,
    SimulateSendMode,
    DirWarnTime,
}

impl From<FeatureArg> for Feature {
    fn from(f: FeatureArg) -> Self {
        match f {
            FeatureArg::Archive => Feature::Archive,
            FeatureArg::Retrieve => Feature::Retrieve,
            FeatureArg::HostWarnTime => Feature::HostWarnTime,
            FeatureArg::CreateSourceDir => Feature::CreateSourceDir,
            FeatureArg::CreateTargetDir => Feature::CreateTargetDir,
            FeatureArg::SimulateSendMode => Feature::SimulateSendMode,
            FeatureArg::DirWarnTime => Feature::DirWarnTime,
        }
    }
}

#[derive(Subcommand)]
enum CfgCommand {
    /// Print every switch
    Status,
    Enable {
        #[arg(value_enum, required = true)]
        features: Vec<FeatureArg>,
    },
    Disable {
        #[arg(value_enum, required = true)]
        features: Vec<FeatureArg>,
    },
    /// Errors before a host is shown offline
    ErrorsOffline { value: u8 },
    /// Write the switches to a file
    Save { file: PathBuf },
    /// Restore switches written by `save`
    Recover { file: PathBuf },
}

impl HostAction {
    fn verb(self) -> Verb {
        match self {
            HostAction::Enable => Verb::EnableHost,
            HostAction::Disable => Verb::DisableHost,
            HostAction::StartTransfer => Verb::StartTransfer,
            HostAction::StopTransfer => Verb::StopTransfer,
            HostAction::StartQueue => Verb::StartQueue,
            HostAction::StopQueue => Verb::StopQueue,
            HostAction::Switch => Verb::SwitchHost,
            HostAction::Retry => Verb::RetryHost,
            HostAction::Debug => Verb::DebugHost,
        }
    }
}

impl DirAction {
    fn verb(self) -> Verb {
        match self {
            DirAction::Enable => Verb::EnableDirectory,
            DirAction::Disable => Verb::DisableDirectory,
            DirAction::Start => Verb::StartDirectory,
            DirAction::Stop => Verb::StopDirectory,
            DirAction::Rescan => Verb::RescanDirectory,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("afdctl: {:#}", e);
            ExitCode::from(INCORRECT)
        }
    }
}

fn load_permissions(work: &WorkDir, profile: Option<&str>) -> Result<Permissions> {
    let (status, permissions) = get_permissions(&work.user_file(), &current_user(), profile)
        .context("Failed to read afd.users")?;
    match status {
        PermissionStatus::NoAccess => eprintln!("{} access this AFD", PERMISSION_DENIED_STR),
        PermissionStatus::None => eprintln!("{} run any command", PERMISSION_DENIED_STR),
        PermissionStatus::Success | PermissionStatus::Incorrect => {}
    }
    Ok(permissions)
}

fn run(cli: Cli) -> Result<u8> {
    let work_dir = Config::resolve_work_dir(cli.work_dir.as_deref());
    let config = Config::load_from(&work_dir)
        .with_context(|| format!("Failed to load configuration from {}", work_dir.display()))?;
    let work = config.work_dir();

    // The probe must work without permissions and without touching the tree.
    let command = match cli.command {
        Commands::Heartbeat { wait, name } => {
            let wait = Duration::from_secs(wait.unwrap_or(config.heartbeat.wait_time_secs));
            let liveness = check_afd_heartbeat(&work.fifo_dir().join(AFD_ACTIVE_FILE), wait, name.as_deref())?;
            println!("{}", liveness.describe());
            return Ok(liveness as u8);
        }
        other => other,
    };

    work.ensure_layout().context("Failed to create work directory layout")?;
    let permissions = load_permissions(&work, cli.profile.as_deref())?;
    let user = current_user();
    let logs = LogSinks::files(&work.log_dir(), &config.log).context("Failed to open log files")?;

    match command {
        Commands::Host { action, aliases } => {
            let ctl = Controller::new(work, user, logs, permissions);
            Ok(exit_code(ctl.run(&[action.verb()], &aliases, &[])?))
        }
        Commands::Dir { action, aliases } => {
            let ctl = Controller::new(work, user, logs, permissions);
            Ok(exit_code(ctl.run(&[action.verb()], &[], &aliases)?))
        }
        Commands::Amg { action } => {
            let verb = match action {
                StartStop::Start => Verb::StartAmg,
                StartStop::Stop => Verb::StopAmg,
            };
            let ctl = Controller::new(work, user, logs, permissions);
            Ok(exit_code(ctl.run(&[verb], &[], &[])?))
        }
        Commands::Fd { action } => {
            let verb = match action {
                StartStop::Start => Verb::StartFd,
                StartStop::Stop => Verb::StopFd,
            };
            let ctl = Controller::new(work, user, logs, permissions);
            Ok(exit_code(ctl.run(&[verb], &[], &[])?))
        }
        Commands::Shutdown => {
            let ctl = Controller::new(work, user, logs, permissions);
            Ok(exit_code(ctl.run(&[Verb::Shutdown], &[], &[])?))
        }
        Commands::RealHostname { alias, index, name } => {
            let ctl = Controller::new(work, user, logs, permissions);
            Ok(exit_code(ctl.change_real_hostname(&alias, index as usize, &name)?))
        }
        Commands::Cfg { command } => cfg(&work, &permissions, user, logs, command),
        Commands::SetPw {
            user: pw_user,
            host,
            encoding,
            password,
        } => {
            let encoding = u8::try_from(encoding)
                .ok()
                .and_then(PasswordEncoding::from_tag)
                .with_context(|| format!("Unknown password encoding '{}'", encoding))?;
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            match passwd::set_pw(&work, &permissions, &user, &logs, &pw_user, &host, &password, encoding) {
                Ok(()) => Ok(0),
                Err(CtlError::Permission(what)) => {
                    eprintln!("{} {}", PERMISSION_DENIED_STR, what);
                    Ok(1)
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::ViewPw { user: pw_user, host } => match passwd::view_pw(&work, &permissions, &pw_user, &host) {
            Ok(Some(password)) => {
                println!("{}", password);
                Ok(0)
            }
            Ok(None) => {
                eprintln!("No password stored for {}@{}", pw_user, host);
                Ok(1)
            }
            Err(CtlError::Permission(what)) => {
                eprintln!("{} {}", PERMISSION_DENIED_STR, what);
                Ok(1)
            }
            Err(e) => Err(e.into()),
        },
        Commands::Jobs { host, json } => {
            let jobs = jobs::list_jobs(&work, host.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                for job in jobs {
                    println!("{}", job);
                }
            }
            Ok(0)
        }
        Commands::Heartbeat { .. } => unreachable!("handled above"),
    }
}

fn cfg(work: &WorkDir, permissions: &Permissions, user: String, logs: LogSinks, command: CfgCommand) -> Result<u8> {
    if !matches!(command, CfgCommand::Status) && !permissions.allows("afdcfg") {
        eprintln!("{} change the AFD configuration", PERMISSION_DENIED_STR);
        return Ok(1);
    }
    let mut cfg = AfdCfg::attach(work, user, logs)?;
    match command {
        CfgCommand::Status => {
            for line in cfg.status()? {
                println!("{}", line);
            }
        }
        CfgCommand::Enable { features } => {
            for feature in features {
                cfg.set(feature.into(), true)?;
            }
        }
        CfgCommand::Disable { features } => {
            for feature in features {
                cfg.set(feature.into(), false)?;
            }
        }
        CfgCommand::ErrorsOffline { value } => cfg.set_errors_offline(value)?,
        CfgCommand::Save { file } => {
            if let Err(e) = cfg.save(&file) {
                return file_error(&file, e);
            }
        }
        CfgCommand::Recover { file } => {
            if let Err(e) = cfg.recover(&file) {
                return file_error(&file, e);
            }
        }
    }
    Ok(0)
}

fn file_error(file: &std::path::Path, e: CtlError) -> Result<u8> {
    match e {
        CtlError::Io(io) => {
            eprintln!("Failed to open {}: {}", file.display(), io);
            Ok(CFG_FILE_ERROR)
        }
        other => Err(other.into()),
    }
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
