//! reprobuild: record a reproducible-build manifest for a native build
//!
//! Two modes share one binary:
//! - `reprobuild [-o record.yaml] [-l /tmp] <command>...` runs the build
//!   under observation and writes the record;
//! - `reprobuild -b [-o out.tar.gz] <record.yaml>` packages an existing
//!   record, its build tree and custom dependencies into an archive.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use repro_core::BuildRecord;
use repro_platform::join_command;
use reprobuild_lib::{BuildInfo, bundle, postprocess, preprocess, tracker};

#[derive(Parser)]
#[command(name = "reprobuild")]
#[command(version, about = "Record a reproducible-build manifest for a native build command")]
struct Cli {
    /// Output file for the build record (the archive path in bundle mode)
    #[arg(short, long, default_value = "build_record.yaml")]
    output: PathBuf,

    /// Directory for the trace log, interceptor library and commit log
    #[arg(short, long = "logdir", default_value = "/tmp")]
    logdir: PathBuf,

    /// Create a bundle from an existing build record
    #[arg(short, long)]
    bundle: bool,

    /// Build command to observe (or the record file in bundle mode)
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

fn main() {
    init_logging();

    // Exit codes are part of the interface: 0 for help, 1 for everything
    // that goes wrong, never clap's default 2.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprint!("{}", e.render());
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
    };

    match run(cli) {
        Ok(()) => {}
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

/// Log level from `LOG_LEVEL`, default INFO.
fn init_logging() {
    let level = match std::env::var("LOG_LEVEL")
        .unwrap_or_default()
        .to_uppercase()
        .as_str()
    {
        "DEBUG" => Level::DEBUG,
        "WARN" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if cli.bundle {
        run_bundle(&cli)
    } else {
        run_track(&cli)
    }
}

/// Bundle mode: the positional argument is an existing record file.
fn run_bundle(cli: &Cli) -> Result<()> {
    let record_path = PathBuf::from(&cli.command[0]);
    let record = BuildRecord::load_from_file(&record_path)
        .with_context(|| format!("failed to load build record {}", record_path.display()))?;

    bundle::create_bundle(&record, &cli.output)
        .with_context(|| format!("failed to create bundle {}", cli.output.display()))?;
    Ok(())
}

/// Track mode: preprocess, trace, resolve, postprocess, persist.
fn run_track(cli: &Cli) -> Result<()> {
    std::fs::create_dir_all(&cli.logdir)
        .with_context(|| format!("cannot create log directory {}", cli.logdir.display()))?;

    let build_command = join_command(&cli.command);
    let mut info = BuildInfo::new(build_command, cli.output.clone(), cli.logdir.clone());

    // Environment mutation happens here, before the runtime brings up its
    // worker threads.
    preprocess::prepare_environment(&mut info);
    preprocess::fix_makefile(&info);
    info.fill_record_metadata();

    let rt = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
    rt.block_on(tracker::track_build(&mut info))?;

    postprocess::fold_commit_log(&mut info);

    info.record
        .save_to_file(&cli.output)
        .with_context(|| format!("failed to write build record {}", cli.output.display()))?;

    info!(path = %cli.output.display(), "build record saved");
    Ok(())
}
