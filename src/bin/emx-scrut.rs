//! emx-scrut CLI
//!
//! Run testcase documents and report the outcome of every testcase.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use emx_scrut::{report, KillSignal, OutputStream, RunConfig, Status, TestCaseConfig, TestRunner};
use tracing_subscriber::EnvFilter;

/// Environment variable with a log filter, overrides `-v`
const LOG_ENV: &str = "EMX_SCRUT_LOG";

#[derive(Parser, Debug)]
#[command(name = "emx-scrut")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Run shell testcases from JSON documents and match their output")]
struct Cli {
    /// Document or directory of documents
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Only run documents whose name contains this string
    #[arg(short = 'f', long)]
    filter: Option<String>,

    /// Keep session directories after the run (for debugging)
    #[arg(short = 'k', long)]
    keep: bool,

    /// Persistent work directory shared by all documents
    #[arg(short = 'w', long = "work-directory")]
    work_directory: Option<PathBuf>,

    /// Documents run in parallel [default: one per CPU]
    #[arg(short = 'j', long, default_value_t = 0)]
    jobs: usize,

    /// File extensions to match
    #[arg(long = "ext", default_value = ".json")]
    extensions: Vec<String>,

    /// Shell to run testcases with [default: $SCRUT_DEFAULT_SHELL or /bin/bash]
    #[arg(long)]
    shell: Option<PathBuf>,

    /// Timeout of every testcase (e.g. "10s", "1m30s")
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Timeout of all testcases of a document [default: 15m]
    #[arg(long, value_parser = parse_duration)]
    total_timeout: Option<Duration>,

    /// Stream expectations are applied to: stdout, stderr or combined
    #[arg(long)]
    output_stream: Option<OutputStream>,

    /// Keep CRLF line endings instead of normalizing them to LF
    #[arg(long)]
    keep_crlf: bool,

    /// Signal for detached testcases when their document ends ("off" to keep them running)
    #[arg(long)]
    detached_kill_signal: Option<KillSignal>,

    /// Environment variables to set in every testcase (KEY=VALUE)
    #[arg(short = 'e', long = "env")]
    env_vars: Vec<String>,

    /// Show number of testcases without running them
    #[arg(long)]
    count: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    emx_scrut::parse_duration(s).map_err(|e| e.to_string())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut testcase_overrides = TestCaseConfig {
        timeout: cli.timeout,
        output_stream: cli.output_stream,
        keep_crlf: cli.keep_crlf.then_some(true),
        detached_kill_signal: cli.detached_kill_signal,
        ..Default::default()
    };
    for var in &cli.env_vars {
        let Some((key, value)) = var.split_once('=') else {
            bail!("invalid environment variable {:?}, expected KEY=VALUE", var);
        };
        testcase_overrides
            .environment
            .insert(key.to_string(), value.to_string());
    }

    let mut config = RunConfig {
        path: cli.path,
        filter: cli.filter,
        extensions: cli.extensions,
        work_directory: cli.work_directory,
        keep: cli.keep,
        jobs: cli.jobs,
        testcase_overrides,
        ..Default::default()
    };
    config.document_overrides.shell = cli.shell;
    config.document_overrides.total_timeout = cli.total_timeout;

    let runner = TestRunner::new(config);

    if cli.count {
        let count = runner.count_tests().context("counting testcases")?;
        println!("Found {} testcase(s)", count);
        return Ok(ExitCode::SUCCESS);
    }

    let result = runner.run_all().context("running documents")?;

    for document in &result.documents {
        for outcome in &document.outcomes {
            match outcome.status {
                Status::Passed => {
                    println!("PASS  {} ({}ms)", outcome.name(), outcome.duration.as_millis())
                }
                Status::Skipped => println!("SKIP  {}", outcome.name()),
                Status::Failed(ref failure) => {
                    println!("FAIL  {} - {}", outcome.name(), failure);
                    if !outcome.title.is_empty() {
                        println!("      at {}", outcome.position());
                    }
                    for line in report::failure_details(outcome, failure).lines() {
                        println!("      {}", line);
                    }
                }
            }
        }
        for dir in &document.kept_directories {
            println!("      kept: {}", dir.display());
        }
    }
    for error in &result.errors {
        println!("ERROR {}", error);
    }

    println!();
    println!("{}", result.summary_line());

    Ok(if result.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
