//! Multi-agent orchestrator CLI.
//!
//! Runs are rooted at `<state-dir>/runs/<name>/`; directory existence
//! decides new vs. resumed. Exit codes are stable: 0 success, 10 blocked on
//! human input (re-invoke unchanged to resume), 11 budget exhausted, 1 any
//! other failure.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use conclave::exit_codes;
use conclave::io::config::RunPattern;
use conclave::logging;
use conclave::session::{RunOptions, execute_run, init_run, run_status};

#[derive(Parser)]
#[command(
    name = "conclave",
    version,
    about = "Multi-agent generate/critique/adjudicate orchestrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a run directory with a goal template to edit.
    Init {
        /// Run name.
        name: String,
        #[arg(long, default_value = ".conclave")]
        state_dir: PathBuf,
    },
    /// Start or resume a run.
    Run {
        /// Run name.
        name: String,
        /// State directory holding configuration and runs.
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Configuration file (default: <state-dir>/conclave.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Profile overlay from <state-dir>/profiles/<name>.toml.
        #[arg(long)]
        profile: Option<String>,
        /// Run pattern override: pipeline, sequential, or parallel.
        #[arg(long)]
        pattern: Option<String>,
        /// Turn budget override for this invocation.
        #[arg(long)]
        turns: Option<u32>,
        /// Iteration budget override for this invocation.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Report the latest recorded outcome of a run.
    Status {
        /// Run name.
        name: String,
        #[arg(long, default_value = ".conclave")]
        state_dir: PathBuf,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { name, state_dir } => {
            let goal_path = init_run(&name, &state_dir)?;
            println!(
                "created {}; edit it, then run `conclave run {name}`",
                goal_path.display()
            );
            Ok(exit_codes::OK)
        }
        Command::Run {
            name,
            state_dir,
            config,
            profile,
            pattern,
            turns,
            max_iterations,
        } => {
            let pattern = pattern.as_deref().map(parse_pattern).transpose()?;
            let opts = RunOptions {
                name,
                state_dir,
                config_path: config,
                profile,
                pattern,
                turns,
                max_iterations,
            };
            let report = execute_run(&opts, None, None)?;
            match &report.summary {
                Some(summary) => println!("{}: {summary}", report.status),
                None => println!("{}", report.status),
            }
            Ok(report.exit_code)
        }
        Command::Status { name, state_dir } => {
            println!("{}", run_status(&name, &state_dir)?);
            Ok(exit_codes::OK)
        }
    }
}

fn parse_pattern(raw: &str) -> Result<RunPattern> {
    match raw {
        "pipeline" => Ok(RunPattern::Pipeline),
        "sequential" => Ok(RunPattern::Sequential),
        "parallel" => Ok(RunPattern::Parallel),
        other => Err(anyhow::anyhow!(
            "unknown pattern '{other}' (expected pipeline, sequential, or parallel)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "conclave",
            "run",
            "launch-brief",
            "--pattern",
            "parallel",
            "--turns",
            "8",
        ]);
        match cli.command {
            Command::Run {
                name,
                pattern,
                turns,
                ..
            } => {
                assert_eq!(name, "launch-brief");
                assert_eq!(pattern.as_deref(), Some("parallel"));
                assert_eq!(turns, Some(8));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn unknown_pattern_is_rejected() {
        assert!(parse_pattern("circular").is_err());
        assert_eq!(parse_pattern("pipeline").expect("ok"), RunPattern::Pipeline);
    }
}
