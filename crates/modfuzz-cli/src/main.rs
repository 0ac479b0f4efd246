//! Command `modfuzz` tests a program's compatibility with Go 1.11+ module
//! support. It runs the subject command under every permutation of
//! `GO111MODULE`, `GOFLAGS`, `GOPATH` selection, execution from a module
//! directory, and working-directory placement, then reports pass/fail with
//! per-axis cause attribution.
//!
//! Basic test:
//!
//!   modfuzz -- /path/to/subject --subject_flag arg
//!
//! Run each scenario with a 10 second timeout:
//!
//!   modfuzz --timeout 10 -- /path/to/subject
//!
//! Display verbose results (passes, full errors, go env captures):
//!
//!   modfuzz -v -- /path/to/subject

use anyhow::{bail, Context, Result};
use clap::Parser;
use modfuzz_core::{remove_tree_safer, Stage};
use modfuzz_permute::permute;
use modfuzz_runner::{results_json, summarize, ProcessExecutor, RunRecord, Scenario};
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PROG_NAME: &str = "modfuzz";

#[derive(Parser)]
#[command(
    name = PROG_NAME,
    version,
    about = "Asserts Go code compatibility with v1.11+ module scenarios",
    after_help = "Example:\n  modfuzz -- /path/to/cmd -flag1 arg1 arg2"
)]
struct Cli {
    /// Number of seconds to allow the command to run in each scenario
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Display standard output from scenarios that fail
    #[arg(short = 'o', long)]
    stdout: bool,

    /// Display additional status/result information
    #[arg(short, long)]
    verbose: bool,

    /// Subject command and its arguments
    #[arg(trailing_var_arg = true)]
    subject: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(all_passed) => {
            if all_passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(err) => {
            eprintln!("{}: {:#}", PROG_NAME, err);
            ExitCode::from(1)
        }
    }
}

/// Runs every scenario sequentially and prints the report. Returns whether
/// all scenarios passed; infrastructural failures (staging, diagnostics)
/// propagate as errors and fail the whole invocation.
fn run(cli: &Cli) -> Result<bool> {
    if cli.subject.is_empty() {
        bail!(
            "command not specified (example: {} -- /path/to/cmd -flag1 arg1 arg2)",
            PROG_NAME
        );
    }

    let stage = Stage::new_temp(PROG_NAME)?;
    let timeout = Duration::from_secs(cli.timeout);

    let base = Scenario::new(Arc::new(ProcessExecutor), stage.path());
    let scenarios = permute(&base);
    tracing::info!(
        scenarios = scenarios.len(),
        stage = %stage.path().display(),
        "enumerated scenario permutations"
    );

    let mut records: Vec<RunRecord> = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        scenario
            .before_run(&stage)
            .with_context(|| format!("failed to prepare environment for scenario [{}]", scenario))?;

        // Each scenario gets its own fresh timeout window.
        let record = scenario
            .run(timeout, &cli.subject)
            .with_context(|| format!("failed to run scenario [{}]", scenario))?;
        records.push(record);
    }

    let summary = summarize(&records);
    print_report(cli, &records, &summary);

    if summary.all_passed() {
        remove_tree_safer(stage.path())?;
    } else {
        let payload = results_json(&records, &summary);
        let results_path = stage.path().join("results.json");
        fs::write(&results_path, serde_json::to_vec_pretty(&payload)?)
            .with_context(|| format!("failed to write {}", results_path.display()))?;
        println!(
            "- Scenario stage will not be deleted so it can be inspected or used for manual \
             tests. Location: {}",
            stage.path().display()
        );
    }

    Ok(summary.all_passed())
}

fn print_report(cli: &Cli, records: &[RunRecord], summary: &modfuzz_runner::Summary) {
    let hr = |n: usize| {
        if n > 0 {
            print!("\n----\n");
        }
    };

    for (n, record) in records.iter().enumerate() {
        if record.passed() {
            if cli.verbose {
                hr(n);
                println!("PASS: {}", record.scenario);
            }
        } else {
            hr(n);
            println!("FAIL (exit code {}): {}", record.code, record.scenario);
            if cli.verbose {
                if let Some(failure) = &record.failure {
                    println!("\tErr: {}", failure);
                }
            }
            println!("\tStderr (len={}): {}", record.stderr.len(), record.stderr);
            if cli.stdout {
                println!("\tStdout (len={}): {}", record.stdout.len(), record.stdout);
            }
            if cli.verbose {
                println!("\tgo env: {}", record.go_env.trim());
            }
        }
    }

    println!("\n- {}/{} scenarios passed", summary.passes, summary.total);

    if cli.verbose && summary.passes > 0 {
        print!("{}", summary.pass_causes.render("- Occurrences in passes:"));
    }
    if !summary.all_passed() {
        print!(
            "{}",
            summary.fail_causes.render("- Occurrences in failures:")
        );
    }
}
