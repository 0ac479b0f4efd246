//! Scenario model and execution harness for Go module-mode fuzzing.
//!
//! A [`Scenario`] is one point in the combinatorial space of `GO111MODULE`,
//! `GOFLAGS`, `GOPATH` selection, module presence, and working-directory
//! placement. Scenarios are produced by the `modfuzz-permute` engine (the
//! model implements its [`Permutator`] contract), staged onto disk through
//! `modfuzz-core`, and executed through an injected [`Executor`] so tests
//! can fabricate subprocess outcomes.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use modfuzz_core::Stage;
use modfuzz_permute::Permutator;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Content of the staged module marker file.
const GO_MOD_CONTENTS: &str = "module wd\n";

/// Captured stdout/stderr is capped per stream; past this the read stops and
/// a truncation note is appended.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Sentinel exit code recorded while the subject has not run.
pub const CODE_NOT_RUN: i32 = -1;

// ---------------------------------------------------------------------------
// Process-execution collaborator
// ---------------------------------------------------------------------------

/// One subprocess invocation: program, arguments, environment overrides
/// layered over the ambient environment, and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

/// Outcome of one subprocess invocation.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Exit code, or [`CODE_NOT_RUN`] when no code is available (start
    /// failure, killed by signal, timeout).
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Set when the process could not be executed at all.
    pub error: Option<String>,
    /// Set when the per-run window elapsed before the process exited.
    pub timed_out: bool,
}

impl ExecOutcome {
    pub fn exited(code: i32, stdout: String, stderr: String) -> ExecOutcome {
        ExecOutcome {
            code,
            stdout,
            stderr,
            error: None,
            timed_out: false,
        }
    }
}

/// Runs commands and buffers their output. Substitutable with a scripted
/// double that fabricates outcomes without spawning processes.
pub trait Executor: Send + Sync {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> ExecOutcome;
}

/// The real collaborator: spawns the process with piped output, waits with
/// a timeout, and kills + reaps on expiry.
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> ExecOutcome {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecOutcome {
                    code: CODE_NOT_RUN,
                    stdout: String::new(),
                    stderr: String::new(),
                    error: Some(format!("failed to start {}: {}", spec.program, e)),
                    timed_out: false,
                }
            }
        };

        // Drain both pipes while waiting: a child writing more than the OS
        // pipe buffer would otherwise block on write and outlive its window.
        let stdout_reader = spawn_reader(child.stdout.take(), "stdout");
        let stderr_reader = spawn_reader(child.stderr.take(), "stderr");

        let status = match child.wait_timeout(timeout) {
            Ok(status) => status,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return ExecOutcome {
                    code: CODE_NOT_RUN,
                    stdout: join_reader(stdout_reader),
                    stderr: join_reader(stderr_reader),
                    error: Some(format!("failed waiting on {}: {}", spec.program, e)),
                    timed_out: false,
                };
            }
        };
        let timed_out = status.is_none();
        if timed_out {
            let _ = child.kill();
            let _ = child.wait();
        }

        // Killing the child closes its pipe ends, so the readers finish
        // promptly even on timeout.
        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        match status {
            Some(status) => ExecOutcome {
                code: status.code().unwrap_or(CODE_NOT_RUN),
                stdout,
                stderr,
                error: None,
                timed_out: false,
            },
            None => ExecOutcome {
                code: CODE_NOT_RUN,
                stdout,
                stderr,
                error: Some(format!(
                    "{} did not exit within {}s",
                    spec.program,
                    timeout.as_secs()
                )),
                timed_out: true,
            },
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
    stream_name: &'static str,
) -> Option<thread::JoinHandle<String>> {
    pipe.map(|pipe| thread::spawn(move || read_bounded(pipe, stream_name)))
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn read_bounded<R: Read>(pipe: R, stream_name: &str) -> String {
    let mut buf = Vec::new();
    // A read error keeps whatever read_to_end already appended to buf.
    let _ = pipe
        .take(MAX_OUTPUT_BYTES as u64 + 1)
        .read_to_end(&mut buf);
    let truncated = buf.len() > MAX_OUTPUT_BYTES;
    buf.truncate(MAX_OUTPUT_BYTES);
    let mut out = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        out.push_str(&format!(
            "\n[truncated: {} exceeded {} bytes]",
            stream_name, MAX_OUTPUT_BYTES
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------------

/// GOPATH selection mode: how the `GOPATH` environment variable relates to
/// the scenario's working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GopathMode {
    /// `GOPATH` is the empty string.
    Absent,
    /// A file tree that may contain the working directory as a descendant,
    /// so the subject can run "from in the GOPATH".
    Usable,
    /// A valid path that never contains the working directory.
    Unused,
}

/// Working-directory placement relative to the usable GOPATH tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WdMode {
    InsideGopath,
    OutsideGopath,
}

/// The dimensions of variation a [`Scenario`] exposes to the permutation
/// engine, in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Go111Module,
    Goflags,
    Gopath,
    InModule,
    Wd,
}

/// One legal value for one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisValue {
    Go111Module(&'static str),
    Goflags(&'static str),
    Gopath(GopathMode),
    InModule(bool),
    Wd(WdMode),
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// One environment/filesystem configuration for the subject command.
///
/// The executor and stage root are configuration copied unchanged into every
/// permutation; `permute_id` is assigned by the engine after all axes are
/// fixed and keys the scenario's exclusive subtree under the stage root.
#[derive(Clone)]
pub struct Scenario {
    pub go111module: &'static str,
    pub goflags: &'static str,
    pub gopath: GopathMode,
    pub in_module: bool,
    pub wd: WdMode,

    executor: Arc<dyn Executor>,
    root_dir: PathBuf,
    permute_id: usize,
}

impl Scenario {
    /// A base scenario carrying only configuration. Axis values are filled
    /// in by the permutation engine.
    pub fn new(executor: Arc<dyn Executor>, root_dir: &Path) -> Scenario {
        Scenario {
            go111module: "",
            goflags: "",
            gopath: GopathMode::Absent,
            in_module: false,
            wd: WdMode::OutsideGopath,
            executor,
            root_dir: root_dir.to_path_buf(),
            permute_id: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.permute_id
    }

    fn scenario_dir(&self) -> PathBuf {
        self.root_dir.join(self.permute_id.to_string())
    }

    /// The GOPATH candidate that may contain the working directory.
    pub fn usable_gopath(&self) -> PathBuf {
        self.scenario_dir().join("usable_gopath")
    }

    /// The `GOPATH` environment value derived from the selection axis.
    /// Recomputed on every call; the axis fields are the single source of
    /// truth.
    pub fn gopath(&self) -> String {
        match self.gopath {
            GopathMode::Absent => String::new(),
            GopathMode::Usable => self.usable_gopath().to_string_lossy().into_owned(),
            GopathMode::Unused => self
                .scenario_dir()
                .join("unused_gopath")
                .to_string_lossy()
                .into_owned(),
        }
    }

    /// The working directory derived from the placement axis.
    pub fn wd(&self) -> PathBuf {
        match self.wd {
            WdMode::InsideGopath => self.usable_gopath().join("wd"),
            WdMode::OutsideGopath => self.scenario_dir().join("wd"),
        }
    }

    /// Stages the filesystem for this scenario: the working directory, plus
    /// a `go.mod` marker when the module-presence axis is set. Not retried
    /// on failure.
    pub fn before_run(&self, stage: &Stage) -> Result<()> {
        let wd = self.wd();
        if self.in_module {
            let marker = wd.join("go.mod");
            let rel = marker.strip_prefix(stage.path()).with_context(|| {
                format!(
                    "failed to get relative path from [{}] to [{}]",
                    stage.path().display(),
                    marker.display()
                )
            })?;
            stage
                .create_file_all(rel, GO_MOD_CONTENTS)
                .with_context(|| {
                    format!(
                        "failed to create go.mod in scenario [{}] working directory [{}]",
                        self,
                        wd.display()
                    )
                })?;
        } else {
            let rel = wd.strip_prefix(stage.path()).with_context(|| {
                format!(
                    "failed to get relative path from [{}] to [{}]",
                    stage.path().display(),
                    wd.display()
                )
            })?;
            stage.mkdir_all(rel).with_context(|| {
                format!(
                    "failed to create scenario [{}] working directory [{}]",
                    self,
                    wd.display()
                )
            })?;
        }
        Ok(())
    }

    fn env_overrides(&self) -> Vec<(String, String)> {
        vec![
            ("GO111MODULE".to_string(), self.go111module.to_string()),
            ("GOFLAGS".to_string(), self.goflags.to_string()),
            ("GOPATH".to_string(), self.gopath()),
        ]
    }

    /// Runs the scenario: `go env` for diagnostics first, then the subject
    /// command, both with the derived environment and working directory.
    /// Both commands share the scenario's single `timeout` window: the
    /// subject gets whatever the diagnostic left of it.
    ///
    /// A diagnostic failure aborts the call with an error and the subject is
    /// never invoked. Subject failure (start failure, non-zero exit,
    /// timeout) is recorded on the returned [`RunRecord`] instead.
    ///
    /// `args` names the subject command; the caller guarantees it is
    /// non-empty.
    pub fn run(&self, timeout: Duration, args: &[String]) -> Result<RunRecord> {
        let mut record = RunRecord::new(self.clone());
        let env = self.env_overrides();
        let window_start = Instant::now();

        let diag = CommandSpec {
            program: "go".to_string(),
            args: vec!["env".to_string()],
            env: env.clone(),
            cwd: self.wd(),
        };
        tracing::debug!(scenario = %self, "collecting go env");
        let outcome = self.executor.run(&diag, timeout);
        if let Some(failure) = classify(&outcome, timeout) {
            return Err(anyhow!(failure)
                .context(format!("failed to run 'go env' for scenario [{}]", self)));
        }
        record.go_env = outcome.stdout;

        let subject = CommandSpec {
            program: args[0].clone(),
            args: args[1..].to_vec(),
            env,
            cwd: self.wd(),
        };
        tracing::debug!(scenario = %self, program = %subject.program, "running subject");
        let remaining = timeout.saturating_sub(window_start.elapsed());
        let outcome = self.executor.run(&subject, remaining);
        record.code = outcome.code;
        record.failure = classify(&outcome, timeout);
        record.stdout = outcome.stdout.trim().to_string();
        record.stderr = outcome.stderr.trim().to_string();
        Ok(record)
    }
}

/// Maps an outcome to a reportable cause. The timeout takes precedence over
/// whatever the executor itself reported for the same run.
fn classify(outcome: &ExecOutcome, timeout: Duration) -> Option<RunFailure> {
    if outcome.timed_out {
        return Some(RunFailure::Timeout(timeout.as_secs()));
    }
    if let Some(error) = &outcome.error {
        return Some(RunFailure::Start(error.clone()));
    }
    if outcome.code != 0 {
        return Some(RunFailure::Exit(outcome.code));
    }
    None
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GO111MODULE={} GOFLAGS={} GOPATH={} IN_MODULE={} WD={}",
            self.go111module,
            self.goflags,
            self.gopath(),
            self.in_module,
            self.wd().display()
        )
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Permutator for Scenario {
    type Subject = Scenario;
    type Axis = Axis;
    type Value = AxisValue;

    fn axes(&self) -> Vec<Axis> {
        vec![
            Axis::Go111Module,
            Axis::Goflags,
            Axis::Gopath,
            Axis::InModule,
            Axis::Wd,
        ]
    }

    fn zero_subject(&self) -> Scenario {
        Scenario::new(Arc::clone(&self.executor), &self.root_dir)
    }

    fn values_of(&self, axis: Axis) -> Vec<AxisValue> {
        match axis {
            Axis::Go111Module => vec![
                AxisValue::Go111Module("auto"),
                AxisValue::Go111Module("off"),
                AxisValue::Go111Module("on"),
            ],
            Axis::Goflags => vec![AxisValue::Goflags("-mod=vendor"), AxisValue::Goflags("")],
            Axis::Gopath => vec![
                AxisValue::Gopath(GopathMode::Absent),
                AxisValue::Gopath(GopathMode::Usable),
                AxisValue::Gopath(GopathMode::Unused),
            ],
            Axis::InModule => vec![AxisValue::InModule(true), AxisValue::InModule(false)],
            Axis::Wd => vec![
                AxisValue::Wd(WdMode::InsideGopath),
                AxisValue::Wd(WdMode::OutsideGopath),
            ],
        }
    }

    fn with_axis_value(&self, subject: &Scenario, axis: Axis, value: &AxisValue) -> Scenario {
        let mut next = subject.clone();
        match (axis, value) {
            (Axis::Go111Module, AxisValue::Go111Module(v)) => next.go111module = *v,
            (Axis::Goflags, AxisValue::Goflags(v)) => next.goflags = *v,
            (Axis::Gopath, AxisValue::Gopath(v)) => next.gopath = *v,
            (Axis::InModule, AxisValue::InModule(v)) => next.in_module = *v,
            (Axis::Wd, AxisValue::Wd(v)) => next.wd = *v,
            // The engine only pairs an axis with its own values; anything
            // else is a defect in the enumeration contract.
            (axis, value) => panic!("axis {:?} paired with foreign value {:?}", axis, value),
        }
        next
    }

    fn assign_identity(&self, mut subject: Scenario, id: usize) -> Scenario {
        subject.permute_id = id;
        subject
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Reportable cause of a failing scenario.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunFailure {
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Start(String),
    #[error("exited with code {0}")]
    Exit(i32),
}

/// Outcome of running the subject command in one scenario. Created with the
/// sentinel state, populated as each phase of the run succeeds, never
/// mutated after [`Scenario::run`] returns it.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub scenario: Scenario,
    /// Exit code of the subject command; [`CODE_NOT_RUN`] if it never ran.
    pub code: i32,
    pub failure: Option<RunFailure>,
    /// `go env` output collected before the subject ran.
    pub go_env: String,
    pub stdout: String,
    pub stderr: String,
}

impl RunRecord {
    fn new(scenario: Scenario) -> RunRecord {
        RunRecord {
            scenario,
            code: CODE_NOT_RUN,
            failure: None,
            go_env: String::new(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.code == 0 && self.failure.is_none()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "scenario": {
                "id": self.scenario.id(),
                "go111module": self.scenario.go111module,
                "goflags": self.scenario.goflags,
                "gopath": self.scenario.gopath(),
                "in_module": self.scenario.in_module,
                "wd": self.scenario.wd().to_string_lossy(),
            },
            "code": self.code,
            "failure": self.failure.as_ref().map(|f| f.to_string()),
            "stdout": self.stdout,
            "stderr": self.stderr,
        })
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Per-axis occurrence counts over one pass/fail partition.
///
/// Keys iterate deterministically (BTreeMap), so rendered tables are stable
/// across invocations.
#[derive(Debug, Default)]
pub struct CauseTally {
    counts: BTreeMap<&'static str, BTreeMap<String, usize>>,
    samples: usize,
}

impl CauseTally {
    pub fn new() -> CauseTally {
        CauseTally::default()
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Buckets every axis value of the scenario under a human-readable label.
    pub fn record(&mut self, s: &Scenario) {
        self.samples += 1;
        let mut bump = |axis: &'static str, label: String| {
            *self
                .counts
                .entry(axis)
                .or_default()
                .entry(label)
                .or_default() += 1;
        };
        bump("GO111MODULE", s.go111module.to_string());
        bump(
            "GOFLAGS",
            if s.goflags.is_empty() {
                "<empty>".to_string()
            } else {
                s.goflags.to_string()
            },
        );
        bump(
            "GOPATH",
            match s.gopath {
                GopathMode::Absent => "<empty>".to_string(),
                GopathMode::Usable => "a file tree that may contain WD".to_string(),
                GopathMode::Unused => "a file tree that never contains WD".to_string(),
            },
        );
        bump(
            "IN_MODULE",
            if s.in_module {
                "inside a module".to_string()
            } else {
                "outside a module".to_string()
            },
        );
        bump(
            "WD",
            match s.wd {
                WdMode::InsideGopath => "inside the GOPATH".to_string(),
                WdMode::OutsideGopath => "outside the GOPATH".to_string(),
            },
        );
    }

    /// Renders the tally as a titled table of per-value percentages of this
    /// partition's sample count.
    pub fn render(&self, title: &str) -> String {
        let mut out = String::new();
        out.push_str(title);
        out.push('\n');
        for (axis, value_counts) in &self.counts {
            out.push_str(&format!("\t{}\n", axis));
            for (value, count) in value_counts {
                out.push_str(&format!(
                    "\t\t{}: {:.2}%\n",
                    value,
                    (*count as f64 / self.samples as f64) * 100.0
                ));
            }
        }
        out
    }
}

/// Pass/fail partition of a completed run, with cause tallies per side.
#[derive(Debug, Default)]
pub struct Summary {
    pub passes: usize,
    pub total: usize,
    pub pass_causes: CauseTally,
    pub fail_causes: CauseTally,
}

impl Summary {
    pub fn all_passed(&self) -> bool {
        self.passes == self.total
    }
}

/// Single-pass, read-only fold of the ordered result sequence.
pub fn summarize(records: &[RunRecord]) -> Summary {
    let mut summary = Summary {
        total: records.len(),
        ..Summary::default()
    };
    for record in records {
        if record.passed() {
            summary.passes += 1;
            summary.pass_causes.record(&record.scenario);
        } else {
            summary.fail_causes.record(&record.scenario);
        }
    }
    summary
}

/// Machine-readable dump of a completed run, written into the preserved
/// stage when any scenario fails.
pub fn results_json(records: &[RunRecord], summary: &Summary) -> Value {
    json!({
        "schema_version": "modfuzz_results_v1",
        "created_at": Utc::now().to_rfc3339(),
        "passes": summary.passes,
        "total": summary.total,
        "results": records.iter().map(RunRecord::to_json).collect::<Vec<_>>(),
    })
}
