use crate::config::{Config, Toolchain as ToolchainPaths};
use crate::diff;
use crate::lang::{self, CompilationUnit, Toolchain};
use crate::store::{self, FileStore};

use kunai_protocol::config::resolve_language;
use kunai_protocol::{ConfigError, Language, TestcaseConfig, TestcaseResult};
use kunai_sandbox::{Limits, Sandbox, SandboxOptions, SandboxOutput};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task;
use tracing::{debug, info, warn};

// directory structure of the sandbox root:
//
// - sol/          submission and grader
// - chk/          checker
// - input.txt
// - output.txt
// - stderr.txt
// - correct.txt   checker runs only, copied in after the run
//
// The expected output and the checker are fetched only after the
// submission has exited.
const SOL_DIR: &str = "sol";
const CHK_DIR: &str = "chk";
const INPUT: &str = "input.txt";
const OUTPUT: &str = "output.txt";
const STDERR: &str = "stderr.txt";
const CORRECT: &str = "correct.txt";

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub workspace_root: PathBuf,
    pub sandbox: SandboxOptions,
    pub bind_ro: Vec<PathBuf>,
    pub bind_rw: Vec<PathBuf>,
    pub toolchain: ToolchainPaths,
    pub time_limit_multiplier: f64,
    pub memory_limit_multiplier: f64,
    /// seconds
    pub internal_time_limit: f64,
    /// MiB
    pub internal_memory_limit: f64,
}

impl ExecutorOptions {
    pub fn from_config(
        config: &Config,
        time_limit_multiplier: f64,
        memory_limit_multiplier: f64,
    ) -> Self {
        let executor = &config.executor;
        if !executor.isolate {
            warn!("isolation disabled, submissions can read the host filesystem");
        }
        Self {
            workspace_root: executor.workspace_root.clone(),
            sandbox: SandboxOptions {
                isolate: executor.isolate,
                uid: executor.uid,
                gid: executor.gid,
                output_limit: Some(executor.output_limit.as_u64()),
                cgroup: executor.cgroup.clone(),
            },
            bind_ro: executor.bind_ro.clone(),
            bind_rw: executor.bind_rw.clone(),
            toolchain: config.toolchain.clone(),
            time_limit_multiplier,
            memory_limit_multiplier,
            internal_time_limit: executor.internal_time_limit as f64 / 1000.0,
            internal_memory_limit: executor.internal_memory_limit.as_u64() as f64 / MIB,
        }
    }
}

const MIB: f64 = 1024.0 * 1024.0;

/// Time and memory of one sandboxed run.
#[derive(Debug, Clone, Copy)]
struct Budget {
    seconds: f64,
    mib: f64,
}

impl Budget {
    fn mib(&self) -> u64 {
        (self.mib.ceil() as u64).max(1)
    }

    /// `RLIMIT_AS` backs the memory limit only without a cgroup, and only
    /// for toolchains that can live under it.
    fn limits(&self, toolchain: &dyn Toolchain, cgroup: bool) -> Limits {
        let bytes = (self.mib * MIB) as u64;
        Limits {
            time: Some(Duration::from_secs_f64(self.seconds)),
            memory: Some(bytes),
            address_space: if toolchain.limits_address_space() && !cgroup {
                Some(bytes)
            } else {
                None
            },
        }
    }
}

fn describe(output: &SandboxOutput) -> String {
    if output.signal != 0 {
        format!("killed by signal {}", output.signal)
    } else {
        format!("exit code {}", output.code)
    }
}

/// Message of a run that cannot be checked, `None` if the output should be checked.
fn run_verdict(output: &SandboxOutput) -> Option<String> {
    let limit = if output.timed_out {
        Some("Time limit exceeded")
    } else if output.memory_exceeded {
        Some("Memory limit exceeded")
    } else {
        None
    };
    let failure = if output.signal != 0 {
        Some(format!("Execution killed by signal {}", output.signal))
    } else if output.code != 0 {
        Some(format!("Execution failed with exit code {}", output.code))
    } else {
        None
    };
    match (limit, failure) {
        (Some(limit), Some(failure)) => Some(format!("{}, {}", limit, failure)),
        (Some(limit), None) => Some(limit.to_owned()),
        (None, failure) => failure,
    }
}

/// Compile, run and check cycle of one testcase.
pub struct TestcaseExecutor {
    config: TestcaseConfig,
    submission: Language,
    checker: Option<Language>,
    options: Arc<ExecutorOptions>,
}

impl TestcaseExecutor {
    pub fn new(config: TestcaseConfig, options: Arc<ExecutorOptions>) -> Result<Self, ConfigError> {
        config.check()?;
        let submission = resolve_language(config.submission_language, &config.submission_file_uri)?;
        let checker = match config.checker_source_uri {
            Some(ref uri) => Some(resolve_language(config.checker_language, uri)?),
            None => None,
        };
        Ok(Self {
            config,
            submission,
            checker,
            options,
        })
    }

    fn internal_budget(&self) -> Budget {
        Budget {
            seconds: self
                .config
                .internal_time_limit
                .unwrap_or(self.options.internal_time_limit),
            mib: self
                .config
                .internal_memory_limit
                .unwrap_or(self.options.internal_memory_limit),
        }
    }

    fn user_budget(&self) -> Budget {
        Budget {
            seconds: self.config.time_limit * self.options.time_limit_multiplier,
            mib: self.config.memory_limit * self.options.memory_limit_multiplier,
        }
    }

    fn limits(&self, budget: Budget, toolchain: &dyn Toolchain) -> Limits {
        budget.limits(toolchain, self.options.sandbox.cgroup.is_some())
    }

    fn mount_host(&self, sandbox: &mut Sandbox) {
        for p in &self.options.bind_ro {
            if p.exists() {
                sandbox.mount(p, p, true);
            }
        }
        for p in &self.options.bind_rw {
            if p.exists() {
                sandbox.mount(p, p, false);
            }
        }
    }

    /// Runs the whole cycle, blocking. `Err` is an internal fault, scored
    /// outcomes are always `Ok`.
    pub fn execute(&self, store: &dyn FileStore) -> Result<TestcaseResult> {
        let _enter = tracing::info_span!(
            "testcase",
            input = %self.config.tc_input_file_uri,
            lang = %self.submission
        )
        .entered();

        let sandbox = Sandbox::new(&self.options.workspace_root, self.options.sandbox.clone())
            .context("failed to create sandbox")?;
        let mut sandbox = scopeguard::guard(sandbox, |mut sandbox| {
            if let Err(err) = sandbox.teardown() {
                warn!("failed to tear down sandbox: {:?}", err);
            }
        });
        self.mount_host(&mut sandbox);

        let cfg = &self.config;

        let submission = fetch(store, &sandbox, &cfg.submission_file_uri, "submission")?;
        let grader = match cfg.grader_source_uri {
            Some(ref uri) => Some(fetch(store, &sandbox, uri, "grader")?),
            None => None,
        };
        let input = fetch(store, &sandbox, &cfg.tc_input_file_uri, "input")?;

        let mut sol = CompilationUnit::new(SOL_DIR, submission.name);
        sandbox.copy_in(&submission.path, sol.entry_path())?;
        if let Some(grader) = grader {
            if grader.name == sol.entry {
                anyhow::bail!("grader and submission share the file name {:?}", grader.name);
            }
            sol = sol.helper(grader.name);
            sandbox.copy_in(&grader.path, Path::new(SOL_DIR).join(&sol.helpers[0]))?;
        }
        sandbox.copy_in(&input.path, INPUT)?;

        // compile
        let toolchain = lang::toolchain(self.submission, &self.options.toolchain);
        let budget = self.internal_budget();
        if let Some(cmd) = toolchain.compile(&sol, budget.mib()) {
            sandbox
                .set_limits(self.limits(budget, &*toolchain))
                .redirect_stdout("compile.out")
                .redirect_stderr("compile.err");
            let output = sandbox
                .run(&cmd)
                .context("failed to compile submission")?;
            if !output.is_success() {
                debug!(?output, "compilation error");
                let message = format!("Compilation error, {}", describe(&output));
                return Ok(TestcaseResult::new(0.0, message));
            }
        }

        // run
        let budget = self.user_budget();
        sandbox
            .set_limits(self.limits(budget, &*toolchain))
            .redirect_stdin(INPUT)
            .redirect_stdout(OUTPUT)
            .redirect_stderr(STDERR);
        let output = sandbox
            .run(&toolchain.run(&sol, budget.mib()))
            .context("failed to run submission")?;

        let elapsed_time = output.real_time as f64 / 1000.0;
        let memory_peak = output.memory as f64 / 1024.0;
        let scored = |score: f64, message: String| {
            TestcaseResult::new(score, message).with_usage(elapsed_time, memory_peak)
        };

        if let Some(message) = run_verdict(&output) {
            debug!(?output, "run failed");
            return Ok(scored(0.0, message));
        }

        // check
        let expected = fetch(store, &sandbox, &cfg.tc_output_file_uri, "expected")?;
        let correct = match (self.checker, cfg.checker_source_uri.as_deref()) {
            (Some(lang), Some(uri)) => {
                let checker = fetch(store, &sandbox, uri, "checker")?;
                let unit = CompilationUnit::new(CHK_DIR, checker.name);
                sandbox.copy_in(&checker.path, unit.entry_path())?;
                sandbox.copy_in(&expected.path, CORRECT)?;
                self.run_checker(&mut sandbox, lang, &unit)?
            }
            _ => {
                let output = fs::read(sandbox.path(OUTPUT)?).context("failed to read output")?;
                let expected = fs::read(&expected.path)?;
                diff::same_output(&output, &expected)
            }
        };

        let result = if correct {
            scored(1.0, "Correct answer".into())
        } else {
            scored(0.0, "Wrong answer".into())
        };
        Ok(result)
    }

    fn run_checker(
        &self,
        sandbox: &mut Sandbox,
        lang: Language,
        unit: &CompilationUnit,
    ) -> Result<bool> {
        let toolchain = lang::toolchain(lang, &self.options.toolchain);
        let budget = self.internal_budget();
        let limits = self.limits(budget, &*toolchain);

        if let Some(cmd) = toolchain.compile(unit, budget.mib()) {
            sandbox
                .set_limits(limits)
                .redirect_stderr("checker.compile.err");
            let output = sandbox.run(&cmd).context("failed to compile checker")?;
            if !output.is_success() {
                anyhow::bail!("checker compilation failed, {}", describe(&output));
            }
        }

        let mut cmd = toolchain.run(unit, budget.mib());
        cmd.arg(OUTPUT).arg(CORRECT).arg(INPUT);

        sandbox
            .set_limits(limits)
            .redirect_stdout("checker.out")
            .redirect_stderr("checker.err");
        let output = sandbox.run(&cmd).context("failed to run checker")?;
        if output.signal != 0 {
            anyhow::bail!("checker killed by signal {}", output.signal);
        }
        Ok(output.code == 0)
    }
}

struct Fetched {
    name: String,
    path: PathBuf,
}

/// Downloads `uri` into the staging directory, which the sandboxed process
/// cannot see in isolated mode nor read under a separate uid.
fn fetch(store: &dyn FileStore, sandbox: &Sandbox, uri: &str, staged: &str) -> Result<Fetched> {
    let name = store::file_name(uri)?.to_owned();
    let path = sandbox.files_dir().join(staged);
    store
        .get(uri)?
        .copy_to(&path)
        .with_context(|| format!("failed to fetch {}", uri))?;
    Ok(Fetched { name, path })
}

/// Runs a testcase on the blocking pool.
pub async fn evaluate_testcase(
    config: TestcaseConfig,
    options: Arc<ExecutorOptions>,
    store: Arc<dyn FileStore>,
) -> Result<TestcaseResult> {
    let executor = TestcaseExecutor::new(config, options)?;
    let result = task::spawn_blocking(move || executor.execute(&*store)).await??;
    info!(score = result.score, message = %result.message, "testcase evaluated");
    Ok(result)
}
