#![deny(clippy::all)]

mod cgroup;
mod child;
mod parent;
mod pipe;
mod signal;

use self::cgroup::Cgroup;
use self::child::{BindMount, ChildPlan, Isolation};
use self::parent::ParentPlan;

pub use self::cgroup::enable_memory_controller;

use kunai_utils::math::roundup_div;
use kunai_utils::os_cmd::OsCmd;

use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use nix::unistd::{self, Gid, Uid};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxOptions {
    /// Private mount namespace and chroot into the sandbox root.
    pub isolate: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// bytes, maximum size of a file written by the process
    pub output_limit: Option<u64>,
    /// Delegated cgroup v2 directory with the memory controller enabled.
    /// Each run gets a child group whose `memory.max` is the memory limit.
    pub cgroup: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// wall-clock and cpu time
    pub time: Option<Duration>,
    /// bytes, peak resident memory
    ///
    /// Enforced by the kernel when a cgroup is configured, otherwise checked
    /// against the peak usage after the run.
    pub memory: Option<u64>,
    /// bytes, `RLIMIT_AS`
    pub address_space: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub code: i32,
    pub signal: i32,
    pub status: i32,

    pub real_time: u64, // milliseconds
    pub sys_time: u64,  // milliseconds
    pub user_time: u64, // milliseconds
    pub cpu_time: u64,  // milliseconds
    pub memory: u64,    // KiB

    /// killed at the time limit
    pub timed_out: bool,
    /// OOM-killed in the cgroup, or peak memory above the limit
    pub memory_exceeded: bool,
}

impl SandboxOutput {
    pub fn is_success(&self) -> bool {
        libc::WIFEXITED(self.status) && self.code == 0
    }
}

#[derive(Debug, Clone)]
struct Mount {
    host: PathBuf,
    target: PathBuf,
    read_only: bool,
}

/// A scratch directory in which programs run under resource limits.
///
/// Layout:
///
/// - `<workspace_root>/<uuid>`
///     - `files` staging area, mode 0700, not visible to the process
///     - `run` the root of the process
#[derive(Debug)]
pub struct Sandbox {
    id: Uuid,
    root: PathBuf,
    files_dir: PathBuf,
    run_dir: PathBuf,
    options: SandboxOptions,
    mounts: Vec<Mount>,
    limits: Limits,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    runs: u32,
    torn_down: bool,
}

/// Joins `rel` onto `base`, rejecting paths that could leave `base`.
fn join_inside(base: &Path, rel: &Path) -> Result<PathBuf> {
    let mut path = base.to_owned();
    let mut depth = 0;
    for c in rel.components() {
        match c {
            Component::Normal(s) => {
                path.push(s);
                depth += 1;
            }
            Component::CurDir => {}
            _ => anyhow::bail!("path escapes the sandbox: {}", rel.display()),
        }
    }
    if depth == 0 {
        anyhow::bail!("empty sandbox path: {:?}", rel.display());
    }
    Ok(path)
}

fn cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path contains nul byte: {}", path.display()))
}

impl Sandbox {
    pub fn new(workspace_root: &Path, options: SandboxOptions) -> Result<Self> {
        let id = Uuid::new_v4();
        let root = workspace_root.join(id.to_string());
        let files_dir = root.join("files");
        let run_dir = root.join("run");

        fs::create_dir_all(&files_dir)
            .with_context(|| format!("failed to create {}", files_dir.display()))?;
        fs::set_permissions(&files_dir, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to chmod {}", files_dir.display()))?;
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create {}", run_dir.display()))?;

        debug!(%id, root = %root.display(), "sandbox created");

        Ok(Self {
            id,
            root,
            files_dir,
            run_dir,
            options,
            mounts: Vec::new(),
            limits: Limits::default(),
            stdin: None,
            stdout: None,
            stderr: None,
            runs: 0,
            torn_down: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Host path of a file inside the process root.
    pub fn path(&self, rel: impl AsRef<Path>) -> Result<PathBuf> {
        join_inside(&self.run_dir, rel.as_ref())
    }

    /// Makes `host` visible at the absolute `sandbox_path` in isolated mode.
    pub fn mount(
        &mut self,
        host: impl Into<PathBuf>,
        sandbox_path: impl Into<PathBuf>,
        read_only: bool,
    ) -> &mut Self {
        self.mounts.push(Mount {
            host: host.into(),
            target: sandbox_path.into(),
            read_only,
        });
        self
    }

    pub fn copy_in(&self, source: &Path, dest: impl AsRef<Path>) -> Result<()> {
        let dest = self.path(dest)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &dest).with_context(|| {
            format!(
                "failed to copy {} into sandbox as {}",
                source.display(),
                dest.display()
            )
        })?;
        Ok(())
    }

    pub fn set_limits(&mut self, limits: Limits) -> &mut Self {
        self.limits = limits;
        self
    }

    pub fn redirect_stdin(&mut self, rel: impl Into<PathBuf>) -> &mut Self {
        self.stdin = Some(rel.into());
        self
    }

    pub fn redirect_stdout(&mut self, rel: impl Into<PathBuf>) -> &mut Self {
        self.stdout = Some(rel.into());
        self
    }

    pub fn redirect_stderr(&mut self, rel: impl Into<PathBuf>) -> &mut Self {
        self.stderr = Some(rel.into());
        self
    }

    fn stream(&self, rel: Option<PathBuf>) -> Result<CString> {
        match rel {
            Some(rel) => cstring(&self.path(rel)?),
            None => Ok(CString::new("/dev/null")?),
        }
    }

    fn isolation(&self) -> Result<Isolation> {
        let mut mounts = Vec::with_capacity(self.mounts.len());
        for m in &self.mounts {
            let rel = m.target.strip_prefix("/").unwrap_or(&m.target);
            let target = join_inside(&self.run_dir, rel)?;
            if m.host.is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                if !target.exists() {
                    fs::File::create(&target)?;
                }
            }
            mounts.push(BindMount {
                source: cstring(&m.host)?,
                target: cstring(&target)?,
                read_only: m.read_only,
            });
        }
        Ok(Isolation {
            root: cstring(&self.run_dir)?,
            mounts,
        })
    }

    fn chown_run_dir(&self, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        fn walk(path: &Path, uid: Option<Uid>, gid: Option<Gid>) -> Result<()> {
            unistd::chown(path, uid, gid)
                .with_context(|| format!("failed to chown {}", path.display()))?;
            if path.is_dir() {
                for entry in fs::read_dir(path)? {
                    walk(&entry?.path(), uid, gid)?;
                }
            }
            Ok(())
        }
        walk(&self.run_dir, uid.map(Uid::from_raw), gid.map(Gid::from_raw))
    }

    fn prepare(&mut self, cmd: &OsCmd) -> Result<ChildPlan> {
        let c_cmd = cmd
            .to_c_cmd()
            .with_context(|| format!("invalid command: {}", cmd))?;

        let limits = std::mem::take(&mut self.limits);
        let stdin = self.stdin.take();
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();

        let isolation = if self.options.isolate {
            Some(self.isolation()?)
        } else {
            if !self.mounts.is_empty() {
                debug!(count = self.mounts.len(), "plain mode, mounts ignored");
            }
            None
        };

        let cwd = if isolation.is_some() {
            CString::new("/")?
        } else {
            cstring(&self.run_dir)?
        };

        if self.options.uid.is_some() || self.options.gid.is_some() {
            self.chown_run_dir(self.options.uid, self.options.gid)?;
        }

        Ok(ChildPlan {
            bin: c_cmd.bin,
            argv: c_cmd.argv,
            envp: c_cmd.envp,
            stdin: self.stream(stdin)?,
            stdout: self.stream(stdout)?,
            stderr: self.stream(stderr)?,
            cgroup_procs: None,
            isolation,
            cwd,
            rlimit_cpu: limits
                .time
                .map(|t| roundup_div(t.as_millis() as u64, 1000).max(1)),
            rlimit_as: limits.address_space,
            rlimit_fsize: self.options.output_limit,
            uid: self.options.uid,
            gid: self.options.gid,
        })
    }

    /// Runs `cmd` to completion. Limits and redirections apply to this run only.
    ///
    /// Returns `Err` if the process could not be started.
    pub fn run(&mut self, cmd: &OsCmd) -> Result<SandboxOutput> {
        if self.torn_down {
            anyhow::bail!("sandbox has been torn down");
        }
        debug!(sandbox = %self.id, %cmd, limits = ?self.limits, "run");

        let limits = self.limits;
        let mut plan = self.prepare(cmd)?;

        self.runs += 1;
        let cgroup = match self.options.cgroup {
            Some(ref parent) => {
                let name = format!("{}-{}", self.id, self.runs);
                let cg = Cgroup::create(parent, &name, limits.memory)?;
                plan.cgroup_procs = Some(cstring(&cg.procs_path())?);
                Some(cg)
            }
            None => None,
        };

        let result = self.fork_and_wait(&plan, limits, cgroup.as_ref());
        if let Some(ref cg) = cgroup {
            cg.cleanup();
        }
        result
    }

    fn fork_and_wait(
        &self,
        plan: &ChildPlan,
        limits: Limits,
        cgroup: Option<&Cgroup>,
    ) -> Result<SandboxOutput> {
        let ptrs = plan.exec_ptrs();
        let (pipe_tx, pipe_rx) = pipe::create().context("failed to create pipe")?;

        let t0 = Instant::now();
        match unsafe { unistd::fork() }.context("failed to fork")? {
            unistd::ForkResult::Parent { child } => {
                drop(pipe_tx);
                let parent_plan = ParentPlan {
                    real_time_limit: limits.time,
                    memory_limit: limits.memory,
                    cgroup,
                };
                parent::run_parent(child, t0, parent_plan, pipe_rx)
            }
            unistd::ForkResult::Child => child::run_child(plan, &ptrs, pipe_tx.raw_fd()),
        }
    }

    /// Removes the sandbox directory. Idempotent.
    pub fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("failed to remove {}", self.root.display()))?;
        }
        debug!(id = %self.id, "sandbox removed");
        Ok(())
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!(id = %self.id, "sandbox teardown failed: {:?}", err);
        }
    }
}
