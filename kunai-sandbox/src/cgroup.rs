use crate::signal::send_signal;

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use std::{fmt, io};

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{debug, warn};

fn write_cgroup(cg_dir: &Path, file: &str, content: impl fmt::Display) -> io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).open(cg_dir.join(file))?;
    write!(file, "{}", content)?;
    Ok(())
}

fn read_cgroup(cg_dir: &Path, file: &str) -> io::Result<String> {
    fs::read_to_string(cg_dir.join(file))
}

/// Value of `key` in a flat keyed file such as `memory.events`.
fn keyed_value(content: &str, key: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let mut it = line.split_whitespace();
        match (it.next(), it.next()) {
            (Some(k), Some(v)) if k == key => v.parse().ok(),
            _ => None,
        }
    })
}

/// One cgroup v2 group per run, created under a delegated parent directory.
///
/// The child joins the group itself by writing `0` to `cgroup.procs` before
/// `execve`, so every page the program touches is charged here.
pub struct Cgroup {
    dir: PathBuf,
    memory_limit: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Statistics {
    /// bytes, `None` on kernels without `memory.peak`
    pub memory_peak: Option<u64>,
    pub oom_kills: u64,
}

impl Cgroup {
    pub fn create(parent: &Path, name: &str, memory_limit: Option<u64>) -> Result<Self> {
        let dir = parent.join(name);
        fs::create_dir(&dir)
            .with_context(|| format!("failed to create cgroup directory: {}", dir.display()))?;
        let cg = Self { dir, memory_limit };

        if let Some(limit) = memory_limit {
            write_cgroup(&cg.dir, "memory.max", limit).context("failed to set memory limit")?;
            if let Err(err) = write_cgroup(&cg.dir, "memory.swap.max", 0) {
                debug!("memory.swap.max not set: {}", err);
            }
        }

        debug!(dir = %cg.dir.display(), ?memory_limit, "cgroup created");
        Ok(cg)
    }

    pub fn procs_path(&self) -> PathBuf {
        self.dir.join("cgroup.procs")
    }

    pub fn statistics(&self) -> Result<Statistics> {
        let events = read_cgroup(&self.dir, "memory.events").context("failed to read memory.events")?;
        let memory_peak = read_cgroup(&self.dir, "memory.peak")
            .ok()
            .and_then(|s| s.trim_end().parse().ok());
        Ok(Statistics {
            memory_peak,
            oom_kills: keyed_value(&events, "oom_kill").unwrap_or(0),
        })
    }

    /// Page cache counts towards the peak, so only an OOM kill is a verdict.
    pub fn memory_exceeded(&self, stats: &Statistics) -> bool {
        self.memory_limit.is_some() && stats.oom_kills > 0
    }

    fn killall(&self) -> Result<()> {
        if write_cgroup(&self.dir, "cgroup.kill", 1).is_ok() {
            return Ok(());
        }
        let content = read_cgroup(&self.dir, "cgroup.procs").context("failed to read cgroup procs")?;
        for t in content.lines() {
            if let Ok(pid) = t.trim().parse::<i32>() {
                let _ = send_signal(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
        Ok(())
    }

    /// Kills leftover processes and removes the group.
    pub fn cleanup(&self) {
        if let Err(err) = self.killall() {
            warn!("failed to kill cgroup processes: {:?}", err);
        }
        // killed processes leave the group asynchronously
        for _ in 0..50 {
            match fs::remove_dir(&self.dir) {
                Ok(()) => return,
                Err(err) if err.raw_os_error() == Some(libc::EBUSY) => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => {
                    warn!("failed to remove cgroup: {}, path = {}", err, self.dir.display());
                    return;
                }
            }
        }
        warn!("cgroup still busy, path = {}", self.dir.display());
    }
}

/// Creates a parent group with the memory controller enabled for its
/// children. Used by deployments and tests that own a cgroup v2 subtree.
pub fn enable_memory_controller(parent: &Path) -> Result<()> {
    if !parent.exists() {
        fs::create_dir(parent)
            .with_context(|| format!("failed to create cgroup directory: {}", parent.display()))?;
    }
    write_cgroup(parent, "cgroup.subtree_control", "+memory")
        .with_context(|| format!("failed to enable memory controller in {}", parent.display()))
}
