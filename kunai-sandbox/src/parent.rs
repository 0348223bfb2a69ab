use crate::cgroup::Cgroup;
use crate::child::Stage;
use crate::pipe::PipeRx;
use crate::signal::Watchdog;
use crate::SandboxOutput;

use std::io;
use std::mem::MaybeUninit;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::unistd::Pid;
use tracing::{debug, warn};

pub struct ParentPlan<'a> {
    pub real_time_limit: Option<Duration>,
    /// bytes, peak resident memory
    pub memory_limit: Option<u64>,
    pub cgroup: Option<&'a Cgroup>,
}

pub fn run_parent(
    child_pid: Pid,
    t0: Instant,
    plan: ParentPlan<'_>,
    pipe_rx: PipeRx,
) -> Result<SandboxOutput> {
    debug!(%child_pid, "child forked");

    let watchdog = plan
        .real_time_limit
        .map(|limit| Watchdog::start(child_pid, limit));

    let child_result = pipe_rx.read_result();

    // the pid stays reserved until the child is reaped after the watchdog stops
    let exited = wait_exited(child_pid);
    let real_time = t0.elapsed().as_millis() as u64;
    let fired = watchdog.map_or(false, Watchdog::stop);

    let waited = exited.and_then(|()| wait4(child_pid));
    let (status, rusage) = waited.context("failed to wait for child")?;

    match child_result.context("failed to read child result")? {
        Ok(()) => {}
        Err((stage, errno)) => {
            let err = io::Error::from_raw_os_error(errno);
            let stage = Stage::from_raw(stage).map_or("start child", Stage::describe);
            return Err(anyhow::Error::new(err).context(format!("child failed to {}", stage)));
        }
    }

    let (code, signal) = if libc::WIFSIGNALED(status) {
        (0, libc::WTERMSIG(status))
    } else {
        (libc::WEXITSTATUS(status), 0)
    };

    let user_time = timeval_ms(&rusage.ru_utime);
    let sys_time = timeval_ms(&rusage.ru_stime);
    let mut memory = rusage.ru_maxrss as u64;

    let memory_exceeded = match plan.cgroup {
        Some(cg) => match cg.statistics() {
            Ok(stats) => {
                if let Some(peak) = stats.memory_peak {
                    memory = memory.max(peak / 1024);
                }
                cg.memory_exceeded(&stats)
            }
            Err(err) => {
                warn!("failed to read cgroup statistics: {:?}", err);
                false
            }
        },
        None => plan.memory_limit.map_or(false, |limit| memory * 1024 > limit),
    };

    let output = SandboxOutput {
        code,
        signal,
        status,
        real_time,
        sys_time,
        user_time,
        cpu_time: user_time + sys_time,
        memory,
        timed_out: timed_out(fired, status),
        memory_exceeded,
    };

    debug!(?output, "child exited");

    Ok(output)
}

/// A fired watchdog only counts when its SIGKILL is what ended the child.
fn timed_out(fired: bool, status: i32) -> bool {
    if !libc::WIFSIGNALED(status) {
        return false;
    }
    match libc::WTERMSIG(status) {
        libc::SIGKILL => fired,
        libc::SIGXCPU => true,
        _ => false,
    }
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec as u64) * 1000 + (tv.tv_usec as u64) / 1000
}

fn retry_eintr(mut f: impl FnMut() -> libc::c_int) -> io::Result<()> {
    loop {
        if f() >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Waits for the child to exit without reaping it.
fn wait_exited(child_pid: Pid) -> io::Result<()> {
    let id = child_pid.as_raw() as libc::id_t;
    let mut info: MaybeUninit<libc::siginfo_t> = MaybeUninit::zeroed();
    let options = libc::WEXITED | libc::WNOWAIT;
    retry_eintr(|| unsafe { libc::waitid(libc::P_PID, id, info.as_mut_ptr(), options) })
}

fn wait4(child_pid: Pid) -> io::Result<(i32, libc::rusage)> {
    let pid = child_pid.as_raw();
    let mut status: i32 = 0;
    let mut rusage: MaybeUninit<libc::rusage> = MaybeUninit::zeroed();

    retry_eintr(|| unsafe { libc::wait4(pid, &mut status, 0, rusage.as_mut_ptr()) })?;

    unsafe { Ok((status, rusage.assume_init())) }
}
