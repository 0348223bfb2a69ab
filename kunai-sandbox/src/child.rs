use crate::pipe::{self, ChildError};

use std::convert::Infallible as Never;
use std::ffi::CString;
use std::io;
use std::os::raw::c_char;
use std::os::unix::io::RawFd;
use std::ptr;

use rlimit::{Resource, Rlim};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Stage {
    Prctl = 1,
    Cgroup,
    Stdin,
    Stdout,
    Stderr,
    Unshare,
    Mount,
    Chroot,
    Chdir,
    Rlimit,
    Setgid,
    Setuid,
    Exec,
}

impl Stage {
    pub fn from_raw(raw: i32) -> Option<Self> {
        const ALL: [Stage; 13] = [
            Stage::Prctl,
            Stage::Cgroup,
            Stage::Stdin,
            Stage::Stdout,
            Stage::Stderr,
            Stage::Unshare,
            Stage::Mount,
            Stage::Chroot,
            Stage::Chdir,
            Stage::Rlimit,
            Stage::Setgid,
            Stage::Setuid,
            Stage::Exec,
        ];
        ALL.iter().copied().find(|&s| s as i32 == raw)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Stage::Prctl => "set parent death signal",
            Stage::Cgroup => "join cgroup",
            Stage::Stdin => "redirect stdin",
            Stage::Stdout => "redirect stdout",
            Stage::Stderr => "redirect stderr",
            Stage::Unshare => "create mount namespace",
            Stage::Mount => "mount",
            Stage::Chroot => "change root",
            Stage::Chdir => "change directory",
            Stage::Rlimit => "set resource limits",
            Stage::Setgid => "set gid",
            Stage::Setuid => "set uid",
            Stage::Exec => "execute program",
        }
    }
}

pub struct BindMount {
    pub source: CString,
    pub target: CString,
    pub read_only: bool,
}

pub struct Isolation {
    pub root: CString,
    pub mounts: Vec<BindMount>,
}

/// Everything the child needs, prepared before `fork`.
///
/// The child must not allocate: the parent may be multi-threaded.
pub struct ChildPlan {
    pub bin: CString,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
    pub stdin: CString,
    pub stdout: CString,
    pub stderr: CString,
    /// `cgroup.procs` of the group to join
    pub cgroup_procs: Option<CString>,
    pub isolation: Option<Isolation>,
    pub cwd: CString,
    pub rlimit_cpu: Option<u64>,   // seconds
    pub rlimit_as: Option<u64>,    // bytes
    pub rlimit_fsize: Option<u64>, // bytes
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

pub struct ExecPtrs {
    argv: Vec<*const c_char>,
    envp: Vec<*const c_char>,
}

impl ChildPlan {
    pub fn exec_ptrs(&self) -> ExecPtrs {
        fn null_terminated(v: &[CString]) -> Vec<*const c_char> {
            let mut ptrs = Vec::with_capacity(v.len() + 1);
            ptrs.extend(v.iter().map(|s| s.as_ptr()));
            ptrs.push(ptr::null());
            ptrs
        }
        ExecPtrs {
            argv: null_terminated(&self.argv),
            envp: null_terminated(&self.envp),
        }
    }
}

fn check(stage: Stage, ret: libc::c_int) -> Result<(), ChildError> {
    if ret < 0 {
        let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
        return Err((stage as i32, errno));
    }
    Ok(())
}

fn io_check(stage: Stage, ret: io::Result<()>) -> Result<(), ChildError> {
    ret.map_err(|e| (stage as i32, e.raw_os_error().unwrap_or(0)))
}

unsafe fn redirect(stage: Stage, path: &CString, flags: libc::c_int, target: RawFd) -> Result<(), ChildError> {
    let fd = libc::open(path.as_ptr(), flags | libc::O_CLOEXEC, 0o644);
    check(stage, fd)?;
    check(stage, libc::dup2(fd, target))?;
    check(stage, libc::close(fd))
}

unsafe fn isolate(iso: &Isolation) -> Result<(), ChildError> {
    check(Stage::Unshare, libc::unshare(libc::CLONE_NEWNS))?;

    let root = b"/\0".as_ptr().cast();
    let flags = libc::MS_REC | libc::MS_PRIVATE;
    check(
        Stage::Mount,
        libc::mount(ptr::null(), root, ptr::null(), flags, ptr::null()),
    )?;

    for m in &iso.mounts {
        let flags = libc::MS_BIND | libc::MS_REC;
        check(
            Stage::Mount,
            libc::mount(m.source.as_ptr(), m.target.as_ptr(), ptr::null(), flags, ptr::null()),
        )?;
        if m.read_only {
            let flags = libc::MS_BIND | libc::MS_REC | libc::MS_REMOUNT | libc::MS_RDONLY;
            check(
                Stage::Mount,
                libc::mount(ptr::null(), m.target.as_ptr(), ptr::null(), flags, ptr::null()),
            )?;
        }
    }

    check(Stage::Chroot, libc::chroot(iso.root.as_ptr()))
}

unsafe fn join_cgroup(procs: &CString) -> Result<(), ChildError> {
    let fd = libc::open(procs.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC);
    check(Stage::Cgroup, fd)?;
    // `0` moves the writing process
    let ret = libc::write(fd, b"0".as_ptr().cast(), 1);
    check(Stage::Cgroup, ret as libc::c_int)?;
    check(Stage::Cgroup, libc::close(fd))
}

fn set_rlimit(resource: Resource, value: Option<u64>) -> Result<(), ChildError> {
    if let Some(v) = value {
        let r = Rlim::from_raw(v);
        io_check(Stage::Rlimit, resource.set(r, r))?;
    }
    Ok(())
}

unsafe fn setup(plan: &ChildPlan, ptrs: &ExecPtrs) -> Result<Never, ChildError> {
    check(
        Stage::Prctl,
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL),
    )?;

    if let Some(ref procs) = plan.cgroup_procs {
        join_cgroup(procs)?;
    }

    redirect(Stage::Stdin, &plan.stdin, libc::O_RDONLY, libc::STDIN_FILENO)?;
    let wflags = libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC;
    redirect(Stage::Stdout, &plan.stdout, wflags, libc::STDOUT_FILENO)?;
    redirect(Stage::Stderr, &plan.stderr, wflags, libc::STDERR_FILENO)?;

    if let Some(ref iso) = plan.isolation {
        isolate(iso)?;
    }
    check(Stage::Chdir, libc::chdir(plan.cwd.as_ptr()))?;

    set_rlimit(Resource::CPU, plan.rlimit_cpu)?;
    set_rlimit(Resource::AS, plan.rlimit_as)?;
    set_rlimit(Resource::FSIZE, plan.rlimit_fsize)?;

    if let Some(gid) = plan.gid {
        check(Stage::Setgid, libc::setgroups(1, &gid))?;
        check(Stage::Setgid, libc::setgid(gid))?;
    }
    if let Some(uid) = plan.uid {
        check(Stage::Setuid, libc::setuid(uid))?;
    }

    libc::execvpe(plan.bin.as_ptr(), ptrs.argv.as_ptr(), ptrs.envp.as_ptr());
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    Err((Stage::Exec as i32, errno))
}

/// Runs in the forked child. Never returns.
pub fn run_child(plan: &ChildPlan, ptrs: &ExecPtrs, pipe_fd: RawFd) -> ! {
    unsafe {
        if let Err(err) = setup(plan, ptrs) {
            pipe::write_error(pipe_fd, err);
        }
        libc::_exit(127)
    }
}
