use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use nix::fcntl::OFlag;
use nix::unistd;

/// Failure report of the child: `(stage, errno)`.
pub type ChildError = (i32, i32);

pub struct PipeTx(File);
pub struct PipeRx(File);

/// Creates a close-on-exec pipe. A successful `execve` in the child closes
/// the write end, so the parent reads EOF.
pub fn create() -> nix::Result<(PipeTx, PipeRx)> {
    let (rx, tx) = unistd::pipe2(OFlag::O_CLOEXEC)?;
    unsafe { Ok((PipeTx(File::from_raw_fd(tx)), PipeRx(File::from_raw_fd(rx)))) }
}

impl PipeTx {
    pub fn raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Writes a failure report. Only calls `write(2)`, safe after `fork`.
pub fn write_error(fd: RawFd, (stage, errno): ChildError) {
    let mut buf = [0_u8; 8];
    buf[..4].copy_from_slice(&stage.to_ne_bytes());
    buf[4..].copy_from_slice(&errno.to_ne_bytes());
    unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
}

impl PipeRx {
    /// Blocks until the child execs or exits.
    pub fn read_result(mut self) -> io::Result<Result<(), ChildError>> {
        let mut buf = Vec::with_capacity(8);
        self.0.read_to_end(&mut buf)?;
        match buf.len() {
            0 => Ok(Ok(())),
            8 => {
                let mut stage = [0_u8; 4];
                let mut errno = [0_u8; 4];
                stage.copy_from_slice(&buf[..4]);
                errno.copy_from_slice(&buf[4..]);
                Ok(Err((i32::from_ne_bytes(stage), i32::from_ne_bytes(errno))))
            }
            n => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("truncated child report: {} bytes", n),
            )),
        }
    }
}
