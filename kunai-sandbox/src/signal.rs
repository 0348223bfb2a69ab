use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

/// Kills a process with SIGKILL once a wall-clock deadline passes.
pub struct Watchdog {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<bool>,
}

impl Watchdog {
    pub fn start(pid: Pid, timeout: Duration) -> Self {
        let (stop, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || match rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                let _ = send_signal(pid, Signal::SIGKILL);
                true
            }
            _ => false,
        });
        Self { stop, handle }
    }

    /// Returns whether the deadline fired.
    pub fn stop(self) -> bool {
        let _ = self.stop.send(());
        self.handle.join().unwrap_or(false)
    }
}

pub fn send_signal(pid: Pid, signal: Signal) -> nix::Result<()> {
    let result = signal::kill(pid, signal);
    debug!(%pid, ?signal, ?result, "kill");
    result
}
