use crate::command::ExitStatus;
use crate::process::{exit_status, syscall};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;

/// A detached child the interpreter did not wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundJob {
    pub pid: Pid,
    /// The input line that started it, for reporting.
    pub line: String,
}

/// Background children still owed a `waitpid`.
///
/// Foreground waits target specific pids, so nothing else collects these
/// statuses; [`JobTable::reap`] must be polled to avoid zombies.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<BackgroundJob>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pid: Pid, line: impl Into<String>) {
        self.jobs.push(BackgroundJob {
            pid,
            line: line.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[BackgroundJob] {
        &self.jobs
    }

    /// Collect every job that has terminated, without blocking.
    ///
    /// A job whose pid is no longer our child (`ECHILD`) is dropped silently.
    pub fn reap(&mut self) -> Vec<(BackgroundJob, ExitStatus)> {
        let mut finished = Vec::new();
        self.jobs.retain(|job| {
            match syscall(|| waitpid(job.pid, Some(WaitPidFlag::WNOHANG))) {
                Ok(status) => match exit_status(status) {
                    Some(status) => {
                        finished.push((job.clone(), status));
                        false
                    }
                    None => true,
                },
                Err(Errno::ECHILD) => false,
                Err(_) => true,
            }
        });
        finished
    }
}
