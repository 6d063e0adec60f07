use crate::command::ExitStatus;
use crate::error::ShellError;
use crate::jobs::BackgroundJob;
use nix::unistd::Pid;
use std::fmt;
use std::io::{self, Stderr, Stdout, Write};

/// Prefix for every line the interpreter writes to standard error.
pub const PREFIX: &str = "pipesh";

/// User-visible notices of the interpreter itself.
///
/// Job notices (exit codes, background start/finish) go to `out`; errors,
/// interrupts and `-v` trace lines go to `err`. Every notice is flushed right
/// away so it is ordered before output of children spawned afterwards.
pub struct Reporter<O: Write, E: Write> {
    out: O,
    err: E,
    verbose: bool,
}

impl Reporter<Stdout, Stderr> {
    pub fn stdio(verbose: bool) -> Self {
        Self::new(io::stdout(), io::stderr(), verbose)
    }
}

impl<O: Write, E: Write> Reporter<O, E> {
    pub fn new(out: O, err: E, verbose: bool) -> Self {
        Self { out, err, verbose }
    }

    /// Report a finished foreground pipeline. Success is silent.
    pub fn exit_status(&mut self, status: ExitStatus) {
        match status {
            ExitStatus::Exited(0) => {}
            ExitStatus::Exited(code) => {
                self.notice(format_args!("Program terminated with exit code {}", code))
            }
            ExitStatus::Signaled(signal) => {
                self.notice(format_args!("Program terminated by signal {}", signal))
            }
        }
    }

    pub fn background_started(&mut self, pid: Pid) {
        self.notice(format_args!("[{}] Started in background", pid));
    }

    pub fn background_finished(&mut self, job: &BackgroundJob, status: ExitStatus) {
        match status {
            ExitStatus::Exited(0) => self.notice(format_args!("[{}] Done\t{}", job.pid, job.line)),
            ExitStatus::Exited(code) => {
                self.notice(format_args!("[{}] Exit {}\t{}", job.pid, code, job.line))
            }
            ExitStatus::Signaled(signal) => {
                self.notice(format_args!("[{}] {}\t{}", job.pid, signal, job.line))
            }
        }
    }

    pub fn error(&mut self, error: &ShellError) {
        self.diagnostic(format_args!("{}", error));
    }

    pub fn interrupted(&mut self) {
        self.diagnostic(format_args!("interrupted"));
    }

    /// Trace line, only written with `-v`.
    pub fn debug(&mut self, args: fmt::Arguments<'_>) {
        if self.verbose {
            self.diagnostic(args);
        }
    }

    pub fn out(&mut self) -> &mut O {
        &mut self.out
    }

    pub fn err(&mut self) -> &mut E {
        &mut self.err
    }

    fn notice(&mut self, args: fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{}", args);
        let _ = self.out.flush();
    }

    fn diagnostic(&mut self, args: fmt::Arguments<'_>) {
        let _ = writeln!(self.err, "{}: {}", PREFIX, args);
        let _ = self.err.flush();
    }
}
