//! Process orchestrator.
//!
//! Every shape of execution goes through one policy: fork a child, rewire its
//! descriptors in the child only, replace the child's image with `execv`, and
//! have the parent either wait or detach.
//!
//! Descriptor ownership rules:
//! - every descriptor created here (redirection files, pipes, the exec status
//!   pipe) is close-on-exec and owned by an [`OwnedFd`] in the parent;
//! - the child `dup2`s what it needs onto 0/1 and then closes every original
//!   it was handed;
//! - the parent drops its copy of a pipe end as soon as the child that uses it
//!   has been forked, so a reader sees end-of-stream once its writer exits.

use crate::command::{Command, ExitStatus, OutputMode, OutputRedirect, Pipeline};
use crate::error::{ParseError, ShellError};
use crate::resolve::is_executable;
use nix::errno::Errno;
use nix::libc;
use nix::sys::stat::{Mode, umask};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{self, ForkResult, Pid, chdir, dup2, fork, setsid};
use std::ffi::{CStr, CString};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Exit code of a child whose image could not be replaced.
pub const EXEC_FAILED: i32 = 127;

/// System call wrapper. Retries on EINTR.
pub(crate) fn syscall<F, T>(mut f: F) -> nix::Result<T>
where
    F: FnMut() -> nix::Result<T>,
{
    loop {
        match f() {
            Err(Errno::EINTR) => (),
            result => return result,
        }
    }
}

/// Translate a terminal wait status. Stops and continues are not terminal.
pub(crate) fn exit_status(status: WaitStatus) -> Option<ExitStatus> {
    match status {
        WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Some(ExitStatus::Signaled(signal)),
        _ => None,
    }
}

/// Block until `pid` terminates.
pub fn wait_for(pid: Pid) -> nix::Result<ExitStatus> {
    loop {
        if let Some(status) = exit_status(syscall(|| waitpid(pid, None))?) {
            return Ok(status);
        }
    }
}

/// A resolved command converted to C strings before forking, so the child
/// does not allocate between `fork` and `execv`.
struct Program {
    name: String,
    path: CString,
    /// Owns the bytes `argv_ptrs` points into.
    #[allow(dead_code)]
    argv: Vec<CString>,
    /// Null-terminated, as `execv` expects.
    argv_ptrs: Vec<*const libc::c_char>,
}

impl Program {
    fn prepare(command: &Command) -> Result<Self, ShellError> {
        let name = command.program().to_string();
        let path = Path::new(command.program());
        if !path.is_absolute() || !is_executable(path) {
            return Err(ShellError::Resolution { name });
        }

        let nul = |e| ShellError::spawn(&name, io::Error::new(io::ErrorKind::InvalidInput, e));
        let c_path = CString::new(command.program()).map_err(nul)?;
        let argv = command
            .argv()
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(nul)?;

        let argv_ptrs = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        Ok(Self {
            name,
            path: c_path,
            argv,
            argv_ptrs,
        })
    }
}

/// Raw descriptors a child receives.
///
/// `stdin`/`stdout` are duplicated onto 0 and 1, then every descriptor in
/// `owned` is closed in the child. `owned` also lists descriptors the child
/// must not keep at all, such as the read end of the pipe it writes to.
struct ChildIo {
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
    owned: [Option<RawFd>; 3],
}

impl ChildIo {
    fn new(stdin: Option<&OwnedFd>, stdout: Option<&OwnedFd>, unused: Option<&OwnedFd>) -> Self {
        let stdin = stdin.map(AsRawFd::as_raw_fd);
        let stdout = stdout.map(AsRawFd::as_raw_fd);
        Self {
            stdin,
            stdout,
            owned: [stdin, stdout, unused.map(AsRawFd::as_raw_fd)],
        }
    }
}

/// Step at which a child gave up, as written to the exec status pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ChildStep {
    /// Descriptor wiring or `chdir`.
    Setup = 0,
    Exec = 1,
}

/// A failure the child reported before its image was replaced.
#[derive(Debug)]
struct ChildFailure {
    step: ChildStep,
    error: io::Error,
}

impl ChildFailure {
    fn into_shell_error(self, program: &Program) -> ShellError {
        match self.step {
            ChildStep::Setup => ShellError::spawn(&program.name, self.error),
            ChildStep::Exec => ShellError::Exec {
                name: program.name.clone(),
                source: self.error,
            },
        }
    }
}

struct Spawned {
    pid: Pid,
    /// Set when the child reported a failure before its image was replaced.
    failure: Option<ChildFailure>,
}

#[cfg(not(target_vendor = "apple"))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(target_vendor = "apple")]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    let (read, write) = unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

fn open_input(cwd: &Path, path: &Path) -> Result<OwnedFd, ShellError> {
    File::open(cwd.join(path))
        .map(OwnedFd::from)
        .map_err(|source| ShellError::Redirection {
            path: path.to_path_buf(),
            purpose: "reading",
            source,
        })
}

fn open_output(cwd: &Path, redirect: &OutputRedirect) -> Result<OwnedFd, ShellError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true);
    match redirect.mode {
        OutputMode::Truncate => options.truncate(true),
        OutputMode::Append => options.append(true),
    };
    options
        .open(cwd.join(&redirect.path))
        .map(OwnedFd::from)
        .map_err(|source| ShellError::Redirection {
            path: redirect.path.clone(),
            purpose: "writing",
            source,
        })
}

fn c_cwd(cwd: &Path) -> Result<CString, ShellError> {
    CString::new(cwd.as_os_str().as_bytes())
        .map_err(|e| ShellError::spawn("cd", io::Error::new(io::ErrorKind::InvalidInput, e)))
}

/// Runs in the child after `fork`. Only async-signal-safe calls from here on.
fn exec_child(program: &Program, cwd: &CStr, io: &ChildIo, detach: bool, status: RawFd) -> ! {
    if detach {
        let _ = setsid();
        umask(Mode::empty());
    }

    let (step, errno) = replace_image(program, cwd, io);

    let mut report = [0u8; 5];
    report[0] = step as u8;
    report[1..].copy_from_slice(&(errno as i32).to_ne_bytes());
    // SAFETY: `status` is the write end of the exec status pipe, still open in
    // the child, and `_exit` skips the parent's atexit handlers and buffers.
    unsafe {
        libc::write(status, report.as_ptr().cast(), report.len());
        libc::_exit(EXEC_FAILED)
    }
}

/// Wire descriptors and `execv`. Returns only on failure.
fn replace_image(program: &Program, cwd: &CStr, io: &ChildIo) -> (ChildStep, Errno) {
    if let Some(fd) = io.stdin {
        if let Err(e) = syscall(|| dup2(fd, libc::STDIN_FILENO)) {
            return (ChildStep::Setup, e);
        }
    }
    if let Some(fd) = io.stdout {
        if let Err(e) = syscall(|| dup2(fd, libc::STDOUT_FILENO)) {
            return (ChildStep::Setup, e);
        }
    }
    for fd in io.owned.iter().flatten() {
        if *fd > libc::STDERR_FILENO {
            let _ = unistd::close(*fd);
        }
    }

    if let Err(e) = chdir(cwd) {
        return (ChildStep::Setup, e);
    }
    // SAFETY: `path` and every pointer in `argv_ptrs` refer to C strings owned
    // by `program`, and `argv_ptrs` ends with a null pointer.
    unsafe {
        libc::execv(program.path.as_ptr(), program.argv_ptrs.as_ptr());
    }
    (ChildStep::Exec, Errno::last())
}

/// Read the exec status pipe until the child execs (end-of-stream) or reports
/// the failed step and an error number.
fn read_child_failure(status: OwnedFd) -> Option<ChildFailure> {
    let mut file = File::from(status);
    let mut buf = [0u8; 5];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    if filled < buf.len() {
        return None;
    }
    let step = if buf[0] == ChildStep::Exec as u8 {
        ChildStep::Exec
    } else {
        ChildStep::Setup
    };
    let errno = i32::from_ne_bytes([buf[1], buf[2], buf[3], buf[4]]);
    Some(ChildFailure {
        step,
        error: io::Error::from_raw_os_error(errno),
    })
}

fn fork_exec(program: &Program, cwd: &CStr, io: &ChildIo, detach: bool) -> Result<Spawned, ShellError> {
    let (status_read, status_write) =
        cloexec_pipe().map_err(|e| ShellError::spawn(&program.name, e))?;

    // SAFETY: the child only performs async-signal-safe calls on data prepared
    // before the fork and always ends in `execv` or `_exit`.
    match syscall(|| unsafe { fork() }).map_err(|e| ShellError::spawn(&program.name, e))? {
        ForkResult::Child => exec_child(program, cwd, io, detach, status_write.as_raw_fd()),
        ForkResult::Parent { child } => {
            drop(status_write);
            Ok(Spawned {
                pid: child,
                failure: read_child_failure(status_read),
            })
        }
    }
}

/// Run a pipeline in the foreground and return the status of its last stage.
///
/// Stage `i` reads from the previous pipe (or the input redirection) and writes
/// to a fresh pipe (or the output redirection, or the inherited stdout). All
/// stages are waited for in spawn order, including when a later fork fails.
pub fn run_foreground(pipeline: &Pipeline, cwd: &Path) -> Result<ExitStatus, ShellError> {
    let programs = pipeline
        .stages
        .iter()
        .map(Program::prepare)
        .collect::<Result<Vec<_>, _>>()?;
    let c_cwd = c_cwd(cwd)?;

    let mut upstream = match &pipeline.input {
        Some(path) => Some(open_input(cwd, path)?),
        None => None,
    };
    let mut output = match &pipeline.output {
        Some(redirect) => Some(open_output(cwd, redirect)?),
        None => None,
    };

    let last = programs.len() - 1;
    let mut spawned: Vec<(&Program, Spawned)> = Vec::with_capacity(programs.len());
    let mut failure: Option<ShellError> = None;

    for (i, program) in programs.iter().enumerate() {
        let (downstream, stdout) = if i == last {
            (None, output.take())
        } else {
            match cloexec_pipe() {
                Ok((read, write)) => (Some(read), Some(write)),
                Err(e) => {
                    failure = Some(ShellError::spawn(&program.name, e));
                    break;
                }
            }
        };

        let io = ChildIo::new(upstream.as_ref(), stdout.as_ref(), downstream.as_ref());
        let result = fork_exec(program, &c_cwd, &io, false);

        // The child holds its own copies now.
        drop(stdout);
        upstream = downstream;

        match result {
            Ok(child) => spawned.push((program, child)),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(upstream);
    drop(output);

    let mut last_status = None;
    for (program, child) in spawned {
        match wait_for(child.pid) {
            Ok(status) => last_status = Some(status),
            Err(e) => {
                failure.get_or_insert(ShellError::spawn(&program.name, e));
            }
        }
        if let Some(child_failure) = child.failure {
            failure.get_or_insert(child_failure.into_shell_error(program));
        }
    }

    match (failure, last_status) {
        (Some(e), _) => Err(e),
        (None, Some(status)) => Ok(status),
        (None, None) => Err(ShellError::spawn(
            &programs[last].name,
            io::Error::other("no child process was started"),
        )),
    }
}

/// Start a single-stage pipeline detached from the interpreter's session.
///
/// The child becomes a session leader and clears its file-creation mask before
/// exec. Returns as soon as the image has been replaced; the caller owns
/// reaping the returned pid.
pub fn spawn_background(pipeline: &Pipeline, cwd: &Path) -> Result<Pid, ShellError> {
    let [command] = pipeline.stages.as_slice() else {
        return Err(ParseError::BackgroundPipeline.into());
    };
    let program = Program::prepare(command)?;
    let c_cwd = c_cwd(cwd)?;

    let stdin = match &pipeline.input {
        Some(path) => Some(open_input(cwd, path)?),
        None => None,
    };
    let stdout = match &pipeline.output {
        Some(redirect) => Some(open_output(cwd, redirect)?),
        None => None,
    };

    let io = ChildIo::new(stdin.as_ref(), stdout.as_ref(), None);
    let child = fork_exec(&program, &c_cwd, &io, true)?;
    drop(stdin);
    drop(stdout);

    if let Some(child_failure) = child.failure {
        let _ = wait_for(child.pid);
        return Err(child_failure.into_shell_error(&program));
    }
    Ok(child.pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use crate::resolve::resolve;
    use nix::sys::signal::{Signal, kill};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn pipeline(line: &str, cwd: &Path) -> Pipeline {
        let mut p = parse_line(line).unwrap().unwrap();
        let search = std::env::var_os("PATH").unwrap_or_default();
        p.stages = p
            .stages
            .into_iter()
            .map(|c| resolve(c, &search, cwd))
            .collect();
        p
    }

    fn run(line: &str, cwd: &Path) -> Result<ExitStatus, ShellError> {
        run_foreground(&pipeline(line, cwd), cwd)
    }

    fn read(path: PathBuf) -> String {
        fs::read_to_string(path).expect("output file")
    }

    #[test]
    fn test_simple_command_with_output_redirection() {
        let dir = TempDir::new().unwrap();
        let status = run("echo hi > out.txt", dir.path()).unwrap();
        assert_eq!(status, ExitStatus::Exited(0));
        assert_eq!(read(dir.path().join("out.txt")), "hi\n");
    }

    #[test]
    fn test_nonzero_exit_is_a_status_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert_eq!(run("false", dir.path()).unwrap(), ExitStatus::Exited(1));
        assert_eq!(run("true", dir.path()).unwrap(), ExitStatus::Exited(0));
    }

    #[test]
    fn test_two_stage_pipe() {
        let dir = TempDir::new().unwrap();
        let status = run("printf a\\nb\\nc\\n | wc -l > count.txt", dir.path()).unwrap();
        assert!(status.success());
        assert_eq!(read(dir.path().join("count.txt")).trim(), "3");
    }

    #[test]
    fn test_three_stage_pipe() {
        let dir = TempDir::new().unwrap();
        let status = run("printf c\\na\\nb\\n | sort | head -n 1 > first.txt", dir.path()).unwrap();
        assert!(status.success());
        assert_eq!(read(dir.path().join("first.txt")), "a\n");
    }

    #[test]
    fn test_pipeline_status_is_last_stage() {
        let dir = TempDir::new().unwrap();
        assert_eq!(run("false | true", dir.path()).unwrap(), ExitStatus::Exited(0));
        assert_eq!(run("true | false", dir.path()).unwrap(), ExitStatus::Exited(1));
    }

    #[test]
    fn test_redirection_round_trip_keeps_bytes() {
        let dir = TempDir::new().unwrap();
        let bytes: Vec<u8> = (0..=255u8).chain(b"tail\n".iter().copied()).collect();
        fs::write(dir.path().join("in.bin"), &bytes).unwrap();

        let status = run("cat < in.bin > out.bin", dir.path()).unwrap();

        assert!(status.success());
        assert_eq!(fs::read(dir.path().join("out.bin")).unwrap(), bytes);
    }

    #[test]
    fn test_redirections_around_a_pipeline() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("in.txt"), "b\na\nb\n").unwrap();

        run("sort < in.txt | uniq > out.txt", dir.path()).unwrap();

        assert_eq!(read(dir.path().join("out.txt")), "a\nb\n");
    }

    #[test]
    fn test_truncate_and_append() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("log.txt"), "old contents that are long\n").unwrap();

        run("echo a > log.txt", dir.path()).unwrap();
        run("echo b >> log.txt", dir.path()).unwrap();

        assert_eq!(read(dir.path().join("log.txt")), "a\nb\n");
    }

    #[test]
    fn test_child_runs_in_state_cwd() {
        let dir = TempDir::new().unwrap();
        run("pwd > where.txt", dir.path()).unwrap();
        let expected = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(read(dir.path().join("where.txt")).trim_end(), expected.to_str().unwrap());
    }

    #[test]
    fn test_missing_input_file_spawns_nothing() {
        let dir = TempDir::new().unwrap();
        let err = run("cat < missing.txt > out.txt", dir.path()).unwrap_err();
        assert!(matches!(err, ShellError::Redirection { purpose: "reading", .. }));
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_unwritable_output_is_a_redirection_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let err = run("echo hi > sub", dir.path()).unwrap_err();
        assert!(matches!(err, ShellError::Redirection { purpose: "writing", .. }));
    }

    #[test]
    fn test_unknown_program_is_a_resolution_error() {
        let dir = TempDir::new().unwrap();
        let err = run("no_such_program_pipesh | wc -l", dir.path()).unwrap_err();
        match err {
            ShellError::Resolution { name } => assert_eq!(name, "no_such_program_pipesh"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exec_failure_reads_as_not_found() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("not_a_binary");
        fs::write(&script, "this is not a program\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let err = run("./not_a_binary", dir.path()).unwrap_err();

        assert_eq!(err.exit_code(), 127);
        assert!(err.to_string().contains("command not found (Exec format error"));
        match err {
            ShellError::Exec { name, source } => {
                assert_eq!(PathBuf::from(name), dir.path().join("./not_a_binary"));
                assert_eq!(source.raw_os_error(), Some(libc::ENOEXEC));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_setup_failure_in_child_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("removed");
        let p = pipeline("true", dir.path());

        let err = run_foreground(&p, &gone).unwrap_err();

        match err {
            ShellError::Spawn { source, .. } => {
                assert_eq!(source.raw_os_error(), Some(libc::ENOENT));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_argv_is_null_terminated() {
        let command = Command::new(vec!["/bin/echo".to_string(), "a".to_string()]).unwrap();
        let program = Program::prepare(&command).unwrap();
        assert_eq!(program.argv_ptrs.len(), program.argv.len() + 1);
        assert!(program.argv_ptrs.last().unwrap().is_null());
        assert_eq!(program.argv_ptrs[1], program.argv[1].as_ptr());
    }

    #[test]
    fn test_signal_death_is_reported() {
        let dir = TempDir::new().unwrap();
        let command = Command::new(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "kill -9 $$".to_string(),
        ])
        .unwrap();
        let p = Pipeline {
            stages: vec![command],
            input: None,
            output: None,
            background: false,
        };
        let status = run_foreground(&p, dir.path()).unwrap();
        assert_eq!(status, ExitStatus::Signaled(Signal::SIGKILL));
        assert_eq!(status.code(), 137);
    }

    #[test]
    fn test_background_returns_immediately() {
        let dir = TempDir::new().unwrap();
        let started = Instant::now();
        let pid = spawn_background(&pipeline("sleep 5 &", dir.path()), dir.path()).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        // detached into its own session
        assert_eq!(unistd::getsid(Some(pid)).unwrap(), pid);

        kill(pid, Signal::SIGKILL).unwrap();
        assert_eq!(wait_for(pid).unwrap(), ExitStatus::Signaled(Signal::SIGKILL));
    }

    #[test]
    fn test_background_child_has_cleared_umask() {
        let dir = TempDir::new().unwrap();
        let command = Command::new(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "umask".to_string(),
        ])
        .unwrap();
        let p = Pipeline {
            stages: vec![command],
            input: None,
            output: Some(OutputRedirect {
                path: PathBuf::from("mask.txt"),
                mode: OutputMode::Truncate,
            }),
            background: true,
        };

        let pid = spawn_background(&p, dir.path()).unwrap();
        assert!(wait_for(pid).unwrap().success());

        assert_eq!(read(dir.path().join("mask.txt")).trim(), "0000");
    }

    #[test]
    fn test_background_exec_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("bogus");
        fs::write(&script, "garbage\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let err = spawn_background(&pipeline("./bogus &", dir.path()), dir.path()).unwrap_err();
        assert!(matches!(err, ShellError::Exec { .. }));
    }
}
