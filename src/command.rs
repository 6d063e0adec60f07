use nix::sys::signal::Signal;
use std::fmt;
use std::path::PathBuf;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// A single program invocation: `argv[0]` followed by its arguments.
///
/// The vector is never empty. The only mutation after parsing is replacing
/// `argv[0]` with the resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    argv: Vec<String>,
}

impl Command {
    /// Build a command from its words. Returns `None` for an empty word list.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            None
        } else {
            Some(Self { argv })
        }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Same command with `argv[0]` replaced by `program`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.argv[0] = program.into();
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

/// How an output redirection opens its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// `>`: create or truncate.
    Truncate,
    /// `>>`: create or append.
    Append,
}

/// An output redirection target for the last stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: PathBuf,
    pub mode: OutputMode,
}

/// One input line: 1..N commands joined by pipes.
///
/// Input redirection can only feed the first stage and output redirection can
/// only capture the last one; the parser rejects anything else. `background`
/// is only ever set on a single-stage pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Command>,
    pub input: Option<PathBuf>,
    pub output: Option<OutputRedirect>,
    pub background: bool,
}

impl Pipeline {
    pub fn is_single(&self) -> bool {
        self.stages.len() == 1
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(ExitCode),
    Signaled(Signal),
}

impl ExitStatus {
    /// Numeric status in shell convention: signal deaths map to `128 + signal`.
    pub fn code(self) -> ExitCode {
        match self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(signal) => 128 + signal as i32,
        }
    }

    pub fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }
}
