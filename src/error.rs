use crate::command::ExitCode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed pipeline syntax detected by the segmenter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A redirection operator is the last token of its stage, or is followed
    /// by another operator.
    #[error("missing file name after '{0}'")]
    MissingRedirectTarget(&'static str),
    /// A stage consisted only of redirections or a background marker.
    #[error("missing command")]
    MissingCommand,
    #[error("input redirection is only allowed on the first command of a pipeline")]
    MisplacedInputRedirect,
    #[error("output redirection is only allowed on the last command of a pipeline")]
    MisplacedOutputRedirect,
    #[error("background execution of a pipeline with several commands is not supported")]
    BackgroundPipeline,
    /// A built-in used in a position where it cannot run in-process.
    #[error("{0}: built-in cannot be piped, redirected or run in background")]
    BuiltinMisuse(String),
}

/// Every failure that can abort processing of one input line.
///
/// None of them terminates the interpreter: the line is abandoned, the error is
/// reported on standard error and the REPL continues.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("syntax error: {0}")]
    Input(#[from] ParseError),

    #[error("{name}: command not found")]
    Resolution { name: String },

    /// The program was found but the child could not replace its image with it.
    #[error("{name}: command not found ({source})")]
    Exec {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{}: cannot open for {}: {}", .path.display(), .purpose, .source)]
    Redirection {
        path: PathBuf,
        purpose: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("cd: {message}")]
    Directory { message: String },
}

impl ShellError {
    /// Status code recorded for a line that failed with this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ShellError::Input(_) => 2,
            ShellError::Resolution { .. } | ShellError::Exec { .. } => 127,
            ShellError::Redirection { .. } => 1,
            ShellError::Spawn { .. } => 126,
            ShellError::Directory { .. } => 1,
        }
    }

    pub(crate) fn spawn(program: &str, source: impl Into<io::Error>) -> Self {
        ShellError::Spawn {
            program: program.to_string(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failure() {
        let err = ShellError::Resolution {
            name: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "nope: command not found");

        let err = ShellError::Redirection {
            path: PathBuf::from("/missing/in.txt"),
            purpose: "reading",
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("/missing/in.txt: cannot open for reading"));

        let err = ShellError::Exec {
            name: "/tmp/tool".to_string(),
            source: io::Error::from_raw_os_error(nix::libc::ENOEXEC),
        };
        assert!(err.to_string().starts_with("/tmp/tool: command not found (Exec format error"));

        let err: ShellError = ParseError::MissingRedirectTarget("<").into();
        assert_eq!(err.to_string(), "syntax error: missing file name after '<'");
    }

    #[test]
    fn test_exit_codes() {
        let err = ShellError::Resolution {
            name: "x".to_string(),
        };
        assert_eq!(err.exit_code(), 127);
        let err = ShellError::Exec {
            name: "x".to_string(),
            source: io::Error::from_raw_os_error(nix::libc::EACCES),
        };
        assert_eq!(err.exit_code(), 127);
        assert_eq!(ShellError::from(ParseError::MissingCommand).exit_code(), 2);
        let err = ShellError::spawn("x", nix::errno::Errno::EAGAIN);
        assert_eq!(err.exit_code(), 126);
    }
}
