use crate::command::{Command, ExitCode};
use crate::config::Config;
use crate::env::ShellState;
use crate::error::ShellError;
use argh::{EarlyExit, FromArgs};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd".
    fn name() -> &'static str;

    fn execute(self, state: &mut ShellState, config: &Config) -> Result<ExitCode, ShellError>;
}

/// True when `name` is handled in-process instead of being spawned.
pub(crate) fn is_builtin(name: &str) -> bool {
    name == Cd::name()
}

/// Parse and run a builtin. Help output requested with `--help` goes to `stdout`.
pub(crate) fn run_builtin(
    command: &Command,
    state: &mut ShellState,
    config: &Config,
    stdout: &mut dyn Write,
) -> Result<ExitCode, ShellError> {
    let args: Vec<&str> = command.args().iter().map(String::as_str).collect();
    match Cd::from_args(&[Cd::name()], &args) {
        Ok(cd) => cd.execute(state, config),
        Err(EarlyExit { output, status }) => match status {
            Ok(()) => {
                let _ = stdout.write_all(output.as_bytes());
                Ok(0)
            }
            Err(()) => Err(ShellError::Directory {
                message: output.trim_end().to_string(),
            }),
        },
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute, relative to the current directory, or `..` for the parent.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, state: &mut ShellState, config: &Config) -> Result<ExitCode, ShellError> {
        let new_dir = match self.target.as_deref() {
            Some("..") => {
                let cwd = state.cwd();
                cwd.parent().unwrap_or(cwd).to_path_buf()
            }
            Some(t) if !t.is_empty() => existing_dir(t, state.cwd().join(t))?,
            _ => {
                let home = config.home.clone().ok_or_else(|| ShellError::Directory {
                    message: "no target and HOME not set".to_string(),
                })?;
                let shown = home.to_string_lossy().into_owned();
                existing_dir(&shown, home)?
            }
        };

        state.set_cwd(new_dir);
        Ok(0)
    }
}

/// Canonical form of `path`, which must name an existing directory.
fn existing_dir(shown: &str, path: PathBuf) -> Result<PathBuf, ShellError> {
    let canonical = fs::canonicalize(&path).map_err(|e| ShellError::Directory {
        message: format!("{}: {}", shown, e),
    })?;
    if !canonical.is_dir() {
        return Err(ShellError::Directory {
            message: format!("{}: Not a directory", shown),
        });
    }
    Ok(canonical)
}
