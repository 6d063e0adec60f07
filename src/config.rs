use argh::FromArgs;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

/// Prompt used when `PS1` is not set.
pub const DEFAULT_PROMPT: &str = "$ ";

#[derive(FromArgs, Debug)]
/// Run external programs, pipes and redirections from an interactive prompt.
pub struct Args {
    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status
    pub command: Option<String>,

    #[argh(switch, short = 'v')]
    /// print diagnostic trace lines on standard error
    pub verbose: bool,
}

/// Settings read once at startup from the environment and the command line.
#[derive(Debug, Clone)]
pub struct Config {
    /// Printed before every input read, without a trailing newline.
    pub prompt: String,
    /// Colon-separated directories searched for bare program names.
    pub search_path: OsString,
    /// Target of a bare `cd`.
    pub home: Option<PathBuf>,
    pub verbose: bool,
}

impl Config {
    /// Snapshot `PS1`, `PATH` and `HOME`.
    pub fn from_env() -> Self {
        Self {
            prompt: env::var("PS1").unwrap_or_else(|_| DEFAULT_PROMPT.to_string()),
            search_path: env::var_os("PATH").unwrap_or_default(),
            home: env::var_os("HOME").map(PathBuf::from),
            verbose: false,
        }
    }

    pub fn with_args(mut self, args: &Args) -> Self {
        self.verbose = args.verbose;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
