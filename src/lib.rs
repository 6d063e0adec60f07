//! An interactive command interpreter for external programs.
//!
//! Each input line is split into pipeline stages on `|`, optionally redirected
//! with `<`, `>` and `>>`, and optionally detached with a trailing `&`. Bare
//! program names are looked up in `PATH`; stages are started with
//! `fork`/`exec` and connected by anonymous pipes. The only built-in is `cd`,
//! which changes the interpreter's own working directory.
//!
//! The main entry point is [`Interpreter`]: [`Interpreter::execute_line`]
//! processes a single line, [`Interpreter::repl`] runs the prompt loop. The
//! lower layers ([`parser`], [`resolve`], [`process`]) are public for callers
//! that want a single step on its own.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
mod interpreter;
pub mod jobs;
pub mod parser;
pub mod process;
pub mod report;
pub mod resolve;

pub use command::{Command, ExitCode, ExitStatus, Pipeline};
pub use config::{Args, Config};
pub use env::ShellState;
pub use error::{ParseError, ShellError};
/// The interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::{INTERRUPT_EXIT_CODE, Interpreter, LineOutcome, is_exit};
pub use report::Reporter;
