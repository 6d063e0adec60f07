use crate::builtin;
use crate::command::{ExitCode, ExitStatus, Pipeline};
use crate::config::Config;
use crate::env::ShellState;
use crate::error::{ParseError, ShellError};
use crate::jobs::JobTable;
use crate::parser::parse_line;
use crate::process;
use crate::report::Reporter;
use crate::resolve::resolve;
use nix::unistd::Pid;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use signal_hook::consts::SIGINT;
use std::io::{Stderr, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Session exit code when the user interrupts at the prompt.
pub const INTERRUPT_EXIT_CODE: ExitCode = 130;

/// True for the literal `exit` input, in any case.
pub fn is_exit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("exit")
}

/// What a successfully processed line did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank line, nothing ran.
    Empty,
    Builtin(ExitCode),
    Finished(ExitStatus),
    Background(Pid),
}

impl LineOutcome {
    pub fn code(self) -> ExitCode {
        match self {
            LineOutcome::Empty | LineOutcome::Background(_) => 0,
            LineOutcome::Builtin(code) => code,
            LineOutcome::Finished(status) => status.code(),
        }
    }
}

/// The command interpreter: segmenter, resolver, orchestrator and reporter
/// wired together around one [`ShellState`].
///
/// Example
/// ```no_run
/// use pipesh::{Config, Interpreter};
/// let mut sh = Interpreter::new(Config::from_env());
/// let code = sh.execute_line("printf a\\nb\\n | wc -l");
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter<O: Write = Stdout, E: Write = Stderr> {
    state: ShellState,
    config: Config,
    jobs: JobTable,
    reporter: Reporter<O, E>,
    /// Set by SIGINT.
    interrupted: Arc<AtomicBool>,
    /// True while blocked reading input; SIGINT then ends the session.
    at_prompt: Arc<AtomicBool>,
}

impl Interpreter<Stdout, Stderr> {
    /// Interpreter reporting on the process's own stdout/stderr, starting in
    /// the process working directory.
    pub fn new(config: Config) -> Self {
        let reporter = Reporter::stdio(config.verbose);
        Self::with_reporter(config, ShellState::new(), reporter)
    }
}

impl<O: Write, E: Write> Interpreter<O, E> {
    pub fn with_reporter(config: Config, state: ShellState, reporter: Reporter<O, E>) -> Self {
        Self {
            state,
            config,
            jobs: JobTable::new(),
            reporter,
            interrupted: Arc::new(AtomicBool::new(false)),
            at_prompt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn reporter(&mut self) -> &mut Reporter<O, E> {
        &mut self.reporter
    }

    /// Process one input line.
    ///
    /// Every [`ShellError`] is reported on the error stream and converted to a
    /// status code here; nothing escapes to the caller.
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        let code = match self.run_line(line) {
            Ok(outcome) => outcome.code(),
            Err(e) => {
                self.reporter.error(&e);
                e.exit_code()
            }
        };
        self.reap_background();
        code
    }

    /// Process one input line, returning errors instead of reporting them.
    pub fn run_line(&mut self, line: &str) -> Result<LineOutcome, ShellError> {
        let Some(pipeline) = parse_line(line)? else {
            return Ok(LineOutcome::Empty);
        };
        self.reporter.debug(format_args!("parsed {:?}", pipeline));

        if let Some(builtin) = pipeline
            .stages
            .iter()
            .find(|stage| builtin::is_builtin(stage.program()))
        {
            let plain = pipeline.is_single()
                && pipeline.input.is_none()
                && pipeline.output.is_none()
                && !pipeline.background;
            if !plain {
                return Err(ParseError::BuiltinMisuse(builtin.program().to_string()).into());
            }
            let code = builtin::run_builtin(
                builtin,
                &mut self.state,
                &self.config,
                self.reporter.out(),
            )?;
            return Ok(LineOutcome::Builtin(code));
        }

        let pipeline = self.resolve(pipeline);
        if pipeline.background {
            let pid = process::spawn_background(&pipeline, self.state.cwd())?;
            self.reporter.debug(format_args!("detached pid {}", pid));
            self.reporter.background_started(pid);
            self.jobs.push(pid, line.trim());
            Ok(LineOutcome::Background(pid))
        } else {
            let status = process::run_foreground(&pipeline, self.state.cwd())?;
            self.reporter.exit_status(status);
            Ok(LineOutcome::Finished(status))
        }
    }

    fn resolve(&mut self, mut pipeline: Pipeline) -> Pipeline {
        let stages = std::mem::take(&mut pipeline.stages);
        pipeline.stages = stages
            .into_iter()
            .map(|stage| resolve(stage, &self.config.search_path, self.state.cwd()))
            .collect();
        for stage in &pipeline.stages {
            self.reporter.debug(format_args!("resolved {}", stage.program()));
        }
        pipeline
    }

    /// Poll background jobs and report the ones that finished.
    pub fn reap_background(&mut self) {
        for (job, status) in self.jobs.reap() {
            self.reporter.background_finished(&job, status);
        }
    }

    /// Read-eval-print loop.
    ///
    /// Ends with 0 on `exit` or end of input, and with
    /// [`INTERRUPT_EXIT_CODE`] when interrupted at the prompt. An interrupt
    /// while a foreground pipeline runs is reported and the loop goes on.
    ///
    /// On a terminal the editor sees Ctrl-C as a key. When input is not a
    /// terminal the interrupt arrives as SIGINT, and the process exits with
    /// [`INTERRUPT_EXIT_CODE`] from the handler if it lands while waiting for
    /// input.
    pub fn repl(&mut self) -> anyhow::Result<ExitCode> {
        signal_hook::flag::register(SIGINT, Arc::clone(&self.interrupted))?;
        signal_hook::flag::register_conditional_shutdown(
            SIGINT,
            INTERRUPT_EXIT_CODE,
            Arc::clone(&self.at_prompt),
        )?;
        let mut rl = DefaultEditor::new()?;

        loop {
            self.reap_background();
            self.at_prompt.store(true, Ordering::SeqCst);
            let input = rl.readline(&self.config.prompt);
            self.at_prompt.store(false, Ordering::SeqCst);

            match input {
                Ok(line) => {
                    let line = line.trim();
                    if is_exit(line) {
                        return Ok(0);
                    }
                    if line.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line)?;
                    self.interrupted.store(false, Ordering::SeqCst);
                    self.execute_line(line);
                    if self.interrupted.swap(false, Ordering::SeqCst) {
                        self.reporter.interrupted();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    self.reporter.interrupted();
                    return Ok(INTERRUPT_EXIT_CODE);
                }
                Err(ReadlineError::Eof) => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
    }
}
