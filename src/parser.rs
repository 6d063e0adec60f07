//! Segmenter: turns one raw input line into a [`Pipeline`].
//!
//! The grammar is deliberately flat. A line is split on `|` into stages, every
//! stage is split on whitespace into words, and the operators `<`, `>`, `>>`
//! and a trailing `&` are recognized only as standalone words. There is no
//! quoting, escaping or expansion.

use crate::command::{Command, OutputMode, OutputRedirect, Pipeline};
use crate::error::ParseError;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static STAGE_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\|\s*").expect("stage delimiter pattern is valid"));

const INPUT_OP: &str = "<";
const OUTPUT_OP: &str = ">";
const APPEND_OP: &str = ">>";
const BACKGROUND_OP: &str = "&";

fn is_operator(token: &str) -> bool {
    matches!(token, INPUT_OP | OUTPUT_OP | APPEND_OP | BACKGROUND_OP)
}

/// Words of one stage with its redirections taken out.
#[derive(Debug, Default)]
struct Stage<'a> {
    words: Vec<&'a str>,
    input: Option<&'a str>,
    output: Option<(&'a str, OutputMode)>,
}

impl<'a> Stage<'a> {
    /// Single left-to-right scan. The first `<` and the first `>`/`>>` consume
    /// the following token as their target; repeated operators are kept as
    /// ordinary words.
    fn scan(tokens: Vec<&'a str>) -> Result<Self, ParseError> {
        let mut stage = Stage::default();
        let mut tokens = tokens.into_iter();

        while let Some(token) = tokens.next() {
            let (op, taken) = match token {
                INPUT_OP => (INPUT_OP, stage.input.is_some()),
                OUTPUT_OP => (OUTPUT_OP, stage.output.is_some()),
                APPEND_OP => (APPEND_OP, stage.output.is_some()),
                _ => {
                    stage.words.push(token);
                    continue;
                }
            };
            if taken {
                stage.words.push(token);
                continue;
            }

            let target = match tokens.next() {
                Some(t) if !is_operator(t) => t,
                _ => return Err(ParseError::MissingRedirectTarget(op)),
            };
            match op {
                INPUT_OP => stage.input = Some(target),
                OUTPUT_OP => stage.output = Some((target, OutputMode::Truncate)),
                _ => stage.output = Some((target, OutputMode::Append)),
            }
        }

        Ok(stage)
    }

    /// Removes a trailing `&`, reporting whether one was present.
    fn strip_background(&mut self) -> bool {
        if self.words.last() == Some(&BACKGROUND_OP) {
            self.words.pop();
            true
        } else {
            false
        }
    }
}

/// Parse one input line.
///
/// Returns `Ok(None)` when the line holds no command at all (blank, or only
/// pipe characters). Empty segments between pipes are skipped silently.
pub fn parse_line(line: &str) -> Result<Option<Pipeline>, ParseError> {
    let segments: Vec<Vec<&str>> = STAGE_DELIMITER
        .split(line.trim())
        .map(|segment| segment.split_whitespace().collect::<Vec<_>>())
        .filter(|tokens| !tokens.is_empty())
        .collect();

    if segments.is_empty() {
        return Ok(None);
    }

    let last = segments.len() - 1;
    let mut pipeline = Pipeline {
        stages: Vec::with_capacity(segments.len()),
        input: None,
        output: None,
        background: false,
    };

    for (i, tokens) in segments.into_iter().enumerate() {
        let mut stage = Stage::scan(tokens)?;

        if i == last && stage.strip_background() {
            if last > 0 {
                return Err(ParseError::BackgroundPipeline);
            }
            pipeline.background = true;
        }

        if let Some(path) = stage.input {
            if i != 0 {
                return Err(ParseError::MisplacedInputRedirect);
            }
            pipeline.input = Some(PathBuf::from(path));
        }
        if let Some((path, mode)) = stage.output {
            if i != last {
                return Err(ParseError::MisplacedOutputRedirect);
            }
            pipeline.output = Some(OutputRedirect {
                path: PathBuf::from(path),
                mode,
            });
        }

        let words = stage.words.into_iter().map(String::from).collect();
        let command = Command::new(words).ok_or(ParseError::MissingCommand)?;
        pipeline.stages.push(command);
    }

    Ok(Some(pipeline))
}
