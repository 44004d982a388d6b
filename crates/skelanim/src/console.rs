//! # Developer Console
//!
//! The chat log the demo prints to, and the command lines typed into it.
//!
//! ## Command Syntax
//!
//! ```text
//! Connect host=127.0.0.1 port=25564
//! Server port=25564
//! Send message="hello there"
//! Disconnect | Stop | Controls | Quit
//! ```
//!
//! Command names ignore case. Arguments are `key=value`; values may be
//! double-quoted to include spaces. Unknown keys are ignored.

use std::fmt;

use crate::error::{AppError, AppResult};

/// Message `Send` uses when none is given.
pub const EMPTY_MESSAGE: &str = "(empty)";

/// How a log line is shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Command feedback.
    Info,
    /// Chat traffic.
    Chat,
    /// Failures worth the user's attention.
    Warning,
}

/// One line of console output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    /// Display class.
    pub severity: Severity,
    /// Text as shown.
    pub text: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Ordered console output.
///
/// Every line is also emitted through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct ChatLog {
    lines: Vec<LogLine>,
}

impl ChatLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line.
    pub fn push(&mut self, severity: Severity, text: impl Into<String>) {
        let text = text.into();
        match severity {
            Severity::Info => tracing::info!(target: "console", "{text}"),
            Severity::Chat => tracing::info!(target: "chat", "{text}"),
            Severity::Warning => tracing::warn!(target: "console", "{text}"),
        }
        self.lines.push(LogLine { severity, text });
    }

    /// Appends an informational line.
    pub fn info(&mut self, text: impl Into<String>) {
        self.push(Severity::Info, text);
    }

    /// Returns every line, oldest first.
    #[must_use]
    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    /// Returns lines added after the first `seen`.
    #[must_use]
    pub fn since(&self, seen: usize) -> &[LogLine] {
        self.lines.get(seen..).unwrap_or_default()
    }

    /// Returns the number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns true if any line has exactly this text.
    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.lines.iter().any(|line| line.text == text)
    }
}

/// A parsed console command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Start the client. Missing values come from configuration.
    Connect {
        /// Server host.
        host: Option<String>,
        /// Server port.
        port: Option<u16>,
    },
    /// Start the server.
    Server {
        /// Listen port.
        port: Option<u16>,
    },
    /// Send a chat line to the server.
    Send {
        /// Chat text.
        message: String,
    },
    /// Stop the client.
    Disconnect,
    /// Stop the server.
    Stop,
    /// Print the controls.
    Controls,
    /// Leave the program.
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line. Blank lines give `Ok(None)`.
    ///
    /// # Errors
    ///
    /// [`AppError::UnknownCommand`] for an unknown name,
    /// [`AppError::InvalidArgument`] for a port that does not parse, and
    /// [`AppError::UnterminatedQuote`] for an open quote.
    pub fn parse(line: &str) -> AppResult<Option<Self>> {
        let tokens = tokenize(line)?;
        let Some((name, rest)) = tokens.split_first() else {
            return Ok(None);
        };
        let args = Args::new(rest);

        let command = match name.to_ascii_lowercase().as_str() {
            "connect" => Self::Connect {
                host: args.get("host").map(str::to_owned),
                port: args.port()?,
            },
            "server" => Self::Server { port: args.port()? },
            "send" => Self::Send {
                message: args.get("message").unwrap_or(EMPTY_MESSAGE).to_owned(),
            },
            "disconnect" => Self::Disconnect,
            "stop" => Self::Stop,
            "controls" => Self::Controls,
            "quit" | "exit" => Self::Quit,
            _ => return Err(AppError::UnknownCommand(name.clone())),
        };
        Ok(Some(command))
    }
}

/// `key=value` pairs after the command name.
struct Args<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Args<'a> {
    fn new(tokens: &'a [String]) -> Self {
        let pairs = tokens
            .iter()
            .filter_map(|token| {
                let pair = token.split_once('=');
                if pair.is_none() {
                    tracing::debug!("ignoring console argument without '=': {token}");
                }
                pair
            })
            .collect();
        Self { pairs }
    }

    /// Last value given for `key`, ignoring case.
    fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }

    fn port(&self) -> AppResult<Option<u16>> {
        self.get("port")
            .map(|value| {
                value.parse().map_err(|_| AppError::InvalidArgument {
                    key: "port".to_owned(),
                    value: value.to_owned(),
                })
            })
            .transpose()
    }
}

/// Splits on whitespace, keeping double-quoted runs together.
fn tokenize(line: &str) -> AppResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }

    if quoted {
        return Err(AppError::UnterminatedQuote(line.to_owned()));
    }
    if started {
        tokens.push(current);
    }
    Ok(tokens)
}
