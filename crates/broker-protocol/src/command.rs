//! Client command parsing.

use std::fmt;

use thiserror::Error;

/// A command sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask for `n` units from the pool
    Request(u64),

    /// Hand back `n` previously granted units
    Release(u64),
}

impl Command {
    /// Parses one protocol line into a command.
    ///
    /// Verbs are matched case-insensitively and must be followed by exactly
    /// one positive integer amount.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split_whitespace();

        let verb = parts.next().ok_or(ParseError::Empty)?;
        let make: fn(u64) -> Command = if verb.eq_ignore_ascii_case("REQUEST") {
            Command::Request
        } else if verb.eq_ignore_ascii_case("RELEASE") {
            Command::Release
        } else {
            return Err(ParseError::UnknownCommand(verb.to_string()));
        };

        let raw_amount = parts.next().ok_or(ParseError::MissingAmount)?;
        if parts.next().is_some() {
            return Err(ParseError::TrailingInput);
        }

        parse_amount(raw_amount).map(make)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Request(n) => write!(f, "REQUEST {n}"),
            Command::Release(n) => write!(f, "RELEASE {n}"),
        }
    }
}

fn parse_amount(raw: &str) -> Result<u64, ParseError> {
    if let Ok(signed) = raw.parse::<i64>() {
        if signed <= 0 {
            return Err(ParseError::NonPositiveAmount(signed));
        }
    }

    raw.parse::<u64>()
        .map_err(|_| ParseError::InvalidAmount(raw.to_string()))
}

/// Errors produced while parsing protocol lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing amount")]
    MissingAmount,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("Unexpected input after amount")]
    TrailingInput,

    #[error("Line exceeds {max} bytes")]
    TooLong { max: usize },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ParseError {
    /// Short reason text sent back to the client in an `ERROR` response.
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::Empty | ParseError::UnknownCommand(_) => "unrecognized command",
            ParseError::MissingAmount => "missing amount",
            ParseError::InvalidAmount(_) => "invalid amount",
            ParseError::NonPositiveAmount(_) => "amount must be a positive integer",
            ParseError::TrailingInput => "unexpected trailing input",
            ParseError::TooLong { .. } => "message too long",
            ParseError::MalformedResponse(_) => "malformed response",
        }
    }
}
