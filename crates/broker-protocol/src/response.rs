//! Server responses.

use std::fmt;

use crate::command::ParseError;

const REASON_SEPARATOR: &str = ", REASON: ";

/// A response line sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The requested units were taken from the pool
    Granted(u64),

    /// The request could not be satisfied; nothing changed
    Denied { amount: u64, reason: String },

    /// Units credited back to the pool (possibly fewer than asked for)
    Released(u64),

    /// The command was not understood or could not be processed
    Error { reason: String },
}

impl Response {
    /// Denial for a request larger than the current pool.
    pub fn insufficient(amount: u64, available: u64) -> Self {
        Response::Denied {
            amount,
            reason: format!("insufficient resources (available: {available})"),
        }
    }

    /// Error response carrying the given reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Response::Error {
            reason: reason.into(),
        }
    }

    /// Parses a response line, as received by a client.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let malformed = || ParseError::MalformedResponse(line.to_string());

        if let Some(rest) = line.strip_prefix("ERROR") {
            let reason = rest.strip_prefix(REASON_SEPARATOR).ok_or_else(malformed)?;
            return Ok(Response::error(reason));
        }

        if let Some(rest) = line.strip_prefix("DENIED ") {
            let (amount, reason) = rest.split_once(REASON_SEPARATOR).ok_or_else(malformed)?;
            let amount = amount.parse().map_err(|_| malformed())?;
            return Ok(Response::Denied {
                amount,
                reason: reason.to_string(),
            });
        }

        let (verb, amount) = line.split_once(' ').ok_or_else(malformed)?;
        let amount = amount.parse().map_err(|_| malformed())?;
        match verb {
            "GRANTED" => Ok(Response::Granted(amount)),
            "RELEASED" => Ok(Response::Released(amount)),
            _ => Err(malformed()),
        }
    }

    /// Returns true for `GRANTED`.
    pub fn is_granted(&self) -> bool {
        matches!(self, Response::Granted(_))
    }
}

impl From<&ParseError> for Response {
    fn from(err: &ParseError) -> Self {
        Response::error(err.reason())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Granted(n) => write!(f, "GRANTED {n}"),
            Response::Denied { amount, reason } => {
                write!(f, "DENIED {amount}{REASON_SEPARATOR}{reason}")
            }
            Response::Released(n) => write!(f, "RELEASED {n}"),
            Response::Error { reason } => write!(f, "ERROR{REASON_SEPARATOR}{reason}"),
        }
    }
}
