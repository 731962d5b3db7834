// src/error.rs
//
// Structured error taxonomy shared by every public operation in the crate.
// Recoverable states are encoded in the result, never by panicking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Up to this many bytes of a command's stdin/stdout/stderr are kept when an
/// error decorates itself with that context.
pub const MAX_CONTEXT_BYTES: usize = 1000;

/// Error values crossing the I/O, subprocess, decode, and persistence
/// boundaries of the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Error {
    /// Underlying OS I/O failure.
    Io(String),
    /// Programmer-visible invariant violation (bad regex, unknown conversion).
    Caller(String),
    /// An external command exited non-zero.
    Command { cmd: String, exit: String },
    /// Decorates an inner error with a byte-capped prefix of the stdin fed
    /// to the command that produced it.
    WithInput(Vec<u8>, Box<Error>),
    /// Decorates an inner error with a byte-capped prefix of the command's
    /// stdout.
    WithStdout(Vec<u8>, Box<Error>),
    /// Decorates an inner error with a byte-capped prefix of the command's
    /// stderr.
    WithStderr(Vec<u8>, Box<Error>),
    /// Decorates an inner error with the name of the call site.
    InFunction(String, Box<Error>),
    /// Decorates an inner error with free-form text.
    Described(String, Box<Error>),
    /// Catch-all for converted foreign errors.
    Other(String),
}

impl Error {
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io(message.into())
    }

    pub fn caller(message: impl Into<String>) -> Self {
        Error::Caller(message.into())
    }

    pub fn command(cmd: impl Into<String>, exit: impl Into<String>) -> Self {
        Error::Command {
            cmd: cmd.into(),
            exit: exit.into(),
        }
    }

    pub fn with_input(bytes: &[u8], inner: Error) -> Self {
        Error::WithInput(cap_bytes(bytes), Box::new(inner))
    }

    pub fn with_stdout(bytes: &[u8], inner: Error) -> Self {
        Error::WithStdout(cap_bytes(bytes), Box::new(inner))
    }

    pub fn with_stderr(bytes: &[u8], inner: Error) -> Self {
        Error::WithStderr(cap_bytes(bytes), Box::new(inner))
    }

    pub fn in_function(name: impl Into<String>, inner: Error) -> Self {
        Error::InFunction(name.into(), Box::new(inner))
    }

    pub fn described(text: impl Into<String>, inner: Error) -> Self {
        Error::Described(text.into(), Box::new(inner))
    }

    pub fn other(text: impl Into<String>) -> Self {
        Error::Other(text.into())
    }

    /// Walk outermost-first, emitting one `tracing` line per decorator layer.
    /// Called once by the outermost orchestrator that decides to log a
    /// failure (the crate never logs on its own initiative beyond this).
    pub fn log_chain(&self) {
        match self {
            Error::WithInput(bytes, inner) => {
                tracing::error!(bytes = %lossy_preview(bytes), "command stdin context");
                inner.log_chain();
            }
            Error::WithStdout(bytes, inner) => {
                tracing::error!(bytes = %lossy_preview(bytes), "command stdout context");
                inner.log_chain();
            }
            Error::WithStderr(bytes, inner) => {
                tracing::error!(bytes = %lossy_preview(bytes), "command stderr context");
                inner.log_chain();
            }
            Error::InFunction(name, inner) => {
                tracing::error!(function = %name, "call site");
                inner.log_chain();
            }
            Error::Described(text, inner) => {
                tracing::error!(%text, "context");
                inner.log_chain();
            }
            leaf => tracing::error!(%leaf, "cache error"),
        }
    }
}

fn cap_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes[..bytes.len().min(MAX_CONTEXT_BYTES)].to_vec()
}

fn lossy_preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
            Error::Caller(msg) => write!(f, "caller error: {msg}"),
            Error::Command { cmd, exit } => write!(f, "command `{cmd}` failed: {exit}"),
            Error::WithInput(bytes, inner) => {
                write!(f, "{} (stdin: {})", inner, lossy_preview(bytes))
            }
            Error::WithStdout(bytes, inner) => {
                write!(f, "{} (stdout: {})", inner, lossy_preview(bytes))
            }
            Error::WithStderr(bytes, inner) => {
                write!(f, "{} (stderr: {})", inner, lossy_preview(bytes))
            }
            Error::InFunction(name, inner) => write!(f, "in {name}: {inner}"),
            Error::Described(text, inner) => write!(f, "{text}: {inner}"),
            Error::Other(text) => write!(f, "{text}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
