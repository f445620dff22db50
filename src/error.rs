//! Error types for rexsh
//!
//! Execution errors carry their own wire rendering: the session handler
//! answers the client with [`ExecError::to_wire_line`] followed by the end of
//! response, so "no output" and "could not run" stay distinguishable.

use crate::lexer::LexerError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Sent when the server fails for reasons the client cannot act on
pub const INTERNAL_ERROR_LINE: &str = "Error interno del servidor\n";

/// Sent when the command line is empty after trimming
pub const EMPTY_COMMAND_LINE: &str = "Error: Comando vacío\n";

/// Errors from tokenizing and running a single command
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("tokenizer failed: {0}")]
    Tokenize(#[from] LexerError),

    #[error("failed to create output pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("{program}: command not found")]
    NotFound { program: String },

    #[error("{program}: permission denied")]
    PermissionDenied { program: String },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    /// Classify a spawn failure by the kind of the underlying I/O error
    pub fn from_spawn(program: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => ExecError::NotFound {
                program: program.to_string(),
            },
            io::ErrorKind::PermissionDenied => ExecError::PermissionDenied {
                program: program.to_string(),
            },
            _ => ExecError::Spawn {
                program: program.to_string(),
                source,
            },
        }
    }

    /// Line sent to the client in place of command output
    pub fn to_wire_line(&self) -> String {
        match self {
            ExecError::EmptyCommand => EMPTY_COMMAND_LINE.to_string(),
            ExecError::NotFound { .. } | ExecError::PermissionDenied { .. } => {
                format!("{}\n", self)
            }
            ExecError::Tokenize(_)
            | ExecError::Pipe(_)
            | ExecError::Spawn { .. }
            | ExecError::Wait { .. } => INTERNAL_ERROR_LINE.to_string(),
        }
    }
}

/// Errors from loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors on the client side of a session
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Server closed the connection")]
    ServerClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_not_found_is_classified() {
        let err = ExecError::from_spawn("nope", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, ExecError::NotFound { .. }));
        assert_eq!(err.to_wire_line(), "nope: command not found\n");
    }

    #[test]
    fn test_spawn_permission_denied_is_classified() {
        let err = ExecError::from_spawn("/etc", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.to_wire_line(), "/etc: permission denied\n");
    }

    #[test]
    fn test_resource_errors_are_internal() {
        let pipe = ExecError::Pipe(io::Error::new(io::ErrorKind::Other, "EMFILE"));
        assert_eq!(pipe.to_wire_line(), INTERNAL_ERROR_LINE);

        let spawn = ExecError::from_spawn("ls", io::Error::new(io::ErrorKind::Other, "EAGAIN"));
        assert!(matches!(spawn, ExecError::Spawn { .. }));
        assert_eq!(spawn.to_wire_line(), INTERNAL_ERROR_LINE);

        let tokenize = ExecError::from(LexerError::Empty);
        assert_eq!(tokenize.to_wire_line(), INTERNAL_ERROR_LINE);
    }

    #[test]
    fn test_empty_command_line() {
        assert_eq!(ExecError::EmptyCommand.to_wire_line(), "Error: Comando vacío\n");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "REXSH_PORT".to_string(),
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value 'abc' for REXSH_PORT");
    }
}
