//! Error types for node agent operations.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while a node agent reconciles host state.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Failed to spawn a shell command.
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// A discovery record could not be parsed.
    #[error("Malformed event '{key}': {message}")]
    MalformedEvent {
        /// The raw record key.
        key: String,
        /// Error message.
        message: String,
    },

    /// Hostname could not be resolved to an address.
    #[error("Failed to resolve host '{host}': {message}")]
    Resolve {
        /// The hostname that failed to resolve.
        host: String,
        /// Error message.
        message: String,
    },

    /// The discovery feed failed.
    #[error("Discovery failed: {message}")]
    Discovery {
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl AgentError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed event error.
    pub fn malformed_event(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedEvent {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a resolution error.
    pub fn resolve(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Resolve { .. }
                | AgentError::Discovery { .. }
                | AgentError::ShellCommandFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::resolve("xxx.xx.com", "no address");
        assert_eq!(
            err.to_string(),
            "Failed to resolve host 'xxx.xx.com': no address"
        );
    }

    #[test]
    fn test_malformed_event() {
        let err = AgentError::malformed_event("proid.foo#123", "expected 3 fields");
        assert_eq!(
            err.to_string(),
            "Malformed event 'proid.foo#123': expected 3 fields"
        );
    }

    #[test]
    fn test_shell_command_failed() {
        let err = AgentError::ShellCommandFailed {
            command: "iptables -t nat -N ring_0".to_string(),
            exit_code: 1,
            output: "Chain already exists.".to_string(),
        };
        assert!(err.to_string().contains("iptables -t nat"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(AgentError::resolve("host", "timeout").is_retryable());
        assert!(AgentError::discovery("connection reset").is_retryable());
        assert!(!AgentError::invalid_config("chain", "empty").is_retryable());
        assert!(!AgentError::internal("bug").is_retryable());
    }
}
