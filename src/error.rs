//! Error types for waymark.
//!
//! Parse errors for addresses and command arguments live next to their
//! parsers ([`crate::smtp::address`], [`crate::smtp::command`]); everything
//! that crosses a layer boundary is collected here.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::hooks::Milestone;

/// Errors that can occur during session handling.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Protocol error occurred during session.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection error occurred.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// Shutdown signal received.
    #[error("Shutdown requested")]
    Shutdown,

    /// Session timed out.
    #[error("Session timed out after {0} seconds")]
    Timeout(u64),

    /// A hook failed while handling a milestone.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The message spool failed.
    #[error("Spool error: {0}")]
    Spool(#[from] SpoolError),
}

impl SessionError {
    /// Returns `true` if the error is a client-side issue.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_))
    }
}

/// Errors that can occur in the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),
}

/// Misuse of the hook registry. These are setup-time programming errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The name is not one of the fixed milestones.
    #[error("Unknown milestone: {0}")]
    UnknownMilestone(String),

    /// The hook was never registered for this milestone.
    #[error("Hook {hook} is not registered for {milestone}")]
    HandlerNotFound { milestone: Milestone, hook: String },
}

/// A hook returned an error instead of an outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Hook {hook} failed during {milestone}: {reason}")]
    HandlerFault {
        milestone: Milestone,
        hook: String,
        reason: String,
    },
}

/// Errors from a transaction's body spool.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O on the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The header/body boundary was recorded twice.
    #[error("End of headers already recorded at offset {0}")]
    HeadersAlreadyEnded(u64),

    /// The spooled header block could not be parsed.
    #[error("Malformed headers: {0}")]
    Headers(#[from] mailparse::MailParseError),
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::config::Config`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is invalid.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_classification() {
        let err = SessionError::Shutdown;
        assert!(!err.is_client_error());

        let err = SessionError::Protocol("Invalid command".to_string());
        assert!(err.is_client_error());

        let err = SessionError::Timeout(30);
        assert!(err.is_client_error());

        let err = SessionError::Dispatch(DispatchError::HandlerFault {
            milestone: Milestone::Rcpt,
            hook: "relay".to_string(),
            reason: "boom".to_string(),
        });
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::UnknownMilestone("helo_parse".to_string());
        assert_eq!(err.to_string(), "Unknown milestone: helo_parse");

        let err = RegistryError::HandlerNotFound {
            milestone: Milestone::QueuePost,
            hook: "queue_dir".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Hook queue_dir is not registered for queue_post"
        );
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::HandlerFault {
            milestone: Milestone::DataPost,
            hook: "check_loop".to_string(),
            reason: "header parse failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Hook check_loop failed during data_post: header parse failed"
        );

        let err: SessionError = err.into();
        assert!(err.to_string().starts_with("Hook check_loop failed"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err: SessionError = io_err.into();
        assert!(matches!(err, SessionError::Connection(_)));

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = SpoolError::from(io_err);
        assert!(err.to_string().contains("access denied"));
    }
}
