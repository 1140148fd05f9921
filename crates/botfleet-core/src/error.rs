// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for botfleet-core.

use thiserror::Error;

/// Result type using FleetError.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors that can occur while operating worker instances.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Transport-level failure: timeout, abort, or connection failure.
    #[error("network error: {0}")]
    Network(String),

    /// A job-control or telemetry endpoint answered with a non-2xx status.
    #[error("remote error [{status}]: {body}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Response body text, used as the human-readable failure detail.
        body: String,
    },

    /// The response body could not be parsed into a usable result.
    #[error("parse error: {0}")]
    Parse(String),

    /// A malformed endpoint template or other invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The session store failed to load or save.
    #[error("store error during '{operation}': {details}")]
    Store {
        /// The store operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl FleetError {
    /// Whether the telemetry fallback chain should swallow this error and
    /// advance to the next access path.
    ///
    /// Config and store errors are not retried over alternative paths; a
    /// different transform cannot fix them.
    pub fn is_chain_recoverable(&self) -> bool {
        matches!(
            self,
            FleetError::Network(_) | FleetError::Remote { .. } | FleetError::Parse(_)
        )
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            FleetError::Remote {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            // Timeouts, aborts and connect failures all surface here.
            FleetError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for FleetError {
    fn from(err: url::ParseError) -> Self {
        FleetError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Parse(err.to_string())
    }
}

impl From<sqlx::Error> for FleetError {
    fn from(err: sqlx::Error) -> Self {
        FleetError::Store {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = FleetError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "network error: connection refused");

        let err = FleetError::Remote {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "remote error [503]: unavailable");

        let err = FleetError::Config("invalid template".to_string());
        assert_eq!(err.to_string(), "configuration error: invalid template");

        let err = FleetError::Store {
            operation: "save_instances".to_string(),
            details: "disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "store error during 'save_instances': disk full"
        );
    }

    #[test]
    fn test_chain_recoverable() {
        assert!(FleetError::Network("x".into()).is_chain_recoverable());
        assert!(
            FleetError::Remote {
                status: 500,
                body: String::new()
            }
            .is_chain_recoverable()
        );
        assert!(FleetError::Parse("x".into()).is_chain_recoverable());
        assert!(!FleetError::Config("x".into()).is_chain_recoverable());
        assert!(
            !FleetError::Store {
                operation: "save".into(),
                details: "x".into()
            }
            .is_chain_recoverable()
        );
    }

    #[test]
    fn test_from_url_parse_error_is_config() {
        let err: FleetError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn test_from_serde_json_error_is_parse() {
        let err: FleetError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, FleetError::Parse(_)));
    }
}
