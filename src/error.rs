// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Hearth
//!
//! Failures inside the sync layer are converted into state (connectivity
//! transitions, degraded snapshot fields, the store's error field). These
//! types are what the external collaborators report and what gets logged.

use thiserror::Error;

/// Result type alias for Hearth operations
pub type Result<T> = std::result::Result<T, HearthError>;

/// Main error type for Hearth operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HearthError {
    /// Push channel error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Data provider error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors reported by a push transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connection attempt did not complete in time
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Remote end refused the connection
    #[error("Connection refused: {reason}")]
    Refused { reason: String },

    /// Connection dropped
    #[error("Disconnected: {reason}")]
    Disconnected { reason: String },

    /// Operation on a closed transport
    #[error("Transport closed")]
    Closed,
}

/// Errors reported by one of the pull endpoints
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Endpoint exists but the hardware behind it does not (no UPS, no AP)
    #[error("{endpoint} unavailable")]
    Unavailable { endpoint: String },

    /// Non-success HTTP status
    #[error("{endpoint} returned HTTP {status}")]
    Http { endpoint: String, status: u16 },

    /// Session expired or credentials rejected
    #[error("Not authorized")]
    Unauthorized,

    /// Network unreachable, DNS, reset...
    #[error("Network error: {reason}")]
    Network { reason: String },

    /// Endpoint did not answer in time
    #[error("{endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Response could not be decoded
    #[error("Malformed response from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HearthError::Fetch(FetchError::Http {
            endpoint: "stats".to_string(),
            status: 503,
        });
        let msg = format!("{}", err);
        assert!(msg.contains("stats"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_error_conversion() {
        let transport_err = TransportError::Timeout { timeout_ms: 10_000 };
        let err: HearthError = transport_err.into();
        assert!(matches!(err, HearthError::Transport(_)));
        assert!(err.to_string().contains("10000ms"));
    }
}
