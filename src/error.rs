// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Error types for the VCAI session client.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the session client.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The channel failed to open or was dropped abnormally.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Bounded reconnection gave up
    #[error("Maximum reconnection attempts reached ({attempts})")]
    ConnectionExhausted { attempts: u32 },

    /// No channel is open
    #[error("Not connected")]
    NotConnected,

    /// Inbound payload could not be parsed
    #[error("Malformed event: {0}")]
    MalformedEvent(#[source] serde_json::Error),

    /// Inbound payload carried an unrecognized `type`
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    /// The session-creation call failed
    #[error("Failed to start analysis: {0}")]
    AnalysisStart(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid base or endpoint URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Filesystem error (attachments)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for session client operations.
pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Create an analysis-start error.
    pub fn analysis_start(msg: impl Into<String>) -> Self {
        Self::AnalysisStart(msg.into())
    }

    /// Create an invalid config error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Returns true if the session cannot continue without an explicit restart.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::AnalysisStart(_)
                | SessionError::ConnectionExhausted { .. }
                | SessionError::InvalidConfig(_)
        )
    }
}
