// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]

//! # VCAI Session Client
//!
//! Client library for the VCAI multi-agent startup analysis backend.
//!
//! An analysis is started over HTTP; the backend then streams status, typing
//! and message events over a WebSocket channel while its marketing, product
//! and legal specialists, a verifier and a summarizer work through the idea.
//! The client folds that stream into a [`SessionState`] snapshot and hands
//! the transcripts off once the analysis completes.
//!
//! Without a backend, [`SimulatedBackend`] replays canned conversations over
//! the same transport seam.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use vcai_session::{AgentTrack, AnalysisClient};
//!
//! #[tokio::main]
//! async fn main() -> vcai_session::Result<()> {
//!     let client = AnalysisClient::from_env()?;
//!     let session = client.create_session();
//!
//!     session.start_analysis("Subscription boxes for indoor plants").await?;
//!     let state = session.wait_for_finish(Duration::from_secs(600)).await?;
//!
//!     for message in state.messages(AgentTrack::Summary) {
//!         println!("[{}] {}", message.avatar(), message.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod reducer;
pub mod session;
pub mod simulation;
pub mod transport;
pub mod types;

// Re-export main types at crate root for convenience
pub use error::{Result, SessionError};
pub use types::{
    AgentInfo,
    // Enums
    AgentTrack,
    // Request types
    AnalysisRequest,
    // Response types
    AnalysisStartResponse,
    Attachment,
    // Config types
    ClientOptions,
    ConnectionState,
    ConversationResults,
    ConversationStatus,
    // Constants
    DEFAULT_BACKEND_URL,
    DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY,
    Message,
    MessageSide,
    // Report types
    Recommendation,
    ReconnectPolicy,
    Report,
    ReportMetrics,
    ScoreMetric,
    StartupSuccessReport,
    WorkflowInfo,
    WorkflowPhase,
};

// Re-export event types
pub use events::{
    AgentMessageData, AnalysisStatus, FinalReportData, RawChannelMessage, SessionEvent,
    SessionEventData, StatusChangedData, TypingChangedData, VerificationResultData,
    VerificationStartData,
};

// Re-export reducer types
pub use reducer::{Phase, ProgressFlags, SessionState, reduce};

// Re-export transport types
pub use transport::{
    ReconnectDecision, ReconnectTracker, Transport, TransportEvent, TransportEvents,
    TransportFactory, WebSocketTransport,
};

// Re-export session types
pub use session::{
    AnalysisComplete, AnalysisSession, CompletionHandler, SessionStatus, SessionUpdate,
    UpdateSubscription,
};

// Re-export simulation types
pub use simulation::{
    SIMULATED_SCRIPT_LEN, SimulatedBackend, SimulatedFrame, SimulatedTransport, SimulationPacing,
    is_conversation_complete, simulated_frames,
};

// Re-export client types
pub use client::{AnalysisApi, AnalysisClient, ApiFuture, ClientBuilder};
