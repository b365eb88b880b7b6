// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Core types for the VCAI session client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Defaults
// =============================================================================

/// Backend used when no base URL is configured.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Reconnect attempts before the channel gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// WebSocket close code for an intentional, normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

// =============================================================================
// Enums
// =============================================================================

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the delay before the next reconnect attempt.
    Reconnecting,
    /// Reconnect attempts exhausted.
    Error,
}

impl ConnectionState {
    /// True while a driver is alive (connecting, open, or between retries).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

/// One of the fixed agent categories whose messages are grouped together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentTrack {
    Marketing,
    Product,
    Legal,
    Verifier,
    Summary,
}

impl AgentTrack {
    /// Every track, in display order.
    pub const ALL: [AgentTrack; 5] = [
        AgentTrack::Marketing,
        AgentTrack::Product,
        AgentTrack::Legal,
        AgentTrack::Verifier,
        AgentTrack::Summary,
    ];

    /// Tracks whose output the verifier reviews.
    pub const SPECIALISTS: [AgentTrack; 3] =
        [AgentTrack::Marketing, AgentTrack::Product, AgentTrack::Legal];

    /// Wire name of the track.
    pub fn as_str(self) -> &'static str {
        match self {
            AgentTrack::Marketing => "marketing",
            AgentTrack::Product => "product",
            AgentTrack::Legal => "legal",
            AgentTrack::Verifier => "verifier",
            AgentTrack::Summary => "summary",
        }
    }

    /// Short label shown next to the agent's messages.
    pub fn avatar(self) -> &'static str {
        match self {
            AgentTrack::Marketing => "MKT",
            AgentTrack::Product => "PRD",
            AgentTrack::Legal => "LEG",
            AgentTrack::Verifier => "VER",
            AgentTrack::Summary => "SUM",
        }
    }

    /// Which side of the conversation the track renders on.
    pub fn side(self) -> MessageSide {
        match self {
            AgentTrack::Verifier => MessageSide::Right,
            _ => MessageSide::Left,
        }
    }

    pub fn is_specialist(self) -> bool {
        Self::SPECIALISTS.contains(&self)
    }
}

impl fmt::Display for AgentTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentTrack {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marketing" => Ok(AgentTrack::Marketing),
            "product" => Ok(AgentTrack::Product),
            "legal" => Ok(AgentTrack::Legal),
            "verifier" => Ok(AgentTrack::Verifier),
            "summary" => Ok(AgentTrack::Summary),
            other => Err(format!("unknown agent track: {other}")),
        }
    }
}

/// Side a message renders on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSide {
    Left,
    Right,
}

// =============================================================================
// Messages
// =============================================================================

/// A single agent message reconstructed from the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within a session; embeds the creation timestamp.
    pub id: String,
    pub track: AgentTrack,
    pub text: String,
    pub side: MessageSide,
    /// Specialist a verification result refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialist: Option<AgentTrack>,
    /// Event timestamp (epoch millis). Only used to order merged views.
    pub created_at: f64,
}

impl Message {
    pub fn avatar(&self) -> &'static str {
        self.track.avatar()
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Structured report attached to a completed analysis.
///
/// The backend's report schema is loose, so the raw JSON is kept as-is;
/// [`Report::to_success_report`] gives a typed view when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report(pub Value);

impl Report {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Interpret the report as a scored startup report, if it has that shape.
    pub fn to_success_report(&self) -> Option<StartupSuccessReport> {
        serde_json::from_value(self.0.clone()).ok()
    }
}

/// Overall recommendation of a scored report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    HighPotential,
    ModeratePotential,
    LowPotential,
    HighRisk,
}

/// One scored dimension of a startup report (scores are 0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreMetric {
    pub label: String,
    pub score: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub key_factors: Vec<String>,
}

/// The five metrics of a startup report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetrics {
    pub business_model: ScoreMetric,
    pub legal_compliance: ScoreMetric,
    pub product_viability: ScoreMetric,
    pub market_opportunity: ScoreMetric,
    pub team_capability: ScoreMetric,
}

/// Typed view of a scored startup report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupSuccessReport {
    pub overall_score: f64,
    pub recommendation: Recommendation,
    pub metrics: ReportMetrics,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_strengths: Vec<String>,
    #[serde(default)]
    pub critical_risks: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// Specialist output handed to downstream report generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResults {
    pub marketing_results: Vec<String>,
    pub legal_results: Vec<String>,
    pub product_results: Vec<String>,
    pub user_input: String,
}

// =============================================================================
// Requests
// =============================================================================

/// A file uploaded alongside the analysis prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Read an attachment from disk, named after the file.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self::new(file_name, bytes))
    }
}

/// Request to start a new analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub files: Vec<Attachment>,
    /// Reuse an existing conversation id instead of letting the server pick one.
    pub conversation_id: Option<String>,
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn file(mut self, attachment: Attachment) -> Self {
        self.files.push(attachment);
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

impl From<&str> for AnalysisRequest {
    fn from(prompt: &str) -> Self {
        Self::new(prompt)
    }
}

impl From<String> for AnalysisRequest {
    fn from(prompt: String) -> Self {
        Self::new(prompt)
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Response of the session-creation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStartResponse {
    pub conversation_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub websocket_url: String,
}

/// Server-side status of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStatus {
    pub conversation_id: String,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub has_final_report: bool,
}

/// An agent known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

/// One phase of the backend workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPhase {
    pub phase: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub duration_estimate: String,
    #[serde(default)]
    pub interactions: Option<Vec<String>>,
}

/// Description of the backend workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phases: Vec<WorkflowPhase>,
    #[serde(default)]
    pub total_duration_estimate: String,
    #[serde(default)]
    pub output: String,
}

// =============================================================================
// Options
// =============================================================================

/// Reconnection policy of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay before each reconnect attempt.
    pub delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Options for creating an [`AnalysisClient`](crate::AnalysisClient).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// HTTP base URL of the backend; the channel scheme mirrors it.
    pub base_url: String,
    /// Timeout for HTTP calls. `None` disables it.
    pub request_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientOptions {
    /// Defaults overridden by `VCAI_*` environment variables.
    ///
    /// - `VCAI_BACKEND_URL`
    /// - `VCAI_RECONNECT_INTERVAL_MS`
    /// - `VCAI_MAX_RECONNECT_ATTEMPTS`
    /// - `VCAI_REQUEST_TIMEOUT_SECS` (`0` disables the timeout)
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(url) = lookup("VCAI_BACKEND_URL") {
            options.base_url = url;
        }
        if let Some(ms) = lookup("VCAI_RECONNECT_INTERVAL_MS") {
            let ms: u64 = parse_env("VCAI_RECONNECT_INTERVAL_MS", &ms)?;
            options.reconnect.delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = lookup("VCAI_MAX_RECONNECT_ATTEMPTS") {
            options.reconnect.max_attempts = parse_env("VCAI_MAX_RECONNECT_ATTEMPTS", &attempts)?;
        }
        if let Some(secs) = lookup("VCAI_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env("VCAI_REQUEST_TIMEOUT_SECS", &secs)?;
            options.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(options)
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> crate::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::SessionError::invalid_config(format!("{key}: invalid value {value:?}")))
}
