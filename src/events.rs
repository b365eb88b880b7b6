// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Session event types for the VCAI session client.
//!
//! Events arrive over the conversation channel as flat JSON envelopes. They
//! carry pipeline status changes, typing indicators, agent messages,
//! verification output and the final report.

use crate::types::{AgentTrack, Report};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

// =============================================================================
// Wire Envelope
// =============================================================================

/// Raw channel message as sent by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChannelMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl RawChannelMessage {
    fn metadata_field(&self, key: &str) -> Option<&Value> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_null())
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata_field(key).and_then(Value::as_str)
    }

    fn track(&self) -> Option<AgentTrack> {
        self.agent_type.as_deref().and_then(|t| t.parse().ok())
    }

    fn text(&self) -> Option<String> {
        self.message.clone().filter(|m| !m.is_empty())
    }
}

// =============================================================================
// Event Data Types
// =============================================================================

/// Pipeline stage reported by a `conversation_status` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Started,
    SpecialistAnalysis,
    Verification,
    SummaryGeneration,
    Completed,
    Error,
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(AnalysisStatus::Started),
            "specialist_analysis" => Ok(AnalysisStatus::SpecialistAnalysis),
            "verification" => Ok(AnalysisStatus::Verification),
            "summary_generation" => Ok(AnalysisStatus::SummaryGeneration),
            "completed" => Ok(AnalysisStatus::Completed),
            "error" => Ok(AnalysisStatus::Error),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Data for a `conversation_status` event.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangedData {
    pub status: AnalysisStatus,
    /// `metadata.message` of an error status.
    pub error_message: Option<String>,
    /// `metadata.report` of a completed status.
    pub report: Option<Report>,
}

/// Data for a `typing_indicator` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingChangedData {
    pub track: AgentTrack,
    pub is_typing: bool,
}

/// Data for an `agent_message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessageData {
    pub track: AgentTrack,
    pub text: String,
}

/// Data for a `verification_start` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationStartData {
    pub text: String,
}

/// Data for a `verification_result` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResultData {
    /// Specialist whose output was verified (`metadata.specialist_type`).
    pub specialist: Option<AgentTrack>,
    pub text: String,
}

/// Data for a `final_report` event.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalReportData {
    pub text: String,
    pub structured_report: Option<Report>,
}

// =============================================================================
// Session Event
// =============================================================================

/// Typed event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventData {
    ConnectionEstablished,
    StatusChanged(StatusChangedData),
    TypingChanged(TypingChangedData),
    AgentMessage(AgentMessageData),
    VerificationStart(VerificationStartData),
    VerificationResult(VerificationResultData),
    FinalReport(FinalReportData),
    /// Unrecognized type, or a known type missing its required fields.
    Unknown(Value),
}

/// An event received on the conversation channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub conversation_id: String,
    /// Epoch millis as sent by the backend.
    pub timestamp: f64,
    /// Original type string (e.g., "agent_message").
    pub event_type: String,
    pub data: SessionEventData,
}

impl SessionEvent {
    /// Build an event with no envelope metadata.
    pub fn new(event_type: impl Into<String>, data: SessionEventData) -> Self {
        Self {
            conversation_id: String::new(),
            timestamp: 0.0,
            event_type: event_type.into(),
            data,
        }
    }

    /// Stamp the event with a timestamp.
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// A `conversation_status` event.
    pub fn status(status: AnalysisStatus) -> Self {
        Self::new(
            "conversation_status",
            SessionEventData::StatusChanged(StatusChangedData {
                status,
                error_message: None,
                report: None,
            }),
        )
    }

    /// A `conversation_status` error event carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            "conversation_status",
            SessionEventData::StatusChanged(StatusChangedData {
                status: AnalysisStatus::Error,
                error_message: Some(message.into()),
                report: None,
            }),
        )
    }

    /// An `agent_message` event.
    pub fn agent_message(track: AgentTrack, text: impl Into<String>) -> Self {
        Self::new(
            "agent_message",
            SessionEventData::AgentMessage(AgentMessageData {
                track,
                text: text.into(),
            }),
        )
    }

    /// A `typing_indicator` event.
    pub fn typing(track: AgentTrack, is_typing: bool) -> Self {
        Self::new(
            "typing_indicator",
            SessionEventData::TypingChanged(TypingChangedData { track, is_typing }),
        )
    }

    /// Parse an event from a JSON value.
    pub fn from_json(json: &Value) -> Result<Self, serde_json::Error> {
        let raw: RawChannelMessage = serde_json::from_value(json.clone())?;
        Ok(Self::from_raw(raw))
    }

    /// Convert a raw envelope to a typed event.
    pub fn from_raw(raw: RawChannelMessage) -> Self {
        let data = parse_event_data(&raw);
        Self {
            conversation_id: raw.conversation_id,
            timestamp: raw.timestamp,
            event_type: raw.event_type,
            data,
        }
    }

    // =========================================================================
    // Type checking helpers
    // =========================================================================

    pub fn is_unknown(&self) -> bool {
        matches!(self.data, SessionEventData::Unknown(_))
    }

    /// Check if this event ends the pipeline (completed or error status).
    pub fn is_terminal(&self) -> bool {
        matches!(
            &self.data,
            SessionEventData::StatusChanged(StatusChangedData {
                status: AnalysisStatus::Completed | AnalysisStatus::Error,
                ..
            })
        )
    }

    /// Track the event is addressed to, if any.
    pub fn track(&self) -> Option<AgentTrack> {
        match &self.data {
            SessionEventData::TypingChanged(data) => Some(data.track),
            SessionEventData::AgentMessage(data) => Some(data.track),
            SessionEventData::VerificationStart(_) | SessionEventData::VerificationResult(_) => {
                Some(AgentTrack::Verifier)
            }
            SessionEventData::FinalReport(_) => Some(AgentTrack::Summary),
            _ => None,
        }
    }

    /// Message text carried by the event, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.data {
            SessionEventData::AgentMessage(data) => Some(&data.text),
            SessionEventData::VerificationStart(data) => Some(&data.text),
            SessionEventData::VerificationResult(data) => Some(&data.text),
            SessionEventData::FinalReport(data) => Some(&data.text),
            _ => None,
        }
    }
}

impl FromStr for SessionEvent {
    type Err = serde_json::Error;

    /// Parse a raw channel frame. Fails only when the frame is not a JSON
    /// envelope; unrecognized content becomes [`SessionEventData::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawChannelMessage = serde_json::from_str(s)?;
        Ok(Self::from_raw(raw))
    }
}

/// Parse event data based on the envelope's type string.
fn parse_event_data(raw: &RawChannelMessage) -> SessionEventData {
    let unknown = || SessionEventData::Unknown(serde_json::to_value(raw).unwrap_or(Value::Null));

    match raw.event_type.as_str() {
        "connection_established" => SessionEventData::ConnectionEstablished,
        "conversation_status" => {
            let Some(status) = raw.status.as_deref().and_then(|s| s.parse().ok()) else {
                return unknown();
            };
            SessionEventData::StatusChanged(StatusChangedData {
                status,
                error_message: raw.metadata_str("message").map(str::to_string),
                report: raw.metadata_field("report").cloned().map(Report::new),
            })
        }
        "typing_indicator" => match raw.track() {
            Some(track) => SessionEventData::TypingChanged(TypingChangedData {
                track,
                is_typing: raw.is_typing.unwrap_or(false),
            }),
            None => unknown(),
        },
        "agent_message" => match (raw.track(), raw.text()) {
            (Some(track), Some(text)) => {
                SessionEventData::AgentMessage(AgentMessageData { track, text })
            }
            _ => unknown(),
        },
        "verification_start" => match (raw.track(), raw.text()) {
            (Some(AgentTrack::Verifier), Some(text)) => {
                SessionEventData::VerificationStart(VerificationStartData { text })
            }
            _ => unknown(),
        },
        "verification_result" => match (raw.track(), raw.text()) {
            (Some(AgentTrack::Verifier), Some(text)) => SessionEventData::VerificationResult(VerificationResultData {
                specialist: raw
                    .metadata_str("specialist_type")
                    .and_then(|s| s.parse().ok()),
                text,
            }),
            _ => unknown(),
        },
        "final_report" => match (raw.track(), raw.text()) {
            (Some(AgentTrack::Summary), Some(text)) => SessionEventData::FinalReport(FinalReportData {
                text,
                structured_report: raw
                    .metadata_field("structured_report")
                    .cloned()
                    .map(Report::new),
            }),
            _ => unknown(),
        },
        // Unknown event type - preserve raw data
        _ => unknown(),
    }
}
