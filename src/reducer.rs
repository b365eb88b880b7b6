// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Session state and the pure reducer that folds events into it.
//!
//! [`reduce`] never mutates its input and never looks at the clock: the same
//! `(state, event)` pair always yields the same next state.

use crate::events::{
    AgentMessageData, AnalysisStatus, FinalReportData, SessionEvent, SessionEventData,
    StatusChangedData, VerificationResultData,
};
use crate::types::{AgentTrack, ConversationResults, Message, Report};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message used when an error status carries no message of its own.
pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

// =============================================================================
// Phase
// =============================================================================

/// Coarse stage of the server-side analysis pipeline.
///
/// Variants are declared in pipeline order; the derived `Ord` is the order
/// the phase advances in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Analyzing,
    Verifying,
    Summarizing,
    Completed,
    Error,
}

impl Phase {
    /// `Completed` and `Error` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Error)
    }
}

/// Stages of the pipeline that have finished. Flags only ever go false to true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressFlags {
    pub specialist_done: bool,
    pub verification_done: bool,
    pub summary_done: bool,
}

// =============================================================================
// Session State
// =============================================================================

/// Immutable snapshot of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub phase: Phase,
    /// 0 before specialists start, then 1..=3.
    pub current_step: u8,
    pub messages_by_track: BTreeMap<AgentTrack, Vec<Message>>,
    pub typing_by_track: BTreeMap<AgentTrack, bool>,
    pub final_report: Option<Report>,
    pub last_error: Option<String>,
    pub progress: ProgressFlags,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// A fresh idle state with every track present and empty.
    pub fn new() -> Self {
        Self {
            session_id: None,
            phase: Phase::Idle,
            current_step: 0,
            messages_by_track: AgentTrack::ALL.iter().map(|t| (*t, Vec::new())).collect(),
            typing_by_track: AgentTrack::ALL.iter().map(|t| (*t, false)).collect(),
            final_report: None,
            last_error: None,
            progress: ProgressFlags::default(),
        }
    }

    /// A fresh idle state bound to a server-issued conversation id.
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::new()
        }
    }

    // =========================================================================
    // Derived reads
    // =========================================================================

    /// The authoritative completion signal.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Completed
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn messages(&self, track: AgentTrack) -> &[Message] {
        self.messages_by_track
            .get(&track)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_typing(&self, track: AgentTrack) -> bool {
        self.typing_by_track.get(&track).copied().unwrap_or(false)
    }

    /// Texts of one track, in arrival order.
    pub fn texts(&self, track: AgentTrack) -> Vec<String> {
        self.messages(track).iter().map(|m| m.text.clone()).collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages_by_track.values().map(Vec::len).sum()
    }

    /// A specialist track merged with the verifier messages addressed to it.
    ///
    /// A verifier message belongs to `track` when its specialist is `track`,
    /// or when it has no specialist and mentions the track by name. The name
    /// match is a plain substring test, so "product" also matches
    /// "production"; it only applies to results without a specialist. The result
    /// is ordered by timestamp; equal timestamps keep arrival order with the
    /// specialist's own messages first.
    pub fn conversation_view(&self, track: AgentTrack) -> Vec<&Message> {
        let mut view: Vec<&Message> = self.messages(track).iter().collect();

        if track.is_specialist() {
            let name = track.as_str();
            view.extend(self.messages(AgentTrack::Verifier).iter().filter(|m| {
                match m.specialist {
                    Some(specialist) => specialist == track,
                    None => m.text.to_lowercase().contains(name),
                }
            }));
        }

        // sort_by is stable, so ties keep insertion order
        view.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        view
    }

    /// Specialist output for downstream report generation.
    pub fn conversation_results(&self, user_input: impl Into<String>) -> ConversationResults {
        ConversationResults {
            marketing_results: self.texts(AgentTrack::Marketing),
            legal_results: self.texts(AgentTrack::Legal),
            product_results: self.texts(AgentTrack::Product),
            user_input: user_input.into(),
        }
    }

    // =========================================================================
    // Private helpers
    // =========================================================================

    fn append(
        &mut self,
        track: AgentTrack,
        text: &str,
        specialist: Option<AgentTrack>,
        kind: Option<&str>,
        timestamp: f64,
    ) {
        let messages = self.messages_by_track.entry(track).or_default();
        let seq = messages.len();
        let millis = timestamp.max(0.0) as u64;
        let id = match kind {
            Some(kind) => format!("{track}-{kind}-{seq}-{millis}"),
            None => format!("{track}-{seq}-{millis}"),
        };
        messages.push(Message {
            id,
            track,
            text: text.to_string(),
            side: track.side(),
            specialist,
            created_at: timestamp,
        });
    }

    fn advance(&mut self, phase: Phase, step: u8) {
        if !self.phase.is_terminal() && phase > self.phase {
            self.phase = phase;
            self.current_step = step;
        }
    }

    fn apply_status(&mut self, data: &StatusChangedData) {
        if self.phase.is_terminal() {
            return;
        }

        match data.status {
            AnalysisStatus::Started => {
                if self.phase == Phase::Idle {
                    self.phase = Phase::Starting;
                }
            }
            AnalysisStatus::SpecialistAnalysis => self.advance(Phase::Analyzing, 1),
            AnalysisStatus::Verification => {
                if self.phase < Phase::Verifying {
                    self.advance(Phase::Verifying, 2);
                    self.progress.specialist_done = true;
                }
            }
            AnalysisStatus::SummaryGeneration => {
                if self.phase < Phase::Summarizing {
                    self.advance(Phase::Summarizing, 3);
                    self.progress.verification_done = true;
                }
            }
            AnalysisStatus::Completed => {
                self.phase = Phase::Completed;
                self.progress.summary_done = true;
                if let Some(report) = &data.report {
                    self.final_report = Some(report.clone());
                }
            }
            AnalysisStatus::Error => {
                self.phase = Phase::Error;
                self.last_error = Some(
                    data.error_message
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
                );
            }
        }
    }
}

// =============================================================================
// Reducer
// =============================================================================

/// Fold one event into a state, returning the next state.
///
/// Unknown events and `ConnectionEstablished` return an identical copy.
pub fn reduce(state: &SessionState, event: &SessionEvent) -> SessionState {
    let mut next = state.clone();
    let ts = event.timestamp;

    match &event.data {
        SessionEventData::ConnectionEstablished | SessionEventData::Unknown(_) => {}
        SessionEventData::StatusChanged(data) => next.apply_status(data),
        SessionEventData::TypingChanged(data) => {
            next.typing_by_track.insert(data.track, data.is_typing);
        }
        SessionEventData::AgentMessage(AgentMessageData { track, text }) => {
            next.append(*track, text, None, None, ts);
        }
        SessionEventData::VerificationStart(data) => {
            next.append(AgentTrack::Verifier, &data.text, None, Some("start"), ts);
        }
        SessionEventData::VerificationResult(VerificationResultData { specialist, text }) => {
            let kind = match specialist {
                Some(s) => format!("result-{s}"),
                None => "result".to_string(),
            };
            next.append(AgentTrack::Verifier, text, *specialist, Some(&kind), ts);
        }
        SessionEventData::FinalReport(FinalReportData {
            text,
            structured_report,
        }) => {
            next.append(AgentTrack::Summary, text, None, Some("final"), ts);
            if let Some(report) = structured_report {
                next.final_report = Some(report.clone());
            }
        }
    }

    next
}
