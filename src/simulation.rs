// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Offline simulation mode.
//!
//! Replays canned specialist/verifier conversations over the regular
//! [`Transport`] seam, so a simulated run goes through the same parsing,
//! reduction and completion handoff as a live one. The user's idea is
//! quoted in each specialist's opening line.

use crate::client::{AnalysisApi, ApiFuture};
use crate::error::Result;
use crate::reducer::SessionState;
use crate::session::AnalysisSession;
use crate::transport::{
    SharedState, Transport, TransportEvent, TransportEvents, TransportFactory, load_state,
    store_state,
};
use crate::types::{
    AgentTrack, AnalysisRequest, AnalysisStartResponse, ConnectionState, NORMAL_CLOSURE,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const LOG_TARGET: &str = "vcai_session::simulation";

/// Endpoint scheme understood by [`SimulatedTransport`].
pub const SIMULATION_ENDPOINT: &str = "sim://local/ws";

/// Lines in each specialist/verifier conversation.
pub const SIMULATED_SCRIPT_LEN: usize = 6;

const IDEA: &str = "{idea}";

const MARKETING_SCRIPT: [&str; SIMULATED_SCRIPT_LEN] = [
    "Great idea! \"{idea}\" has strong market potential. I'm seeing excellent opportunities for user engagement and growth. The value proposition is clear and addresses key market needs.",
    "Thanks for the analysis! I've verified the marketing claims and found them to be well-grounded. The market research data supports the projections, and the strategy aligns with current industry trends. Looking good!",
    "Perfect! I recommend we focus on the core value propositions: efficiency, cost savings, and user experience. We should target early adopters first, then expand to mainstream market segments.",
    "Excellent strategy! Cross-referencing with market data confirms this approach has a 85% success rate in similar launches. All marketing claims are factually accurate and the timeline is realistic. You're good to proceed!",
    "I've also identified three key marketing channels: social media campaigns targeting millennials, partnership with industry influencers, and content marketing through case studies. Budget allocation should be 40% digital, 35% partnerships, 25% content.",
    "Budget breakdown verified against industry benchmarks. The 40-35-25 split aligns with successful campaigns in similar markets. ROI projections are conservative and achievable. Marketing plan approved for execution.",
];

const LEGAL_SCRIPT: [&str; SIMULATED_SCRIPT_LEN] = [
    "Reviewing \"{idea}\" from a legal perspective. I need to assess compliance requirements, intellectual property considerations, and potential liability issues. Initial analysis shows some areas that need attention.",
    "I've cross-checked the legal analysis against current regulations and case law. The compliance concerns raised are valid and need to be addressed before proceeding. Let me verify the specific requirements.",
    "Key legal considerations: Data privacy compliance (GDPR/CCPA), terms of service updates, user consent mechanisms, and liability limitations. We'll need explicit user agreements and data processing documentation.",
    "Legal requirements verified. GDPR Article 6 and CCPA Section 1798.100 apply. Terms of service template found in legal database. All mentioned compliance frameworks are current and enforceable. Proceeding with documentation.",
    "I recommend implementing a staged compliance approach: Phase 1 - Basic privacy policy and terms, Phase 2 - Advanced consent management, Phase 3 - Full regulatory compliance audit. Timeline: 2-4 weeks per phase.",
    "Phased approach validated against regulatory timelines. Industry standard implementation takes 6-12 weeks for similar projects. Your 6-12 week timeline is realistic and allows for proper testing. Legal framework approved.",
];

const PRODUCT_SCRIPT: [&str; SIMULATED_SCRIPT_LEN] = [
    "Analyzing \"{idea}\" from a product development standpoint. I'm evaluating user experience, technical feasibility, and feature prioritization. This concept has solid potential with some interesting implementation challenges.",
    "Product analysis verified against user research data and technical constraints. The UX considerations mentioned align with best practices. Let me validate the technical feasibility claims and feature priorities.",
    "Core features should include: intuitive onboarding flow, responsive design for mobile-first experience, real-time data synchronization, and scalable architecture. MVP should focus on the essential user journey first.",
    "Feature set validated against current tech stack capabilities. Mobile-first approach supported by 80% of users being on mobile devices. Real-time sync is technically feasible with current infrastructure. MVP scope is appropriate.",
    "Development roadmap: Sprint 1-2 for core architecture, Sprint 3-4 for user interface, Sprint 5-6 for real-time features, Sprint 7-8 for testing and optimization. Each sprint is 2 weeks, total timeline 16 weeks.",
    "Roadmap timeline cross-referenced with similar projects. 16-week timeline is realistic for the proposed feature set. Sprint allocation follows agile best practices. Development plan verified and ready for implementation.",
];

/// Conversations replayed side by side, in round-robin order.
const CONVERSATIONS: [(AgentTrack, &[&str; SIMULATED_SCRIPT_LEN]); 3] = [
    (AgentTrack::Marketing, &MARKETING_SCRIPT),
    (AgentTrack::Legal, &LEGAL_SCRIPT),
    (AgentTrack::Product, &PRODUCT_SCRIPT),
];

// =============================================================================
// Script
// =============================================================================

/// Delays between simulated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationPacing {
    /// Pause before each round of lines starts typing.
    pub message_delay: Duration,
    /// How long an agent shows as typing before its line lands.
    pub typing_delay: Duration,
}

impl SimulationPacing {
    /// No delays at all; useful for tests and replays.
    pub fn instant() -> Self {
        Self {
            message_delay: Duration::ZERO,
            typing_delay: Duration::ZERO,
        }
    }
}

impl Default for SimulationPacing {
    fn default() -> Self {
        Self {
            message_delay: Duration::from_millis(2500),
            typing_delay: Duration::from_millis(1500),
        }
    }
}

/// One frame and the pause that precedes it.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedFrame {
    pub delay: Duration,
    pub payload: Value,
}

/// Build the full frame sequence of a simulated run.
///
/// Each line is a typing-on, the message and a typing-off. Specialist lines
/// are `agent_message`s; verifier replies are `verification_result`s naming
/// the specialist they answer. The run ends with a `completed` status.
pub fn simulated_frames(
    conversation_id: &str,
    prompt: &str,
    pacing: SimulationPacing,
) -> Vec<SimulatedFrame> {
    let mut frames = Vec::new();
    let mut timestamp = 0u64;
    let mut push = |delay: Duration, mut payload: Value| {
        timestamp += 1;
        payload["conversation_id"] = json!(conversation_id);
        payload["timestamp"] = json!(timestamp);
        frames.push(SimulatedFrame { delay, payload });
    };

    push(Duration::ZERO, json!({"type": "connection_established"}));
    push(Duration::ZERO, json!({"type": "conversation_status", "status": "started"}));
    push(
        Duration::ZERO,
        json!({"type": "conversation_status", "status": "specialist_analysis"}),
    );

    for line in 0..SIMULATED_SCRIPT_LEN {
        for (index, (specialist, script)) in CONVERSATIONS.iter().enumerate() {
            let speaker = if line % 2 == 0 {
                *specialist
            } else {
                AgentTrack::Verifier
            };
            let text = script[line].replace(IDEA, prompt);
            let pause = if index == 0 {
                pacing.message_delay
            } else {
                Duration::ZERO
            };

            push(pause, typing(speaker, true));
            let message = if speaker == AgentTrack::Verifier {
                json!({
                    "type": "verification_result",
                    "agent_type": speaker,
                    "message": text,
                    "metadata": {"specialist_type": specialist},
                })
            } else {
                json!({"type": "agent_message", "agent_type": speaker, "message": text})
            };
            push(pacing.typing_delay, message);
            push(Duration::ZERO, typing(speaker, false));
        }
    }

    push(
        Duration::ZERO,
        json!({"type": "conversation_status", "status": "completed"}),
    );
    frames
}

fn typing(track: AgentTrack, is_typing: bool) -> Value {
    json!({"type": "typing_indicator", "agent_type": track, "is_typing": is_typing})
}

/// True once every line of a specialist's simulated conversation has landed.
pub fn is_conversation_complete(state: &SessionState, track: AgentTrack) -> bool {
    track.is_specialist() && state.conversation_view(track).len() >= SIMULATED_SCRIPT_LEN
}

// =============================================================================
// Simulated Transport
// =============================================================================

/// Transport that plays a canned run instead of talking to a server.
///
/// The channel opens on `connect`, delivers every frame with the configured
/// pacing, then closes normally. Outbound payloads are accepted and dropped.
pub struct SimulatedTransport {
    prompt: String,
    pacing: SimulationPacing,
    state: SharedState,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<TransportEvents>,
    player: Option<JoinHandle<()>>,
}

impl SimulatedTransport {
    pub fn new(prompt: impl Into<String>, pacing: SimulationPacing) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            prompt: prompt.into(),
            pacing,
            state: Arc::new(StdMutex::new(ConnectionState::Disconnected)),
            events_tx,
            events_rx: Some(events_rx),
            player: None,
        }
    }

    /// Factory replaying the same idea for every conversation.
    pub fn factory(prompt: impl Into<String>, pacing: SimulationPacing) -> TransportFactory {
        let prompt = prompt.into();
        Arc::new(move |_conversation_id: &str| {
            Box::new(SimulatedTransport::new(prompt.clone(), pacing)) as Box<dyn Transport>
        })
    }
}

impl Transport for SimulatedTransport {
    /// Must be called from within a tokio runtime.
    fn connect(&mut self, endpoint: &str) -> Result<()> {
        if load_state(&self.state).is_active() {
            return Ok(());
        }

        let url = url::Url::parse(endpoint)?;
        let conversation_id = url
            .query_pairs()
            .find(|(key, _)| key == "conversation_id")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        let frames = simulated_frames(&conversation_id, &self.prompt, self.pacing);
        store_state(&self.state, ConnectionState::Connecting);
        self.player = Some(tokio::spawn(play(
            frames,
            Arc::clone(&self.state),
            self.events_tx.clone(),
        )));
        Ok(())
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Some(player) = self.player.take() {
                player.abort();
            }
            store_state(&self.state, ConnectionState::Disconnected);
        })
    }

    fn send(&self, payload: &str) -> bool {
        if load_state(&self.state) != ConnectionState::Connected {
            return false;
        }
        debug!(target: LOG_TARGET, %payload, "simulated channel ignores outbound message");
        true
    }

    fn state(&self) -> ConnectionState {
        load_state(&self.state)
    }

    fn take_events(&mut self) -> Option<TransportEvents> {
        self.events_rx.take()
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        if let Some(player) = self.player.take() {
            player.abort();
        }
    }
}

async fn play(
    frames: Vec<SimulatedFrame>,
    state: SharedState,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    store_state(&state, ConnectionState::Connected);
    let _ = events.send(TransportEvent::Open);

    for frame in frames {
        if !frame.delay.is_zero() {
            tokio::time::sleep(frame.delay).await;
        }
        if events
            .send(TransportEvent::Message(frame.payload.to_string()))
            .is_err()
        {
            return;
        }
    }

    store_state(&state, ConnectionState::Disconnected);
    let _ = events.send(TransportEvent::Closed {
        code: Some(NORMAL_CLOSURE),
        reason: "Simulation finished".into(),
    });
}

// =============================================================================
// Simulated Backend
// =============================================================================

/// In-process stand-in for the HTTP backend.
///
/// Hands out `sim-N` conversation ids and remembers each run's idea so the
/// matching [`SimulatedTransport`] can quote it.
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    pacing: SimulationPacing,
    prompts: Arc<StdMutex<HashMap<String, String>>>,
    next_id: Arc<AtomicU64>,
}

impl SimulatedBackend {
    pub fn new(pacing: SimulationPacing) -> Self {
        Self {
            pacing,
            ..Default::default()
        }
    }

    /// Factory building a simulated transport for each started conversation.
    pub fn factory(&self) -> TransportFactory {
        let prompts = Arc::clone(&self.prompts);
        let pacing = self.pacing;
        Arc::new(move |conversation_id: &str| {
            let prompt = prompts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(conversation_id)
                .cloned()
                .unwrap_or_default();
            Box::new(SimulatedTransport::new(prompt, pacing)) as Box<dyn Transport>
        })
    }

    /// Create a session wired to this backend.
    pub fn create_session(&self) -> AnalysisSession {
        AnalysisSession::new(Arc::new(self.clone()), self.factory())
    }
}

impl AnalysisApi for SimulatedBackend {
    fn start_analysis<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> ApiFuture<'a, AnalysisStartResponse> {
        Box::pin(async move {
            let conversation_id = match &request.conversation_id {
                Some(id) => id.clone(),
                None => format!("sim-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            };
            self.prompts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(conversation_id.clone(), request.prompt.clone());
            info!(target: LOG_TARGET, %conversation_id, "simulated analysis started");

            Ok(AnalysisStartResponse {
                websocket_url: self.websocket_url(&conversation_id)?,
                conversation_id,
                status: "started".into(),
                message: "Simulated analysis started".into(),
            })
        })
    }

    fn websocket_url(&self, conversation_id: &str) -> Result<String> {
        let url =
            url::Url::parse_with_params(SIMULATION_ENDPOINT, &[("conversation_id", conversation_id)])?;
        Ok(url.to_string())
    }
}
