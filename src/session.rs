// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Session orchestration for the VCAI session client.
//!
//! An [`AnalysisSession`] owns one transport and one [`SessionState`] for the
//! lifetime of an analysis run. It creates the server-side session, opens the
//! channel, folds every inbound event through [`reduce`], and hands the
//! finished transcripts off exactly once.

use crate::client::AnalysisApi;
use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::reducer::{Phase, SessionState, reduce};
use crate::transport::{Transport, TransportEvent, TransportEvents, TransportFactory};
use crate::types::{AgentTrack, AnalysisRequest, ConversationResults, Report};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "vcai_session::session";

/// Error folded into the state when the channel gives up reconnecting.
pub const RECONNECT_EXHAUSTED_MESSAGE: &str = "Maximum reconnection attempts reached";

// =============================================================================
// Handler and Update Types
// =============================================================================

/// Handler for the completion handoff.
pub type CompletionHandler = Arc<dyn Fn(&AnalysisComplete) + Send + Sync>;

/// Coarse lifecycle of an orchestrator.
///
/// `Connected` covers every pipeline phase between start and finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Starting,
    Connected,
    Completed,
    Errored,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Errored)
    }
}

/// Payload of the one-time completion handoff.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisComplete {
    pub conversation_id: String,
    /// Specialist output plus the user's prompt.
    pub results: ConversationResults,
    /// Message texts of every track, in arrival order.
    pub transcripts: BTreeMap<AgentTrack, Vec<String>>,
    pub final_report: Option<Report>,
}

impl AnalysisComplete {
    fn from_state(state: &SessionState, prompt: &str) -> Self {
        Self {
            conversation_id: state.session_id.clone().unwrap_or_default(),
            results: state.conversation_results(prompt),
            transcripts: AgentTrack::ALL
                .iter()
                .map(|&track| (track, state.texts(track)))
                .collect(),
            final_report: state.final_report.clone(),
        }
    }
}

/// Change broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Status(SessionStatus),
    /// A new snapshot after an event was folded.
    State(SessionState),
    Completed(AnalysisComplete),
}

/// A subscription to session updates.
pub struct UpdateSubscription {
    pub receiver: broadcast::Receiver<SessionUpdate>,
}

impl UpdateSubscription {
    /// Receive the next update.
    pub async fn recv(&mut self) -> std::result::Result<SessionUpdate, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct Inner {
    status: SessionStatus,
    state: SessionState,
    completion_fired: bool,
    /// Bumped on every reset; a pump from an older run must not touch state.
    epoch: u64,
    prompt: String,
    transport: Option<Box<dyn Transport>>,
    pump: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    updates: broadcast::Sender<SessionUpdate>,
    handlers: RwLock<HashMap<u64, CompletionHandler>>,
    next_handler_id: AtomicU64,
}

impl Shared {
    fn publish(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }

    fn set_status(&self, inner: &mut Inner, status: SessionStatus) {
        if inner.status != status {
            debug!(target: LOG_TARGET, from = ?inner.status, to = ?status, "status changed");
            inner.status = status;
            self.publish(SessionUpdate::Status(status));
        }
    }

    /// Fold one event. Returns the handoff payload the first time the
    /// analysis completes.
    fn fold(&self, inner: &mut Inner, event: &SessionEvent) -> Option<AnalysisComplete> {
        inner.state = reduce(&inner.state, event);
        self.publish(SessionUpdate::State(inner.state.clone()));

        match inner.state.phase {
            Phase::Completed => self.set_status(inner, SessionStatus::Completed),
            Phase::Error => self.set_status(inner, SessionStatus::Errored),
            _ => {}
        }

        if inner.state.is_complete() && !inner.completion_fired {
            inner.completion_fired = true;
            let complete = AnalysisComplete::from_state(&inner.state, &inner.prompt);
            info!(
                target: LOG_TARGET,
                conversation_id = %complete.conversation_id,
                "analysis complete"
            );
            self.publish(SessionUpdate::Completed(complete.clone()));
            return Some(complete);
        }
        None
    }

    fn handle_transport_event(
        &self,
        inner: &mut Inner,
        event: TransportEvent,
    ) -> Option<AnalysisComplete> {
        match event {
            TransportEvent::Open => {
                if inner.status == SessionStatus::Starting {
                    self.set_status(inner, SessionStatus::Connected);
                }
                None
            }
            TransportEvent::Message(raw) => match raw.parse::<SessionEvent>() {
                Ok(event) => {
                    if event.is_unknown() {
                        warn!(
                            target: LOG_TARGET,
                            error = %SessionError::UnknownEvent(event.event_type.clone()),
                            "ignoring channel message"
                        );
                    }
                    self.fold(inner, &event)
                }
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        error = %SessionError::MalformedEvent(err),
                        "dropping channel message"
                    );
                    None
                }
            },
            TransportEvent::Error(message) => {
                warn!(
                    target: LOG_TARGET,
                    error = %SessionError::Connection(message),
                    "channel error"
                );
                None
            }
            TransportEvent::Closed { code, reason } => {
                debug!(target: LOG_TARGET, ?code, %reason, "channel closed");
                None
            }
            TransportEvent::Exhausted { attempts } => {
                warn!(
                    target: LOG_TARGET,
                    error = %SessionError::ConnectionExhausted { attempts },
                    "channel gave up"
                );
                self.fold(inner, &SessionEvent::error(RECONNECT_EXHAUSTED_MESSAGE))
            }
        }
    }

    async fn notify_complete(&self, complete: &AnalysisComplete) {
        let handlers = self.handlers.read().await;
        for handler in handlers.values() {
            handler(complete);
        }
    }
}

/// Fold transport events into the session, one at a time, in arrival order.
async fn pump(shared: Arc<Shared>, epoch: u64, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let complete = {
            let mut inner = shared.inner.lock().await;
            if inner.epoch != epoch {
                break;
            }
            shared.handle_transport_event(&mut inner, event)
        };
        if let Some(complete) = complete {
            shared.notify_complete(&complete).await;
        }
    }
}

// =============================================================================
// Analysis Session
// =============================================================================

/// Orchestrates one analysis run at a time.
///
/// # Example
///
/// ```no_run
/// use vcai_session::{AnalysisClient, SessionUpdate};
///
/// #[tokio::main]
/// async fn main() -> vcai_session::Result<()> {
/// let client = AnalysisClient::builder().build()?;
/// let session = client.create_session();
///
/// session.on_complete(|done| {
///     println!("{} summary lines", done.transcripts.len());
/// }).await;
///
/// let mut updates = session.subscribe();
/// session.start_analysis("AI bookkeeping for food trucks").await?;
///
/// while let Ok(update) = updates.recv().await {
///     if let SessionUpdate::Completed(done) = update {
///         println!("{:?}", done.final_report);
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct AnalysisSession {
    api: Arc<dyn AnalysisApi>,
    factory: TransportFactory,
    shared: Arc<Shared>,
}

impl AnalysisSession {
    /// Create an idle orchestrator.
    pub fn new(api: Arc<dyn AnalysisApi>, factory: TransportFactory) -> Self {
        let (updates, _) = broadcast::channel(1024);

        Self {
            api,
            factory,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    status: SessionStatus::Idle,
                    state: SessionState::new(),
                    completion_fired: false,
                    epoch: 0,
                    prompt: String::new(),
                    transport: None,
                    pump: None,
                }),
                updates,
                handlers: RwLock::new(HashMap::new()),
                next_handler_id: AtomicU64::new(1),
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a new analysis, discarding any previous run.
    ///
    /// On failure to create the server-side session the error is folded into
    /// the state, the status moves to `Errored`, and no channel is opened.
    pub async fn start_analysis(&self, request: impl Into<AnalysisRequest>) -> Result<()> {
        let request = request.into();
        self.reset_analysis().await;

        let epoch = {
            let mut inner = self.shared.inner.lock().await;
            inner.prompt = request.prompt.clone();
            self.shared.set_status(&mut inner, SessionStatus::Starting);
            inner.epoch
        };

        let started = match self.api.start_analysis(&request).await {
            Ok(started) => started,
            Err(err) => return Err(self.fail_start(epoch, err).await),
        };
        let conversation_id = started.conversation_id;
        let endpoint = match self.api.websocket_url(&conversation_id) {
            Ok(endpoint) => endpoint,
            Err(err) => return Err(self.fail_start(epoch, err).await),
        };

        let mut inner = self.shared.inner.lock().await;
        if inner.epoch != epoch {
            debug!(target: LOG_TARGET, %conversation_id, "start superseded by a reset");
            return Ok(());
        }

        inner.state = SessionState::for_session(&conversation_id);
        self.shared
            .publish(SessionUpdate::State(inner.state.clone()));

        let mut transport = (self.factory)(&conversation_id);
        let events = transport.take_events();
        if let Err(err) = transport.connect(&endpoint) {
            drop(inner);
            return Err(self.fail_start(epoch, err).await);
        }
        info!(target: LOG_TARGET, %conversation_id, %endpoint, "opening channel");

        inner.transport = Some(transport);
        if let Some(events) = events {
            inner.pump = Some(tokio::spawn(pump(Arc::clone(&self.shared), epoch, events)));
        }
        Ok(())
    }

    async fn fail_start(&self, epoch: u64, err: SessionError) -> SessionError {
        let message = match err {
            SessionError::AnalysisStart(message) => message,
            other => other.to_string(),
        };
        warn!(target: LOG_TARGET, %message, "failed to start analysis");

        let mut inner = self.shared.inner.lock().await;
        if inner.epoch == epoch {
            // cannot complete, so there is no handoff to deliver
            let _ = self
                .shared
                .fold(&mut inner, &SessionEvent::error(message.clone()));
        }
        SessionError::AnalysisStart(message)
    }

    /// Return to `Idle`: stop the pump, close the channel, and install a
    /// fresh state. Safe to call at any time, any number of times.
    pub async fn reset_analysis(&self) {
        let (transport, pump) = {
            let mut inner = self.shared.inner.lock().await;
            inner.epoch += 1;
            inner.state = SessionState::new();
            inner.completion_fired = false;
            inner.prompt.clear();
            self.shared.set_status(&mut inner, SessionStatus::Idle);
            (inner.transport.take(), inner.pump.take())
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(mut transport) = transport {
            transport.disconnect().await;
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Check if the current analysis completed.
    pub async fn is_complete(&self) -> bool {
        self.shared.inner.lock().await.state.is_complete()
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        self.shared.inner.lock().await.status
    }

    /// Conversation id of the current run, once the backend assigned one.
    pub async fn conversation_id(&self) -> Option<String> {
        self.shared.inner.lock().await.state.session_id.clone()
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Fold one already-parsed event, as if it arrived on the channel.
    pub async fn dispatch_event(&self, event: SessionEvent) {
        let complete = {
            let mut inner = self.shared.inner.lock().await;
            self.shared.fold(&mut inner, &event)
        };
        if let Some(complete) = complete {
            self.shared.notify_complete(&complete).await;
        }
    }

    /// Send a JSON payload over the channel. False when no channel is open.
    pub async fn send(&self, payload: &Value) -> bool {
        let inner = self.shared.inner.lock().await;
        match &inner.transport {
            Some(transport) => transport.send(&payload.to_string()),
            None => {
                warn!(target: LOG_TARGET, "no channel, cannot send message");
                false
            }
        }
    }

    /// Subscribe to status, state and completion updates.
    pub fn subscribe(&self) -> UpdateSubscription {
        UpdateSubscription {
            receiver: self.shared.updates.subscribe(),
        }
    }

    /// Register a completion handler.
    ///
    /// Returns an unsubscribe closure. Call it to remove the handler.
    pub async fn on_complete<F>(&self, handler: F) -> impl FnOnce()
    where
        F: Fn(&AnalysisComplete) + Send + Sync + 'static,
    {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .handlers
            .write()
            .await
            .insert(id, Arc::new(handler));

        let shared = Arc::clone(&self.shared);
        move || {
            tokio::spawn(async move {
                shared.handlers.write().await.remove(&id);
            });
        }
    }

    /// Wait until the current run completes or errors.
    ///
    /// Returns the final state. Fails with [`SessionError::Timeout`] when
    /// `timeout` elapses first.
    pub async fn wait_for_finish(&self, timeout: Duration) -> Result<SessionState> {
        let mut subscription = self.subscribe();
        {
            let inner = self.shared.inner.lock().await;
            if inner.state.is_terminal() {
                return Ok(inner.state.clone());
            }
        }

        let result = tokio::time::timeout(timeout, async {
            loop {
                match subscription.recv().await {
                    Ok(SessionUpdate::State(state)) if state.is_terminal() => return Ok(state),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SessionError::NotConnected);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let state = self.state().await;
                        if state.is_terminal() {
                            return Ok(state);
                        }
                    }
                }
            }
        })
        .await;

        match result {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(timeout)),
        }
    }
}

impl Drop for AnalysisSession {
    fn drop(&mut self) {
        match self.shared.inner.try_lock() {
            Ok(mut inner) => {
                inner.epoch += 1;
                if let Some(pump) = inner.pump.take() {
                    pump.abort();
                }
                drop(inner.transport.take());
            }
            Err(_) => {
                let shared = Arc::clone(&self.shared);
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        let mut inner = shared.inner.lock().await;
                        inner.epoch += 1;
                        if let Some(pump) = inner.pump.take() {
                            pump.abort();
                        }
                        drop(inner.transport.take());
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiFuture;
    use crate::events::AnalysisStatus;
    use crate::transport::{MemoryRemote, MemoryTransport};
    use crate::types::AnalysisStartResponse;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    struct FakeApi {
        fail_with: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeApi {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail_with: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                fail_with: Some(message.to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl AnalysisApi for FakeApi {
        fn start_analysis<'a>(
            &'a self,
            _request: &'a AnalysisRequest,
        ) -> ApiFuture<'a, AnalysisStartResponse> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                match &self.fail_with {
                    Some(message) => Err(SessionError::analysis_start(message.clone())),
                    None => Ok(AnalysisStartResponse {
                        conversation_id: format!("conv-{n}"),
                        status: "started".into(),
                        message: String::new(),
                        websocket_url: String::new(),
                    }),
                }
            })
        }

        fn websocket_url(&self, conversation_id: &str) -> Result<String> {
            Ok(format!("ws://test/api/v1/ws?conversation_id={conversation_id}"))
        }
    }

    /// Factory handing out memory transports; remotes are collected in order.
    fn memory_factory() -> (TransportFactory, Arc<StdMutex<Vec<MemoryRemote>>>) {
        let remotes = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&remotes);
        let factory: TransportFactory = Arc::new(move |_id: &str| {
            let (transport, remote) = MemoryTransport::new();
            sink.lock().unwrap().push(remote);
            Box::new(transport) as Box<dyn Transport>
        });
        (factory, remotes)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn started_session() -> (AnalysisSession, MemoryRemote) {
        let (factory, remotes) = memory_factory();
        let session = AnalysisSession::new(FakeApi::ok(), factory);
        session.start_analysis("Solar panels for balconies").await.unwrap();
        let remote = remotes.lock().unwrap()[0].clone();
        (session, remote)
    }

    #[tokio::test]
    async fn test_start_connects_and_moves_to_connected() {
        let (session, remote) = started_session().await;
        assert_eq!(session.status().await, SessionStatus::Starting);
        assert_eq!(session.conversation_id().await.as_deref(), Some("conv-1"));
        assert_eq!(
            remote.log.lock().unwrap().connects,
            vec!["ws://test/api/v1/ws?conversation_id=conv-1"]
        );

        remote.emit(TransportEvent::Open);
        settle().await;
        assert_eq!(session.status().await, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_events_fold_in_arrival_order() {
        let (session, remote) = started_session().await;
        remote.emit(TransportEvent::Open);
        remote.emit_raw(
            r#"{"type":"conversation_status","conversation_id":"conv-1","status":"specialist_analysis","timestamp":1}"#,
        );
        remote.emit_raw(
            r#"{"type":"agent_message","conversation_id":"conv-1","agent_type":"marketing","message":"Good idea","timestamp":2}"#,
        );
        remote.emit_raw(
            r#"{"type":"conversation_status","conversation_id":"conv-1","status":"verification","timestamp":3}"#,
        );
        settle().await;

        let state = session.state().await;
        assert_eq!(state.texts(AgentTrack::Marketing), vec!["Good idea"]);
        assert!(state.progress.specialist_done);
        assert_eq!(state.phase, Phase::Verifying);
    }

    #[tokio::test]
    async fn test_malformed_payload_changes_nothing() {
        let (session, remote) = started_session().await;
        remote.emit(TransportEvent::Open);
        settle().await;
        let before = session.state().await;

        remote.emit_raw("{not json");
        remote.emit_raw("");
        remote.emit_raw("[1, 2, 3]");
        settle().await;

        assert_eq!(session.state().await, before);
        assert_eq!(session.status().await, SessionStatus::Connected);
    }

    /// Writer that appends formatted log lines to a shared buffer.
    #[derive(Clone, Default)]
    struct Capture(Arc<StdMutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unknown_events_and_channel_errors_are_logged() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (session, remote) = started_session().await;
        remote.emit(TransportEvent::Open);
        settle().await;
        let before = session.state().await;

        remote.emit_raw(r#"{"type":"mystery","conversation_id":"conv-1","timestamp":1}"#);
        remote.emit(TransportEvent::Error("refused".into()));
        settle().await;

        assert_eq!(session.state().await, before);
        assert_eq!(session.status().await, SessionStatus::Connected);
        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Unknown event type: mystery"), "{logs}");
        assert!(logs.contains("Connection error: refused"), "{logs}");
    }

    #[tokio::test]
    async fn test_completion_fires_exactly_once() {
        let (session, remote) = started_session().await;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        session
            .on_complete(move |done| {
                assert_eq!(done.conversation_id, "conv-1");
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        let mut updates = session.subscribe();

        remote.emit_raw(
            r#"{"type":"agent_message","conversation_id":"conv-1","agent_type":"legal","message":"No blockers","timestamp":1}"#,
        );
        let completed = r#"{"type":"conversation_status","conversation_id":"conv-1","status":"completed","timestamp":2,"metadata":{"report":{"overallScore":80}}}"#;
        remote.emit_raw(completed);
        remote.emit_raw(completed);
        settle().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(session.is_complete().await);
        assert_eq!(session.status().await, SessionStatus::Completed);

        let mut handoffs = Vec::new();
        while let Ok(update) = updates.receiver.try_recv() {
            if let SessionUpdate::Completed(done) = update {
                handoffs.push(done);
            }
        }
        assert_eq!(handoffs.len(), 1);
        assert_eq!(handoffs[0].results.legal_results, vec!["No blockers"]);
        assert_eq!(handoffs[0].results.user_input, "Solar panels for balconies");
        assert_eq!(
            handoffs[0].final_report.as_ref().unwrap().as_value()["overallScore"],
            80
        );
    }

    #[tokio::test]
    async fn test_reset_rearms_completion() {
        let (factory, _remotes) = memory_factory();
        let session = AnalysisSession::new(FakeApi::ok(), factory);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        session
            .on_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        session
            .dispatch_event(SessionEvent::status(AnalysisStatus::Completed))
            .await;
        session
            .dispatch_event(SessionEvent::status(AnalysisStatus::Completed))
            .await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        session.reset_analysis().await;
        session.reset_analysis().await;
        assert_eq!(session.status().await, SessionStatus::Idle);
        assert!(!session.is_complete().await);

        session
            .dispatch_event(SessionEvent::status(AnalysisStatus::Completed))
            .await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_start_failure_errors_without_channel() {
        let (factory, remotes) = memory_factory();
        let api = FakeApi::failing("HTTP error! status: 500");
        let session = AnalysisSession::new(api.clone(), factory);

        let err = session.start_analysis("idea").await.unwrap_err();
        assert!(matches!(err, SessionError::AnalysisStart(_)));
        assert_eq!(
            err.to_string(),
            "Failed to start analysis: HTTP error! status: 500"
        );

        let state = session.state().await;
        assert_eq!(state.phase, Phase::Error);
        assert_eq!(state.last_error.as_deref(), Some("HTTP error! status: 500"));
        assert_eq!(session.status().await, SessionStatus::Errored);
        assert!(remotes.lock().unwrap().is_empty());
        assert!(!session.send(&serde_json::json!({"type": "ping"})).await);
    }

    #[tokio::test]
    async fn test_exhausted_channel_folds_error() {
        let (session, remote) = started_session().await;
        remote.emit(TransportEvent::Open);
        remote.emit(TransportEvent::Closed {
            code: Some(1006),
            reason: String::new(),
        });
        remote.emit(TransportEvent::Error("refused".into()));
        settle().await;
        assert_eq!(session.status().await, SessionStatus::Connected);

        remote.emit(TransportEvent::Exhausted { attempts: 5 });
        settle().await;

        let state = session.state().await;
        assert_eq!(state.phase, Phase::Error);
        assert_eq!(
            state.last_error.as_deref(),
            Some(RECONNECT_EXHAUSTED_MESSAGE)
        );
        assert_eq!(session.status().await, SessionStatus::Errored);
    }

    #[tokio::test]
    async fn test_second_start_discards_previous_run() {
        let (factory, remotes) = memory_factory();
        let session = AnalysisSession::new(FakeApi::ok(), factory);

        session.start_analysis("first").await.unwrap();
        let first = remotes.lock().unwrap()[0].clone();
        first.emit_raw(
            r#"{"type":"agent_message","conversation_id":"conv-1","agent_type":"product","message":"old","timestamp":1}"#,
        );
        settle().await;

        session.start_analysis("second").await.unwrap();
        assert_eq!(first.log.lock().unwrap().disconnects, 1);

        // late frames from the first channel are ignored
        let _ = first.events.send(TransportEvent::Message(
            r#"{"type":"agent_message","conversation_id":"conv-1","agent_type":"product","message":"stale","timestamp":2}"#.into(),
        ));
        settle().await;

        let state = session.state().await;
        assert_eq!(state.session_id.as_deref(), Some("conv-2"));
        assert!(state.texts(AgentTrack::Product).is_empty());
    }

    #[tokio::test]
    async fn test_send_forwards_json() {
        let (session, remote) = started_session().await;
        assert!(session.send(&serde_json::json!({"type": "ping"})).await);
        assert_eq!(remote.log.lock().unwrap().sent, vec![r#"{"type":"ping"}"#]);
    }

    #[tokio::test]
    async fn test_wait_for_finish() {
        let (session, remote) = started_session().await;
        remote.emit_raw(
            r#"{"type":"conversation_status","conversation_id":"conv-1","status":"error","timestamp":1,"metadata":{"message":"boom"}}"#,
        );
        let state = session
            .wait_for_finish(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(state.last_error.as_deref(), Some("boom"));

        session.reset_analysis().await;
        let err = session
            .wait_for_finish(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
    }
}
