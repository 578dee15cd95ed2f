//! Streaming relay: gate → assemble → compose → inbound check → model stream → outbound check.
//!
//! The model backend is a producer stage feeding fragments through a channel; the relay
//! forwards each fragment to the caller as it arrives and keeps a copy for the trailing
//! moderation pass. Forwarded tokens cannot be recalled: an outbound BLOCK only appends a
//! notice before `{done}`.
//!
//! ```text
//! Idle → Gated → BlockedInbound
//!              → Dispatched → Streaming → ModelDone → ModeratingOutbound → Closed
//!                                       → TransportError
//! ```
//! `Abandoned` is reached from any non-terminal state when the caller goes away.

mod event;

pub use event::{RelayEvent, GATE_REFUSAL, INBOUND_REFUSAL, OUTBOUND_NOTICE};

use crate::context::ContextAssembler;
use crate::error::RelayError;
use crate::intent::{classify, evaluate_gate, GateDecision};
use crate::moderation::{ContentGuard, ModerationStage, ModerationVerdict};
use crate::prompt::compose;
use crate::shared::UserMessage;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events buffered between the pipeline task and the caller's stream.
const EVENT_BUFFER: usize = 64;

/// One line of the model's NDJSON stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModelFragment {
    /// Incremental text.
    #[serde(default, rename = "response")]
    pub text: Option<String>,
    /// Completion flag.
    #[serde(default)]
    pub done: bool,
}

/// Receiving half of a model stream. Dropping it tells the producer to release the upstream connection.
pub type FragmentReceiver = mpsc::Receiver<Result<ModelFragment, RelayError>>;

/// Streaming model endpoint.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    async fn stream_generate(&self, prompt: &str) -> Result<FragmentReceiver, RelayError>;
}

/// Pipeline state for one chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Gated,
    BlockedInbound,
    Dispatched,
    Streaming,
    ModelDone,
    ModeratingOutbound,
    Closed,
    TransportError,
    Abandoned,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RelayState::BlockedInbound
                | RelayState::Closed
                | RelayState::TransportError
                | RelayState::Abandoned
        )
    }
}

/// Per-request bookkeeping: current state plus the caller's event channel.
struct Session {
    state: RelayState,
    events: mpsc::Sender<RelayEvent>,
}

impl Session {
    fn advance(&mut self, next: RelayState) {
        tracing::debug!(target: "relay::stream", from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    /// Sends an event; on a closed channel moves to `Abandoned` and returns false.
    async fn emit(&mut self, event: RelayEvent) -> bool {
        if self.events.send(event).await.is_ok() {
            true
        } else {
            self.abandon();
            false
        }
    }

    fn abandon(&mut self) {
        tracing::info!(target: "relay::stream", state = ?self.state, "Caller disconnected");
        self.advance(RelayState::Abandoned);
    }

    /// Sends `{blocked}` then `{done}` and ends in `BlockedInbound`.
    async fn refuse(&mut self, message: &str) -> RelayState {
        self.advance(RelayState::BlockedInbound);
        if self.emit(RelayEvent::blocked(message)).await {
            self.emit(RelayEvent::done()).await;
        }
        self.state
    }

    /// Sends a single `{error}` and ends in `TransportError`.
    async fn fail(&mut self, error: RelayError) -> RelayState {
        tracing::warn!(target: "relay::stream", error = %error, "Model transport failed");
        self.advance(RelayState::TransportError);
        self.emit(RelayEvent::error(error.to_string())).await;
        self.state
    }
}

/// The chat pipeline. Shared across requests; holds no per-request state.
pub struct Relay {
    assembler: ContextAssembler,
    model: Arc<dyn ModelBackend>,
    guard: Option<Arc<dyn ContentGuard>>,
    max_stream_tokens: Option<usize>,
}

impl Relay {
    pub fn new(assembler: ContextAssembler, model: Arc<dyn ModelBackend>) -> Self {
        Self {
            assembler,
            model,
            guard: None,
            max_stream_tokens: None,
        }
    }

    /// Enables inbound and outbound moderation.
    pub fn with_guard(mut self, guard: Arc<dyn ContentGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Caps forwarded fragments per response; reaching the cap ends the stream as if the model had finished.
    pub fn with_max_stream_tokens(mut self, cap: Option<usize>) -> Self {
        self.max_stream_tokens = cap;
        self
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    pub fn moderation_enabled(&self) -> bool {
        self.guard.is_some()
    }

    /// Runs the pipeline on its own task and returns the caller's event stream.
    pub fn spawn(self: &Arc<Self>, message: UserMessage) -> mpsc::Receiver<RelayEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            let state = relay.run(message, tx).await;
            tracing::debug!(target: "relay::stream", state = ?state, "Relay finished");
        });
        rx
    }

    /// Runs the pipeline for one message, pushing events into `events`. Returns the terminal state.
    pub async fn run(&self, message: UserMessage, events: mpsc::Sender<RelayEvent>) -> RelayState {
        let mut session = Session {
            state: RelayState::Idle,
            events,
        };
        let text = message.text();

        let flags = classify(text);
        session.advance(RelayState::Gated);
        tracing::info!(
            target: "relay::gate",
            message_len = text.len(),
            sensitive = flags.any(),
            "Chat request classified"
        );
        if evaluate_gate(&flags, text) == GateDecision::Block {
            return session.refuse(GATE_REFUSAL).await;
        }

        let closed = session.events.clone();
        let blob = tokio::select! {
            blob = self.assembler.assemble(&flags) => blob,
            _ = closed.closed() => {
                session.abandon();
                return session.state;
            }
        };
        let prompt = compose(&blob, text, &flags);

        if let Some(guard) = &self.guard {
            let verdict = tokio::select! {
                v = moderate(guard.as_ref(), ModerationStage::Inbound, &prompt) => v,
                _ = closed.closed() => {
                    session.abandon();
                    return session.state;
                }
            };
            if verdict.is_blocked() {
                return session.refuse(INBOUND_REFUSAL).await;
            }
        }

        session.advance(RelayState::Dispatched);
        let dispatched = tokio::select! {
            r = self.model.stream_generate(&prompt) => r,
            _ = closed.closed() => {
                session.abandon();
                return session.state;
            }
        };
        let mut fragments = match dispatched {
            Ok(rx) => rx,
            Err(e) => return session.fail(e).await,
        };

        session.advance(RelayState::Streaming);
        let mut response = String::new();
        let mut forwarded = 0usize;
        let cap_reached = |forwarded: usize| self.max_stream_tokens.is_some_and(|cap| forwarded >= cap);
        loop {
            let next = tokio::select! {
                biased;
                _ = closed.closed() => {
                    session.abandon();
                    return session.state;
                }
                next = fragments.recv() => next,
            };
            let fragment = match next {
                None => break,
                Some(Err(e)) => return session.fail(e).await,
                Some(Ok(fragment)) => fragment,
            };
            if let Some(token) = fragment.text.filter(|t| !t.is_empty()) {
                if cap_reached(forwarded) {
                    tracing::warn!(target: "relay::stream", forwarded, "Stream token cap reached, closing model stream");
                    break;
                }
                response.push_str(&token);
                if !session.emit(RelayEvent::token(token)).await {
                    return session.state;
                }
                forwarded += 1;
            }
            if fragment.done {
                break;
            }
            if cap_reached(forwarded) {
                tracing::warn!(
                    target: "relay::stream",
                    forwarded,
                    "Stream token cap reached, closing model stream"
                );
                break;
            }
        }
        drop(fragments);
        session.advance(RelayState::ModelDone);
        tracing::info!(
            target: "relay::stream",
            fragments = forwarded,
            response_len = response.len(),
            "Model stream complete"
        );

        if let Some(guard) = &self.guard {
            session.advance(RelayState::ModeratingOutbound);
            let verdict = tokio::select! {
                v = moderate(guard.as_ref(), ModerationStage::Outbound, &response) => v,
                _ = closed.closed() => {
                    session.abandon();
                    return session.state;
                }
            };
            if verdict.is_blocked() && !session.emit(RelayEvent::blocked(OUTBOUND_NOTICE)).await {
                return session.state;
            }
        }

        if session.emit(RelayEvent::done()).await {
            session.advance(RelayState::Closed);
            let elapsed_ms = message.received_at().elapsed().map(|d| d.as_millis() as u64).unwrap_or(0);
            tracing::info!(target: "relay::stream", elapsed_ms, "Relay closed");
        }
        session.state
    }
}

async fn moderate(guard: &dyn ContentGuard, stage: ModerationStage, text: &str) -> ModerationVerdict {
    let verdict = guard.check(text).await;
    if verdict.is_blocked() {
        tracing::warn!(
            target: "relay::moderation",
            stage = stage.as_str(),
            reasons = ?verdict.reasons,
            "Content guard blocked"
        );
    } else {
        tracing::debug!(target: "relay::moderation", stage = stage.as_str(), "Content guard allowed");
    }
    verdict
}
