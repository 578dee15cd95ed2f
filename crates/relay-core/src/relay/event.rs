//! Events pushed to the caller, one JSON object per server-sent event.

use serde::Serialize;

/// Generic refusal for a sensitive request without authorization.
pub const GATE_REFUSAL: &str =
    "Sorry, I can't share internal system, cloud or credential information.";

/// Refusal when the content guard blocks (or cannot check) the composed prompt.
pub const INBOUND_REFUSAL: &str = "Sorry, your message violates internal security policies.\n\n\
     This application is protected by a content guard.";

/// Appended after an already-delivered response that the content guard blocked.
/// Tokens sent before this notice are not recalled.
pub const OUTBOUND_NOTICE: &str =
    "\n\n[The response was blocked by the content guard for violating security policies]";

/// `{token}`, `{blocked, message}`, `{error}` or `{done}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelayEvent {
    Token { token: String },
    Blocked { blocked: bool, message: String },
    Error { error: String },
    Done { done: bool },
}

impl RelayEvent {
    pub fn token(text: impl Into<String>) -> Self {
        RelayEvent::Token { token: text.into() }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        RelayEvent::Blocked {
            blocked: true,
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        RelayEvent::Error {
            error: error.into(),
        }
    }

    pub fn done() -> Self {
        RelayEvent::Done { done: true }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Done { .. } | RelayEvent::Error { .. })
    }
}
