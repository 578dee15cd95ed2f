//! Content-safety contract used on the composed prompt and on the full model response.

use serde::{Deserialize, Serialize};

/// ALLOW or BLOCK as returned by the content guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Allow,
    Block,
}

/// Verdict for one moderation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModerationVerdict {
    pub action: ModerationAction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl ModerationVerdict {
    pub fn allow() -> Self {
        Self {
            action: ModerationAction::Allow,
            reasons: Vec::new(),
        }
    }

    pub fn block(reasons: Vec<String>) -> Self {
        Self {
            action: ModerationAction::Block,
            reasons,
        }
    }

    /// Fail-closed verdict for a guard that could not be consulted.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::block(vec![reason.into()])
    }

    pub fn is_blocked(&self) -> bool {
        self.action == ModerationAction::Block
    }
}

/// Which side of the model call a moderation pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStage {
    Inbound,
    Outbound,
}

impl ModerationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationStage::Inbound => "inbound",
            ModerationStage::Outbound => "outbound",
        }
    }
}

/// External content classifier. Implementations must be fail-closed: any timeout,
/// transport error, bad status or missing credential yields a BLOCK verdict.
#[async_trait::async_trait]
pub trait ContentGuard: Send + Sync {
    async fn check(&self, text: &str) -> ModerationVerdict;
}
