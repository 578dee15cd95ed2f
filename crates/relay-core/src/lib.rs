//! relay-core: chat relay pipeline (intent classification, sensitivity gate, context
//! assembly, prompt composition, moderation contract and the streaming relay).
//!
//! Concrete providers, the model client and the content-guard client live in relay-skills;
//! the HTTP surface lives in the relay-gateway add-on.

mod context;
mod error;
mod intent;
mod moderation;
mod prompt;
mod relay;
mod shared;

pub use shared::{
    ModelConfig, ModerationConfig, ProvidersConfig, RelayConfig, UserMessage, ENV_GUARD_API_KEY,
    ENV_GUARD_APP_NAME,
};

pub use error::{RelayError, Result};

pub use intent::{classify, evaluate_gate, GateDecision, Topic, TopicFlags, BYPASS_PHRASES};

pub use context::{
    field_text, CacheEntry, CachedListProvider, ContextAssembler, ContextBlob, ContextSection,
    FreshnessCache, ListProvider, ListingCaps, ProviderRecord, ProviderSet, Record,
    RecordProvider,
};

pub use prompt::{compose, DATA_ONLY_INSTRUCTION, VERBATIM_CREDENTIALS_INSTRUCTION};

pub use moderation::{ContentGuard, ModerationAction, ModerationStage, ModerationVerdict};

pub use relay::{
    FragmentReceiver, ModelBackend, ModelFragment, Relay, RelayEvent, RelayState, GATE_REFUSAL,
    INBOUND_REFUSAL, OUTBOUND_NOTICE,
};
