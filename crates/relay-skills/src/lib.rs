//! Concrete collaborators behind the relay-core traits, and the wiring that assembles them
//! into a ready-to-serve [`Relay`].

mod fleet_inventory;
mod guard;
mod host_telemetry;
mod iam_credentials;
mod instance_metadata;
mod model_router;

pub use fleet_inventory::{parse_peers, parse_security_groups, FleetInventory, NetworkRules, PeerInstances};
pub use guard::{GuardClient, GuardStatus};
pub use host_telemetry::HostTelemetry;
pub use iam_credentials::IamCredentials;
pub use instance_metadata::{ImdsClient, InstanceMetadata};
pub use model_router::ModelRouter;

use relay_core::{
    CachedListProvider, ContentGuard, ContextAssembler, ListingCaps, ModelBackend, ProviderSet,
    Relay, RelayConfig,
};
use std::sync::Arc;

/// Everything the gateway serves from: the pipeline plus the clients its diagnostic routes use.
#[derive(Clone)]
pub struct RelayServices {
    pub relay: Arc<Relay>,
    pub model: Arc<ModelRouter>,
    pub guard: Arc<GuardClient>,
}

impl RelayServices {
    /// Providers the pipeline assembles context from; also read directly by diagnostic routes.
    pub fn providers(&self) -> &ProviderSet {
        self.relay.assembler().providers()
    }
}

/// Builds the five providers from configuration. Peer listings are cached for `peer_cache_ttl`.
pub fn build_providers(config: &RelayConfig) -> ProviderSet {
    let p = &config.providers;
    let imds = ImdsClient::new(p.metadata_base_url.clone());
    let metadata = Arc::new(InstanceMetadata::new(imds.clone(), p.metadata_timeout()));
    let fleet = Arc::new(FleetInventory::new(
        p.aws_cli.clone(),
        p.default_region.clone(),
        Arc::clone(&metadata),
    ));

    ProviderSet {
        hardware: Arc::new(HostTelemetry::new()),
        cloud: metadata,
        credentials: Arc::new(IamCredentials::new(imds, p.credentials_timeout())),
        peers: Arc::new(CachedListProvider::new(
            Arc::new(PeerInstances(Arc::clone(&fleet))),
            p.peer_cache_ttl(),
        )),
        network_rules: Arc::new(NetworkRules(fleet)),
        timeout: p.provider_timeout(),
    }
}

/// Wires providers, model router and content guard into a relay. The guard is attached
/// only when moderation is enabled.
pub fn build_services(config: &RelayConfig) -> RelayServices {
    let caps = ListingCaps {
        peers: config.providers.peer_listing_cap,
        network_rules: config.providers.network_rules_cap,
    };
    let assembler = ContextAssembler::new(build_providers(config), caps);
    let model = Arc::new(ModelRouter::new(config.model.clone()));
    let guard = Arc::new(GuardClient::new(config.moderation.clone()));

    let mut relay = Relay::new(assembler, Arc::clone(&model) as Arc<dyn ModelBackend>)
        .with_max_stream_tokens(config.model.max_stream_tokens);
    if config.moderation.enabled {
        relay = relay.with_guard(Arc::clone(&guard) as Arc<dyn ContentGuard>);
    } else {
        tracing::warn!(target: "relay::moderation", "Moderation disabled by configuration");
    }

    tracing::info!(
        target: "relay::stream",
        model = %config.model.name,
        moderation = config.moderation.enabled,
        "Relay pipeline ready"
    );
    RelayServices {
        relay: Arc::new(relay),
        model,
        guard,
    }
}
