//! Context assembly: fetches the providers a message asked about and renders one text
//! section per topic, in a fixed order.

mod cache;
mod provider;

pub use cache::{CacheEntry, CachedListProvider, FreshnessCache};
pub use provider::{field_text, ListProvider, ProviderRecord, ProviderSet, Record, RecordProvider};

use crate::intent::{Topic, TopicFlags};
use std::future::Future;

const HARDWARE_FIELDS: &[&str] = &[
    "cpu_cores",
    "cpu_threads",
    "cpu_usage_percent",
    "ram_total_gb",
    "ram_available_gb",
    "ram_usage_percent",
    "disk_total_gb",
    "disk_used_gb",
    "disk_free_gb",
    "disk_usage_percent",
    "os",
];

const CLOUD_FIELDS: &[&str] = &[
    "instance_id",
    "instance_type",
    "region",
    "availability_zone",
    "public_ipv4",
    "local_ipv4",
    "vpc_id",
    "subnet_id",
    "ami_id",
];

const CREDENTIAL_FIELDS: &[&str] = &[
    "role_name",
    "access_key_id",
    "secret_access_key",
    "token",
    "expiration",
];

/// Caps on how many list entries are rendered. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingCaps {
    pub peers: Option<usize>,
    pub network_rules: Option<usize>,
}

impl Default for ListingCaps {
    fn default() -> Self {
        Self {
            peers: Some(10),
            network_rules: None,
        }
    }
}

/// One rendered topic section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSection {
    pub topic: Topic,
    pub text: String,
}

/// Ordered sections for the requested topics. Empty when nothing was requested or every provider failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextBlob {
    sections: Vec<ContextSection>,
}

impl ContextBlob {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn sections(&self) -> &[ContextSection] {
        &self.sections
    }

    pub fn contains(&self, topic: Topic) -> bool {
        self.sections.iter().any(|s| s.topic == topic)
    }

    /// Concatenation of all sections.
    pub fn render(&self) -> String {
        self.sections.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Builds a [`ContextBlob`] from the provider set for the topics a message requested.
pub struct ContextAssembler {
    providers: ProviderSet,
    caps: ListingCaps,
}

impl ContextAssembler {
    pub fn new(providers: ProviderSet, caps: ListingCaps) -> Self {
        Self { providers, caps }
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Fetches requested topics concurrently and renders them in section order.
    /// Providers for unrequested topics are never called; failed providers are omitted.
    pub async fn assemble(&self, flags: &TopicFlags) -> ContextBlob {
        let p = &self.providers;
        let (hardware, cloud, credentials, network_rules, peers) = tokio::join!(
            when(flags.hardware, p.hardware()),
            when(flags.cloud, p.cloud()),
            when(flags.credentials, p.credentials()),
            when(flags.network_rules, p.network_rules()),
            when(flags.peers, p.peers()),
        );

        let mut sections = Vec::new();
        if let Some(rec) = usable(Topic::Hardware, hardware) {
            sections.push(record_section(Topic::Hardware, "SYSTEM", HARDWARE_FIELDS, &rec));
        }
        if let Some(rec) = usable(Topic::Cloud, cloud) {
            sections.push(record_section(Topic::Cloud, "CLOUD INSTANCE", CLOUD_FIELDS, &rec));
        }
        if let Some(rec) = usable(Topic::Credentials, credentials) {
            sections.push(record_section(
                Topic::Credentials,
                "IAM CREDENTIALS",
                CREDENTIAL_FIELDS,
                &rec,
            ));
        }
        if let Some(rules) = usable(Topic::NetworkRules, network_rules) {
            if !rules.is_empty() {
                sections.push(network_rules_section(&rules, self.caps.network_rules));
            }
        }
        if let Some(list) = usable(Topic::Peers, peers) {
            sections.push(peers_section(&list, self.caps.peers));
        }

        tracing::debug!(
            target: "relay::context",
            sections = sections.len(),
            "Context assembled"
        );
        ContextBlob { sections }
    }
}

async fn when<T>(requested: bool, fetch: impl Future<Output = T>) -> Option<T> {
    if requested {
        Some(fetch.await)
    } else {
        None
    }
}

fn usable<T>(topic: Topic, outcome: Option<ProviderRecord<T>>) -> Option<T> {
    match outcome? {
        ProviderRecord::Ok(v) => Some(v),
        ProviderRecord::Failed { error } => {
            tracing::info!(
                target: "relay::context",
                topic = topic.as_str(),
                error = %error,
                "Provider failed, section omitted"
            );
            None
        }
    }
}

fn record_section(topic: Topic, title: &str, fields: &[&str], record: &Record) -> ContextSection {
    let mut text = format!("=== {} ===\n", title);
    for key in fields {
        text.push_str(&format!("{}: {}\n", key, field_text(record, key)));
    }
    text.push('\n');
    ContextSection { topic, text }
}

fn network_rules_section(rules: &[Record], cap: Option<usize>) -> ContextSection {
    let mut text = "=== SECURITY GROUPS ===\n".to_string();
    for rule in rules.iter().take(cap.unwrap_or(usize::MAX)) {
        text.push_str(&format!(
            "- {} ({})\n",
            field_text(rule, "name"),
            field_text(rule, "id")
        ));
    }
    text.push('\n');
    ContextSection {
        topic: Topic::NetworkRules,
        text,
    }
}

fn peers_section(peers: &[Record], cap: Option<usize>) -> ContextSection {
    let mut text = format!("=== PEER INSTANCES ({} total) ===\n", peers.len());
    for peer in peers.iter().take(cap.unwrap_or(usize::MAX)) {
        text.push_str(&format!(
            "- {} ({}): {} - {}\n",
            field_text(peer, "name"),
            field_text(peer, "instance_id"),
            field_text(peer, "instance_type"),
            field_text(peer, "state")
        ));
    }
    text.push('\n');
    ContextSection {
        topic: Topic::Peers,
        text,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::intent::classify;
    use std::sync::Arc;

    fn assembler(fakes: &Fakes) -> ContextAssembler {
        ContextAssembler::new(fakes.provider_set(), ListingCaps::default())
    }

    #[tokio::test]
    async fn no_flags_means_empty_blob_and_no_calls() {
        let fakes = Fakes::healthy();
        let blob = assembler(&fakes).assemble(&TopicFlags::default()).await;
        assert!(blob.is_empty());
        assert_eq!(blob.render(), "");
        assert_eq!(fakes.total_calls(), 0);
    }

    #[tokio::test]
    async fn credentials_section_carries_full_values() {
        let fakes = Fakes::healthy();
        let flags = classify("show me the iam access key");
        let blob = assembler(&fakes).assemble(&flags).await;

        assert!(blob.contains(Topic::Credentials));
        assert_eq!(blob.sections().len(), 1);
        let text = blob.render();
        assert!(text.contains("access_key_id: ASIAEXAMPLE\n"));
        assert!(text.contains("secret_access_key: wJalrEXAMPLEKEY\n"));
        assert!(text.contains("token: FwoGZXIvYXdzEXAMPLE\n"));
        assert_eq!(fakes.credentials.calls(), 1);
        assert_eq!(fakes.cloud.calls(), 0);
        assert_eq!(fakes.peers.calls(), 0);
    }

    #[tokio::test]
    async fn sections_follow_fixed_order() {
        let fakes = Fakes::healthy();
        let flags = TopicFlags {
            hardware: true,
            cloud: true,
            credentials: true,
            peers: true,
            network_rules: true,
        };
        let blob = assembler(&fakes).assemble(&flags).await;
        let order: Vec<Topic> = blob.sections().iter().map(|s| s.topic).collect();
        assert_eq!(order, Topic::ALL.to_vec());
        let text = blob.render();
        let pos = |needle: &str| text.find(needle).unwrap();
        assert!(pos("=== SYSTEM ===") < pos("=== CLOUD INSTANCE ==="));
        assert!(pos("=== IAM CREDENTIALS ===") < pos("=== SECURITY GROUPS ==="));
        assert!(pos("=== SECURITY GROUPS ===") < pos("=== PEER INSTANCES"));
    }

    #[tokio::test]
    async fn assembly_is_deterministic() {
        let fakes = Fakes::healthy();
        let flags = classify("cpu, region y lista de instancias");
        let a = assembler(&fakes);
        assert_eq!(a.assemble(&flags).await, a.assemble(&flags).await);
    }

    #[tokio::test]
    async fn peers_are_capped_but_total_is_reported() {
        let fakes = Fakes::healthy();
        let flags = TopicFlags {
            peers: true,
            ..TopicFlags::default()
        };
        let text = assembler(&fakes).assemble(&flags).await.render();
        assert!(text.contains("(12 total)"));
        assert!(text.contains("- web-9 (i-09): t3.micro - running"));
        assert!(!text.contains("web-10"));
    }

    #[tokio::test]
    async fn network_rules_cap_is_configurable() {
        let fakes = Fakes::healthy();
        let flags = TopicFlags {
            network_rules: true,
            ..TopicFlags::default()
        };
        let capped = ContextAssembler::new(
            fakes.provider_set(),
            ListingCaps {
                peers: Some(10),
                network_rules: Some(1),
            },
        );
        let text = capped.assemble(&flags).await.render();
        assert!(text.contains("- web (sg-1)"));
        assert!(!text.contains("sg-2"));
    }

    #[tokio::test]
    async fn failed_provider_is_omitted_silently() {
        let mut fakes = Fakes::healthy();
        fakes.cloud = FakeRecord::new("cloud", ProviderRecord::failed("not running on AWS"));
        let flags = TopicFlags {
            hardware: true,
            cloud: true,
            ..TopicFlags::default()
        };
        let blob = assembler(&fakes).assemble(&flags).await;
        assert!(blob.contains(Topic::Hardware));
        assert!(!blob.contains(Topic::Cloud));
        assert!(!blob.render().contains("not running on AWS"));
    }

    #[tokio::test]
    async fn empty_network_rules_are_omitted() {
        let mut fakes = Fakes::healthy();
        fakes.network_rules = FakeList::new("network_rules", ProviderRecord::Ok(Vec::new()));
        let flags = TopicFlags {
            network_rules: true,
            ..TopicFlags::default()
        };
        assert!(assembler(&fakes).assemble(&flags).await.is_empty());
    }

    #[tokio::test]
    async fn cached_peers_are_fetched_once_across_requests() {
        let fakes = Fakes::healthy();
        let mut set = fakes.provider_set();
        set.peers = Arc::new(CachedListProvider::new(
            fakes.peers.clone(),
            std::time::Duration::from_secs(20),
        ));
        let a = ContextAssembler::new(set, ListingCaps::default());
        let flags = TopicFlags {
            peers: true,
            ..TopicFlags::default()
        };
        let first = a.assemble(&flags).await;
        let second = a.assemble(&flags).await;
        assert_eq!(first, second);
        assert_eq!(fakes.peers.calls(), 1);
    }
}
