//! Cloud instance metadata read from the link-local metadata service.

use futures_util::future::join_all;
use relay_core::{ProviderRecord, Record, RecordProvider};
use serde_json::Value;
use std::time::Duration;

const PROVIDER_NAME: &str = "cloud";

/// Record field → metadata path, relative to the metadata root.
const METADATA_FIELDS: &[(&str, &str)] = &[
    ("instance_id", "instance-id"),
    ("instance_type", "instance-type"),
    ("availability_zone", "placement/availability-zone"),
    ("region", "placement/region"),
    ("public_ipv4", "public-ipv4"),
    ("local_ipv4", "local-ipv4"),
    ("ami_id", "ami-id"),
];

/// Minimal plain-text client for the metadata service. Only 200 responses count.
#[derive(Debug, Clone)]
pub struct ImdsClient {
    http: reqwest::Client,
    base_url: String,
}

impl ImdsClient {
    /// `base_url` is the metadata root, e.g. `http://169.254.169.254/latest/meta-data/`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Body of `GET {base}{path}`, or `None` on any failure or non-200 status.
    pub async fn get_text(&self, path: &str, timeout: Duration) -> Option<String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).timeout(timeout).send().await.ok()?;
        if response.status() != reqwest::StatusCode::OK {
            tracing::debug!(target: "relay::context", path, status = %response.status(), "Metadata path unavailable");
            return None;
        }
        response.text().await.ok()
    }
}

/// Instance identity, placement and network of the current instance.
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    client: ImdsClient,
    timeout: Duration,
}

impl InstanceMetadata {
    pub fn new(client: ImdsClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn network_ids(&self) -> Vec<(&'static str, String)> {
        let Some(macs) = self
            .client
            .get_text("network/interfaces/macs/", self.timeout)
            .await
        else {
            return Vec::new();
        };
        let Some(mac) = macs
            .lines()
            .next()
            .map(|l| l.trim().trim_end_matches('/'))
            .filter(|m| !m.is_empty())
        else {
            return Vec::new();
        };

        let vpc_path = format!("network/interfaces/macs/{}/vpc-id", mac);
        let subnet_path = format!("network/interfaces/macs/{}/subnet-id", mac);
        let (vpc, subnet) = tokio::join!(
            self.client.get_text(&vpc_path, self.timeout),
            self.client.get_text(&subnet_path, self.timeout),
        );
        [("vpc_id", vpc), ("subnet_id", subnet)]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect()
    }
}

#[async_trait::async_trait]
impl RecordProvider for InstanceMetadata {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(&self) -> ProviderRecord<Record> {
        let fields = join_all(METADATA_FIELDS.iter().map(|(key, path)| async move {
            self.client
                .get_text(path, self.timeout)
                .await
                .map(|v| (*key, v))
        }));
        let (fields, network) = tokio::join!(fields, self.network_ids());

        let mut record = Record::new();
        for (key, value) in fields.into_iter().flatten().chain(network) {
            record.insert(key.to_string(), Value::String(value));
        }
        if record.is_empty() {
            tracing::debug!(target: "relay::context", base = self.client.base_url(), "No instance metadata");
            return ProviderRecord::failed("not running on AWS");
        }
        ProviderRecord::Ok(record)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use axum::Router;

    const TIMEOUT: Duration = Duration::from_millis(800);

    #[tokio::test]
    async fn reads_present_fields_and_first_mac_network() {
        let base = serve(metadata_service()).await;
        let provider = InstanceMetadata::new(ImdsClient::new(format!("{base}/latest/meta-data/")), TIMEOUT);

        let record = provider.fetch().await.ok().expect("metadata record");

        assert_eq!(record["instance_id"], "i-0abc");
        assert_eq!(record["region"], "eu-west-1");
        assert_eq!(record["vpc_id"], "vpc-1");
        assert_eq!(record["subnet_id"], "subnet-1");
        assert!(!record.contains_key("public_ipv4"), "404 fields are skipped");
    }

    #[tokio::test]
    async fn no_fields_means_not_on_aws() {
        let base = serve(Router::new()).await;
        let provider = InstanceMetadata::new(ImdsClient::new(format!("{base}/latest/meta-data")), TIMEOUT);

        assert_eq!(provider.fetch().await, ProviderRecord::failed("not running on AWS"));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        assert_eq!(ImdsClient::new("http://x/meta").base_url(), "http://x/meta/");
    }
}
