//! Information-provider contracts and the bounded provider set the assembler calls.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A provider record: named fields with JSON values.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Provider outcome: the payload, or a single-field failure marker `{"error": reason}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderRecord<T> {
    Ok(T),
    Failed { error: String },
}

impl<T> ProviderRecord<T> {
    pub fn failed(reason: impl Into<String>) -> Self {
        ProviderRecord::Failed {
            error: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProviderRecord::Failed { .. })
    }

    /// Payload if the call succeeded.
    pub fn ok(self) -> Option<T> {
        match self {
            ProviderRecord::Ok(v) => Some(v),
            ProviderRecord::Failed { .. } => None,
        }
    }
}

/// A provider returning one record (hardware, cloud metadata, credentials).
#[async_trait::async_trait]
pub trait RecordProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> ProviderRecord<Record>;
}

/// A provider returning a list of records (peer instances, network rules).
#[async_trait::async_trait]
pub trait ListProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn list(&self) -> ProviderRecord<Vec<Record>>;
}

/// The five information sources, each call bounded by `timeout`.
#[derive(Clone)]
pub struct ProviderSet {
    pub hardware: Arc<dyn RecordProvider>,
    pub cloud: Arc<dyn RecordProvider>,
    pub credentials: Arc<dyn RecordProvider>,
    pub peers: Arc<dyn ListProvider>,
    pub network_rules: Arc<dyn ListProvider>,
    pub timeout: Duration,
}

impl ProviderSet {
    pub async fn hardware(&self) -> ProviderRecord<Record> {
        bounded_fetch(self.hardware.as_ref(), self.timeout).await
    }

    pub async fn cloud(&self) -> ProviderRecord<Record> {
        bounded_fetch(self.cloud.as_ref(), self.timeout).await
    }

    pub async fn credentials(&self) -> ProviderRecord<Record> {
        bounded_fetch(self.credentials.as_ref(), self.timeout).await
    }

    pub async fn peers(&self) -> ProviderRecord<Vec<Record>> {
        bounded_list(self.peers.as_ref(), self.timeout).await
    }

    pub async fn network_rules(&self) -> ProviderRecord<Vec<Record>> {
        bounded_list(self.network_rules.as_ref(), self.timeout).await
    }
}

async fn bounded_fetch(provider: &dyn RecordProvider, limit: Duration) -> ProviderRecord<Record> {
    match tokio::time::timeout(limit, provider.fetch()).await {
        Ok(record) => record,
        Err(_) => {
            tracing::warn!(target: "relay::context", provider = provider.name(), "Provider timed out");
            ProviderRecord::failed("timed out")
        }
    }
}

async fn bounded_list(provider: &dyn ListProvider, limit: Duration) -> ProviderRecord<Vec<Record>> {
    match tokio::time::timeout(limit, provider.list()).await {
        Ok(records) => records,
        Err(_) => {
            tracing::warn!(target: "relay::context", provider = provider.name(), "Provider timed out");
            ProviderRecord::failed("timed out")
        }
    }
}

/// Reads a field as display text: strings unquoted, other values via JSON, missing as `N/A`.
pub fn field_text(record: &Record, key: &str) -> String {
    match record.get(key) {
        None | Some(serde_json::Value::Null) => "N/A".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_marker_serializes_as_single_error_field() {
        let rec: ProviderRecord<Record> = ProviderRecord::failed("no IAM role");
        assert_eq!(serde_json::to_value(&rec).unwrap(), json!({ "error": "no IAM role" }));
        assert!(rec.is_failed());
        assert!(rec.ok().is_none());
    }

    #[test]
    fn ok_record_serializes_transparently() {
        let mut r = Record::new();
        r.insert("region".into(), json!("eu-west-1"));
        let rec = ProviderRecord::Ok(vec![r]);
        assert_eq!(serde_json::to_value(&rec).unwrap(), json!([{ "region": "eu-west-1" }]));
    }

    #[test]
    fn field_text_formats_values() {
        let mut r = Record::new();
        r.insert("id".into(), json!("i-1"));
        r.insert("cores".into(), json!(4));
        r.insert("gone".into(), serde_json::Value::Null);
        assert_eq!(field_text(&r, "id"), "i-1");
        assert_eq!(field_text(&r, "cores"), "4");
        assert_eq!(field_text(&r, "gone"), "N/A");
        assert_eq!(field_text(&r, "missing"), "N/A");
    }

    struct Sleepy;

    #[async_trait::async_trait]
    impl RecordProvider for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn fetch(&self) -> ProviderRecord<Record> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ProviderRecord::Ok(Record::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_becomes_failure_marker() {
        let rec = bounded_fetch(&Sleepy, Duration::from_secs(2)).await;
        assert_eq!(rec, ProviderRecord::failed("timed out"));
    }
}
