//! Temporary credentials of the instance profile role, read from the metadata service.
//!
//! Values are returned in full. Whatever consumes this record (the context blob, the
//! diagnostic endpoint) exposes live credentials.

use crate::instance_metadata::ImdsClient;
use relay_core::{ProviderRecord, Record, RecordProvider};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const PROVIDER_NAME: &str = "credentials";
const CREDENTIALS_PATH: &str = "iam/security-credentials/";

/// Credential document served for a role.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialDocument {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    token: Option<String>,
    expiration: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IamCredentials {
    client: ImdsClient,
    timeout: Duration,
}

impl IamCredentials {
    pub fn new(client: ImdsClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait::async_trait]
impl RecordProvider for IamCredentials {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(&self) -> ProviderRecord<Record> {
        let role = self
            .client
            .get_text(CREDENTIALS_PATH, self.timeout)
            .await
            .and_then(|body| body.lines().next().map(|l| l.trim().to_string()))
            .filter(|r| !r.is_empty());
        let Some(role) = role else {
            return ProviderRecord::failed("no IAM role");
        };

        let mut record = Record::new();
        record.insert("role_name".into(), Value::String(role.clone()));

        let path = format!("{}{}", CREDENTIALS_PATH, role);
        let Some(body) = self.client.get_text(&path, self.timeout).await else {
            return ProviderRecord::Ok(record);
        };
        let doc: CredentialDocument = match serde_json::from_str(&body) {
            Ok(doc) => doc,
            Err(e) => return ProviderRecord::failed(e.to_string()),
        };

        let na = || "N/A".to_string();
        for (key, value) in [
            ("access_key_id", doc.access_key_id),
            ("secret_access_key", doc.secret_access_key),
            ("token", doc.token),
            ("expiration", doc.expiration),
        ] {
            record.insert(key.into(), Value::String(value.unwrap_or_else(na)));
        }
        tracing::debug!(target: "relay::context", role = %role, "Instance role credentials read");
        ProviderRecord::Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance_metadata::testing::{metadata_service, serve};
    use axum::routing::get;
    use axum::Router;

    const TIMEOUT: Duration = Duration::from_millis(1500);

    fn provider(base: &str) -> IamCredentials {
        IamCredentials::new(ImdsClient::new(format!("{base}/latest/meta-data/")), TIMEOUT)
    }

    #[tokio::test]
    async fn returns_full_credential_values() {
        let base = serve(metadata_service()).await;
        let record = provider(&base).fetch().await.ok().expect("credentials");

        assert_eq!(record["role_name"], "web-role");
        assert_eq!(record["access_key_id"], "ASIAEXAMPLE");
        assert_eq!(record["secret_access_key"], "wJalrEXAMPLEKEY");
        assert_eq!(record["token"], "FwoGZXIvYXdzEXAMPLE");
        assert_eq!(record["expiration"], "2030-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn missing_role_is_an_error_marker() {
        let base = serve(Router::new()).await;
        assert_eq!(provider(&base).fetch().await, ProviderRecord::failed("no IAM role"));
    }

    #[tokio::test]
    async fn unreadable_document_leaves_role_only() {
        let app = Router::new().route(
            "/latest/meta-data/iam/security-credentials/",
            get(|| async { "lonely-role\n" }),
        );
        let base = serve(app).await;
        let record = provider(&base).fetch().await.ok().expect("role record");

        assert_eq!(record.len(), 1);
        assert_eq!(record["role_name"], "lonely-role");
    }
}
