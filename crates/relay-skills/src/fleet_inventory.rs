//! Fleet inventory through the AWS CLI: peer instances in the account and the security
//! groups attached to this instance.

use crate::instance_metadata::InstanceMetadata;
use relay_core::{ListProvider, ProviderRecord, Record, RecordProvider, RelayError};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::process::Command;

/// Runs `describe-instances` in the region reported by instance metadata.
pub struct FleetInventory {
    aws_cli: String,
    default_region: String,
    metadata: Arc<InstanceMetadata>,
}

impl FleetInventory {
    pub fn new(
        aws_cli: impl Into<String>,
        default_region: impl Into<String>,
        metadata: Arc<InstanceMetadata>,
    ) -> Self {
        Self {
            aws_cli: aws_cli.into(),
            default_region: default_region.into(),
            metadata,
        }
    }

    /// Region and instance id of the current instance; the region falls back to the configured default.
    async fn locate(&self) -> (String, Option<String>) {
        let record = self.metadata.fetch().await.ok().unwrap_or_default();
        let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);
        let region = text("region").unwrap_or_else(|| self.default_region.clone());
        (region, text("instance_id"))
    }

    async fn describe_instances(
        &self,
        region: &str,
        instance_id: Option<&str>,
    ) -> Result<Value, RelayError> {
        let mut cmd = Command::new(&self.aws_cli);
        cmd.args(["ec2", "describe-instances", "--output", "json", "--region", region]);
        if let Some(id) = instance_id {
            cmd.args(["--instance-ids", id]);
        }
        cmd.kill_on_drop(true);

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RelayError::Provider(if stderr.is_empty() {
                format!("{} exited with {}", self.aws_cli, output.status)
            } else {
                stderr
            }));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Every instance visible in the region.
    pub async fn peer_instances(&self) -> ProviderRecord<Vec<Record>> {
        let (region, _) = self.locate().await;
        match self.describe_instances(&region, None).await {
            Ok(doc) => ProviderRecord::Ok(parse_peers(&doc)),
            Err(e) => {
                tracing::warn!(target: "relay::context", region = %region, error = %e, "Peer listing failed");
                ProviderRecord::failed(e.to_string())
            }
        }
    }

    /// Security groups attached to the current instance.
    pub async fn network_rules(&self) -> ProviderRecord<Vec<Record>> {
        let (region, instance_id) = self.locate().await;
        let Some(instance_id) = instance_id else {
            return ProviderRecord::failed("no instance id");
        };
        match self.describe_instances(&region, Some(&instance_id)).await {
            Ok(doc) => ProviderRecord::Ok(parse_security_groups(&doc)),
            Err(e) => {
                tracing::warn!(target: "relay::context", region = %region, error = %e, "Security group lookup failed");
                ProviderRecord::failed(e.to_string())
            }
        }
    }
}

fn instances(doc: &Value) -> impl Iterator<Item = &Value> {
    doc.get("Reservations")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| r.get("Instances").and_then(Value::as_array))
        .flatten()
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Flattens a `describe-instances` document into peer records.
pub fn parse_peers(doc: &Value) -> Vec<Record> {
    instances(doc)
        .map(|inst| {
            let name = inst
                .get("Tags")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .find(|t| t.get("Key").and_then(Value::as_str) == Some("Name"))
                .and_then(|t| t.get("Value").and_then(Value::as_str))
                .unwrap_or("unnamed");
            let record = json!({
                "instance_id": str_at(inst, "/InstanceId").unwrap_or("N/A"),
                "name": name,
                "instance_type": str_at(inst, "/InstanceType").unwrap_or("N/A"),
                "state": str_at(inst, "/State/Name").unwrap_or("N/A"),
                "public_ip": str_at(inst, "/PublicIpAddress").unwrap_or("N/A"),
                "private_ip": str_at(inst, "/PrivateIpAddress").unwrap_or("N/A"),
                "availability_zone": str_at(inst, "/Placement/AvailabilityZone").unwrap_or("N/A"),
                "launch_time": str_at(inst, "/LaunchTime").unwrap_or("N/A"),
            });
            match record {
                Value::Object(map) => map,
                _ => Record::new(),
            }
        })
        .collect()
}

/// Security groups of the first instance in a `describe-instances` document.
pub fn parse_security_groups(doc: &Value) -> Vec<Record> {
    instances(doc)
        .next()
        .and_then(|inst| inst.get("SecurityGroups").and_then(Value::as_array))
        .into_iter()
        .flatten()
        .map(|sg| {
            let mut record = Record::new();
            record.insert(
                "id".into(),
                Value::from(str_at(sg, "/GroupId").unwrap_or("N/A")),
            );
            record.insert(
                "name".into(),
                Value::from(str_at(sg, "/GroupName").unwrap_or("N/A")),
            );
            record
        })
        .collect()
}

/// Peer listing as a list provider.
pub struct PeerInstances(pub Arc<FleetInventory>);

#[async_trait::async_trait]
impl ListProvider for PeerInstances {
    fn name(&self) -> &str {
        "peers"
    }

    async fn list(&self) -> ProviderRecord<Vec<Record>> {
        self.0.peer_instances().await
    }
}

/// Security groups as a list provider.
pub struct NetworkRules(pub Arc<FleetInventory>);

#[async_trait::async_trait]
impl ListProvider for NetworkRules {
    fn name(&self) -> &str {
        "network_rules"
    }

    async fn list(&self) -> ProviderRecord<Vec<Record>> {
        self.0.network_rules().await
    }
}
