//! Host telemetry: CPU, memory, disk and OS of the machine the relay runs on.

use relay_core::{ProviderRecord, Record, RecordProvider};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, System};

const PROVIDER_NAME: &str = "hardware";
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Reads a hardware snapshot through `sysinfo` on the blocking pool.
#[derive(Debug, Clone)]
pub struct HostTelemetry {
    cpu_sample: Duration,
}

impl HostTelemetry {
    pub fn new() -> Self {
        Self {
            cpu_sample: Duration::from_millis(500),
        }
    }

    /// Interval between the two CPU readings used to compute usage.
    pub fn with_cpu_sample(mut self, sample: Duration) -> Self {
        self.cpu_sample = sample.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        self
    }
}

impl Default for HostTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RecordProvider for HostTelemetry {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(&self) -> ProviderRecord<Record> {
        let sample = self.cpu_sample;
        match tokio::task::spawn_blocking(move || snapshot(sample)).await {
            Ok(record) => ProviderRecord::Ok(record),
            Err(e) => {
                tracing::warn!(target: "relay::context", error = %e, "Host telemetry task failed");
                ProviderRecord::failed(e.to_string())
            }
        }
    }
}

fn snapshot(cpu_sample: Duration) -> Record {
    let mut sys = System::new();
    sys.refresh_cpu();
    std::thread::sleep(cpu_sample);
    sys.refresh_cpu();
    sys.refresh_memory();

    let ram_total = sys.total_memory();
    let ram_available = sys.available_memory();

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().iter().max_by_key(|d| d.total_space()));
    let (disk_total, disk_free) = disk
        .map(|d| (d.total_space(), d.available_space()))
        .unwrap_or((0, 0));
    let disk_used = disk_total.saturating_sub(disk_free);

    let value = json!({
        "cpu_cores": sys.physical_core_count(),
        "cpu_threads": sys.cpus().len(),
        "cpu_usage_percent": round1(sys.global_cpu_info().cpu_usage() as f64),
        "ram_total_gb": gib(ram_total),
        "ram_available_gb": gib(ram_available),
        "ram_usage_percent": percent(ram_total.saturating_sub(ram_available), ram_total),
        "disk_total_gb": gib(disk_total),
        "disk_used_gb": gib(disk_used),
        "disk_free_gb": gib(disk_free),
        "disk_usage_percent": percent(disk_used, disk_total),
        "os": System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn gib(bytes: u64) -> f64 {
    round2(bytes as f64 / GIB)
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round1(part as f64 * 100.0 / whole as f64)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
