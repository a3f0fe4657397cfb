//! Accelerator discovery.
//!
//! Devices are probed once at startup and never added or removed afterwards.
//! Explicit ordinals from the config win; otherwise `nvidia-smi` is queried.

use std::process::Command;

use tracing::{info, warn};

use crate::config::GpuConfig;

/// One accelerator the scheduler can assign work to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub ordinal: u32,
    pub name: String,
    pub vram_total_bytes: u64,
}

impl DeviceHandle {
    pub fn new(ordinal: u32, name: impl Into<String>) -> Self {
        Self {
            ordinal,
            name: name.into(),
            vram_total_bytes: 0,
        }
    }
}

/// Resolve the device set for this process.
///
/// An empty result is not an error here: the daemon still serves, and every
/// prove request fails with "no available devices".
pub fn probe_devices(config: &GpuConfig) -> Vec<DeviceHandle> {
    let detected = if config.detect { detect_gpus() } else { vec![] };

    let devices: Vec<DeviceHandle> = if config.devices.is_empty() {
        detected
    } else {
        let mut ordinals = config.devices.clone();
        ordinals.sort_unstable();
        ordinals.dedup();
        ordinals
            .into_iter()
            .map(|ordinal| {
                detected
                    .iter()
                    .find(|d| d.ordinal == ordinal)
                    .cloned()
                    .unwrap_or_else(|| DeviceHandle::new(ordinal, format!("GPU {}", ordinal)))
            })
            .collect()
    };

    if devices.is_empty() {
        warn!("no accelerator devices available; prove requests will be rejected");
    }
    for d in &devices {
        info!(
            ordinal = d.ordinal,
            name = %d.name,
            vram_total_mib = d.vram_total_bytes / (1024 * 1024),
            "device registered"
        );
    }
    devices
}

/// Detect GPUs by parsing `nvidia-smi` CSV output.
fn detect_gpus() -> Vec<DeviceHandle> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .output();

    match output {
        Ok(out) if out.status.success() => parse_nvidia_smi(&String::from_utf8_lossy(&out.stdout)),
        Ok(out) => {
            warn!(status = %out.status, "nvidia-smi failed");
            vec![]
        }
        Err(e) => {
            warn!(error = %e, "nvidia-smi not available");
            vec![]
        }
    }
}

fn parse_nvidia_smi(text: &str) -> Vec<DeviceHandle> {
    let mut devices: Vec<DeviceHandle> = text
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 3 {
                return None;
            }
            let ordinal = parts[0].parse::<u32>().ok()?;
            let total_mib = parts[2].parse::<u64>().unwrap_or(0);
            Some(DeviceHandle {
                ordinal,
                name: parts[1].to_string(),
                vram_total_bytes: total_mib * 1024 * 1024,
            })
        })
        .collect();
    devices.sort_by_key(|d| d.ordinal);
    devices
}
