//! Configuration for the tako prover.

use serde::Deserialize;
use std::path::PathBuf;

/// Top-level daemon configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub circuits: CircuitsConfig,
    #[serde(default)]
    pub gpus: GpuConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub prover: ProverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Listen address. Examples:
    ///   "0.0.0.0:60051"
    ///   "unix:///run/tako/prover.sock"
    #[serde(default = "DaemonConfig::default_listen")]
    pub listen: String,
}

impl DaemonConfig {
    fn default_listen() -> String {
        "0.0.0.0:60051".to_string()
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitsConfig {
    /// Directory with one sub-directory per circuit id.
    #[serde(default = "CircuitsConfig::default_template_dir")]
    pub template_dir: PathBuf,
    /// Keep per-request input JSON and witness files after the request ends.
    #[serde(default)]
    pub keep_artifacts: bool,
}

impl CircuitsConfig {
    fn default_template_dir() -> PathBuf {
        PathBuf::from("./template")
    }
}

impl Default for CircuitsConfig {
    fn default() -> Self {
        Self {
            template_dir: Self::default_template_dir(),
            keep_artifacts: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpuConfig {
    /// GPU ordinals to use. Empty = auto-detect all.
    #[serde(default)]
    pub devices: Vec<u32>,
    /// Query `nvidia-smi` for names and memory sizes.
    #[serde(default = "GpuConfig::default_detect")]
    pub detect: bool,
}

impl GpuConfig {
    fn default_detect() -> bool {
        true
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            devices: vec![],
            detect: Self::default_detect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    /// Admission limit per device. 0 = unbounded: requests are always
    /// assigned immediately, to the least-busy device.
    #[serde(default)]
    pub max_tasks_per_device: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    /// Validate the delimiter and zero padding of segment buffers, not only
    /// the trailing length field.
    #[serde(default)]
    pub strict_padding: bool,
    /// Claim checks applied to the reconstructed token, per circuit.
    #[serde(default)]
    pub claims: Vec<ClaimPolicy>,
}

impl InputConfig {
    pub fn claims_for(&self, circuit_id: &str) -> Option<&ClaimPolicy> {
        self.claims.iter().find(|c| c.circuit_id == circuit_id)
    }
}

/// Required `iss` / `aud` claims for one circuit's token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClaimPolicy {
    pub circuit_id: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProverConfig {
    /// External proving engine executable, invoked as
    /// `<command> <proving key> <witness> <proof out> <public out>`.
    #[serde(default = "ProverConfig::default_command")]
    pub command: PathBuf,
}

impl ProverConfig {
    fn default_command() -> PathBuf {
        PathBuf::from("prover")
    }
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
