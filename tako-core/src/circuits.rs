//! Circuit registry.
//!
//! Each sub-directory of the template directory is one circuit, keyed by the
//! directory name:
//!
//! ```text
//! <template_dir>/<circuit_id>/
//!     keys/pk.key        proving key (consumed by the proving engine)
//!     keys/vk.key        verifying key
//!     circuit.r1cs       constraint system
//!     generate_witness   witness generator executable
//!     input/             per-request input JSON
//!     wtns/              per-request witness files
//! ```
//!
//! The registry is filled once at startup and read-only afterwards. A circuit
//! with missing or malformed files is skipped with a warning.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use tako_r1cs::R1cs;
use tracing::{info, warn};

pub const KEYS_DIR: &str = "keys";
pub const INPUT_DIR: &str = "input";
pub const WTNS_DIR: &str = "wtns";
pub const PK_FILE: &str = "pk.key";
pub const VK_FILE: &str = "vk.key";
pub const R1CS_FILE: &str = "circuit.r1cs";
pub const WITNESS_GENERATOR: &str = "generate_witness";

/// Everything loaded for one circuit template.
#[derive(Debug)]
pub struct CircuitData {
    pub id: String,
    pub dir: PathBuf,
    pub pk_path: PathBuf,
    pub vk_path: PathBuf,
    pub r1cs: Arc<R1cs>,
    pub num_output: u32,
    pub num_in_public: u32,
}

impl CircuitData {
    /// Load one circuit directory.
    pub fn load(id: &str, dir: &Path) -> Result<Self> {
        let keys = dir.join(KEYS_DIR);
        let pk_path = keys.join(PK_FILE);
        let pk_meta = fs::metadata(&pk_path)
            .with_context(|| format!("missing proving key {}", pk_path.display()))?;
        ensure!(pk_meta.len() > 0, "empty proving key {}", pk_path.display());

        let vk_path = keys.join(VK_FILE);
        ensure!(
            vk_path.is_file(),
            "missing verifying key {}",
            vk_path.display()
        );

        let generator = dir.join(WITNESS_GENERATOR);
        ensure!(
            generator.is_file(),
            "missing witness generator {}",
            generator.display()
        );

        let r1cs = tako_r1cs::load_r1cs_file(id, &dir.join(R1CS_FILE))?;

        for sub in [INPUT_DIR, WTNS_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
        }

        Ok(Self {
            id: id.to_string(),
            dir: dir.to_path_buf(),
            pk_path,
            vk_path,
            num_output: r1cs.num_pub_out,
            num_in_public: r1cs.num_pub_in,
            r1cs: Arc::new(r1cs),
        })
    }

    pub fn witness_generator(&self) -> PathBuf {
        self.dir.join(WITNESS_GENERATOR)
    }

    pub fn input_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(INPUT_DIR).join(format!("input_{}.json", job_id))
    }

    pub fn wtns_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(WTNS_DIR).join(format!("output_{}.wtns", job_id))
    }
}

/// Circuits keyed by id.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    circuits: HashMap<String, Arc<CircuitData>>,
}

impl CircuitRegistry {
    /// Load every circuit under `template_dir`.
    ///
    /// Fails only if the directory itself cannot be read.
    pub fn load_all(template_dir: &Path) -> Result<Self> {
        let start = Instant::now();
        let entries = fs::read_dir(template_dir)
            .with_context(|| format!("failed to read template dir {}", template_dir.display()))?;

        let mut registry = Self::default();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            info!(circuit_id = %id, "loading circuit");
            match CircuitData::load(&id, &entry.path()) {
                Ok(data) => registry.insert(data),
                Err(e) => warn!(circuit_id = %id, error = %format!("{:#}", e), "skipping circuit"),
            }
        }

        info!(
            circuits = registry.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "circuits loaded"
        );
        Ok(registry)
    }

    pub fn insert(&mut self, data: CircuitData) {
        self.circuits.insert(data.id.clone(), Arc::new(data));
    }

    pub fn get(&self, id: &str) -> Option<Arc<CircuitData>> {
        self.circuits.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Circuit ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.circuits.keys().cloned().collect();
        ids.sort();
        ids
    }
}
