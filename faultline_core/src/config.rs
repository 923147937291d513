use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

/// Settings for the subprocess execution adapter.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CommandTargetSettings {
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    pub working_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_max_executions")]
    pub max_executions: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Mutations enqueued per coverage-expanding input.
    #[serde(default = "default_mutations_per_find")]
    pub mutations_per_find: usize,
    /// Mutations enqueued per crashing input, to over-sample near known-bad
    /// regions.
    #[serde(default = "default_crash_mutations")]
    pub crash_mutations: usize,
    /// Stop early once best-seen coverage reaches this percentage. Only
    /// meaningful when the executor reports a coverage capacity.
    pub coverage_threshold: Option<f64>,
    /// How many corpus seeds (by descending energy) feed the initial queue.
    #[serde(default = "default_seed_batch")]
    pub seed_batch: usize,
}

pub fn default_max_executions() -> u64 {
    1_000
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_mutations_per_find() -> usize {
    5
}
fn default_crash_mutations() -> usize {
    3
}
fn default_seed_batch() -> usize {
    32
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            max_executions: default_max_executions(),
            timeout_ms: default_timeout_ms(),
            mutations_per_find: default_mutations_per_find(),
            crash_mutations: default_crash_mutations(),
            coverage_threshold: None,
            seed_batch: default_seed_batch(),
        }
    }
}

/// Energy bonus/decay magnitudes. These are scheduling policy, not derived
/// from a model, so they live in configuration rather than as constants.
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EnergyPolicy {
    #[serde(default = "default_coverage_bonus")]
    pub coverage_bonus: u32,
    #[serde(default = "default_crash_bonus")]
    pub crash_bonus: u32,
    #[serde(default = "default_decay")]
    pub decay: u32,
    #[serde(default = "default_min_energy")]
    pub min_energy: u32,
    #[serde(default = "default_max_energy")]
    pub max_energy: u32,
    #[serde(default = "default_initial_energy")]
    pub initial_energy: u32,
}

fn default_coverage_bonus() -> u32 {
    25
}
fn default_crash_bonus() -> u32 {
    50
}
fn default_decay() -> u32 {
    5
}
fn default_min_energy() -> u32 {
    10
}
fn default_max_energy() -> u32 {
    200
}
fn default_initial_energy() -> u32 {
    100
}

impl Default for EnergyPolicy {
    fn default() -> Self {
        Self {
            coverage_bonus: default_coverage_bonus(),
            crash_bonus: default_crash_bonus(),
            decay: default_decay(),
            min_energy: default_min_energy(),
            max_energy: default_max_energy(),
            initial_energy: default_initial_energy(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusSettings {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    pub initial_seed_paths: Option<Vec<PathBuf>>,
}

pub fn default_state_dir() -> PathBuf {
    PathBuf::from("./.faultline_state")
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            initial_seed_paths: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FaultlineConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub energy: EnergyPolicy,
    #[serde(default)]
    pub corpus: CorpusSettings,
    pub target: Option<CommandTargetSettings>,
}

impl FaultlineConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: FaultlineConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}
