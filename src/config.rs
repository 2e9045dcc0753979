//! Engine configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::population::{EvolutionOptions, ObjectiveWeights};
use crate::task::{TaskConstraints, TaskContext, TaskError, TaskType};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,

    #[serde(default)]
    pub store: StoreConfig,

    pub realtime: RealtimeConfig,

    /// Task contexts the lab evolves against.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Generation cadence in milliseconds.
    #[serde(default = "default_generation_interval_ms")]
    pub generation_interval_ms: u64,

    #[serde(default = "default_population_size")]
    pub population_size: usize,

    #[serde(default = "default_parents")]
    pub parents: usize,

    #[serde(default = "default_offspring")]
    pub offspring: usize,

    #[serde(default = "default_keep_top")]
    pub keep_top: usize,

    /// Seed agents with an explicit efficiency trait.
    #[serde(default = "default_multi_objective")]
    pub multi_objective: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// HMAC secret verifying subscriber session tokens.
    pub jwt_secret: String,
}

/// One task declaration. The type is validated at load time so a typo fails
/// fast instead of defaulting silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_type: String,
    pub complexity: f64,
    #[serde(default)]
    pub time_deadline_ms: Option<f64>,
    #[serde(default)]
    pub energy_limit: Option<f64>,
    #[serde(default)]
    pub weights: Option<ObjectiveWeights>,
}

/// Slack allowed on the weight-sum check, covering decimal literals that do
/// not add exactly in binary.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl TaskConfig {
    pub fn to_context(&self) -> Result<TaskContext, TaskError> {
        let task_type: TaskType = self.task_type.parse()?;
        if let Some(weights) = self.weights {
            let sum = weights.sum();
            if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return Err(TaskError::InvalidWeights(sum));
            }
        }
        Ok(TaskContext {
            task_type,
            constraints: TaskConstraints {
                complexity: self.complexity,
                time_deadline_ms: self.time_deadline_ms,
                energy_limit: self.energy_limit,
            },
            weights: self.weights,
        })
    }
}

fn default_generation_interval_ms() -> u64 {
    100
}

fn default_population_size() -> usize {
    16
}

fn default_parents() -> usize {
    4
}

fn default_offspring() -> usize {
    8
}

fn default_keep_top() -> usize {
    4
}

fn default_multi_objective() -> bool {
    true
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/metrics.jsonl")
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(
            population_size = config.engine.population_size,
            tasks = config.tasks.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn evolution_options(&self) -> EvolutionOptions {
        EvolutionOptions {
            parents: self.engine.parents,
            offspring: self.engine.offspring,
            keep_top: self.engine.keep_top,
        }
    }

    /// Default local setup: one task per type against a local store.
    pub fn default_local(jwt_secret: String) -> Self {
        Self {
            engine: EngineConfig {
                generation_interval_ms: default_generation_interval_ms(),
                population_size: default_population_size(),
                parents: default_parents(),
                offspring: default_offspring(),
                keep_top: default_keep_top(),
                multi_objective: default_multi_objective(),
            },
            store: StoreConfig::default(),
            realtime: RealtimeConfig { jwt_secret },
            tasks: vec![
                TaskConfig {
                    task_type: "time".to_string(),
                    complexity: 1.0,
                    time_deadline_ms: Some(5000.0),
                    energy_limit: None,
                    weights: None,
                },
                TaskConfig {
                    task_type: "accuracy".to_string(),
                    complexity: 1.0,
                    time_deadline_ms: None,
                    energy_limit: None,
                    weights: None,
                },
                TaskConfig {
                    task_type: "resource".to_string(),
                    complexity: 1.0,
                    time_deadline_ms: None,
                    energy_limit: Some(100.0),
                    weights: None,
                },
            ],
        }
    }
}
