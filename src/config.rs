//! Configuration for careerflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CAREERFLOW_RUN_TIMEOUT_SECONDS, CAREERFLOW_TASK_TIMEOUT_SECONDS)
//! 2. Config file
//! 3. Defaults
//!
//! Config file discovery:
//! - $CAREERFLOW_CONFIG if set
//! - .careerflow/config.yaml in the current directory or any parent
//! - ~/.careerflow/config.yaml
//!
//! The resolved configuration is returned to the caller and passed on
//! explicitly; nothing is cached globally.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::{CommandAdapter, CommandSpec, TaskAdapter, TaskAdapters, TaskKind};
use crate::core::{EngineSettings, RunLimits};
use crate::workflow::{WorkerLimits, WorkflowSettings};

pub const CONFIG_ENV: &str = "CAREERFLOW_CONFIG";
pub const RUN_TIMEOUT_ENV: &str = "CAREERFLOW_RUN_TIMEOUT_SECONDS";
pub const TASK_TIMEOUT_ENV: &str = "CAREERFLOW_TASK_TIMEOUT_SECONDS";

const CONFIG_DIR: &str = ".careerflow";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub workers: WorkerLimits,
    #[serde(default)]
    pub limits: RunLimits,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// External programs per task kind; unlisted kinds use the stub adapter
    #[serde(default)]
    pub commands: BTreeMap<TaskKind, CommandSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    pub run_timeout_seconds: Option<u64>,
    /// 0 disables the per-task timeout
    pub task_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    pub job_title: Option<String>,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub engine: EngineSettings,
    pub workflow: WorkflowSettings,
    pub limits: RunLimits,
    pub commands: BTreeMap<TaskKind, CommandSpec>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            workflow: WorkflowSettings::default(),
            limits: RunLimits::default(),
            commands: BTreeMap::new(),
            config_file: None,
        }
    }
}

impl ResolvedConfig {
    /// Merge a parsed config file and environment lookups over the defaults
    pub fn resolve<F>(file: Option<(PathBuf, ConfigFile)>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (config_file, file) = match file {
            Some((path, file)) => (Some(path), file),
            None => (None, ConfigFile::default()),
        };
        let defaults = EngineSettings::default();

        let run_timeout_seconds = match env_seconds(&env, RUN_TIMEOUT_ENV)? {
            Some(seconds) => seconds,
            None => file
                .engine
                .run_timeout_seconds
                .unwrap_or(defaults.run_timeout.as_secs()),
        };
        if run_timeout_seconds == 0 {
            anyhow::bail!("Run timeout must be at least one second");
        }

        let task_timeout_seconds = match env_seconds(&env, TASK_TIMEOUT_ENV)? {
            Some(seconds) => Some(seconds),
            None => file.engine.task_timeout_seconds,
        };
        let task_timeout = match task_timeout_seconds {
            Some(0) => None,
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => defaults.task_timeout,
        };

        let default_job_title = file
            .defaults
            .job_title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| WorkflowSettings::default().default_job_title);

        Ok(Self {
            engine: EngineSettings {
                run_timeout: Duration::from_secs(run_timeout_seconds),
                task_timeout,
            },
            workflow: WorkflowSettings {
                workers: file.workers,
                default_job_title,
            },
            limits: file.limits,
            commands: file.commands,
            config_file,
        })
    }

    /// Adapter table: configured commands, `fallback` for everything else
    pub fn adapters(&self, fallback: Arc<dyn TaskAdapter>) -> TaskAdapters {
        self.commands
            .iter()
            .fold(TaskAdapters::uniform(fallback), |adapters, (kind, spec)| {
                adapters.with(*kind, Arc::new(CommandAdapter::new(spec.clone())))
            })
    }
}

fn env_seconds<F>(env: &F, name: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    env(name)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a whole number of seconds, got '{}'", name, value))
        })
        .transpose()
}

/// Find a config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
        .find(|path| path.is_file())
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn discover_config_file() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }

    std::env::current_dir()
        .ok()
        .and_then(|cwd| find_config_file(&cwd))
        .or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
                .filter(|path| path.is_file())
        })
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let file = match discover_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    ResolvedConfig::resolve(file, |name| std::env::var(name).ok())
}
