use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local storage, lost on restart
    #[serde(alias = "none")]
    Memory,

    /// SQLite storage backend
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
        #[serde(default = "default_retention_days")]
        retention_days: u32,
        /// Seconds to wait for a connection before giving up
        #[serde(default = "default_connect_timeout")]
        connect_timeout: u64,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./watchpost.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// What a check talks to and how
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeConfig {
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Grpc {
        url: String,
        #[serde(default)]
        service: String,
    },
    Sitemap {
        url: String,
        #[serde(default = "default_concurrency")]
        concurrency: usize,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> u16 {
    200
}

fn default_concurrency() -> usize {
    crate::probes::DEFAULT_SITEMAP_CONCURRENCY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckConfig {
    pub id: String,
    /// Rule the results are tracked against, defaults to the check id
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default = "default_check_interval")]
    pub interval: u64,
    #[serde(default = "default_check_timeout")]
    pub timeout: u64,
    pub probe: ProbeConfig,
}

fn default_check_interval() -> u64 {
    30
}

fn default_check_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub id: String,
    pub url: String,
    #[serde(default = "default_agent_interval")]
    pub interval: u64,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_agent_interval() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub size: usize,
    /// Seconds between time-triggered flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
            flush_interval: default_flush_interval(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub batch: Option<BatchConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCheckConfig {
    pub id: String,
    pub rule: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAgentConfig {
    pub id: String,
    pub url: String,
    pub interval: Duration,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageKind {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStorageConfig {
    pub kind: StorageKind,
    pub retention_days: u32,
    pub connect_timeout: Duration,
}

impl ResolvedStorageConfig {
    /// Oldest timestamp (epoch nanos) that survives cleanup at `now`
    pub fn retention_cutoff(&self, now: i64) -> i64 {
        let window = i64::from(self.retention_days).saturating_mul(86_400 * 1_000_000_000);
        now.saturating_sub(window)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBatchConfig {
    pub size: usize,
    pub flush_interval: Duration,
}

/// Configuration with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub checks: Vec<ResolvedCheckConfig>,
    pub agents: Vec<ResolvedAgentConfig>,
    pub storage: ResolvedStorageConfig,
    pub batch: ResolvedBatchConfig,
}

impl CheckConfig {
    pub fn resolve(&self) -> anyhow::Result<ResolvedCheckConfig> {
        if self.id.is_empty() {
            bail!("check without an id");
        }
        if self.interval == 0 {
            bail!("check {}: interval must be positive", self.id);
        }
        if self.timeout == 0 {
            bail!("check {}: timeout must be positive", self.id);
        }

        Ok(ResolvedCheckConfig {
            id: self.id.clone(),
            rule: self.rule.clone().unwrap_or_else(|| self.id.clone()),
            interval: Duration::from_secs(self.interval),
            timeout: Duration::from_secs(self.timeout),
            probe: self.probe.clone(),
        })
    }
}

impl AgentConfig {
    pub fn resolve(&self) -> anyhow::Result<ResolvedAgentConfig> {
        if self.id.is_empty() {
            bail!("agent without an id");
        }
        if self.interval == 0 {
            bail!("agent {}: interval must be positive", self.id);
        }

        Ok(ResolvedAgentConfig {
            id: self.id.clone(),
            url: self.url.trim_end_matches('/').to_string(),
            interval: Duration::from_secs(self.interval),
            token: self.token.clone(),
        })
    }
}

impl StorageConfig {
    pub fn resolve(&self) -> ResolvedStorageConfig {
        match self {
            StorageConfig::Memory => ResolvedStorageConfig {
                kind: StorageKind::Memory,
                retention_days: default_retention_days(),
                connect_timeout: Duration::from_secs(default_connect_timeout()),
            },
            StorageConfig::Sqlite {
                path,
                retention_days,
                connect_timeout,
            } => ResolvedStorageConfig {
                kind: StorageKind::Sqlite { path: path.clone() },
                retention_days: *retention_days,
                connect_timeout: Duration::from_secs(*connect_timeout),
            },
        }
    }
}

impl BatchConfig {
    pub fn resolve(&self) -> ResolvedBatchConfig {
        ResolvedBatchConfig {
            size: self.size.max(1),
            flush_interval: Duration::from_secs(self.flush_interval.max(1)),
        }
    }
}

impl Config {
    pub fn resolve(&self) -> anyhow::Result<ResolvedConfig> {
        let mut seen = std::collections::HashSet::new();
        let mut checks = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            if !seen.insert(check.id.as_str()) {
                bail!("duplicate check id {}", check.id);
            }
            checks.push(check.resolve()?);
        }

        let agents = self
            .agents
            .iter()
            .map(AgentConfig::resolve)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(ResolvedConfig {
            checks,
            agents,
            storage: self.storage.clone().unwrap_or_default().resolve(),
            batch: self.batch.clone().unwrap_or_default().resolve(),
        })
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    serde_json::from_str::<Config>(&content)
        .map_err(|e| anyhow!("Invalid configuration file provided! {}", e))
        .inspect(|config| trace!("read config: {config:#?}"))
}
