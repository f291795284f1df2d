use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfiguration {
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub polling: PollingConfig,
    pub fencing: FencingConfig,
    pub recovery: RecoveryTimeouts,
    pub guard: GuardConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Name of the fencing authority's singleton status object
    pub cluster_name: String,
    /// Node this process runs on; the reconciler acts on its behalf
    pub local_node: String,
    pub etcd_peer_port: u16,
    pub peer_scheme: String,
    pub expected_nodes: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: "cluster".to_string(),
            local_node: String::new(),
            etcd_peer_port: 2380,
            peer_scheme: "https".to_string(),
            expected_nodes: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub node_interval_secs: u64,
    pub fencing_interval_secs: u64,
    pub member_interval_secs: u64,
    pub operator_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    /// Upper bound on every external call
    pub call_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            node_interval_secs: 5,
            fencing_interval_secs: 30,
            member_interval_secs: 5,
            operator_interval_secs: 30,
            reconcile_interval_secs: 5,
            call_timeout_secs: 10,
        }
    }
}

impl PollingConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FencingConfig {
    pub staleness_threshold_secs: u64,
}

impl Default for FencingConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 300,
        }
    }
}

impl FencingConfig {
    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_threshold_secs as i64)
    }
}

/// Budgets for each recovery phase. Tunable: they depend on the fencing
/// authority's own timing in the target deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryTimeouts {
    pub member_has_left_secs: u64,
    pub member_is_leader_secs: u64,
    pub member_rejoined_learner_secs: u64,
    pub member_promoted_voting_secs: u64,
}

impl Default for RecoveryTimeouts {
    fn default() -> Self {
        Self {
            member_has_left_secs: 300,
            member_is_leader_secs: 600,
            member_rejoined_learner_secs: 600,
            member_promoted_voting_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Outstanding voluntary disruptions allowed while degraded
    pub degraded_disruption_budget: usize,
    /// Permits not released within this window are reclaimed
    pub permit_ttl_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            degraded_disruption_budget: 1,
            permit_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json", "pretty", "compact"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Configuration manager
pub struct ConfigManager {
    config: Arc<RwLock<AppConfiguration>>,
    config_path: Option<String>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(AppConfiguration::default())),
            config_path: None,
        }
    }

    /// Load configuration from an optional config file and environment variables
    pub async fn load(&mut self) -> Result<()> {
        let mut config = AppConfiguration::default();

        if let Ok(config_path) = std::env::var("CONFIG_FILE") {
            config = Self::load_from_file(&config_path).await?;
            self.config_path = Some(config_path);
        }

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Self::validate_config(&config)?;

        let mut current_config = self.config.write().await;
        *current_config = config;

        info!(
            config_file = ?self.config_path,
            "📋 Configuration loaded successfully"
        );
        Ok(())
    }

    pub async fn get(&self) -> AppConfiguration {
        self.config.read().await.clone()
    }

    /// Load configuration from file; keys absent from the file keep their defaults
    pub async fn load_from_file(path: &str) -> Result<AppConfiguration> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::ConfigError(format!("Failed to read config file {}: {}", path, e))
        })?;

        let config = if path.ends_with(".yaml") || path.ends_with(".yml") {
            serde_yaml::from_str(&content)
                .map_err(|e| AppError::ConfigError(format!("Invalid YAML config: {}", e)))?
        } else if path.ends_with(".json") {
            serde_json::from_str(&content)
                .map_err(|e| AppError::ConfigError(format!("Invalid JSON config: {}", e)))?
        } else {
            return Err(AppError::ConfigError(
                "Config file must be .yaml, .yml, or .json".to_string(),
            ));
        };

        debug!(path = path, "📁 Configuration loaded from file");
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`)
    pub fn apply_env_overrides<F>(config: &mut AppConfiguration, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.server.port = port
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid PORT: {}", e)))?;
        }
        if let Some(cluster_name) = lookup("TNF_CLUSTER_NAME") {
            config.cluster.cluster_name = cluster_name;
        }
        if let Some(local_node) = lookup("TNF_LOCAL_NODE") {
            config.cluster.local_node = local_node;
        }
        if let Some(threshold) = lookup("TNF_STALENESS_THRESHOLD_SECS") {
            config.fencing.staleness_threshold_secs = threshold.parse().map_err(|e| {
                AppError::ConfigError(format!("Invalid TNF_STALENESS_THRESHOLD_SECS: {}", e))
            })?;
        }
        if let Some(timeout) = lookup("TNF_CALL_TIMEOUT_SECS") {
            config.polling.call_timeout_secs = timeout.parse().map_err(|e| {
                AppError::ConfigError(format!("Invalid TNF_CALL_TIMEOUT_SECS: {}", e))
            })?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.observability.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.observability.logging.format = format;
        }

        debug!("🔧 Configuration loaded from environment variables");
        Ok(())
    }

    /// Validate configuration
    pub fn validate_config(config: &AppConfiguration) -> Result<()> {
        if config.cluster.local_node.is_empty() {
            return Err(AppError::ConfigError(
                "Local node name is required (TNF_LOCAL_NODE)".to_string(),
            ));
        }

        if config.cluster.cluster_name.is_empty() {
            return Err(AppError::ConfigError("Cluster name is required".to_string()));
        }

        if config.server.port == 0 {
            return Err(AppError::ConfigError("Invalid server port".to_string()));
        }

        if config.cluster.expected_nodes != 2 {
            return Err(AppError::ConfigError(format!(
                "Two-node fencing expects exactly 2 nodes, got {}",
                config.cluster.expected_nodes
            )));
        }

        let polling = &config.polling;
        let intervals = [
            polling.node_interval_secs,
            polling.fencing_interval_secs,
            polling.member_interval_secs,
            polling.operator_interval_secs,
            polling.reconcile_interval_secs,
            polling.call_timeout_secs,
        ];
        if intervals.iter().any(|&secs| secs == 0) {
            return Err(AppError::ConfigError(
                "Polling intervals and call timeout must be non-zero".to_string(),
            ));
        }

        if config.fencing.staleness_threshold_secs == 0 {
            return Err(AppError::ConfigError(
                "Staleness threshold must be non-zero".to_string(),
            ));
        }

        if config.guard.degraded_disruption_budget == 0 {
            return Err(AppError::ConfigError(
                "Degraded disruption budget must be at least 1".to_string(),
            ));
        }

        match config.observability.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(AppError::ConfigError("Invalid log level".to_string())),
        }

        Ok(())
    }
}
