//! Layered configuration: defaults, optional config file, environment overrides

pub mod app_config;

pub use app_config::{
    AppConfiguration, ClusterConfig, ConfigManager, FencingConfig, GuardConfig, LoggingConfig,
    ObservabilityConfig, PollingConfig, RecoveryTimeouts, ServerConfig,
};
