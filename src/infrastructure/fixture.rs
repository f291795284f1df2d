//! YAML cluster fixture
//!
//! Describes a cluster's initial state (nodes, fencing status object, etcd
//! members, operator conditions) and turns it into in-memory collaborators.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::memory::{
    InMemoryEtcdClient, InMemoryFencingSource, InMemoryNodeRegistry, StaticOperatorStatus,
};
use crate::domain::entities::{EtcdMember, Node, OperatorConditions, PacemakerClusterStatus};
use crate::error::{AppError, Result};

fn default_live() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFixture {
    pub nodes: Vec<Node>,
    pub fencing: PacemakerClusterStatus,
    #[serde(default)]
    pub members: Vec<EtcdMember>,
    #[serde(default)]
    pub operator: OperatorConditions,
    /// Refresh the fencing object's `lastUpdated` on every fetch
    #[serde(default = "default_live")]
    pub live_fencing: bool,
}

/// The collaborators built from a fixture, kept typed so callers can inject
/// faults after startup.
#[derive(Clone)]
pub struct InMemoryCollaborators {
    pub nodes: Arc<InMemoryNodeRegistry>,
    pub fencing: Arc<InMemoryFencingSource>,
    pub etcd: Arc<InMemoryEtcdClient>,
    pub operator: Arc<StaticOperatorStatus>,
}

impl ClusterFixture {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let fixture: ClusterFixture = serde_yaml::from_str(yaml)?;
        fixture.validate()?;
        Ok(fixture)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read fixture {}: {}", path.display(), e))
        })?;
        let fixture = Self::from_yaml_str(&content)?;
        info!(
            path = %path.display(),
            nodes = fixture.nodes.len(),
            members = fixture.members.len(),
            "📦 Loaded cluster fixture"
        );
        Ok(fixture)
    }

    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(AppError::ValidationError(
                "fixture must declare at least one node".to_string(),
            ));
        }
        let mut ids: Vec<_> = self.members.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.members.len() {
            return Err(AppError::ValidationError(
                "fixture member ids must be unique".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_collaborators(self) -> InMemoryCollaborators {
        InMemoryCollaborators {
            nodes: Arc::new(InMemoryNodeRegistry::new(self.nodes)),
            fencing: Arc::new(InMemoryFencingSource::new(self.fencing, self.live_fencing)),
            etcd: Arc::new(InMemoryEtcdClient::new(self.members)),
            operator: Arc::new(StaticOperatorStatus::new(self.operator)),
        }
    }
}
