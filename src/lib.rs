//! Two-node fencing control-plane recovery
//!
//! Keeps a two-member etcd cluster available and consistent through
//! single-node failures: a health monitor assembles snapshots from the node
//! registry, the fencing authority and the member list; a reconciler drives
//! member removal, learner re-addition and promotion; a guard refuses
//! disruptive operations while only one node is available.

use std::sync::Arc;

pub mod application;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

// Re-export commonly used types
pub use error::{AppError, Result};

use crate::config::AppConfiguration;
use crate::core::cluster::{
    ClusterHealthMonitor, DegradedModeGuard, FencingCoordinator, MembershipReconciler,
    MonitorSources,
};
use crate::core::events::EventBus;
use crate::domain::repositories::{
    EtcdClient, FencingStatusSource, NodeRegistry, OperatorStatusSource,
};
use crate::infrastructure::InMemoryCollaborators;

/// External systems the recovery layer talks to
#[derive(Clone)]
pub struct Collaborators {
    pub nodes: Arc<dyn NodeRegistry>,
    pub fencing: Arc<dyn FencingStatusSource>,
    pub etcd: Arc<dyn EtcdClient>,
    pub operator: Option<Arc<dyn OperatorStatusSource>>,
}

impl From<InMemoryCollaborators> for Collaborators {
    fn from(memory: InMemoryCollaborators) -> Self {
        Self {
            nodes: memory.nodes,
            fencing: memory.fencing,
            etcd: memory.etcd,
            operator: Some(memory.operator),
        }
    }
}

/// Application state shared across handlers and background loops
#[derive(Clone)]
pub struct AppState {
    pub env: Arc<AppConfiguration>,
    pub monitor: Arc<ClusterHealthMonitor>,
    pub reconciler: Arc<MembershipReconciler>,
    pub guard: Arc<DegradedModeGuard>,
    pub events: EventBus,
}

impl AppState {
    pub fn new(config: AppConfiguration, collaborators: Collaborators) -> Self {
        let events = EventBus::default();
        let call_timeout = config.polling.call_timeout();

        let fencing = Arc::new(FencingCoordinator::new(
            collaborators.fencing,
            config.cluster.cluster_name.clone(),
            &config.fencing,
            call_timeout,
        ));
        let monitor = Arc::new(ClusterHealthMonitor::new(
            MonitorSources {
                nodes: collaborators.nodes,
                fencing,
                etcd: collaborators.etcd.clone(),
                operator: collaborators.operator,
            },
            &config,
            events.clone(),
        ));
        let reconciler = Arc::new(MembershipReconciler::new(
            config.cluster.local_node.clone(),
            collaborators.etcd,
            call_timeout,
            events.clone(),
        ));
        let guard = Arc::new(DegradedModeGuard::new(&config.guard, events.clone()));

        Self {
            env: Arc::new(config),
            monitor,
            reconciler,
            guard,
            events,
        }
    }
}
