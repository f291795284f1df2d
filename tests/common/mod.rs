#![allow(dead_code)]

use chrono::Utc;
use std::sync::Arc;

use tnf_recovery::config::AppConfiguration;
use tnf_recovery::core::cluster::ReconcileOutcome;
use tnf_recovery::domain::entities::pacemaker::{cluster_conditions, node_conditions, resources};
use tnf_recovery::domain::entities::{
    ClusterHealthSnapshot, Condition, ConditionStatus, EtcdMember, Node, OperatorConditions,
    PacemakerClusterStatus, PacemakerNodeAddress, PacemakerNodeStatus, PacemakerResourceStatus,
};
use tnf_recovery::infrastructure::{ClusterFixture, InMemoryCollaborators};
use tnf_recovery::{AppState, Result};

pub const MASTER_0: &str = "master-0";
pub const MASTER_1: &str = "master-1";
pub const IP_0: &str = "192.168.111.20";
pub const IP_1: &str = "192.168.111.21";
pub const URL_0: &str = "https://192.168.111.20:2380";
pub const URL_1: &str = "https://192.168.111.21:2380";

pub fn test_config() -> AppConfiguration {
    let mut config = AppConfiguration::default();
    config.cluster.local_node = MASTER_0.to_string();
    config.polling.call_timeout_secs = 1;
    config
}

pub fn fencing_node(name: &str, ip: &str, online: bool) -> PacemakerNodeStatus {
    let (status, reason) = if online {
        (ConditionStatus::True, node_conditions::REASON_ONLINE)
    } else {
        (ConditionStatus::False, node_conditions::REASON_OFFLINE)
    };
    PacemakerNodeStatus {
        node_name: name.to_string(),
        addresses: vec![PacemakerNodeAddress {
            address_type: "InternalIP".to_string(),
            address: ip.to_string(),
        }],
        conditions: vec![
            Condition::new(node_conditions::ONLINE, status, reason),
            Condition::new(node_conditions::CLEAN, ConditionStatus::True, "Clean"),
            Condition::new(node_conditions::FENCING_AVAILABLE, ConditionStatus::True, "FencingAvailable"),
        ],
        resources: vec![PacemakerResourceStatus {
            name: resources::ETCD.to_string(),
            conditions: vec![Condition::new(resources::STARTED, status, "Started")],
        }],
    }
}

pub fn healthy_fencing() -> PacemakerClusterStatus {
    PacemakerClusterStatus {
        conditions: vec![
            Condition::new(cluster_conditions::HEALTHY, ConditionStatus::True, "ClusterHealthy"),
            Condition::new(cluster_conditions::IN_SERVICE, ConditionStatus::True, "InService"),
            Condition::new(
                cluster_conditions::NODE_COUNT_AS_EXPECTED,
                ConditionStatus::True,
                cluster_conditions::REASON_AS_EXPECTED,
            ),
        ],
        last_updated: Utc::now(),
        nodes: vec![fencing_node(MASTER_0, IP_0, true), fencing_node(MASTER_1, IP_1, true)],
    }
}

pub fn converged_fixture() -> ClusterFixture {
    ClusterFixture {
        nodes: vec![
            Node::new(MASTER_0, "boot-master-0", true).with_internal_ip(IP_0.parse().unwrap()),
            Node::new(MASTER_1, "boot-master-1", true).with_internal_ip(IP_1.parse().unwrap()),
        ],
        fencing: healthy_fencing(),
        members: vec![
            EtcdMember::voter(1, MASTER_0, URL_0),
            EtcdMember::voter(2, MASTER_1, URL_1),
        ],
        operator: OperatorConditions {
            available: Some(true),
            degraded: Some(false),
            progressing: Some(false),
            message: String::new(),
        },
        live_fencing: true,
    }
}

/// A two-node cluster backed by in-memory collaborators, seen from master-0.
pub struct TestCluster {
    pub memory: InMemoryCollaborators,
    pub state: AppState,
}

impl TestCluster {
    pub fn new(fixture: ClusterFixture) -> Self {
        let memory = fixture.into_collaborators();
        let state = AppState::new(test_config(), memory.clone().into());
        Self { memory, state }
    }

    pub fn converged() -> Self {
        Self::new(converged_fixture())
    }

    pub async fn refresh(&self) -> Arc<ClusterHealthSnapshot> {
        self.state.monitor.refresh_once().await
    }

    /// Poll every source, then run one reconcile pass.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let snapshot = self.refresh().await;
        self.state.reconciler.reconcile(&snapshot).await
    }

    /// Node shuts down: fencing reports it offline and it loses Ready.
    pub async fn fail_node(&self, name: &str) {
        self.memory.fencing.set_node_online(name, false).await;
        self.memory.nodes.set_ready(name, false).await;
    }

    /// Node is back up with a new boot ID.
    pub async fn restore_node(&self, name: &str) {
        self.memory.nodes.reboot(name).await;
        self.memory.fencing.set_node_online(name, true).await;
        self.memory.nodes.set_ready(name, true).await;
    }

    pub fn mutations(&self) -> usize {
        self.memory.etcd.mutation_count()
    }
}
