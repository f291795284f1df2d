//! Health snapshot and degraded-mode decision types
//!
//! Both are produced exclusively by this subsystem and recomputed from live
//! inputs; neither is persisted nor cached across snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::member::{EtcdMember, MemberState};
use crate::error::SourceKind;

/// Normalized fencing-authority view of whether a node is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlineCondition {
    Online,
    Offline,
    Unknown,
}

/// Per-node status reported by the fencing authority, after normalization
/// and the staleness rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FencingNodeStatus {
    pub node_name: String,
    pub online: OnlineCondition,
    /// Operator put the node in standby
    pub standby: bool,
    /// Operator put the node (or the whole cluster) in maintenance
    pub maintenance: bool,
    /// Joining or leaving the fencing cluster
    pub pending: bool,
    /// The fencing authority could not confirm the node's state
    pub unclean: bool,
    /// At least one fencing agent can fence this node
    pub fencing_available: Option<bool>,
    /// Whether the fencing authority runs the etcd resource on this node
    pub etcd_started: Option<bool>,
    /// Status object older than the staleness threshold
    pub stale: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl FencingNodeStatus {
    pub fn unknown(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            online: OnlineCondition::Unknown,
            standby: false,
            maintenance: false,
            pending: false,
            unclean: false,
            fencing_available: None,
            etcd_started: None,
            stale: false,
            last_updated: None,
        }
    }

    /// Operator-initiated states: degraded, never grounds for removal.
    pub fn is_administrative(&self) -> bool {
        self.standby || self.maintenance
    }

    /// Online according to a fresh, clean report.
    pub fn is_confirmed_online(&self) -> bool {
        self.online == OnlineCondition::Online && !self.stale && !self.unclean
    }

    /// Offline according to a fresh, clean report outside any administrative state.
    pub fn is_confirmed_failed(&self) -> bool {
        self.online == OnlineCondition::Offline
            && !self.stale
            && !self.unclean
            && !self.is_administrative()
    }
}

/// Conditions of the etcd cluster operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConditions {
    pub available: Option<bool>,
    pub degraded: Option<bool>,
    pub progressing: Option<bool>,
    #[serde(default)]
    pub message: String,
}

impl OperatorConditions {
    pub fn is_healthy(&self) -> bool {
        self.available == Some(true) && self.degraded != Some(true)
    }
}

/// Everything known about one node in a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub name: String,
    /// Kubernetes Ready condition; `None` when the node registry was unreachable
    pub ready: Option<bool>,
    pub boot_id: Option<String>,
    pub unschedulable: bool,
    pub peer_url: Option<String>,
    pub fencing: FencingNodeStatus,
    pub member_state: MemberState,
}

impl NodeHealth {
    /// Ready and fencing-confirmed online.
    pub fn is_available(&self) -> bool {
        self.ready == Some(true) && self.fencing.is_confirmed_online()
    }
}

/// Output of the cluster health monitor, recomputed on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub nodes: BTreeMap<String, NodeHealth>,
    /// `None` when the member list could not be fetched
    pub members: Option<Vec<EtcdMember>>,
    pub fencing_healthy: bool,
    pub fencing_reason: String,
    pub operator: Option<OperatorConditions>,
    /// Two started voters on two Ready nodes
    pub healthy: bool,
    /// Exactly one node is Ready and fencing-confirmed online
    pub degraded: bool,
    pub available_nodes: usize,
    pub expected_nodes: usize,
    pub reasons: Vec<String>,
    pub unavailable_sources: Vec<SourceKind>,
}

impl ClusterHealthSnapshot {
    pub fn node(&self, name: &str) -> Option<&NodeHealth> {
        self.nodes.get(name)
    }

    /// The other node of the pair.
    pub fn peer_of(&self, local: &str) -> Option<&NodeHealth> {
        self.nodes.values().find(|n| n.name != local)
    }

    pub fn started_voter_count(&self) -> usize {
        self.members
            .as_ref()
            .map(|members| members.iter().filter(|m| m.is_started_voter()).count())
            .unwrap_or(0)
    }

    pub fn learner_count(&self) -> usize {
        self.members
            .as_ref()
            .map(|members| members.iter().filter(|m| m.is_learner).count())
            .unwrap_or(0)
    }

    /// Fewer nodes confirmed available than the cluster expects, including
    /// the case where nothing could be confirmed at all.
    pub fn is_below_expected(&self) -> bool {
        self.available_nodes < self.expected_nodes
    }
}

/// Whether disruptive operations may proceed right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedModeDecision {
    pub allow_eviction: bool,
    pub allow_rebooting_rollout: bool,
    pub degraded: bool,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
}
