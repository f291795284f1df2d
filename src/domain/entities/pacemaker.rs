//! Fencing authority status object
//!
//! The fencing authority (pacemaker) publishes a cluster-scoped singleton
//! status resource: cluster-level typed conditions, a `lastUpdated`
//! timestamp and one status entry per node with its own conditions,
//! addresses and resource health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cluster-level condition types
pub mod cluster_conditions {
    pub const HEALTHY: &str = "Healthy";
    pub const IN_SERVICE: &str = "InService";
    pub const NODE_COUNT_AS_EXPECTED: &str = "NodeCountAsExpected";

    pub const REASON_AS_EXPECTED: &str = "AsExpected";
    pub const REASON_INSUFFICIENT_NODES: &str = "InsufficientNodes";
    pub const REASON_EXCESSIVE_NODES: &str = "ExcessiveNodes";
}

/// Node-level condition types
pub mod node_conditions {
    pub const HEALTHY: &str = "Healthy";
    pub const ONLINE: &str = "Online";
    pub const IN_SERVICE: &str = "InService";
    pub const ACTIVE: &str = "Active";
    pub const READY: &str = "Ready";
    pub const CLEAN: &str = "Clean";
    pub const MEMBER: &str = "Member";
    pub const FENCING_AVAILABLE: &str = "FencingAvailable";
    pub const FENCING_HEALTHY: &str = "FencingHealthy";

    pub const REASON_ONLINE: &str = "Online";
    pub const REASON_OFFLINE: &str = "Offline";
    pub const REASON_STANDBY: &str = "Standby";
    pub const REASON_IN_MAINTENANCE: &str = "InMaintenance";
}

/// Resource names and condition types
pub mod resources {
    pub const KUBELET: &str = "Kubelet";
    pub const ETCD: &str = "Etcd";

    pub const STARTED: &str = "Started";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn new(condition_type: &str, status: ConditionStatus, reason: &str) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: String::new(),
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// `Some(true)`/`Some(false)` for a definite status, `None` when missing or Unknown.
pub fn condition_is(conditions: &[Condition], condition_type: &str) -> Option<bool> {
    match find_condition(conditions, condition_type).map(|c| c.status) {
        Some(ConditionStatus::True) => Some(true),
        Some(ConditionStatus::False) => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacemakerNodeAddress {
    #[serde(rename = "type")]
    pub address_type: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacemakerResourceStatus {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacemakerNodeStatus {
    pub node_name: String,
    #[serde(default)]
    pub addresses: Vec<PacemakerNodeAddress>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub resources: Vec<PacemakerResourceStatus>,
}

impl PacemakerNodeStatus {
    pub fn first_internal_ip(&self) -> Option<std::net::IpAddr> {
        self.addresses
            .iter()
            .filter(|a| a.address_type == "InternalIP")
            .find_map(|a| a.address.parse().ok())
    }

    pub fn resource(&self, name: &str) -> Option<&PacemakerResourceStatus> {
        self.resources.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacemakerClusterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub nodes: Vec<PacemakerNodeStatus>,
}

impl PacemakerClusterStatus {
    pub fn node(&self, name: &str) -> Option<&PacemakerNodeStatus> {
        self.nodes.iter().find(|n| n.node_name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_JSON: &str = r#"{
        "conditions": [
            {"type": "Healthy", "status": "True", "reason": "ClusterHealthy"},
            {"type": "InService", "status": "True", "reason": "InService"},
            {"type": "NodeCountAsExpected", "status": "True", "reason": "AsExpected"}
        ],
        "lastUpdated": "2026-10-19T10:00:00Z",
        "nodes": [
            {
                "nodeName": "master-0",
                "addresses": [{"type": "InternalIP", "address": "192.168.111.20"}],
                "conditions": [{"type": "Online", "status": "True", "reason": "Online"}],
                "resources": [
                    {"name": "Etcd", "conditions": [{"type": "Started", "status": "True", "reason": "Started"}]}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_decode_status_object() {
        let status: PacemakerClusterStatus = serde_json::from_str(STATUS_JSON).unwrap();
        assert_eq!(status.nodes.len(), 1);

        let node = status.node("master-0").unwrap();
        assert_eq!(condition_is(&node.conditions, node_conditions::ONLINE), Some(true));
        assert_eq!(condition_is(&node.conditions, node_conditions::ACTIVE), None);
        assert_eq!(
            node.first_internal_ip(),
            Some("192.168.111.20".parse().unwrap())
        );

        let etcd = node.resource(resources::ETCD).unwrap();
        assert_eq!(condition_is(&etcd.conditions, resources::STARTED), Some(true));
    }

    #[test]
    fn test_unknown_condition_is_indefinite() {
        let conditions = vec![Condition::new(
            node_conditions::ONLINE,
            ConditionStatus::Unknown,
            "",
        )];
        assert_eq!(condition_is(&conditions, node_conditions::ONLINE), None);
    }
}
