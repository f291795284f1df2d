//! Fencing Coordinator Adapter
//!
//! Interprets the fencing authority's status object and is the only source
//! of truth for "is this node truly down" as opposed to merely unreachable
//! from the Kubernetes API. Three rules dominate:
//!
//! - a status object older than the staleness threshold reports every node
//!   as `Unknown`, never as healthy or failed;
//! - standby and maintenance are administrative: they degrade the cluster
//!   but never justify removing a member;
//! - only a fresh, clean `Offline` counts as a confirmed failure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::config::FencingConfig;
use crate::domain::entities::pacemaker::{
    cluster_conditions, condition_is, find_condition, node_conditions, resources,
};
use crate::domain::entities::{
    FencingNodeStatus, OnlineCondition, PacemakerClusterStatus, PacemakerNodeStatus,
};
use crate::domain::repositories::FencingStatusSource;
use crate::error::{AppError, SourceKind};

pub const REASON_CLUSTER_HEALTHY: &str = "ClusterHealthy";

/// One observation of the fencing authority, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct FencingView {
    pub observed_at: DateTime<Utc>,
    pub status: Option<PacemakerClusterStatus>,
    pub error: Option<String>,
    #[serde(skip)]
    staleness_threshold: chrono::Duration,
}

impl FencingView {
    pub fn observed(
        status: PacemakerClusterStatus,
        observed_at: DateTime<Utc>,
        staleness_threshold: chrono::Duration,
    ) -> Self {
        Self {
            observed_at,
            status: Some(status),
            error: None,
            staleness_threshold,
        }
    }

    pub fn unavailable(
        error: impl Into<String>,
        observed_at: DateTime<Utc>,
        staleness_threshold: chrono::Duration,
    ) -> Self {
        Self {
            observed_at,
            status: None,
            error: Some(error.into()),
            staleness_threshold,
        }
    }

    /// Age of the status object relative to `now`; `None` when unavailable.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.status.as_ref().map(|s| now - s.last_updated)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age(now)
            .map(|age| age > self.staleness_threshold)
            .unwrap_or(false)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.status
            .as_ref()
            .map(|s| s.nodes.iter().map(|n| n.node_name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn node_internal_ip(&self, name: &str) -> Option<std::net::IpAddr> {
        self.status.as_ref()?.node(name)?.first_internal_ip()
    }

    /// Normalized status for `name` as of `now`.
    pub fn node_status(&self, name: &str, now: DateTime<Utc>) -> FencingNodeStatus {
        let Some(status) = &self.status else {
            return FencingNodeStatus::unknown(name);
        };
        let Some(node) = status.node(name) else {
            return FencingNodeStatus {
                last_updated: Some(status.last_updated),
                stale: self.is_stale(now),
                ..FencingNodeStatus::unknown(name)
            };
        };

        let cluster_in_maintenance =
            condition_is(&status.conditions, cluster_conditions::IN_SERVICE) == Some(false);
        normalize_node_status(
            node,
            status.last_updated,
            self.is_stale(now),
            cluster_in_maintenance,
        )
    }

    /// `(true, "ClusterHealthy")` or `(false, reasons)`.
    pub fn cluster_healthy(&self, now: DateTime<Utc>) -> (bool, String) {
        let status = match (&self.status, &self.error) {
            (Some(status), _) => status,
            (None, Some(error)) => {
                return (false, format!("fencing authority unavailable: {}", error))
            }
            (None, None) => return (false, "fencing status not observed yet".to_string()),
        };

        if let Some(age) = self.age(now).filter(|_| self.is_stale(now)) {
            return (
                false,
                format!(
                    "stale: fencing status last updated {}s ago (threshold {}s)",
                    age.num_seconds(),
                    self.staleness_threshold.num_seconds()
                ),
            );
        }

        let mut reasons = Vec::new();

        if let Some(healthy) = find_condition(&status.conditions, cluster_conditions::HEALTHY) {
            if condition_is(&status.conditions, cluster_conditions::HEALTHY) == Some(false) {
                reasons.push(with_message("cluster unhealthy", &healthy.reason, &healthy.message));
            }
        } else {
            reasons.push("cluster Healthy condition missing".to_string());
        }

        if condition_is(&status.conditions, cluster_conditions::IN_SERVICE) == Some(false) {
            reasons.push("cluster in maintenance mode".to_string());
        }

        if let Some(count) =
            find_condition(&status.conditions, cluster_conditions::NODE_COUNT_AS_EXPECTED)
        {
            if condition_is(&status.conditions, cluster_conditions::NODE_COUNT_AS_EXPECTED)
                == Some(false)
            {
                reasons.push(with_message("node count", &count.reason, &count.message));
            }
        }

        for node in &status.nodes {
            let node_status = self.node_status(&node.node_name, now);
            if node_status.standby {
                reasons.push(format!("node {} is in standby", node.node_name));
            }
            if node_status.maintenance {
                reasons.push(format!("node {} is in maintenance", node.node_name));
            }
            match node_status.online {
                OnlineCondition::Online => {}
                OnlineCondition::Offline => reasons.push(format!("node {} is offline", node.node_name)),
                OnlineCondition::Unknown => {
                    reasons.push(format!("node {} state is unknown", node.node_name))
                }
            }
            if node_status.fencing_available == Some(false) {
                reasons.push(format!("node {} has no fencing agent available", node.node_name));
            }
        }

        if reasons.is_empty() {
            (true, REASON_CLUSTER_HEALTHY.to_string())
        } else {
            (false, reasons.join("; "))
        }
    }
}

fn with_message(prefix: &str, reason: &str, message: &str) -> String {
    match (reason.is_empty(), message.is_empty()) {
        (true, true) => prefix.to_string(),
        (false, true) => format!("{}: {}", prefix, reason),
        (true, false) => format!("{}: {}", prefix, message),
        (false, false) => format!("{}: {} ({})", prefix, reason, message),
    }
}

/// Maps a node's typed conditions onto the fixed vocabulary.
pub fn normalize_node_status(
    node: &PacemakerNodeStatus,
    last_updated: DateTime<Utc>,
    stale: bool,
    cluster_in_maintenance: bool,
) -> FencingNodeStatus {
    let conditions = &node.conditions;
    let online_condition = find_condition(conditions, node_conditions::ONLINE);
    let online_reason = online_condition.map(|c| c.reason.as_str()).unwrap_or("");

    let standby = condition_is(conditions, node_conditions::ACTIVE) == Some(false)
        || online_reason == node_conditions::REASON_STANDBY;
    let maintenance = cluster_in_maintenance
        || condition_is(conditions, node_conditions::IN_SERVICE) == Some(false)
        || online_reason == node_conditions::REASON_IN_MAINTENANCE
        || online_reason == "Maintenance";
    let unclean = condition_is(conditions, node_conditions::CLEAN) == Some(false);
    let pending = condition_is(conditions, node_conditions::READY) == Some(false);

    let online = if stale || unclean {
        OnlineCondition::Unknown
    } else {
        match condition_is(conditions, node_conditions::ONLINE) {
            Some(true) => OnlineCondition::Online,
            Some(false) => OnlineCondition::Offline,
            None => OnlineCondition::Unknown,
        }
    };

    let etcd_started = node
        .resource(resources::ETCD)
        .and_then(|r| condition_is(&r.conditions, resources::STARTED));

    FencingNodeStatus {
        node_name: node.node_name.clone(),
        online,
        standby,
        maintenance,
        pending,
        unclean,
        fencing_available: condition_is(conditions, node_conditions::FENCING_AVAILABLE),
        etcd_started,
        stale,
        last_updated: Some(last_updated),
    }
}

/// Polls the fencing authority and answers status queries from the latest view.
pub struct FencingCoordinator {
    source: Arc<dyn FencingStatusSource>,
    cluster_name: String,
    staleness_threshold: chrono::Duration,
    call_timeout: Duration,
    latest: RwLock<Option<FencingView>>,
}

impl FencingCoordinator {
    pub fn new(
        source: Arc<dyn FencingStatusSource>,
        cluster_name: impl Into<String>,
        config: &FencingConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            source,
            cluster_name: cluster_name.into(),
            staleness_threshold: config.staleness_threshold(),
            call_timeout,
            latest: RwLock::new(None),
        }
    }

    /// Fetch the status object once, bounded by the call timeout. The result,
    /// success or failure, replaces the previous view.
    #[instrument(skip(self), fields(cluster = %self.cluster_name))]
    pub async fn refresh(&self) -> FencingView {
        let fetched = tokio::time::timeout(
            self.call_timeout,
            self.source.fetch_status(&self.cluster_name),
        )
        .await
        .unwrap_or_else(|_| Err(AppError::timeout("fencing status fetch", self.call_timeout)));

        let now = Utc::now();
        let view = match fetched {
            Ok(status) => {
                debug!(nodes = status.nodes.len(), "Fetched fencing status");
                FencingView::observed(status, now, self.staleness_threshold)
            }
            Err(e) => {
                warn!(error = %e, "Fencing authority unavailable");
                FencingView::unavailable(e.to_string(), now, self.staleness_threshold)
            }
        };

        *self.latest.write().await = Some(view.clone());
        view
    }

    /// Latest view, or an "unavailable" view if nothing was fetched yet.
    pub async fn view(&self) -> FencingView {
        self.latest.read().await.clone().unwrap_or_else(|| {
            FencingView::unavailable(
                AppError::unavailable(SourceKind::FencingAuthority, "not polled yet").to_string(),
                Utc::now(),
                self.staleness_threshold,
            )
        })
    }

    pub async fn node_status(&self, name: &str) -> FencingNodeStatus {
        self.view().await.node_status(name, Utc::now())
    }

    pub async fn cluster_healthy(&self) -> (bool, String) {
        self.view().await.cluster_healthy(Utc::now())
    }

    /// Fresh, clean, non-administrative `Offline`.
    pub async fn is_confirmed_failed(&self, name: &str) -> bool {
        self.node_status(name).await.is_confirmed_failed()
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        self.staleness_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Condition, ConditionStatus};
    use crate::error::Result;
    use async_trait::async_trait;

    fn node(name: &str, conditions: Vec<Condition>) -> PacemakerNodeStatus {
        PacemakerNodeStatus {
            node_name: name.to_string(),
            addresses: Vec::new(),
            conditions,
            resources: Vec::new(),
        }
    }

    fn online(name: &str) -> PacemakerNodeStatus {
        node(
            name,
            vec![
                Condition::new(node_conditions::ONLINE, ConditionStatus::True, "Online"),
                Condition::new(node_conditions::FENCING_AVAILABLE, ConditionStatus::True, "FencingAvailable"),
            ],
        )
    }

    fn offline(name: &str) -> PacemakerNodeStatus {
        node(
            name,
            vec![Condition::new(node_conditions::ONLINE, ConditionStatus::False, "Offline")],
        )
    }

    fn healthy_cluster_conditions() -> Vec<Condition> {
        vec![
            Condition::new(cluster_conditions::HEALTHY, ConditionStatus::True, "ClusterHealthy"),
            Condition::new(cluster_conditions::IN_SERVICE, ConditionStatus::True, "InService"),
            Condition::new(cluster_conditions::NODE_COUNT_AS_EXPECTED, ConditionStatus::True, "AsExpected"),
        ]
    }

    fn status(nodes: Vec<PacemakerNodeStatus>, last_updated: DateTime<Utc>) -> PacemakerClusterStatus {
        PacemakerClusterStatus {
            conditions: healthy_cluster_conditions(),
            last_updated,
            nodes,
        }
    }

    fn threshold() -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    #[test]
    fn test_online_and_offline_are_normalized() {
        let now = Utc::now();
        let view = FencingView::observed(status(vec![online("master-0"), offline("master-1")], now), now, threshold());

        assert_eq!(view.node_status("master-0", now).online, OnlineCondition::Online);
        assert!(view.node_status("master-0", now).is_confirmed_online());
        assert_eq!(view.node_status("master-1", now).online, OnlineCondition::Offline);
        assert!(view.node_status("master-1", now).is_confirmed_failed());
    }

    #[test]
    fn test_stale_status_is_unknown_even_if_last_known_online() {
        let now = Utc::now();
        let last_updated = now - chrono::Duration::minutes(6);
        let view = FencingView::observed(status(vec![online("master-0")], last_updated), now, threshold());

        let node = view.node_status("master-0", now);
        assert_eq!(node.online, OnlineCondition::Unknown);
        assert!(node.stale);
        assert!(!node.is_confirmed_online());

        let (healthy, reason) = view.cluster_healthy(now);
        assert!(!healthy);
        assert!(reason.starts_with("stale"));
    }

    #[test]
    fn test_standby_is_administrative_not_failure() {
        let now = Utc::now();
        let standby = node(
            "master-1",
            vec![
                Condition::new(node_conditions::ONLINE, ConditionStatus::False, "Offline"),
                Condition::new(node_conditions::ACTIVE, ConditionStatus::False, "Standby"),
            ],
        );
        let view = FencingView::observed(status(vec![online("master-0"), standby], now), now, threshold());

        let node = view.node_status("master-1", now);
        assert!(node.standby);
        assert!(!node.is_confirmed_failed());

        let (healthy, reason) = view.cluster_healthy(now);
        assert!(!healthy);
        assert!(reason.contains("standby"));
    }

    #[test]
    fn test_cluster_maintenance_marks_every_node() {
        let now = Utc::now();
        let mut cluster = status(vec![online("master-0"), offline("master-1")], now);
        cluster.conditions[1] =
            Condition::new(cluster_conditions::IN_SERVICE, ConditionStatus::False, "InMaintenance");
        let view = FencingView::observed(cluster, now, threshold());

        assert!(view.node_status("master-0", now).maintenance);
        assert!(!view.node_status("master-1", now).is_confirmed_failed());
    }

    #[test]
    fn test_unclean_is_never_confirmed_offline() {
        let now = Utc::now();
        let unclean = node(
            "master-1",
            vec![
                Condition::new(node_conditions::ONLINE, ConditionStatus::False, "Offline"),
                Condition::new(node_conditions::CLEAN, ConditionStatus::False, "Unclean"),
            ],
        );
        let view = FencingView::observed(status(vec![unclean], now), now, threshold());
        let node = view.node_status("master-1", now);
        assert_eq!(node.online, OnlineCondition::Unknown);
        assert!(!node.is_confirmed_failed());
    }

    #[test]
    fn test_missing_node_is_unknown() {
        let now = Utc::now();
        let view = FencingView::observed(status(vec![online("master-0")], now), now, threshold());
        assert_eq!(view.node_status("master-1", now).online, OnlineCondition::Unknown);
    }

    #[test]
    fn test_node_count_reason_is_reported() {
        let now = Utc::now();
        let mut cluster = status(vec![online("master-0")], now);
        cluster.conditions[2] = Condition::new(
            cluster_conditions::NODE_COUNT_AS_EXPECTED,
            ConditionStatus::False,
            cluster_conditions::REASON_INSUFFICIENT_NODES,
        );
        let view = FencingView::observed(cluster, now, threshold());
        let (healthy, reason) = view.cluster_healthy(now);
        assert!(!healthy);
        assert!(reason.contains("InsufficientNodes"));
    }

    #[test]
    fn test_healthy_cluster() {
        let now = Utc::now();
        let view = FencingView::observed(status(vec![online("master-0"), online("master-1")], now), now, threshold());
        assert_eq!(view.cluster_healthy(now), (true, REASON_CLUSTER_HEALTHY.to_string()));
    }

    struct HangingSource;

    #[async_trait]
    impl FencingStatusSource for HangingSource {
        async fn fetch_status(&self, _cluster_name: &str) -> Result<PacemakerClusterStatus> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_degrades_to_unknown() {
        let coordinator = FencingCoordinator::new(
            Arc::new(HangingSource),
            "cluster",
            &FencingConfig::default(),
            Duration::from_secs(10),
        );

        let view = coordinator.refresh().await;
        assert!(view.status.is_none());
        assert!(view.error.as_deref().unwrap_or_default().contains("timed out"));
        assert_eq!(
            coordinator.node_status("master-0").await.online,
            OnlineCondition::Unknown
        );
        assert!(!coordinator.cluster_healthy().await.0);
        assert!(!coordinator.is_confirmed_failed("master-0").await);
    }
}
