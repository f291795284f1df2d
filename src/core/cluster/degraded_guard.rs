//! Degraded-Mode Guard
//!
//! Decides whether a cluster-disruptive operation may proceed. While fewer
//! control-plane nodes are confirmed available than expected, one more
//! planned disruption could take the last node down, so the guard hands out
//! at most `degraded_disruption_budget` permits and refuses any rebooting
//! rollout that could hit the surviving node. Reads and non-disruptive work
//! are never refused.
//!
//! Decisions are computed from the snapshot passed in on every call and are
//! never cached.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GuardConfig;
use crate::core::events::{EventBus, RecoveryEvent};
use crate::domain::entities::{ClusterHealthSnapshot, DegradedModeDecision};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisruptionKind {
    Read,
    NonDisruptive,
    #[serde(rename = "eviction")]
    VoluntaryEviction,
    RebootingRollout {
        #[serde(default)]
        target_node: Option<String>,
    },
}

impl DisruptionKind {
    pub fn is_disruptive(&self) -> bool {
        matches!(
            self,
            DisruptionKind::VoluntaryEviction | DisruptionKind::RebootingRollout { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            DisruptionKind::Read => "read",
            DisruptionKind::NonDisruptive => "non_disruptive",
            DisruptionKind::VoluntaryEviction => "eviction",
            DisruptionKind::RebootingRollout { .. } => "rebooting_rollout",
        }
    }
}

#[derive(Debug, Clone)]
struct PermitRecord {
    kind: DisruptionKind,
    expires_at: Instant,
}

type PermitTable = Arc<Mutex<HashMap<Uuid, PermitRecord>>>;

fn lock(table: &PermitTable) -> MutexGuard<'_, HashMap<Uuid, PermitRecord>> {
    // A panic while holding the lock leaves the table consistent
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An admitted disruption. Counted against the budget until dropped,
/// explicitly released, or expired.
#[derive(Debug)]
pub struct DisruptionPermit {
    id: Uuid,
    kind: DisruptionKind,
    table: Option<PermitTable>,
}

impl DisruptionPermit {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &DisruptionKind {
        &self.kind
    }

    /// Whether this permit counts against the budget.
    pub fn is_counted(&self) -> bool {
        self.table.is_some()
    }

    /// Keep the permit registered past this value's lifetime; it is then
    /// released by id or by its TTL.
    pub fn detach(mut self) -> Uuid {
        self.table = None;
        self.id
    }
}

impl Drop for DisruptionPermit {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            lock(&table).remove(&self.id);
        }
    }
}

/// Pure decision for `snapshot` given the number of outstanding disruptions.
pub fn evaluate_snapshot(
    snapshot: &ClusterHealthSnapshot,
    outstanding: usize,
    budget: usize,
) -> DegradedModeDecision {
    let evaluated_at = Utc::now();

    if !snapshot.is_below_expected() {
        return DegradedModeDecision {
            allow_eviction: true,
            allow_rebooting_rollout: true,
            degraded: false,
            reason: format!(
                "{} of {} control-plane nodes available",
                snapshot.available_nodes, snapshot.expected_nodes
            ),
            evaluated_at,
        };
    }

    let mut reason = format!(
        "degraded: {} of {} control-plane nodes confirmed available",
        snapshot.available_nodes, snapshot.expected_nodes
    );
    if !snapshot.fencing_healthy {
        reason.push_str(&format!(" ({})", snapshot.fencing_reason));
    }
    let allow_eviction = outstanding < budget;
    if !allow_eviction {
        reason.push_str(&format!(
            "; disruption budget exhausted ({} of {} outstanding)",
            outstanding, budget
        ));
    }

    DegradedModeDecision {
        allow_eviction,
        allow_rebooting_rollout: false,
        degraded: true,
        reason,
        evaluated_at,
    }
}

pub struct DegradedModeGuard {
    budget: usize,
    permit_ttl: Duration,
    permits: PermitTable,
    events: EventBus,
}

impl DegradedModeGuard {
    pub fn new(config: &GuardConfig, events: EventBus) -> Self {
        Self {
            budget: config.degraded_disruption_budget,
            permit_ttl: Duration::from_secs(config.permit_ttl_secs),
            permits: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Disruptions currently counted against the budget.
    pub fn outstanding(&self) -> usize {
        let mut permits = lock(&self.permits);
        purge_expired(&mut permits);
        permits.len()
    }

    pub fn evaluate(&self, snapshot: &ClusterHealthSnapshot) -> DegradedModeDecision {
        evaluate_snapshot(snapshot, self.outstanding(), self.budget)
    }

    /// Admit `kind` against `snapshot`, or refuse with `DisruptionRefused`.
    ///
    /// The budget check and the registration happen under one lock, so two
    /// concurrent requests cannot both take the last unit.
    pub fn try_acquire(
        &self,
        snapshot: &ClusterHealthSnapshot,
        kind: DisruptionKind,
    ) -> Result<DisruptionPermit> {
        let id = Uuid::new_v4();
        if !kind.is_disruptive() {
            return Ok(DisruptionPermit {
                id,
                kind,
                table: None,
            });
        }

        let mut permits = lock(&self.permits);
        purge_expired(&mut permits);
        let decision = evaluate_snapshot(snapshot, permits.len(), self.budget);

        if decision.degraded {
            let refusal = match &kind {
                DisruptionKind::RebootingRollout { target_node } => {
                    reboot_refusal(snapshot, target_node.as_deref(), &decision)
                }
                _ if !decision.allow_eviction => Some(decision.reason.clone()),
                _ => None,
            };
            if let Some(reason) = refusal {
                drop(permits);
                return Err(self.refuse(&kind, reason));
            }
        }

        permits.insert(
            id,
            PermitRecord {
                kind: kind.clone(),
                expires_at: Instant::now() + self.permit_ttl,
            },
        );
        debug!(permit = %id, kind = kind.label(), outstanding = permits.len(), "Disruption admitted");

        Ok(DisruptionPermit {
            id,
            kind,
            table: Some(self.permits.clone()),
        })
    }

    /// Release a detached permit once the disruption's effect has cleared.
    pub fn release(&self, id: Uuid) -> Result<()> {
        match lock(&self.permits).remove(&id) {
            Some(record) => {
                info!(permit = %id, kind = record.kind.label(), "Disruption released");
                Ok(())
            }
            None => Err(AppError::NotFound(format!("disruption permit {}", id))),
        }
    }

    fn refuse(&self, kind: &DisruptionKind, reason: String) -> AppError {
        warn!(kind = kind.label(), reason = %reason, "🛑 Disruption refused");
        self.events.publish(RecoveryEvent::DisruptionRefused {
            kind: kind.label().to_string(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        AppError::DisruptionRefused { reason }
    }
}

/// While degraded, a rebooting rollout is only admissible against a node
/// the fencing authority already confirms failed, and then only within
/// budget. An unspecified target may include the survivor.
fn reboot_refusal(
    snapshot: &ClusterHealthSnapshot,
    target: Option<&str>,
    decision: &DegradedModeDecision,
) -> Option<String> {
    let Some(target) = target else {
        return Some(format!(
            "rebooting rollout without a target node may reboot the surviving node; {}",
            decision.reason
        ));
    };

    let target_failed = snapshot
        .node(target)
        .map_or(false, |n| n.fencing.is_confirmed_failed());
    if !target_failed {
        return Some(format!(
            "rebooting rollout targets {} which may be the surviving node; {}",
            target, decision.reason
        ));
    }
    if !decision.allow_eviction {
        return Some(decision.reason.clone());
    }
    None
}

fn purge_expired(permits: &mut HashMap<Uuid, PermitRecord>) {
    let now = Instant::now();
    permits.retain(|id, record| {
        let live = record.expires_at > now;
        if !live {
            debug!(permit = %id, "Disruption permit expired");
        }
        live
    });
}

/// Helpers for disruption admission points that consult the guard.
pub mod admission {
    use super::*;
    use std::future::Future;

    /// An unreachable or failing guard is a refusal.
    pub fn fail_closed<T>(result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e @ AppError::DisruptionRefused { .. }) => Err(e),
            Err(e) => Err(AppError::DisruptionRefused {
                reason: format!("degraded-mode guard unreachable: {}", e),
            }),
        }
    }

    /// Ask for a decision with a deadline; failure or timeout denies every
    /// disruptive operation.
    pub async fn decide<F>(timeout: Duration, decision: F) -> DegradedModeDecision
    where
        F: Future<Output = Result<DegradedModeDecision>>,
    {
        let result = tokio::time::timeout(timeout, decision)
            .await
            .unwrap_or_else(|_| Err(AppError::timeout("degraded-mode evaluation", timeout)));

        match fail_closed(result) {
            Ok(decision) => decision,
            Err(e) => DegradedModeDecision {
                allow_eviction: false,
                allow_rebooting_rollout: false,
                degraded: true,
                reason: e.to_string(),
                evaluated_at: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{FencingNodeStatus, MemberState, NodeHealth, OnlineCondition};
    use std::collections::BTreeMap;

    fn node(name: &str, online: OnlineCondition) -> NodeHealth {
        NodeHealth {
            name: name.to_string(),
            ready: Some(online == OnlineCondition::Online),
            boot_id: None,
            unschedulable: false,
            peer_url: None,
            fencing: FencingNodeStatus {
                online,
                ..FencingNodeStatus::unknown(name)
            },
            member_state: MemberState::Unknown,
        }
    }

    fn snapshot(available: usize) -> ClusterHealthSnapshot {
        let peer = if available == 2 { OnlineCondition::Online } else { OnlineCondition::Offline };
        let mut nodes = BTreeMap::new();
        nodes.insert("master-0".into(), node("master-0", OnlineCondition::Online));
        nodes.insert("master-1".into(), node("master-1", peer));
        ClusterHealthSnapshot {
            taken_at: Utc::now(),
            nodes,
            members: None,
            fencing_healthy: available == 2,
            fencing_reason: "node master-1 is offline".into(),
            operator: None,
            healthy: available == 2,
            degraded: available == 1,
            available_nodes: available,
            expected_nodes: 2,
            reasons: Vec::new(),
            unavailable_sources: Vec::new(),
        }
    }

    fn guard() -> DegradedModeGuard {
        DegradedModeGuard::new(&GuardConfig::default(), EventBus::default())
    }

    #[test]
    fn test_healthy_cluster_imposes_no_restriction() {
        let decision = guard().evaluate(&snapshot(2));
        assert!(decision.allow_eviction);
        assert!(decision.allow_rebooting_rollout);
        assert!(!decision.degraded);
    }

    #[test]
    fn test_degraded_budget_is_single_unit() {
        let guard = guard();
        let degraded = snapshot(1);

        let first = guard
            .try_acquire(&degraded, DisruptionKind::VoluntaryEviction)
            .unwrap();
        assert!(first.is_counted());

        let second = guard.try_acquire(&degraded, DisruptionKind::VoluntaryEviction);
        assert!(matches!(second, Err(AppError::DisruptionRefused { .. })));
        assert!(!guard.evaluate(&degraded).allow_eviction);

        drop(first);
        assert_eq!(guard.outstanding(), 0);
        assert!(guard
            .try_acquire(&degraded, DisruptionKind::VoluntaryEviction)
            .is_ok());
    }

    #[test]
    fn test_reads_are_never_refused() {
        let guard = guard();
        let degraded = snapshot(1);
        let _held = guard
            .try_acquire(&degraded, DisruptionKind::VoluntaryEviction)
            .unwrap();

        let read = guard.try_acquire(&degraded, DisruptionKind::Read).unwrap();
        assert!(!read.is_counted());
        assert!(guard
            .try_acquire(&degraded, DisruptionKind::NonDisruptive)
            .is_ok());
    }

    #[test]
    fn test_reboot_of_survivor_refused_while_degraded() {
        let guard = guard();
        let degraded = snapshot(1);

        let survivor = guard.try_acquire(
            &degraded,
            DisruptionKind::RebootingRollout {
                target_node: Some("master-0".into()),
            },
        );
        assert!(matches!(survivor, Err(AppError::DisruptionRefused { .. })));

        let untargeted = guard.try_acquire(
            &degraded,
            DisruptionKind::RebootingRollout { target_node: None },
        );
        assert!(untargeted.is_err());

        let failed_node = guard.try_acquire(
            &degraded,
            DisruptionKind::RebootingRollout {
                target_node: Some("master-1".into()),
            },
        );
        assert!(failed_node.is_ok());
    }

    #[test]
    fn test_unknown_state_is_restricted() {
        let guard = guard();
        let decision = guard.evaluate(&snapshot(0));
        assert!(!decision.allow_rebooting_rollout);
        assert!(decision.degraded);
    }

    #[test]
    fn test_detached_permit_released_by_id() {
        let guard = guard();
        let degraded = snapshot(1);
        let id = guard
            .try_acquire(&degraded, DisruptionKind::VoluntaryEviction)
            .unwrap()
            .detach();

        assert_eq!(guard.outstanding(), 1);
        guard.release(id).unwrap();
        assert_eq!(guard.outstanding(), 0);
        assert!(matches!(guard.release(id), Err(AppError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_permit_expires_after_ttl() {
        let guard = guard();
        let degraded = snapshot(1);
        guard
            .try_acquire(&degraded, DisruptionKind::VoluntaryEviction)
            .unwrap()
            .detach();

        tokio::time::advance(Duration::from_secs(GuardConfig::default().permit_ttl_secs + 1)).await;
        assert_eq!(guard.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_guard_fails_closed() {
        let decision = admission::decide(Duration::from_secs(1), async {
            futures::future::pending::<Result<DegradedModeDecision>>().await
        })
        .await;
        assert!(!decision.allow_eviction);
        assert!(!decision.allow_rebooting_rollout);

        let refused: Result<()> = admission::fail_closed(Err(AppError::unavailable(
            crate::error::SourceKind::FencingAuthority,
            "connection refused",
        )));
        assert!(matches!(refused, Err(AppError::DisruptionRefused { .. })));
    }
}
