//! Membership Reconciler
//!
//! The only component allowed to mutate etcd membership. Each pass re-lists
//! the members, plans at most one guarded transition against the latest
//! health snapshot and executes it:
//!
//! ```text
//! voter  --(peer confirmed failed by fencing)--> removed by the survivor
//! absent --(peer confirmed online)-------------> added back as a learner
//! learner(started) --(fencing confirms online)-> promoted to voter
//! ```
//!
//! Passes are serialized by a mutex so there is never more than one
//! membership change in flight.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::events::{EventBus, RecoveryEvent};
use crate::domain::entities::member::find_member;
use crate::domain::entities::{ClusterHealthSnapshot, EtcdMember, MemberId};
use crate::domain::repositories::EtcdClient;
use crate::error::{AppError, Result};

/// The single membership change a pass decided on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Two started voters, nothing to do
    NoOp,
    /// Not safe or not possible to act yet; retried next cycle
    Wait { reason: String },
    RemoveMember { node: String, member_id: MemberId },
    AddLearner { node: String, peer_url: String },
    Promote { node: String, member_id: MemberId },
}

impl PlannedAction {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            PlannedAction::RemoveMember { .. }
                | PlannedAction::AddLearner { .. }
                | PlannedAction::Promote { .. }
        )
    }

    fn wait(reason: impl Into<String>) -> Self {
        PlannedAction::Wait {
            reason: reason.into(),
        }
    }
}

/// Decide the next membership transition.
///
/// `members` must be freshly listed; the snapshot only supplies node and
/// fencing health. Returns `SafetyViolation` when the member list shows a
/// state that fencing should have made impossible.
pub fn plan(
    snapshot: &ClusterHealthSnapshot,
    local_node: &str,
    members: &[EtcdMember],
) -> Result<PlannedAction> {
    let learners = members.iter().filter(|m| m.is_learner).count();
    if learners >= 2 {
        return Err(AppError::SafetyViolation(format!(
            "{} members are learners at the same time ({}); no voter can be trusted",
            learners,
            labels(members)
        )));
    }
    if members.len() > 2 {
        return Err(AppError::SafetyViolation(format!(
            "member list has {} members ({}); a two-node cluster allows at most 2",
            members.len(),
            labels(members)
        )));
    }

    let local = snapshot.node(local_node);
    let local_peer_url = local.and_then(|n| n.peer_url.as_deref());
    let local_member = find_member(local_node, local_peer_url, members);

    let peer = snapshot.peer_of(local_node);
    let peer_member =
        peer.and_then(|p| find_member(&p.name, p.peer_url.as_deref(), members));

    let peer_failed = peer.map_or(false, |p| p.fencing.is_confirmed_failed());
    let converged = members.len() == 2 && members.iter().all(|m| m.is_started_voter());
    if converged && !peer_failed {
        return Ok(PlannedAction::NoOp);
    }

    // From here on the plan would mutate; only a started voter that fencing
    // sees online may act, otherwise it may be the isolated side.
    if !local_member.map_or(false, |m| m.is_started_voter()) {
        return Ok(PlannedAction::wait(format!(
            "local node {} is not a started voter; membership changes are driven by the peer",
            local_node
        )));
    }
    if !local.map_or(false, |n| n.fencing.is_confirmed_online()) {
        return Ok(PlannedAction::wait(format!(
            "fencing authority does not confirm local node {} online",
            local_node
        )));
    }

    let Some(peer) = peer else {
        return Ok(PlannedAction::wait("peer node not known to any source"));
    };

    match peer_member {
        Some(member) if peer_failed => Ok(PlannedAction::RemoveMember {
            node: peer.name.clone(),
            member_id: member.id,
        }),
        Some(member) if member.is_learner && member.started() => {
            if peer.fencing.is_confirmed_online() {
                Ok(PlannedAction::Promote {
                    node: peer.name.clone(),
                    member_id: member.id,
                })
            } else {
                Ok(PlannedAction::wait(format!(
                    "learner {} is not confirmed online by the fencing authority ({:?}, stale={})",
                    peer.name, peer.fencing.online, peer.fencing.stale
                )))
            }
        }
        Some(member) if member.is_learner => Ok(PlannedAction::wait(format!(
            "learner {} added, waiting for it to join",
            member.label()
        ))),
        Some(member) if !member.started() => Ok(PlannedAction::wait(format!(
            "voter {} has not started",
            member.label()
        ))),
        Some(_) => Ok(PlannedAction::NoOp),
        None => {
            if members.len() >= 2 {
                return Ok(PlannedAction::wait(format!(
                    "member list has an entry not matching peer {} ({})",
                    peer.name,
                    labels(members)
                )));
            }
            match (&peer.peer_url, peer.fencing.is_confirmed_online()) {
                (Some(peer_url), true) => Ok(PlannedAction::AddLearner {
                    node: peer.name.clone(),
                    peer_url: peer_url.clone(),
                }),
                (None, _) => Ok(PlannedAction::wait(format!(
                    "peer {} has no known address to build a peer URL",
                    peer.name
                ))),
                (_, false) => Ok(PlannedAction::wait(format!(
                    "peer {} is absent and not confirmed online",
                    peer.name
                ))),
            }
        }
    }
}

fn labels(members: &[EtcdMember]) -> String {
    members
        .iter()
        .map(|m| {
            let role = if m.is_learner { "learner" } else { "voter" };
            format!("{}:{}", m.label(), role)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PassResult {
    Converged,
    Waiting { reason: String },
    Applied,
    /// A call failed or the learner was not caught up; retried next cycle
    Deferred { reason: String },
    SafetyViolation { details: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub action: PlannedAction,
    pub result: PassResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcilerStatus {
    pub local_node: String,
    pub passes: u64,
    pub mutations: u64,
    pub last_outcome: Option<ReconcileOutcome>,
    /// Set while the last pass ended in a safety violation
    pub outstanding_violation: Option<String>,
}

pub struct MembershipReconciler {
    local_node: String,
    etcd: Arc<dyn EtcdClient>,
    call_timeout: Duration,
    events: EventBus,
    pass_lock: Mutex<()>,
    status: RwLock<ReconcilerStatus>,
}

impl MembershipReconciler {
    pub fn new(
        local_node: impl Into<String>,
        etcd: Arc<dyn EtcdClient>,
        call_timeout: Duration,
        events: EventBus,
    ) -> Self {
        let local_node = local_node.into();
        Self {
            status: RwLock::new(ReconcilerStatus {
                local_node: local_node.clone(),
                ..ReconcilerStatus::default()
            }),
            local_node,
            etcd,
            call_timeout,
            events,
            pass_lock: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> ReconcilerStatus {
        self.status.read().await.clone()
    }

    /// One reconciliation pass against `snapshot`.
    ///
    /// Only a safety violation is returned as an error; unavailable sources,
    /// timeouts and lagging learners end the pass as `Deferred`.
    #[instrument(skip(self, snapshot), fields(local = %self.local_node))]
    pub async fn reconcile(&self, snapshot: &ClusterHealthSnapshot) -> Result<ReconcileOutcome> {
        let _pass = self.pass_lock.lock().await;
        let started_at = Utc::now();

        let members = match self.list_members().await {
            Ok(members) => members,
            Err(e) => {
                debug!(error = %e, "Member list unavailable, deferring pass");
                let result = PassResult::Deferred { reason: e.to_string() };
                return Ok(self.finish(started_at, PlannedAction::NoOp, result, false).await);
            }
        };

        let action = match plan(snapshot, &self.local_node, &members) {
            Ok(action) => action,
            Err(e) => return Err(self.violation(started_at, PlannedAction::NoOp, e).await),
        };

        match &action {
            PlannedAction::NoOp => {
                debug!("Membership converged");
                Ok(self.finish(started_at, action, PassResult::Converged, false).await)
            }
            PlannedAction::Wait { reason } => {
                debug!(reason = %reason, "Membership change not possible yet");
                let result = PassResult::Waiting { reason: reason.clone() };
                Ok(self.finish(started_at, action, result, false).await)
            }
            _ => self.execute(started_at, action, &members).await,
        }
    }

    /// Apply a requested action, but only if it is exactly what the planner
    /// would choose for `snapshot` and the freshly listed members.
    ///
    /// A mutation requested by a node that is not a started voter is a safety
    /// violation. Any other mismatch ends the pass as `Waiting`.
    #[instrument(skip(self, snapshot), fields(local = %self.local_node))]
    pub async fn apply(
        &self,
        snapshot: &ClusterHealthSnapshot,
        action: PlannedAction,
    ) -> Result<ReconcileOutcome> {
        let _pass = self.pass_lock.lock().await;
        let started_at = Utc::now();

        let members = match self.list_members().await {
            Ok(members) => members,
            Err(e) => {
                let result = PassResult::Deferred { reason: e.to_string() };
                return Ok(self.finish(started_at, action, result, false).await);
            }
        };
        if let Some(e) = self.non_voter_mutation(&action, &members) {
            return Err(self.violation(started_at, action, e).await);
        }

        let planned = match plan(snapshot, &self.local_node, &members) {
            Ok(planned) => planned,
            Err(e) => return Err(self.violation(started_at, action, e).await),
        };
        if planned != action {
            warn!(requested = ?action, planned = ?planned, "Requested membership change refused");
            let result = PassResult::Waiting {
                reason: format!(
                    "requested {:?} does not match the planned action {:?}",
                    action, planned
                ),
            };
            return Ok(self.finish(started_at, action, result, false).await);
        }
        self.execute(started_at, action, &members).await
    }

    fn non_voter_mutation(&self, action: &PlannedAction, members: &[EtcdMember]) -> Option<AppError> {
        let local_is_voter = find_member(&self.local_node, None, members)
            .map_or(false, |m| m.is_started_voter());
        (action.is_mutation() && !local_is_voter).then(|| {
            AppError::SafetyViolation(format!(
                "non-voting node {} attempted a membership change: {:?}",
                self.local_node, action
            ))
        })
    }

    async fn execute(
        &self,
        started_at: DateTime<Utc>,
        action: PlannedAction,
        members: &[EtcdMember],
    ) -> Result<ReconcileOutcome> {
        if let Some(e) = self.non_voter_mutation(&action, members) {
            return Err(self.violation(started_at, action, e).await);
        }

        let outcome = match &action {
            PlannedAction::RemoveMember { node, member_id } => {
                let id = *member_id;
                self.call("member remove", self.etcd.member_remove(id))
                    .await
                    .map(|_| {
                        info!(node = %node, member_id = id, "🗑️ Removed failed member");
                        RecoveryEvent::MemberRemoved {
                            node: node.clone(),
                            member_id: id,
                            timestamp: Utc::now(),
                        }
                    })
            }
            PlannedAction::AddLearner { node, peer_url } => self
                .call("member add", self.etcd.member_add(peer_url, true))
                .await
                .map(|member| {
                    info!(node = %node, member_id = member.id, peer_url = %peer_url, "➕ Added member as learner");
                    RecoveryEvent::LearnerAdded {
                        node: node.clone(),
                        member_id: member.id,
                        peer_url: peer_url.clone(),
                        timestamp: Utc::now(),
                    }
                }),
            PlannedAction::Promote { node, member_id } => {
                let id = *member_id;
                self.call("member promote", self.etcd.member_promote(id))
                    .await
                    .map(|_| {
                        info!(node = %node, member_id = id, "⬆️ Promoted learner to voter");
                        RecoveryEvent::LearnerPromoted {
                            node: node.clone(),
                            member_id: id,
                            timestamp: Utc::now(),
                        }
                    })
            }
            PlannedAction::NoOp | PlannedAction::Wait { .. } => {
                let result = PassResult::Waiting {
                    reason: "nothing to apply".to_string(),
                };
                return Ok(self.finish(started_at, action.clone(), result, false).await);
            }
        };

        match outcome {
            Ok(event) => {
                self.events.publish(event);
                Ok(self.finish(started_at, action, PassResult::Applied, true).await)
            }
            Err(AppError::LearnerNotInSync(details)) => {
                info!(details = %details, "Learner not caught up yet, will retry promotion");
                let result = PassResult::Deferred { reason: details };
                Ok(self.finish(started_at, action, result, false).await)
            }
            Err(e) if e.is_fatal() => Err(self.violation(started_at, action, e).await),
            Err(e) => {
                warn!(error = %e, "Membership change failed, retrying next cycle");
                let result = PassResult::Deferred { reason: e.to_string() };
                Ok(self.finish(started_at, action, result, false).await)
            }
        }
    }

    async fn list_members(&self) -> Result<Vec<EtcdMember>> {
        self.call("member list", self.etcd.member_list()).await
    }

    async fn call<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .unwrap_or_else(|_| Err(AppError::timeout(operation, self.call_timeout)))
    }

    async fn violation(
        &self,
        started_at: DateTime<Utc>,
        action: PlannedAction,
        err: AppError,
    ) -> AppError {
        let details = err.to_string();
        error!(details = %details, "🚨 Membership safety violation, no change attempted");
        self.events.publish(RecoveryEvent::SafetyViolation {
            details: details.clone(),
            timestamp: Utc::now(),
        });
        self.finish(
            started_at,
            action,
            PassResult::SafetyViolation { details },
            false,
        )
        .await;
        err
    }

    async fn finish(
        &self,
        started_at: DateTime<Utc>,
        action: PlannedAction,
        result: PassResult,
        mutated: bool,
    ) -> ReconcileOutcome {
        let outcome = ReconcileOutcome {
            pass_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            action,
            result,
        };

        let mut status = self.status.write().await;
        status.passes += 1;
        if mutated {
            status.mutations += 1;
        }
        match &outcome.result {
            PassResult::SafetyViolation { details } => {
                status.outstanding_violation = Some(details.clone())
            }
            _ => {
                if status.outstanding_violation.take().is_some() {
                    info!("Safety violation cleared");
                }
            }
        }
        status.last_outcome = Some(outcome.clone());
        outcome
    }

    /// Reconcile on every snapshot change and at least every `interval`.
    pub async fn run(
        self: Arc<Self>,
        mut snapshots: watch::Receiver<Arc<ClusterHealthSnapshot>>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(local = %self.local_node, "🚀 Membership reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            let snapshot = snapshots.borrow_and_update().clone();
            if let Err(e) = self.reconcile(&snapshot).await {
                // Reported through status and events; the loop keeps watching
                // until the condition clears.
                debug!(error = %e, "Reconcile pass failed");
            }
        }
        info!("Membership reconciler stopped");
    }
}
