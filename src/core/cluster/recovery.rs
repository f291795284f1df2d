//! Recovery progress tracking
//!
//! Follows a disrupted peer through the expected recovery sequence by
//! watching successive snapshots:
//!
//! ```text
//! Converged -> MemberRemoved -> LearnerRejoined -> LearnerStarted -> Converged
//! ```
//!
//! and flags a phase that outlives its budget. The surviving node must stay
//! a started voter throughout; anything else is recorded as a violation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::RecoveryTimeouts;
use crate::domain::entities::{ClusterHealthSnapshot, EtcdMember, MemberState};
use crate::error::{AppError, Result};

/// Roles in a two-member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "roles", rename_all = "snake_case")]
pub enum ClusterRoles {
    /// Both members are started voters
    Converged,
    /// One started voter, the other a learner (possibly pending)
    LeaderAndLearner {
        leader: String,
        learner: String,
        learner_started: bool,
    },
    /// A single started voter; the peer has been removed
    SingleVoter { leader: String },
    /// No member has started
    NotStarted,
}

/// Classify the member list without assuming which node leads.
pub fn classify_roles(members: &[EtcdMember]) -> Result<ClusterRoles> {
    let learners: Vec<&EtcdMember> = members.iter().filter(|m| m.is_learner).collect();
    if learners.len() >= 2 {
        return Err(AppError::SafetyViolation(
            "both members are learners".to_string(),
        ));
    }

    if !members.iter().any(|m| m.started()) {
        return Ok(ClusterRoles::NotStarted);
    }

    let voters: Vec<&EtcdMember> = members.iter().filter(|m| m.is_started_voter()).collect();
    match (voters.as_slice(), learners.as_slice()) {
        ([_, _], []) => Ok(ClusterRoles::Converged),
        ([leader], [learner]) => Ok(ClusterRoles::LeaderAndLearner {
            leader: leader.name.clone(),
            learner: learner.label(),
            learner_started: learner.started(),
        }),
        ([leader], []) => Ok(ClusterRoles::SingleVoter {
            leader: leader.name.clone(),
        }),
        _ => Err(AppError::SafetyViolation(format!(
            "unexpected member roles: {} started voters, {} learners in {} members",
            voters.len(),
            learners.len(),
            members.len()
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Converged,
    MemberRemoved,
    LearnerRejoined,
    LearnerStarted,
}

impl RecoveryPhase {
    fn from_member_state(state: MemberState) -> Option<Self> {
        match state {
            MemberState::Voter { started: true } => Some(RecoveryPhase::Converged),
            MemberState::Absent => Some(RecoveryPhase::MemberRemoved),
            MemberState::Learner { started: false } => Some(RecoveryPhase::LearnerRejoined),
            MemberState::Learner { started: true } => Some(RecoveryPhase::LearnerStarted),
            // Unknown or a voter that has not started: no new information
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub phase: RecoveryPhase,
    pub entered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StalledPhase {
    pub phase: RecoveryPhase,
    pub elapsed_secs: i64,
    pub budget_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RecoveryTracker {
    survivor: String,
    peer: String,
    timeouts: RecoveryTimeouts,
    disruption_at: Option<DateTime<Utc>>,
    history: Vec<PhaseRecord>,
    violations: Vec<String>,
}

impl RecoveryTracker {
    pub fn new(survivor: impl Into<String>, peer: impl Into<String>, timeouts: RecoveryTimeouts) -> Self {
        Self {
            survivor: survivor.into(),
            peer: peer.into(),
            timeouts,
            disruption_at: None,
            history: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Start the clock for the "member has left" budget.
    pub fn mark_disruption(&mut self, at: DateTime<Utc>) {
        self.disruption_at = Some(at);
    }

    pub fn current(&self) -> Option<RecoveryPhase> {
        self.history.last().map(|r| r.phase)
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    pub fn phases(&self) -> Vec<RecoveryPhase> {
        self.history.iter().map(|r| r.phase).collect()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Went through removal and is back to two voters.
    pub fn is_complete(&self) -> bool {
        let phases = self.phases();
        let removed = phases.iter().position(|p| *p == RecoveryPhase::MemberRemoved);
        matches!(
            (removed, phases.last()),
            (Some(i), Some(RecoveryPhase::Converged)) if i + 1 < phases.len()
        )
    }

    /// Record `snapshot`; returns the new phase on a transition.
    pub fn observe(&mut self, snapshot: &ClusterHealthSnapshot) -> Option<RecoveryPhase> {
        if let Some(survivor) = snapshot.node(&self.survivor) {
            match survivor.member_state {
                MemberState::Unknown => {}
                state if state.is_started_voter() => {}
                state => self.violations.push(format!(
                    "{}: surviving node {} is {:?}, expected a started voter",
                    snapshot.taken_at.to_rfc3339(),
                    self.survivor,
                    state
                )),
            }
        }

        let phase = snapshot
            .node(&self.peer)
            .map(|n| n.member_state)
            .or_else(|| snapshot.members.as_ref().map(|_| MemberState::Absent))
            .and_then(RecoveryPhase::from_member_state)?;

        if self.current() == Some(phase) {
            return None;
        }
        self.history.push(PhaseRecord {
            phase,
            entered_at: snapshot.taken_at,
        });
        Some(phase)
    }

    /// The current phase if it has outlived its budget at `now`.
    pub fn stalled(&self, now: DateTime<Utc>) -> Option<StalledPhase> {
        let current = self.history.last()?;
        let (since, budget_secs) = match current.phase {
            // Still converged after a disruption: the peer should have left
            RecoveryPhase::Converged => match (self.disruption_at, self.is_complete()) {
                (Some(at), false) if at >= current.entered_at => {
                    (at, self.timeouts.member_has_left_secs)
                }
                _ => return None,
            },
            RecoveryPhase::MemberRemoved => {
                (current.entered_at, self.timeouts.member_rejoined_learner_secs)
            }
            RecoveryPhase::LearnerRejoined | RecoveryPhase::LearnerStarted => {
                let since = self
                    .history
                    .iter()
                    .rev()
                    .take_while(|r| r.phase != RecoveryPhase::MemberRemoved)
                    .last()
                    .map_or(current.entered_at, |r| r.entered_at);
                (since, self.timeouts.member_promoted_voting_secs)
            }
        };

        let elapsed = now - since;
        (elapsed.num_seconds() > budget_secs as i64).then(|| StalledPhase {
            phase: current.phase,
            elapsed_secs: elapsed.num_seconds(),
            budget_secs,
        })
    }

    /// Whether the survivor has been a started voter within the leader budget.
    pub fn survivor_stalled(&self, snapshot: &ClusterHealthSnapshot) -> bool {
        let Some(at) = self.disruption_at else {
            return false;
        };
        let is_voter = snapshot
            .node(&self.survivor)
            .map_or(false, |n| n.member_state.is_started_voter());
        !is_voter && (snapshot.taken_at - at).num_seconds() > self.timeouts.member_is_leader_secs as i64
    }
}

/// Boot IDs captured at one point in time, to tell whether a node rebooted.
#[derive(Debug, Clone, Default)]
pub struct BootIdBaseline {
    boot_ids: HashMap<String, String>,
}

impl BootIdBaseline {
    pub fn capture(snapshot: &ClusterHealthSnapshot) -> Self {
        let boot_ids = snapshot
            .nodes
            .values()
            .filter_map(|n| n.boot_id.clone().map(|id| (n.name.clone(), id)))
            .collect();
        Self { boot_ids }
    }

    pub fn boot_id(&self, node: &str) -> Option<&str> {
        self.boot_ids.get(node).map(String::as_str)
    }

    /// `None` when either side does not know the node's boot ID.
    pub fn has_rebooted(&self, node: &str, snapshot: &ClusterHealthSnapshot) -> Option<bool> {
        let before = self.boot_ids.get(node)?;
        let now = snapshot.node(node)?.boot_id.as_ref()?;
        Some(before != now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{FencingNodeStatus, NodeHealth};
    use chrono::Duration;
    use std::collections::BTreeMap;

    const URL_1: &str = "https://192.168.111.21:2380";

    const VOTER: MemberState = MemberState::Voter { started: true };

    fn snapshot_at(
        taken_at: DateTime<Utc>,
        survivor: MemberState,
        peer: MemberState,
    ) -> ClusterHealthSnapshot {
        let node = |name: &str, member_state| NodeHealth {
            name: name.to_string(),
            ready: Some(true),
            boot_id: None,
            unschedulable: false,
            peer_url: None,
            fencing: FencingNodeStatus::unknown(name),
            member_state,
        };
        let mut nodes = BTreeMap::new();
        nodes.insert("master-0".to_string(), node("master-0", survivor));
        nodes.insert("master-1".to_string(), node("master-1", peer));
        ClusterHealthSnapshot {
            taken_at,
            nodes,
            members: None,
            fencing_healthy: true,
            fencing_reason: String::new(),
            operator: None,
            healthy: false,
            degraded: false,
            available_nodes: 2,
            expected_nodes: 2,
            reasons: Vec::new(),
            unavailable_sources: Vec::new(),
        }
    }

    fn tracker() -> RecoveryTracker {
        RecoveryTracker::new("master-0", "master-1", RecoveryTimeouts::default())
    }

    #[test]
    fn test_converged_stalls_when_peer_never_leaves() {
        let t0 = Utc::now();
        let mut tracker = tracker();
        tracker.observe(&snapshot_at(t0, VOTER, VOTER));
        assert_eq!(tracker.stalled(t0 + Duration::seconds(3600)), None);

        tracker.mark_disruption(t0 + Duration::seconds(10));
        assert_eq!(tracker.stalled(t0 + Duration::seconds(200)), None);
        assert_eq!(
            tracker.stalled(t0 + Duration::seconds(320)),
            Some(StalledPhase {
                phase: RecoveryPhase::Converged,
                elapsed_secs: 310,
                budget_secs: 300,
            })
        );
    }

    #[test]
    fn test_removed_member_stalls_without_rejoin() {
        let t0 = Utc::now();
        let mut tracker = tracker();
        tracker.observe(&snapshot_at(t0, VOTER, VOTER));
        tracker.mark_disruption(t0);
        let removed_at = t0 + Duration::seconds(30);
        assert_eq!(
            tracker.observe(&snapshot_at(removed_at, VOTER, MemberState::Absent)),
            Some(RecoveryPhase::MemberRemoved)
        );

        assert_eq!(tracker.stalled(removed_at + Duration::seconds(500)), None);
        let stalled = tracker.stalled(removed_at + Duration::seconds(700)).unwrap();
        assert_eq!(stalled.phase, RecoveryPhase::MemberRemoved);
        assert_eq!(stalled.elapsed_secs, 700);
        assert_eq!(stalled.budget_secs, 600);
    }

    #[test]
    fn test_promotion_budget_counts_from_rejoin() {
        let t0 = Utc::now();
        let mut tracker = tracker();
        tracker.observe(&snapshot_at(t0, VOTER, VOTER));
        tracker.mark_disruption(t0);
        tracker.observe(&snapshot_at(t0 + Duration::seconds(30), VOTER, MemberState::Absent));
        let rejoined_at = t0 + Duration::seconds(60);
        tracker.observe(&snapshot_at(
            rejoined_at,
            VOTER,
            MemberState::Learner { started: false },
        ));
        tracker.observe(&snapshot_at(
            rejoined_at + Duration::seconds(120),
            VOTER,
            MemberState::Learner { started: true },
        ));

        assert_eq!(tracker.stalled(rejoined_at + Duration::seconds(800)), None);
        let stalled = tracker.stalled(rejoined_at + Duration::seconds(901)).unwrap();
        assert_eq!(stalled.phase, RecoveryPhase::LearnerStarted);
        assert_eq!(stalled.elapsed_secs, 901);
        assert_eq!(stalled.budget_secs, 900);

        tracker.observe(&snapshot_at(rejoined_at + Duration::seconds(200), VOTER, VOTER));
        assert!(tracker.is_complete());
        assert_eq!(tracker.stalled(rejoined_at + Duration::seconds(3600)), None);
        assert!(tracker.violations().is_empty());
    }

    #[test]
    fn test_survivor_stalled_against_leader_budget() {
        let t0 = Utc::now();
        let mut tracker = tracker();
        let demoted = MemberState::Learner { started: true };
        let late = t0 + Duration::seconds(700);
        assert!(!tracker.survivor_stalled(&snapshot_at(late, demoted, VOTER)));

        tracker.mark_disruption(t0);
        assert!(!tracker.survivor_stalled(&snapshot_at(t0 + Duration::seconds(500), demoted, VOTER)));
        assert!(!tracker.survivor_stalled(&snapshot_at(late, VOTER, MemberState::Absent)));
        assert!(tracker.survivor_stalled(&snapshot_at(late, demoted, VOTER)));
    }

    #[test]
    fn test_classify_roles() {
        let voter = EtcdMember::voter(1, "master-0", "https://192.168.111.20:2380");

        assert_eq!(
            classify_roles(&[voter.clone(), EtcdMember::voter(2, "master-1", URL_1)]).unwrap(),
            ClusterRoles::Converged
        );
        assert_eq!(
            classify_roles(&[voter.clone(), EtcdMember::pending_learner(2, URL_1)]).unwrap(),
            ClusterRoles::LeaderAndLearner {
                leader: "master-0".into(),
                learner: URL_1.into(),
                learner_started: false,
            }
        );
        assert_eq!(
            classify_roles(&[voter]).unwrap(),
            ClusterRoles::SingleVoter {
                leader: "master-0".into()
            }
        );
        assert_eq!(
            classify_roles(&[EtcdMember::pending_learner(2, URL_1)]).unwrap(),
            ClusterRoles::NotStarted
        );
    }

    #[test]
    fn test_classify_two_learners_is_violation() {
        let err = classify_roles(&[
            EtcdMember::learner(1, "master-0", "https://192.168.111.20:2380"),
            EtcdMember::learner(2, "master-1", URL_1),
        ])
        .unwrap_err();
        assert!(err.is_fatal());
    }
}
