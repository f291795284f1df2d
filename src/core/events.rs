//! Recovery events
//!
//! Observable record of what the recovery layer saw and did. Publishing is
//! fire-and-forget: a bus without subscribers drops events silently and a
//! lagging subscriber loses the oldest ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::entities::MemberId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEvent {
    /// Node lost its Ready condition or fencing reports it offline
    NodeOffline {
        node: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Fencing authority confirmed the node is down
    FencingEvent {
        node: String,
        timestamp: DateTime<Utc>,
    },
    MemberRemoved {
        node: String,
        member_id: MemberId,
        timestamp: DateTime<Utc>,
    },
    LearnerAdded {
        node: String,
        member_id: MemberId,
        peer_url: String,
        timestamp: DateTime<Utc>,
    },
    LearnerPromoted {
        node: String,
        member_id: MemberId,
        timestamp: DateTime<Utc>,
    },
    SafetyViolation {
        details: String,
        timestamp: DateTime<Utc>,
    },
    DisruptionRefused {
        kind: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    DegradedModeEntered {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    DegradedModeCleared {
        timestamp: DateTime<Utc>,
    },
}

impl RecoveryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RecoveryEvent::NodeOffline { .. } => "recovery.node_offline",
            RecoveryEvent::FencingEvent { .. } => "recovery.fencing_event",
            RecoveryEvent::MemberRemoved { .. } => "recovery.member_removed",
            RecoveryEvent::LearnerAdded { .. } => "recovery.learner_added",
            RecoveryEvent::LearnerPromoted { .. } => "recovery.learner_promoted",
            RecoveryEvent::SafetyViolation { .. } => "recovery.safety_violation",
            RecoveryEvent::DisruptionRefused { .. } => "recovery.disruption_refused",
            RecoveryEvent::DegradedModeEntered { .. } => "recovery.degraded_mode_entered",
            RecoveryEvent::DegradedModeCleared { .. } => "recovery.degraded_mode_cleared",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RecoveryEvent::NodeOffline { timestamp, .. }
            | RecoveryEvent::FencingEvent { timestamp, .. }
            | RecoveryEvent::MemberRemoved { timestamp, .. }
            | RecoveryEvent::LearnerAdded { timestamp, .. }
            | RecoveryEvent::LearnerPromoted { timestamp, .. }
            | RecoveryEvent::SafetyViolation { timestamp, .. }
            | RecoveryEvent::DisruptionRefused { timestamp, .. }
            | RecoveryEvent::DegradedModeEntered { timestamp, .. }
            | RecoveryEvent::DegradedModeCleared { timestamp } => *timestamp,
        }
    }
}

/// Broadcast bus for recovery events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RecoveryEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: RecoveryEvent) {
        debug!(event_type = event.event_type(), "Publishing recovery event");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_fail() {
        let bus = EventBus::default();
        bus.publish(RecoveryEvent::DegradedModeCleared { timestamp: Utc::now() });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(RecoveryEvent::FencingEvent {
            node: "master-1".into(),
            timestamp: Utc::now(),
        });
        bus.publish(RecoveryEvent::MemberRemoved {
            node: "master-1".into(),
            member_id: 2,
            timestamp: Utc::now(),
        });

        assert_eq!(rx.recv().await.unwrap().event_type(), "recovery.fencing_event");
        assert_eq!(rx.recv().await.unwrap().event_type(), "recovery.member_removed");
    }
}
