//! Core recovery logic and its ambient services

// Health monitoring, membership reconciliation and disruption gating
pub mod cluster;

// Recovery event bus
pub mod events;

// Tracing subscriber setup
pub mod logging;

pub use cluster::{ClusterHealthMonitor, DegradedModeGuard, FencingCoordinator, MembershipReconciler};
pub use events::{EventBus, RecoveryEvent};
