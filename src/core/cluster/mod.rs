//! Two-node control-plane recovery
//!
//! The fencing adapter and node/member polling feed the health monitor; the
//! membership reconciler and the degraded-mode guard consume its snapshots.

pub mod degraded_guard;
pub mod fencing;
pub mod health_monitor;
pub mod membership;
pub mod recovery;

// Re-export commonly used types
pub use degraded_guard::{DegradedModeGuard, DisruptionKind, DisruptionPermit};
pub use fencing::{FencingCoordinator, FencingView};
pub use health_monitor::{assemble_snapshot, ClusterHealthMonitor, MonitorSources, SourceInputs};
pub use membership::{plan, MembershipReconciler, PassResult, PlannedAction, ReconcileOutcome};
pub use recovery::{classify_roles, BootIdBaseline, ClusterRoles, RecoveryPhase, RecoveryTracker};
