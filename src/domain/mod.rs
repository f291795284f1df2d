//! Domain model for the two-node fencing recovery layer
//!
//! Entities are observed from external systems (node registry, etcd, the
//! fencing authority) or produced by this subsystem (health snapshots and
//! degraded-mode decisions). Repositories are the collaborator interfaces.

pub mod entities;
pub mod repositories;
