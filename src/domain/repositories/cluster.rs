//! Collaborator interfaces consumed by the recovery layer
//!
//! None of these are implemented by the core: the node registry, the fencing
//! authority, the etcd client and the cluster operator are external systems.
//! Every call may fail or hang; callers wrap them in a bounded timeout.

use async_trait::async_trait;

use crate::domain::entities::{
    EtcdMember, MemberId, Node, OperatorConditions, PacemakerClusterStatus,
};
use crate::error::Result;

/// Read-only access to the cluster's node registry
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// List all control-plane nodes
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Get a single node by name
    async fn get_node(&self, name: &str) -> Result<Node>;
}

/// The fencing authority's singleton status object, keyed by cluster name
#[async_trait]
pub trait FencingStatusSource: Send + Sync {
    async fn fetch_status(&self, cluster_name: &str) -> Result<PacemakerClusterStatus>;
}

/// Replicated-log membership client
#[async_trait]
pub trait EtcdClient: Send + Sync {
    async fn member_list(&self) -> Result<Vec<EtcdMember>>;

    /// Add a member; returns the member as listed right after the add
    async fn member_add(&self, peer_url: &str, as_learner: bool) -> Result<EtcdMember>;

    async fn member_remove(&self, id: MemberId) -> Result<()>;

    /// Fails with `AppError::LearnerNotInSync` until the learner has caught up
    async fn member_promote(&self, id: MemberId) -> Result<()>;
}

/// Available/Degraded/Progressing conditions of the etcd cluster operator
#[async_trait]
pub trait OperatorStatusSource: Send + Sync {
    async fn operator_conditions(&self) -> Result<OperatorConditions>;
}
