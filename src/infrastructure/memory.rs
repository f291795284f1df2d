//! In-memory collaborators
//!
//! Stand-ins for the node registry, the fencing authority, the etcd client
//! and the etcd operator. They hold state behind `RwLock`s and can be told to
//! become unreachable, which is how tests and dry runs inject faults.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entities::pacemaker::{node_conditions, resources};
use crate::domain::entities::{
    Condition, ConditionStatus, EtcdMember, MemberId, Node, OperatorConditions,
    PacemakerClusterStatus, PacemakerResourceStatus,
};
use crate::domain::repositories::{
    EtcdClient, FencingStatusSource, NodeRegistry, OperatorStatusSource,
};
use crate::error::{AppError, Result, SourceKind};

fn check_available(flag: &AtomicBool, kind: SourceKind) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(AppError::unavailable(kind, "connection refused"))
    }
}

pub struct InMemoryNodeRegistry {
    nodes: RwLock<BTreeMap<String, Node>>,
    available: AtomicBool,
}

impl InMemoryNodeRegistry {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: RwLock::new(nodes.into_iter().map(|n| (n.name.clone(), n)).collect()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn set_ready(&self, name: &str, ready: bool) {
        if let Some(node) = self.nodes.write().await.get_mut(name) {
            node.ready = ready;
        }
    }

    /// Simulate a reboot: the node comes back with a new boot ID.
    pub async fn reboot(&self, name: &str) {
        if let Some(node) = self.nodes.write().await.get_mut(name) {
            node.boot_id = Uuid::new_v4().to_string();
        }
    }
}

#[async_trait]
impl NodeRegistry for InMemoryNodeRegistry {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        check_available(&self.available, SourceKind::NodeRegistry)?;
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        check_available(&self.available, SourceKind::NodeRegistry)?;
        self.nodes
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("node {}", name)))
    }
}

pub struct InMemoryFencingSource {
    status: RwLock<PacemakerClusterStatus>,
    available: AtomicBool,
    /// Stamp `lastUpdated` with the current time on every fetch
    live: AtomicBool,
}

impl InMemoryFencingSource {
    pub fn new(status: PacemakerClusterStatus, live: bool) -> Self {
        Self {
            status: RwLock::new(status),
            available: AtomicBool::new(true),
            live: AtomicBool::new(live),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Stop refreshing `lastUpdated`, so the object goes stale over time.
    pub fn freeze(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub async fn set_status(&self, status: PacemakerClusterStatus) {
        *self.status.write().await = status;
    }

    pub async fn status(&self) -> PacemakerClusterStatus {
        self.status.read().await.clone()
    }

    /// Report a node online or offline, with its etcd resource following.
    pub async fn set_node_online(&self, name: &str, online: bool) {
        let (status, reason, started) = if online {
            (ConditionStatus::True, node_conditions::REASON_ONLINE, ConditionStatus::True)
        } else {
            (ConditionStatus::False, node_conditions::REASON_OFFLINE, ConditionStatus::False)
        };

        let mut cluster = self.status.write().await;
        cluster.last_updated = Utc::now();
        if let Some(node) = cluster.nodes.iter_mut().find(|n| n.node_name == name) {
            set_condition(
                &mut node.conditions,
                Condition::new(node_conditions::ONLINE, status, reason),
            );
            match node.resources.iter_mut().find(|r| r.name == resources::ETCD) {
                Some(etcd) => set_condition(
                    &mut etcd.conditions,
                    Condition::new(resources::STARTED, started, "Started"),
                ),
                None => node.resources.push(PacemakerResourceStatus {
                    name: resources::ETCD.to_string(),
                    conditions: vec![Condition::new(resources::STARTED, started, "Started")],
                }),
            }
        }
    }

    pub async fn set_node_condition(&self, name: &str, condition: Condition) {
        let mut cluster = self.status.write().await;
        cluster.last_updated = Utc::now();
        if let Some(node) = cluster.nodes.iter_mut().find(|n| n.node_name == name) {
            set_condition(&mut node.conditions, condition);
        }
    }
}

fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

#[async_trait]
impl FencingStatusSource for InMemoryFencingSource {
    async fn fetch_status(&self, _cluster_name: &str) -> Result<PacemakerClusterStatus> {
        check_available(&self.available, SourceKind::FencingAuthority)?;
        let mut status = self.status.read().await.clone();
        if self.live.load(Ordering::SeqCst) {
            status.last_updated = Utc::now();
        }
        Ok(status)
    }
}

pub struct InMemoryEtcdClient {
    members: RwLock<Vec<EtcdMember>>,
    next_id: AtomicU64,
    learner_in_sync: AtomicBool,
    available: AtomicBool,
    mutations: AtomicUsize,
}

impl InMemoryEtcdClient {
    pub fn new(members: Vec<EtcdMember>) -> Self {
        let next_id = members.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        Self {
            members: RwLock::new(members),
            next_id: AtomicU64::new(next_id),
            learner_in_sync: AtomicBool::new(true),
            available: AtomicBool::new(true),
            mutations: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a promotion would find the learner caught up.
    pub fn set_learner_in_sync(&self, in_sync: bool) {
        self.learner_in_sync.store(in_sync, Ordering::SeqCst);
    }

    /// Number of successful add/remove/promote calls.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub async fn members(&self) -> Vec<EtcdMember> {
        self.members.read().await.clone()
    }

    pub async fn set_members(&self, members: Vec<EtcdMember>) {
        *self.members.write().await = members;
    }

    /// The process behind a pending member joins and reports its name.
    pub async fn join(&self, name: &str, peer_url: &str) -> bool {
        let mut members = self.members.write().await;
        match members.iter_mut().find(|m| m.has_peer_url(peer_url)) {
            Some(member) => {
                member.name = name.to_string();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl EtcdClient for InMemoryEtcdClient {
    async fn member_list(&self) -> Result<Vec<EtcdMember>> {
        check_available(&self.available, SourceKind::EtcdClient)?;
        Ok(self.members.read().await.clone())
    }

    async fn member_add(&self, peer_url: &str, as_learner: bool) -> Result<EtcdMember> {
        check_available(&self.available, SourceKind::EtcdClient)?;
        let mut members = self.members.write().await;
        if members.iter().any(|m| m.has_peer_url(peer_url)) {
            return Err(AppError::ValidationError(format!(
                "peer URL {} already in the member list",
                peer_url
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let member = EtcdMember {
            id,
            name: String::new(),
            peer_urls: vec![peer_url.to_string()],
            is_learner: as_learner,
        };
        members.push(member.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(member)
    }

    async fn member_remove(&self, id: MemberId) -> Result<()> {
        check_available(&self.available, SourceKind::EtcdClient)?;
        let mut members = self.members.write().await;
        let before = members.len();
        members.retain(|m| m.id != id);
        if members.len() == before {
            return Err(AppError::MemberNotFound(format!("{:x}", id)));
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn member_promote(&self, id: MemberId) -> Result<()> {
        check_available(&self.available, SourceKind::EtcdClient)?;
        let mut members = self.members.write().await;
        let member = members
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AppError::MemberNotFound(format!("{:x}", id)))?;

        if !member.is_learner {
            return Err(AppError::ValidationError(format!(
                "member {} is already a voter",
                member.label()
            )));
        }
        if !member.started() || !self.learner_in_sync.load(Ordering::SeqCst) {
            return Err(AppError::LearnerNotInSync(member.label()));
        }

        member.is_learner = false;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct StaticOperatorStatus {
    conditions: RwLock<OperatorConditions>,
    available: AtomicBool,
}

impl StaticOperatorStatus {
    pub fn new(conditions: OperatorConditions) -> Self {
        Self {
            conditions: RwLock::new(conditions),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn set_conditions(&self, conditions: OperatorConditions) {
        *self.conditions.write().await = conditions;
    }
}

#[async_trait]
impl OperatorStatusSource for StaticOperatorStatus {
    async fn operator_conditions(&self) -> Result<OperatorConditions> {
        check_available(&self.available, SourceKind::OperatorStatus)?;
        Ok(self.conditions.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL_1: &str = "https://192.168.111.21:2380";

    #[tokio::test]
    async fn test_promote_requires_started_and_synced_learner() {
        let etcd = InMemoryEtcdClient::new(vec![EtcdMember::voter(1, "master-0", "https://192.168.111.20:2380")]);
        let added = etcd.member_add(URL_1, true).await.unwrap();
        assert_eq!(added.id, 2);

        assert!(matches!(
            etcd.member_promote(added.id).await,
            Err(AppError::LearnerNotInSync(_))
        ));

        assert!(etcd.join("master-1", URL_1).await);
        etcd.set_learner_in_sync(false);
        assert!(etcd.member_promote(added.id).await.is_err());

        etcd.set_learner_in_sync(true);
        etcd.member_promote(added.id).await.unwrap();
        assert!(etcd.members().await.iter().all(|m| m.is_started_voter()));
        assert_eq!(etcd.mutation_count(), 2);
    }

    #[tokio::test]
    async fn test_get_node_follows_reboot_and_readiness() {
        let registry = InMemoryNodeRegistry::new(vec![Node::new("master-0", "boot-a", true)]);

        registry.set_ready("master-0", false).await;
        registry.reboot("master-0").await;
        let node = registry.get_node("master-0").await.unwrap();
        assert!(!node.ready);
        assert_ne!(node.boot_id, "boot-a");

        assert!(matches!(
            registry.get_node("master-9").await,
            Err(AppError::NotFound(_))
        ));
        registry.set_available(false);
        assert!(registry.get_node("master-0").await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let etcd = InMemoryEtcdClient::new(vec![EtcdMember::voter(1, "master-1", URL_1)]);
        assert!(etcd.member_add(URL_1, true).await.is_err());
        assert!(matches!(
            etcd.member_remove(9).await,
            Err(AppError::MemberNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_source_errors() {
        let registry = InMemoryNodeRegistry::new(vec![Node::new("master-0", "boot-a", true)]);
        registry.set_available(false);
        let err = registry.list_nodes().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
