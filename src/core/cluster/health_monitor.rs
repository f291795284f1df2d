//! Cluster Health Monitor
//!
//! Four independently polled sources (node registry, fencing authority,
//! etcd member list, etcd operator) each write their latest observation into
//! a shared slot. Every write reassembles an immutable
//! [`ClusterHealthSnapshot`] and publishes it through a `watch` channel, so
//! readers never lock and never see a half-built snapshot. A source that
//! fails or times out is stored as `None` and contributes "unknown".

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::fencing::{FencingCoordinator, FencingView};
use crate::config::{AppConfiguration, ClusterConfig, PollingConfig};
use crate::core::events::{EventBus, RecoveryEvent};
use crate::domain::entities::node::peer_url_for;
use crate::domain::entities::{
    ClusterHealthSnapshot, EtcdMember, FencingNodeStatus, MemberState, Node, NodeHealth,
    OperatorConditions,
};
use crate::domain::repositories::{EtcdClient, NodeRegistry, OperatorStatusSource};
use crate::error::{AppError, Result, SourceKind};

/// Latest observation of every source; `None` means unavailable.
#[derive(Debug, Clone, Default)]
pub struct SourceInputs {
    pub nodes: Option<Vec<Node>>,
    pub fencing: Option<FencingView>,
    pub members: Option<Vec<EtcdMember>>,
    pub operator: Option<OperatorConditions>,
}

/// External collaborators the monitor polls.
#[derive(Clone)]
pub struct MonitorSources {
    pub nodes: Arc<dyn NodeRegistry>,
    pub fencing: Arc<FencingCoordinator>,
    pub etcd: Arc<dyn EtcdClient>,
    pub operator: Option<Arc<dyn OperatorStatusSource>>,
}

/// Builds a snapshot from whatever the sources last reported.
pub fn assemble_snapshot(
    inputs: &SourceInputs,
    cluster: &ClusterConfig,
    now: DateTime<Utc>,
) -> ClusterHealthSnapshot {
    let mut unavailable_sources = Vec::new();
    let mut reasons = Vec::new();

    if inputs.nodes.is_none() {
        unavailable_sources.push(SourceKind::NodeRegistry);
    }
    if inputs.fencing.as_ref().map_or(true, |f| f.status.is_none()) {
        unavailable_sources.push(SourceKind::FencingAuthority);
    }
    if inputs.members.is_none() {
        unavailable_sources.push(SourceKind::EtcdClient);
    }
    if inputs.operator.is_none() {
        unavailable_sources.push(SourceKind::OperatorStatus);
    }
    for source in &unavailable_sources {
        reasons.push(format!("{} unavailable", source));
    }

    // Every node any source knows about
    let mut names: BTreeSet<String> = BTreeSet::new();
    if let Some(nodes) = &inputs.nodes {
        names.extend(nodes.iter().map(|n| n.name.clone()));
    }
    if let Some(fencing) = &inputs.fencing {
        names.extend(fencing.node_names());
    }
    if let Some(members) = &inputs.members {
        names.extend(members.iter().filter(|m| m.started()).map(|m| m.name.clone()));
    }
    if !cluster.local_node.is_empty() {
        names.insert(cluster.local_node.clone());
    }

    let nodes: BTreeMap<String, NodeHealth> = names
        .into_iter()
        .map(|name| {
            let health = node_health(&name, inputs, cluster, now);
            (name, health)
        })
        .collect();

    let (fencing_healthy, fencing_reason) = match &inputs.fencing {
        Some(view) => view.cluster_healthy(now),
        None => (false, "fencing status not observed yet".to_string()),
    };
    if !fencing_healthy && inputs.fencing.as_ref().map_or(false, |f| f.status.is_some()) {
        reasons.push(format!("fencing: {}", fencing_reason));
    }

    let available_nodes = nodes.values().filter(|n| n.is_available()).count();
    let degraded = available_nodes == 1;

    let healthy = match &inputs.members {
        Some(members) => {
            members.len() == 2
                && members.iter().all(|m| m.is_started_voter())
                && members
                    .iter()
                    .all(|m| nodes.get(&m.name).and_then(|n| n.ready) == Some(true))
        }
        None => false,
    };

    if let Some(members) = &inputs.members {
        if members.len() != cluster.expected_nodes {
            reasons.push(format!(
                "etcd has {} members, expected {}",
                members.len(),
                cluster.expected_nodes
            ));
        }
        for member in members.iter().filter(|m| !m.is_started_voter()) {
            let role = if member.is_learner { "learner" } else { "voter" };
            let state = if member.started() { "started" } else { "not started" };
            reasons.push(format!("etcd member {} is a {} {}", member.label(), state, role));
        }
    }
    for node in nodes.values() {
        match node.ready {
            Some(false) => reasons.push(format!("node {} is not Ready", node.name)),
            None if inputs.nodes.is_some() => {
                reasons.push(format!("node {} missing from node registry", node.name))
            }
            _ => {}
        }
    }
    if let Some(operator) = &inputs.operator {
        if !operator.is_healthy() {
            reasons.push(format!(
                "etcd operator available={:?} degraded={:?} {}",
                operator.available, operator.degraded, operator.message
            ));
        }
    }

    ClusterHealthSnapshot {
        taken_at: now,
        nodes,
        members: inputs.members.clone(),
        fencing_healthy,
        fencing_reason,
        operator: inputs.operator.clone(),
        healthy,
        degraded,
        available_nodes,
        expected_nodes: cluster.expected_nodes,
        reasons,
        unavailable_sources,
    }
}

fn node_health(
    name: &str,
    inputs: &SourceInputs,
    cluster: &ClusterConfig,
    now: DateTime<Utc>,
) -> NodeHealth {
    let registry_node = inputs
        .nodes
        .as_ref()
        .and_then(|nodes| nodes.iter().find(|n| n.name == name));

    let internal_ip = registry_node
        .and_then(|n| n.internal_ip)
        .or_else(|| inputs.fencing.as_ref().and_then(|f| f.node_internal_ip(name)));
    let peer_url = internal_ip.map(|ip| peer_url_for(ip, &cluster.peer_scheme, cluster.etcd_peer_port));

    let fencing = inputs
        .fencing
        .as_ref()
        .map(|view| view.node_status(name, now))
        .unwrap_or_else(|| FencingNodeStatus::unknown(name));

    let member_state = inputs
        .members
        .as_ref()
        .map(|members| MemberState::lookup(name, peer_url.as_deref(), members))
        .unwrap_or(MemberState::Unknown);

    NodeHealth {
        name: name.to_string(),
        ready: registry_node.map(|n| n.ready),
        boot_id: registry_node.map(|n| n.boot_id.clone()),
        unschedulable: registry_node.map(|n| n.unschedulable).unwrap_or(false),
        peer_url,
        fencing,
        member_state,
    }
}

#[derive(Default)]
struct MonitorState {
    inputs: SourceInputs,
    /// Last value of "fewer nodes available than expected", for transition logging
    restricted: Option<bool>,
}

pub struct ClusterHealthMonitor {
    sources: MonitorSources,
    cluster: ClusterConfig,
    polling: PollingConfig,
    state: RwLock<MonitorState>,
    snapshot_tx: watch::Sender<Arc<ClusterHealthSnapshot>>,
    events: EventBus,
}

impl ClusterHealthMonitor {
    pub fn new(sources: MonitorSources, config: &AppConfiguration, events: EventBus) -> Self {
        let initial = assemble_snapshot(&SourceInputs::default(), &config.cluster, Utc::now());
        let (snapshot_tx, _) = watch::channel(Arc::new(initial));

        Self {
            sources,
            cluster: config.cluster.clone(),
            polling: config.polling.clone(),
            state: RwLock::new(MonitorState::default()),
            snapshot_tx,
            events,
        }
    }

    /// Latest snapshot. Never blocks on a source.
    pub fn snapshot(&self) -> Arc<ClusterHealthSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterHealthSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn fencing(&self) -> &Arc<FencingCoordinator> {
        &self.sources.fencing
    }

    /// Poll every source once, concurrently, then publish a single snapshot.
    #[instrument(skip(self))]
    pub async fn refresh_once(&self) -> Arc<ClusterHealthSnapshot> {
        let (nodes, fencing, members, operator) = tokio::join!(
            self.fetch_nodes(),
            self.sources.fencing.refresh(),
            self.fetch_members(),
            self.fetch_operator(),
        );

        {
            let mut state = self.state.write().await;
            state.inputs.nodes = nodes;
            state.inputs.fencing = Some(fencing);
            state.inputs.members = members;
            state.inputs.operator = operator;
        }
        self.publish().await
    }

    pub async fn poll_nodes(&self) -> Arc<ClusterHealthSnapshot> {
        let nodes = self.fetch_nodes().await;
        self.state.write().await.inputs.nodes = nodes;
        self.publish().await
    }

    pub async fn poll_fencing(&self) -> Arc<ClusterHealthSnapshot> {
        let view = self.sources.fencing.refresh().await;
        self.state.write().await.inputs.fencing = Some(view);
        self.publish().await
    }

    pub async fn poll_members(&self) -> Arc<ClusterHealthSnapshot> {
        let members = self.fetch_members().await;
        self.state.write().await.inputs.members = members;
        self.publish().await
    }

    pub async fn poll_operator(&self) -> Arc<ClusterHealthSnapshot> {
        let operator = self.fetch_operator().await;
        self.state.write().await.inputs.operator = operator;
        self.publish().await
    }

    async fn fetch_nodes(&self) -> Option<Vec<Node>> {
        let registry = self.sources.nodes.clone();
        bounded(SourceKind::NodeRegistry, self.polling.call_timeout(), async move {
            registry.list_nodes().await
        })
        .await
    }

    async fn fetch_members(&self) -> Option<Vec<EtcdMember>> {
        let etcd = self.sources.etcd.clone();
        bounded(SourceKind::EtcdClient, self.polling.call_timeout(), async move {
            etcd.member_list().await
        })
        .await
    }

    async fn fetch_operator(&self) -> Option<OperatorConditions> {
        let operator = self.sources.operator.clone()?;
        bounded(SourceKind::OperatorStatus, self.polling.call_timeout(), async move {
            operator.operator_conditions().await
        })
        .await
    }

    async fn publish(&self) -> Arc<ClusterHealthSnapshot> {
        let mut state = self.state.write().await;
        let snapshot = Arc::new(assemble_snapshot(&state.inputs, &self.cluster, Utc::now()));
        let previous = self.snapshot_tx.send_replace(snapshot.clone());

        self.emit_node_transitions(&previous, &snapshot);

        let restricted = snapshot.is_below_expected();
        match (state.restricted, restricted) {
            (Some(false) | None, true) => {
                warn!(
                    available = snapshot.available_nodes,
                    expected = snapshot.expected_nodes,
                    reasons = ?snapshot.reasons,
                    "⚠️ Entering degraded mode"
                );
                self.events.publish(RecoveryEvent::DegradedModeEntered {
                    reason: snapshot.reasons.join("; "),
                    timestamp: snapshot.taken_at,
                });
            }
            (Some(true), false) => {
                info!("✅ Degraded mode cleared, all control-plane nodes available");
                self.events.publish(RecoveryEvent::DegradedModeCleared {
                    timestamp: snapshot.taken_at,
                });
            }
            _ => debug!(healthy = snapshot.healthy, "Snapshot unchanged in mode"),
        }
        state.restricted = Some(restricted);

        snapshot
    }

    fn emit_node_transitions(&self, previous: &ClusterHealthSnapshot, current: &ClusterHealthSnapshot) {
        for node in current.nodes.values() {
            let before = previous.node(&node.name);

            let was_available = before.map_or(false, |n| n.is_available());
            if was_available && !node.is_available() {
                let reason = if node.ready == Some(false) {
                    "node is not Ready".to_string()
                } else {
                    format!("fencing reports {:?}", node.fencing.online)
                };
                warn!(node = %node.name, reason = %reason, "Node went offline");
                self.events.publish(RecoveryEvent::NodeOffline {
                    node: node.name.clone(),
                    reason,
                    timestamp: current.taken_at,
                });
            }

            let was_failed = before.map_or(false, |n| n.fencing.is_confirmed_failed());
            if !was_failed && node.fencing.is_confirmed_failed() {
                warn!(node = %node.name, "🔌 Fencing authority confirmed node offline");
                self.events.publish(RecoveryEvent::FencingEvent {
                    node: node.name.clone(),
                    timestamp: current.taken_at,
                });
            }
        }
    }

    /// Spawn one polling loop per source. Each loop stops when `shutdown`
    /// flips to `true`.
    pub fn spawn_polling(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let polling = &self.polling;
        vec![
            self.spawn_loop("nodes", polling.node_interval_secs, shutdown.clone(), |m| async move {
                m.poll_nodes().await;
            }),
            self.spawn_loop("fencing", polling.fencing_interval_secs, shutdown.clone(), |m| async move {
                m.poll_fencing().await;
            }),
            self.spawn_loop("members", polling.member_interval_secs, shutdown.clone(), |m| async move {
                m.poll_members().await;
            }),
            self.spawn_loop("operator", polling.operator_interval_secs, shutdown, |m| async move {
                m.poll_operator().await;
            }),
        ]
    }

    fn spawn_loop<F, Fut>(
        self: &Arc<Self>,
        source: &'static str,
        interval_secs: u64,
        mut shutdown: watch::Receiver<bool>,
        poll: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(source, interval_secs, "🔄 Starting health polling loop");

            loop {
                tokio::select! {
                    _ = ticker.tick() => poll(Arc::clone(&monitor)).await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(source, "Health polling loop stopped");
        })
    }
}

/// Runs a collaborator call under `timeout`; failures become `None`.
async fn bounded<T, Fut>(source: SourceKind, timeout: Duration, call: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T>>,
{
    let result = tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| Err(AppError::timeout(format!("{} call", source), timeout)));

    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(source = %source, error = %e, "Source degraded to unknown");
            None
        }
    }
}
