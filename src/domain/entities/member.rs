//! Replicated-log (etcd) membership entities

use serde::{Deserialize, Serialize};
use url::Url;

pub type MemberId = u64;

/// The replicated log's view of a participant.
///
/// A member that was added to the member list but has not joined yet has an
/// empty `name`; it can only be matched by peer URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdMember {
    pub id: MemberId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub peer_urls: Vec<String>,
    #[serde(default)]
    pub is_learner: bool,
}

impl EtcdMember {
    pub fn voter(id: MemberId, name: impl Into<String>, peer_url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            peer_urls: vec![peer_url.into()],
            is_learner: false,
        }
    }

    pub fn learner(id: MemberId, name: impl Into<String>, peer_url: impl Into<String>) -> Self {
        Self {
            is_learner: true,
            ..Self::voter(id, name, peer_url)
        }
    }

    /// Added to the member list, process not joined yet.
    pub fn pending_learner(id: MemberId, peer_url: impl Into<String>) -> Self {
        Self::learner(id, "", peer_url)
    }

    /// True once the process has joined and reports its name.
    pub fn started(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_started_voter(&self) -> bool {
        self.started() && !self.is_learner
    }

    pub fn has_peer_url(&self, peer_url: &str) -> bool {
        self.peer_urls.iter().any(|url| same_peer(url, peer_url))
    }

    /// Display label: the name once joined, otherwise the first peer URL.
    pub fn label(&self) -> String {
        if self.started() {
            self.name.clone()
        } else {
            self.peer_urls
                .first()
                .cloned()
                .unwrap_or_else(|| format!("member-{:x}", self.id))
        }
    }
}

/// Compares peer URLs by scheme, host and port so that `https://10.0.0.1:2380`
/// and `https://10.0.0.1:2380/` are the same peer.
fn same_peer(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => a == b,
    }
}

/// A node's position in the member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum MemberState {
    /// Member list could not be fetched
    Unknown,
    /// Not in the member list
    Absent,
    Learner { started: bool },
    Voter { started: bool },
}

impl MemberState {
    /// Locates a node's member: by name first, then by peer URL for members
    /// that have not joined yet.
    pub fn lookup(node_name: &str, peer_url: Option<&str>, members: &[EtcdMember]) -> Self {
        match find_member(node_name, peer_url, members) {
            Some(member) if member.is_learner => MemberState::Learner {
                started: member.started(),
            },
            Some(member) => MemberState::Voter {
                started: member.started(),
            },
            None => MemberState::Absent,
        }
    }

    pub fn is_started_voter(&self) -> bool {
        matches!(self, MemberState::Voter { started: true })
    }

    pub fn is_learner(&self) -> bool {
        matches!(self, MemberState::Learner { .. })
    }

    pub fn is_started(&self) -> bool {
        matches!(
            self,
            MemberState::Voter { started: true } | MemberState::Learner { started: true }
        )
    }
}

pub fn find_member<'a>(
    node_name: &str,
    peer_url: Option<&str>,
    members: &'a [EtcdMember],
) -> Option<&'a EtcdMember> {
    members
        .iter()
        .find(|m| m.started() && m.name == node_name)
        .or_else(|| {
            let peer_url = peer_url?;
            members.iter().find(|m| m.has_peer_url(peer_url))
        })
}
