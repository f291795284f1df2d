//! Control-plane node as seen through the cluster's node registry

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// A physical or virtual control-plane host.
///
/// Owned by the node registry; this subsystem only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique, stable node name
    pub name: String,
    /// Opaque identifier that changes only across a reboot
    pub boot_id: String,
    /// Kubernetes Ready condition
    pub ready: bool,
    /// Whether the node is cordoned
    #[serde(default)]
    pub unschedulable: bool,
    /// First InternalIP address, used to derive the etcd peer URL
    #[serde(default)]
    pub internal_ip: Option<IpAddr>,
}

impl Node {
    pub fn new(name: impl Into<String>, boot_id: impl Into<String>, ready: bool) -> Self {
        Self {
            name: name.into(),
            boot_id: boot_id.into(),
            ready,
            unschedulable: false,
            internal_ip: None,
        }
    }

    pub fn with_internal_ip(mut self, ip: IpAddr) -> Self {
        self.internal_ip = Some(ip);
        self
    }

    /// Peer URL an etcd member on this node advertises, e.g. `https://10.0.0.1:2380`.
    pub fn peer_url(&self, scheme: &str, port: u16) -> Option<String> {
        self.internal_ip.map(|ip| peer_url_for(ip, scheme, port))
    }
}

/// Builds a peer URL; IPv6 hosts are bracketed.
pub fn peer_url_for(ip: IpAddr, scheme: &str, port: u16) -> String {
    format!("{}://{}", scheme, SocketAddr::new(ip, port))
}
