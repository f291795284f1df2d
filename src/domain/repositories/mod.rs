pub mod cluster;

pub use cluster::{EtcdClient, FencingStatusSource, NodeRegistry, OperatorStatusSource};
