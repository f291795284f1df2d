//! Collaborator implementations

pub mod fixture;
pub mod memory;

pub use fixture::{ClusterFixture, InMemoryCollaborators};
pub use memory::{
    InMemoryEtcdClient, InMemoryFencingSource, InMemoryNodeRegistry, StaticOperatorStatus,
};
