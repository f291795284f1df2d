//! Domain entities

pub mod health;
pub mod member;
pub mod node;
pub mod pacemaker;

pub use health::{
    ClusterHealthSnapshot, DegradedModeDecision, FencingNodeStatus, NodeHealth, OnlineCondition,
    OperatorConditions,
};
pub use member::{EtcdMember, MemberId, MemberState};
pub use node::Node;
pub use pacemaker::{
    Condition, ConditionStatus, PacemakerClusterStatus, PacemakerNodeAddress,
    PacemakerNodeStatus, PacemakerResourceStatus,
};
