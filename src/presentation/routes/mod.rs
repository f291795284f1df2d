// Route modules for different API endpoints
pub mod cluster;

// Re-export main router creation functions
pub use cluster::{api_router, cluster_router, disruption_router};
