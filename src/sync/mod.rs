//! Resources kept current by authoritative fetch, live push and fallback polling.

mod live_resource;
mod resource;

pub use live_resource::{LiveResource, MountOptions, ResourceState, SyncStatus};
pub use resource::{
    Dashboard, DashboardData, Fetcher, Resource, Subscription, SubscriptionData, Versioned,
};
