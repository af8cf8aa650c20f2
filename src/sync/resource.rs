use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::EndpointConfig;
use crate::error::Result;
use crate::events::{PUSH_BILLING, PUSH_DASHBOARD, PUSH_SUBSCRIPTION};

/// A server-side resource kept in sync by fetch, poll and push
pub trait Resource: Send + Sync + 'static {
    const NAME: &'static str;

    /// Push channels whose payload replaces this resource's data
    const PUSH_CHANNELS: &'static [&'static str];

    type Data: DeserializeOwned
        + Serialize
        + Clone
        + PartialEq
        + std::fmt::Debug
        + Send
        + Sync
        + 'static;

    fn endpoint(endpoints: &EndpointConfig) -> &str;

    fn accepts(channel: &str) -> bool {
        Self::PUSH_CHANNELS.contains(&channel)
    }
}

/// A datum plus the server sequence it was produced at, if the server sent one
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub data: T,
    pub sequence: Option<u64>,
}

impl<T> Versioned<T> {
    pub fn unversioned(data: T) -> Self {
        Self {
            data,
            sequence: None,
        }
    }
}

#[async_trait]
pub trait Fetcher<R: Resource>: Send + Sync {
    async fn fetch(&self, token: &str) -> Result<Versioned<R::Data>>;
}

#[derive(Debug, Clone, Copy)]
pub struct Dashboard;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardData {
    pub summary: Value,
    pub invoices: Vec<Value>,
    pub region_wise: Vec<Value>,
    /// Resource-specific extras the dashboard endpoint may add
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource for Dashboard {
    const NAME: &'static str = "dashboard";
    const PUSH_CHANNELS: &'static [&'static str] = &[PUSH_DASHBOARD];
    type Data = DashboardData;

    fn endpoint(endpoints: &EndpointConfig) -> &str {
        &endpoints.dashboard
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Subscription;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionData {
    pub subscription: Value,
    pub catalog: Value,
}

impl Resource for Subscription {
    const NAME: &'static str = "subscription";
    const PUSH_CHANNELS: &'static [&'static str] = &[PUSH_SUBSCRIPTION, PUSH_BILLING];
    type Data = SubscriptionData;

    fn endpoint(endpoints: &EndpointConfig) -> &str {
        &endpoints.subscription
    }
}
