// Library exports for the daemon binary and integration tests

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod live;
pub mod logging;
pub mod refresh;
pub mod session;
pub mod shutdown;
pub mod sync;
pub mod upload_queue;
