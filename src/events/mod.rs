mod bus;
mod types;

pub use bus::{Envelope, EventBus, EventReceiver};
pub use types::{
    EventSequence, LiveEvent, QueueEvent, PUSH_BILLING, PUSH_DASHBOARD, PUSH_SUBSCRIPTION,
};
