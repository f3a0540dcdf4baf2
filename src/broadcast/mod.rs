//! Dashboard Broadcaster
//!
//! Subscribers receive an `init` snapshot on connect, an `update` snapshot
//! every tick while at least one subscriber is registered, and a keep-alive
//! comment on their own heartbeat timer. A failed write only ever removes
//! the subscriber that failed.

mod broadcaster;
mod connection;
mod frame;
mod sink;

pub use broadcaster::{
    spawn_broadcast_worker, DashboardBroadcaster, DashboardStats, SubscriberId, SubscriberInfo,
};
pub use connection::DashboardConnection;
pub use frame::{DashboardEvent, HEARTBEAT_FRAME};
pub use sink::{ChannelSink, SubscriberSink};
