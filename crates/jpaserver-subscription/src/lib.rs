//! WebSocket subscriptions.
//!
//! ```text
//! resource write ──► SubscriptionDao::resource_changed ──► per-subscription queue
//!                                                                │
//! client ◄── WebSocket ◄── SubscriptionSession::deliver ◄── poller (every poll_interval)
//! ```
//!
//! A client binds its socket either to an existing subscription
//! (`bind Subscription/123`, answered with `ping` frames) or to search
//! criteria (`bind Patient?name=Smith`, answered with `add` frames carrying
//! each matching resource). Subscriptions created by a criteria bind live
//! only as long as the socket.

pub mod config;
pub mod dao;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod websocket;

pub use config::SubscriptionConfig;
pub use dao::{InMemorySubscriptionDao, SubscriptionDao};
pub use error::{SubscriptionError, SubscriptionResult, TransportWriteError};
pub use poller::{PollerHandle, spawn_poller};
pub use protocol::{BindTarget, ClientMessage, CloseStatus};
pub use session::{Binding, SessionState, SubscriptionSession, Transport};
pub use websocket::{ChannelTransport, Outbound, handle_subscription_socket};
