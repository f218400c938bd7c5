//! Client SDK for the chatwire real-time event channel.
//!
//! One [`ConnectionManager`] owns the WebSocket, survives drops with a bounded
//! reconnection policy, and feeds every inbound frame through an
//! [`EventRouter`]. Stateful trackers subscribe to the router:
//!
//! - [`DeliveryTracker`]: per-message delivery status
//! - [`TypingAggregator`]: who is typing in one conversation or group
//! - [`PresenceTracker`]: online/offline and last-seen per user
//! - [`NotificationDispatcher`]: user-facing alerts, persisted per user
//!
//! Nothing in here is a process-wide singleton. The application constructs
//! each piece and passes the router/manager to the components that need it.

pub mod auth;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod frame;
pub mod id;
pub mod notify;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod transport;
pub mod typing;

pub use auth::{AuthSource, StaticToken};
pub use config::{Backoff, ClientConfig, NotificationConfig, ReconnectPolicy};
pub use connection::ConnectionManager;
pub use delivery::{DeliveryEntry, DeliveryStatus, DeliveryTracker};
pub use error::{AlertError, ConnectError, SendError, StoreError};
pub use frame::{ClientFrame, EventKind, InboundEvent};
pub use notify::{
    AlertPermission, AlertSurface, Launcher, NoAlerts, Notification, NotificationDispatcher,
    NotificationDraft, Priority, Seams, SystemLauncher,
};
pub use presence::{PresenceEntry, PresenceTracker, UserStatus};
pub use router::{EventRouter, Subscription};
pub use store::{FileStore, MemoryStore, NotificationStore};
pub use state::{ConnectionState, ConnectionStatus, Severity};
pub use transport::{Connector, WsConnector};
pub use typing::{Typist, TypingAggregator, TypingScope};
