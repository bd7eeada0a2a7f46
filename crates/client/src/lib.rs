// Realtime chat client layer: credential refresh, the event channel,
// conversation reconciliation and typing presence.

pub mod api;
pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod refresh;
pub mod typing;

pub use api::{HttpMessagingApi, MessagingApi};
pub use auth::{bind_channel, AuthSession};
pub use channel::{ChannelLink, ConnectionState, RealtimeChannel, WsTransport};
pub use config::ClientConfig;
pub use error::ClientError;
pub use reconciler::{Conversation, ConversationReconciler, SendOutcome};
pub use refresh::RefreshCoordinator;
pub use typing::{TypingMonitor, TypingReporter};
