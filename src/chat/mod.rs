//! Chat Platform Integration
//!
//! The platform is an external collaborator reached through `ChatClient`
//! (messages in, messages out) and `MembershipGate` (channel membership).
//! `TallyBot` routes events into sessions, claims and withdrawals.

pub mod bot;
pub mod commands;
pub mod console;
pub mod gate;
pub mod messages;
pub mod mock;
pub mod retry;
pub mod traits;

pub use bot::{BotConfig, BotError, TallyBot};
pub use console::ConsoleClient;
pub use gate::StaticGate;
pub use mock::MockChatClient;
pub use retry::RetryPolicy;
pub use traits::{ChatClient, ChatError, ChatResult, Event, EventContent, MembershipGate, Outgoing};
