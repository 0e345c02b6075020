//! Chat Platform Trait Abstractions
//!
//! The bot only talks to the platform through these traits so tests can run
//! against `MockChatClient`.

use crate::ledger::{Profile, UserId};
use async_trait::async_trait;

/// Inbound event from the chat platform.
#[derive(Debug, Clone)]
pub struct Event {
    pub sender: UserId,
    pub profile: Profile,
    pub content: EventContent,
    pub timestamp: u64,
}

impl Event {
    pub fn text(sender: &UserId, text: &str) -> Self {
        Self::new(sender, EventContent::Text(text.to_string()))
    }

    pub fn callback(sender: &UserId, data: &str) -> Self {
        Self::new(sender, EventContent::Callback(data.to_string()))
    }

    pub fn upload(sender: &UserId) -> Self {
        Self::new(sender, EventContent::Upload)
    }

    fn new(sender: &UserId, content: EventContent) -> Self {
        Self {
            sender: sender.clone(),
            profile: Profile::default(),
            content,
            timestamp: crate::ledger::unix_now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventContent {
    /// Typed message or menu tap.
    Text(String),
    /// Inline button press carrying its callback data.
    Callback(String),
    /// Photo or file upload.
    Upload,
}

/// Inline button attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Keyboard shown with a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Keyboard {
    #[default]
    None,
    /// Buttons under the message; presses arrive as callbacks.
    Inline(Vec<Vec<Button>>),
    /// Persistent menu; taps arrive as plain text.
    Menu(Vec<Vec<String>>),
}

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub text: String,
    pub keyboard: Keyboard,
}

impl Outgoing {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = keyboard;
        self
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Recipient {0} is unreachable")]
    Unreachable(UserId),

    #[error("Membership lookup failed: {0}")]
    Membership(String),

    #[error("Event source closed")]
    Closed,
}

/// Outbound/inbound transport.
#[async_trait]
pub trait ChatClient: Clone + Send + Sync + 'static {
    /// Send a direct message.
    async fn send(&self, to: &UserId, message: &Outgoing) -> ChatResult<()>;

    /// Next batch of inbound events; empty when nothing arrived.
    /// `ChatError::Closed` ends the bot loop.
    async fn receive_events(&self) -> ChatResult<Vec<Event>>;
}

/// Channel membership check used to gate user operations.
#[async_trait]
pub trait MembershipGate: Clone + Send + Sync + 'static {
    async fn is_member(&self, user: &UserId) -> ChatResult<bool>;
}
