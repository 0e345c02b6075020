//! Mock Chat Client for Testing

use super::traits::*;
use crate::ledger::UserId;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// In-memory transport and membership gate.
#[derive(Clone, Default)]
pub struct MockChatClient {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    sent: Vec<SentMessage>,
    incoming: VecDeque<Event>,
    closed: bool,
    unreachable: HashSet<UserId>,
    members: HashSet<UserId>,
    membership_down: bool,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipient: UserId,
    pub message: Outgoing,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound event.
    pub fn push_event(&self, event: Event) {
        self.state.lock().unwrap().incoming.push_back(event);
    }

    /// Make `receive_events` report `Closed` once the queue drains.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Texts delivered to `user`, oldest first.
    pub fn texts_to(&self, user: &UserId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|m| &m.recipient == user)
            .map(|m| m.message.text.clone())
            .collect()
    }

    pub fn last_to(&self, user: &UserId) -> Option<Outgoing> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .rev()
            .find(|m| &m.recipient == user)
            .map(|m| m.message.clone())
    }

    /// Fail every delivery to `user` with a network error.
    pub fn set_unreachable(&self, user: &UserId, unreachable: bool) {
        let mut state = self.state.lock().unwrap();
        if unreachable {
            state.unreachable.insert(user.clone());
        } else {
            state.unreachable.remove(user);
        }
    }

    pub fn add_member(&self, user: &UserId) {
        self.state.lock().unwrap().members.insert(user.clone());
    }

    /// Make membership lookups fail.
    pub fn set_membership_down(&self, down: bool) {
        self.state.lock().unwrap().membership_down = down;
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn send(&self, to: &UserId, message: &Outgoing) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(to) {
            return Err(ChatError::Network(format!("no route to {}", to)));
        }
        state.sent.push(SentMessage {
            recipient: to.clone(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn receive_events(&self) -> ChatResult<Vec<Event>> {
        let mut state = self.state.lock().unwrap();
        if state.incoming.is_empty() && state.closed {
            return Err(ChatError::Closed);
        }
        Ok(state.incoming.drain(..).collect())
    }
}

#[async_trait]
impl MembershipGate for MockChatClient {
    async fn is_member(&self, user: &UserId) -> ChatResult<bool> {
        let state = self.state.lock().unwrap();
        if state.membership_down {
            return Err(ChatError::Membership("lookup unavailable".to_string()));
        }
        Ok(state.members.contains(user))
    }
}
