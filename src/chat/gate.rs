//! Config-driven membership gate.

use super::traits::{ChatResult, MembershipGate};
use crate::ledger::UserId;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Gate backed by a fixed member list. When disabled, everyone passes.
#[derive(Debug, Clone)]
pub struct StaticGate {
    enabled: bool,
    members: Arc<HashSet<UserId>>,
}

impl StaticGate {
    pub fn open() -> Self {
        Self {
            enabled: false,
            members: Arc::new(HashSet::new()),
        }
    }

    pub fn with_members(members: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            enabled: true,
            members: Arc::new(members.into_iter().collect()),
        }
    }
}

#[async_trait]
impl MembershipGate for StaticGate {
    async fn is_member(&self, user: &UserId) -> ChatResult<bool> {
        Ok(!self.enabled || self.members.contains(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_gate_admits_everyone() {
        assert!(StaticGate::open().is_member(&UserId::new("x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_member_list_is_enforced() {
        let gate = StaticGate::with_members([UserId::new("a")]);
        assert!(gate.is_member(&UserId::new("a")).await.unwrap());
        assert!(!gate.is_member(&UserId::new("b")).await.unwrap());
    }
}
