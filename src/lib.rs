//! Tally - Referral Reward Ledger Bot
//!
//! A chat bot that credits users for verified referral proofs and pays
//! balances out through moderator-approved withdrawals.
//!
//! Key principles:
//! - Every ledger change goes through one locked, atomic `mutate`
//! - A claim is redeemed at most once
//! - Withdrawals escrow the balance until the moderator decides
//! - Conversation state is ephemeral (memory only, idle-expired)

pub mod chat;
pub mod claims;
pub mod ledger;
pub mod session;
pub mod withdrawal;
