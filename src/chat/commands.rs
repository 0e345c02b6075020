//! Command, menu and callback parsing.
//!
//! Commands: /start, /admin, /cancel. Menu taps arrive as plain text
//! matching a menu label. Inline buttons carry compact callback data.

use crate::ledger::{RequestId, WithdrawalMethod};
use crate::withdrawal::Decision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register and show the menu (or the join prompt).
    Start,
    /// Moderator panel.
    Admin,
    /// Abort the active flow.
    Cancel,
    Unknown(String),
}

/// Parse a slash command. `None` if `text` is not a command at all.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    let word = text.split_whitespace().next().unwrap_or(text);
    // "/start@SomeBot" addresses a specific bot in group chats
    let name = word.split('@').next().unwrap_or(word);

    Some(match name.to_ascii_lowercase().as_str() {
        "/start" => Command::Start,
        "/admin" => Command::Admin,
        "/cancel" => Command::Cancel,
        _ => Command::Unknown(word.to_string()),
    })
}

/// Entries of the user and moderator menus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    SubmitProof,
    Balance,
    Withdraw,
    Support,
    AddBalance,
    RemoveBalance,
    AddClaims,
    Statistics,
    RecentUsers,
    MainMenu,
}

impl MenuItem {
    pub const USER: [MenuItem; 4] = [
        MenuItem::SubmitProof,
        MenuItem::Balance,
        MenuItem::Withdraw,
        MenuItem::Support,
    ];

    pub const MODERATOR: [MenuItem; 6] = [
        MenuItem::AddBalance,
        MenuItem::RemoveBalance,
        MenuItem::AddClaims,
        MenuItem::Statistics,
        MenuItem::RecentUsers,
        MenuItem::MainMenu,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MenuItem::SubmitProof => "Submit Proof",
            MenuItem::Balance => "Balance",
            MenuItem::Withdraw => "Withdraw",
            MenuItem::Support => "Support",
            MenuItem::AddBalance => "Add Balance",
            MenuItem::RemoveBalance => "Remove Balance",
            MenuItem::AddClaims => "Add Claims",
            MenuItem::Statistics => "Statistics",
            MenuItem::RecentUsers => "Recent Users",
            MenuItem::MainMenu => "Main Menu",
        }
    }

    pub fn is_moderator_only(&self) -> bool {
        Self::MODERATOR.contains(self) && *self != MenuItem::MainMenu
    }

    /// Match a menu tap, ignoring case and surrounding whitespace.
    pub fn parse(text: &str) -> Option<MenuItem> {
        let text = text.trim();
        Self::USER
            .into_iter()
            .chain(Self::MODERATOR)
            .find(|item| item.label().eq_ignore_ascii_case(text))
    }
}

/// Inline button payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    CheckJoin,
    Cancel,
    Method(WithdrawalMethod),
    Resolve { id: RequestId, decision: Decision },
}

impl Callback {
    pub fn data(&self) -> String {
        match self {
            Callback::CheckJoin => "check_join".to_string(),
            Callback::Cancel => "cancel".to_string(),
            Callback::Method(method) => format!("method:{}", method.code()),
            Callback::Resolve { id, decision } => match decision {
                Decision::Approve => format!("wd:approve:{}", id),
                Decision::Reject => format!("wd:reject:{}", id),
            },
        }
    }

    pub fn parse(data: &str) -> Option<Callback> {
        match data.trim() {
            "check_join" => return Some(Callback::CheckJoin),
            "cancel" => return Some(Callback::Cancel),
            _ => {}
        }

        let parts: Vec<&str> = data.trim().split(':').collect();
        match parts.as_slice() {
            ["method", code] => WithdrawalMethod::from_code(code).map(Callback::Method),
            ["wd", action, id] => {
                let decision = match *action {
                    "approve" => Decision::Approve,
                    "reject" => Decision::Reject,
                    _ => return None,
                };
                let id = id.parse().ok()?;
                Some(Callback::Resolve { id, decision })
            }
            _ => None,
        }
    }
}
