//! User- and moderator-facing message texts and keyboards.

use super::commands::{Callback, MenuItem};
use super::traits::{Button, Keyboard, Outgoing};
use crate::claims::{ClaimImport, ConsumeOutcome};
use crate::ledger::{
    Amount, BalanceAdjustment, BalanceChange, Statistics, UserAccount, WithdrawalMethod,
    WithdrawalRequest, WithdrawalStatus,
};
use crate::session::{InputShape, Step};
use crate::withdrawal::{Decision, Resolution, WithdrawalError, WithdrawalLimits};

/// Formats amounts with the configured currency symbol.
#[derive(Debug, Clone)]
pub struct Money {
    pub symbol: String,
}

impl Money {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }

    pub fn show(&self, amount: Amount) -> String {
        format!("{}{}", self.symbol, amount)
    }
}

fn menu(items: &[MenuItem]) -> Keyboard {
    Keyboard::Menu(
        items
            .chunks(2)
            .map(|row| row.iter().map(|item| item.label().to_string()).collect())
            .collect(),
    )
}

pub fn user_menu() -> Keyboard {
    menu(&MenuItem::USER)
}

pub fn moderator_menu() -> Keyboard {
    menu(&MenuItem::MODERATOR)
}

pub fn cancel_keyboard() -> Keyboard {
    Keyboard::Inline(vec![vec![Button::new("Cancel", Callback::Cancel.data())]])
}

pub fn method_keyboard(limits: &WithdrawalLimits, money: &Money) -> Keyboard {
    let mut rows: Vec<Vec<Button>> = WithdrawalMethod::ALL
        .into_iter()
        .map(|method| {
            vec![Button::new(
                format!("{} (min {})", method, money.show(limits.minimum(method))),
                Callback::Method(method).data(),
            )]
        })
        .collect();
    rows.push(vec![Button::new("Cancel", Callback::Cancel.data())]);
    Keyboard::Inline(rows)
}

pub fn welcome(account: &UserAccount) -> Outgoing {
    Outgoing::text(format!(
        "Welcome, {}!\n\nSubmit verified referral proofs to earn rewards and withdraw your balance.",
        account.label()
    ))
    .with_keyboard(user_menu())
}

pub fn join_prompt(join_link: &str) -> Outgoing {
    Outgoing::text(format!(
        "Please join our channel to use this bot:\n{}\n\nThen press the button below.",
        join_link
    ))
    .with_keyboard(Keyboard::Inline(vec![vec![Button::new(
        "I've joined",
        Callback::CheckJoin.data(),
    )]]))
}

pub fn moderator_panel() -> Outgoing {
    Outgoing::text("Moderator panel").with_keyboard(moderator_menu())
}

pub fn unauthorized() -> Outgoing {
    Outgoing::text("You are not authorized to do that.")
}

pub fn cancelled() -> Outgoing {
    Outgoing::text("Cancelled.").with_keyboard(user_menu())
}

pub fn nothing_to_cancel() -> Outgoing {
    Outgoing::text("Nothing to cancel.").with_keyboard(user_menu())
}

pub fn use_menu() -> Outgoing {
    Outgoing::text("Please use the menu below.").with_keyboard(user_menu())
}

pub fn session_expired() -> Outgoing {
    Outgoing::text("That session timed out. Please start again from the menu.")
        .with_keyboard(user_menu())
}

pub fn unknown_command(name: &str) -> Outgoing {
    Outgoing::text(format!("Unknown command: {}", name)).with_keyboard(user_menu())
}

pub fn step_prompt(step: Step, limits: &WithdrawalLimits, money: &Money) -> Outgoing {
    let keyboard = match step.input_shape() {
        InputShape::Choice => method_keyboard(limits, money),
        InputShape::Text => cancel_keyboard(),
    };
    Outgoing::text(step.prompt()).with_keyboard(keyboard)
}

pub fn reprompt(step: Step, message: &str, limits: &WithdrawalLimits, money: &Money) -> Outgoing {
    let mut out = step_prompt(step, limits, money);
    out.text = format!("{}\n\n{}", message, out.text);
    out
}

pub fn balance(account: &UserAccount, money: &Money) -> Outgoing {
    Outgoing::text(format!(
        "Balance: {}\nVerified proofs: {}",
        money.show(account.balance),
        account.proof_count
    ))
    .with_keyboard(user_menu())
}

pub fn support(contact: &str) -> Outgoing {
    Outgoing::text(format!("For help, contact {}", contact)).with_keyboard(user_menu())
}

pub fn withdraw_needs_balance() -> Outgoing {
    Outgoing::text("Your balance is empty. Submit proofs to earn first.").with_keyboard(user_menu())
}

pub fn submission_result(outcome: &ConsumeOutcome, money: &Money) -> Outgoing {
    let text = match outcome {
        ConsumeOutcome::Verified { amount, .. } => {
            format!("Verified! {} has been added to your balance.", money.show(*amount))
        }
        ConsumeOutcome::Rejected => {
            "Not verified. This proof does not match any open referral.".to_string()
        }
    };
    Outgoing::text(text).with_keyboard(user_menu())
}

pub fn submission_audit(
    account: &UserAccount,
    submitted: &str,
    outcome: &ConsumeOutcome,
    money: &Money,
) -> Outgoing {
    let verdict = match outcome {
        ConsumeOutcome::Verified { amount, claim_key } => {
            format!("VERIFIED ({}) +{}", claim_key, money.show(*amount))
        }
        ConsumeOutcome::Rejected => "REJECTED".to_string(),
    };
    Outgoing::text(format!(
        "New submission\nUser: {} ({})\nProof: {}\nResult: {}",
        account.label(),
        account.user_id,
        submitted,
        verdict
    ))
}

pub fn withdrawal_for_moderator(
    request: &WithdrawalRequest,
    account_label: &str,
    money: &Money,
) -> Outgoing {
    Outgoing::text(format!(
        "Withdrawal request #{}\nUser: {} ({})\nAmount: {}\nMethod: {}\nDetails: {}",
        request.id,
        account_label,
        request.user_id,
        money.show(request.amount),
        request.method,
        request.destination
    ))
    .with_keyboard(Keyboard::Inline(vec![vec![
        Button::new(
            "Approve",
            Callback::Resolve {
                id: request.id,
                decision: Decision::Approve,
            }
            .data(),
        ),
        Button::new(
            "Reject",
            Callback::Resolve {
                id: request.id,
                decision: Decision::Reject,
            }
            .data(),
        ),
    ]]))
}

pub fn withdrawal_opened(request: &WithdrawalRequest, money: &Money) -> Outgoing {
    Outgoing::text(format!(
        "Withdrawal request #{} for {} via {} submitted. You will be notified once it is processed.",
        request.id,
        money.show(request.amount),
        request.method
    ))
    .with_keyboard(user_menu())
}

pub fn withdrawal_compensated(request: &WithdrawalRequest, money: &Money) -> Outgoing {
    Outgoing::text(format!(
        "Your withdrawal could not be forwarded right now. {} has been returned to your balance. Please try again later.",
        money.show(request.amount)
    ))
    .with_keyboard(user_menu())
}

pub fn withdrawal_refused(err: &WithdrawalError) -> Outgoing {
    Outgoing::text(format!("Withdrawal refused: {}.", err)).with_keyboard(user_menu())
}

pub fn resolution_notice(request: &WithdrawalRequest, money: &Money) -> Outgoing {
    let text = match request.status {
        WithdrawalStatus::Approved => format!(
            "Your withdrawal #{} of {} has been approved.",
            request.id,
            money.show(request.amount)
        ),
        WithdrawalStatus::Rejected => format!(
            "Your withdrawal #{} was rejected. {} has been returned to your balance.",
            request.id,
            money.show(request.amount)
        ),
        WithdrawalStatus::Pending => format!("Your withdrawal #{} is pending.", request.id),
    };
    Outgoing::text(text)
}

pub fn resolution_ack(resolution: &Resolution) -> Outgoing {
    let status = match resolution.request.status {
        WithdrawalStatus::Pending => "pending",
        WithdrawalStatus::Approved => "approved",
        WithdrawalStatus::Rejected => "rejected",
    };
    if resolution.applied {
        Outgoing::text(format!("Request #{} {}.", resolution.request.id, status))
    } else {
        Outgoing::text(format!(
            "Request #{} was already {}; nothing changed.",
            resolution.request.id, status
        ))
    }
}

pub fn statistics(stats: &Statistics, money: &Money) -> Outgoing {
    Outgoing::text(format!(
        "Statistics\nUsers: {}\nTotal balance: {}\nVerified proofs: {}\nOpen claims: {} ({})\nPending withdrawals: {} ({})",
        stats.total_users,
        money.show(stats.total_balance),
        stats.total_proofs,
        stats.open_claims,
        money.show(stats.open_claim_rewards),
        stats.pending_withdrawals,
        money.show(stats.escrowed)
    ))
    .with_keyboard(moderator_menu())
}

pub fn recent_users(users: &[UserAccount], money: &Money) -> Outgoing {
    if users.is_empty() {
        return Outgoing::text("No users yet.").with_keyboard(moderator_menu());
    }
    let lines: Vec<String> = users
        .iter()
        .enumerate()
        .map(|(i, account)| {
            format!(
                "{}. {} ({}) balance {} proofs {}",
                i + 1,
                account.label(),
                account.user_id,
                money.show(account.balance),
                account.proof_count
            )
        })
        .collect();
    Outgoing::text(format!("Recent users\n{}", lines.join("\n"))).with_keyboard(moderator_menu())
}

pub fn balance_adjusted(change: &BalanceChange, money: &Money) -> Outgoing {
    Outgoing::text(format!(
        "Done. Applied {} to {}. New balance: {}",
        money.show(change.applied),
        change.user,
        money.show(change.new_balance)
    ))
    .with_keyboard(moderator_menu())
}

pub fn balance_notice(adjustment: BalanceAdjustment, change: &BalanceChange, money: &Money) -> Outgoing {
    let text = match adjustment {
        BalanceAdjustment::Credit(_) => format!(
            "{} was added to your balance. New balance: {}",
            money.show(change.applied),
            money.show(change.new_balance)
        ),
        BalanceAdjustment::Debit(_) => format!(
            "{} was deducted from your balance. New balance: {}",
            money.show(change.applied),
            money.show(change.new_balance)
        ),
    };
    Outgoing::text(text)
}

pub fn claims_imported(import: &ClaimImport, reward: Amount, money: &Money) -> Outgoing {
    Outgoing::text(format!(
        "Imported claims at {} each: {} added, {} updated. Open claims: {}",
        money.show(reward),
        import.added,
        import.updated,
        import.open_total
    ))
    .with_keyboard(moderator_menu())
}

pub fn action_failed(reason: &str) -> Outgoing {
    Outgoing::text(format!("Could not complete that: {}", reason))
}

pub fn internal_error() -> Outgoing {
    Outgoing::text("Something went wrong. Please try again.").with_keyboard(user_menu())
}
