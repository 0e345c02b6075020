//! Flow declarations: each flow kind is an ordered list of steps, each step
//! has an input shape, a validator and a prompt. Validators never mutate
//! the ledger; the terminal action is handed back to the caller.

use super::validate::is_valid_link;
use crate::claims::parse_claim_keys;
use crate::ledger::{Amount, BalanceAdjustment, UserId, WithdrawalMethod};
use crate::withdrawal::{check_draft, validate_destination, WithdrawalDraft, WithdrawalLimits};

/// Kinds of multi-step interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    SubmitProof,
    Withdraw,
    AdminAddBalance,
    AdminRemoveBalance,
    AdminBulkClaims,
}

impl FlowKind {
    pub fn steps(&self) -> &'static [Step] {
        match self {
            FlowKind::SubmitProof => &[Step::ProofLink],
            FlowKind::Withdraw => &[Step::Method, Step::Destination, Step::WithdrawAmount],
            FlowKind::AdminAddBalance | FlowKind::AdminRemoveBalance => {
                &[Step::TargetUser, Step::AdjustAmount]
            }
            FlowKind::AdminBulkClaims => &[Step::ClaimKeys, Step::ClaimReward],
        }
    }

    pub fn is_moderator_only(&self) -> bool {
        matches!(
            self,
            FlowKind::AdminAddBalance | FlowKind::AdminRemoveBalance | FlowKind::AdminBulkClaims
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlowKind::SubmitProof => "submit-proof",
            FlowKind::Withdraw => "withdraw",
            FlowKind::AdminAddBalance => "admin-add-balance",
            FlowKind::AdminRemoveBalance => "admin-remove-balance",
            FlowKind::AdminBulkClaims => "admin-bulk-claims",
        }
    }
}

/// Accepted input shape for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// Free text message.
    Text,
    /// Inline button press.
    Choice,
}

/// Raw input delivered to a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    Choice(String),
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    ProofLink,
    Method,
    Destination,
    WithdrawAmount,
    TargetUser,
    AdjustAmount,
    ClaimKeys,
    ClaimReward,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::ProofLink => "proof-link",
            Step::Method => "method",
            Step::Destination => "destination",
            Step::WithdrawAmount => "withdraw-amount",
            Step::TargetUser => "target-user",
            Step::AdjustAmount => "adjust-amount",
            Step::ClaimKeys => "claim-keys",
            Step::ClaimReward => "claim-reward",
        }
    }

    pub fn input_shape(&self) -> InputShape {
        match self {
            Step::Method => InputShape::Choice,
            _ => InputShape::Text,
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Step::ProofLink => "Send your referral link.\nExample: https://t.me/Abc?start=123456789",
            Step::Method => "Choose a withdrawal method.",
            Step::Destination => "Send your payout details.",
            Step::WithdrawAmount => "Enter the amount to withdraw.",
            Step::TargetUser => "Send the user ID.",
            Step::AdjustAmount => "Enter the amount.",
            Step::ClaimKeys => "Send the verified IDs, one per line.",
            Step::ClaimReward => "Enter the reward for each of these IDs.",
        }
    }
}

/// Ledger facts validators need; implemented over the store in production.
pub trait FlowContext {
    fn balance_of(&self, user: &UserId) -> Option<Amount>;
    fn limits(&self) -> &WithdrawalLimits;
    fn min_claim_key_len(&self) -> usize;
}

/// A validated value, merged into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Link(String),
    Method(WithdrawalMethod),
    Destination(String),
    Amount(Amount),
    Target(UserId),
    ClaimKeys(Vec<String>),
}

/// Values collected so far in a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    pub link: Option<String>,
    pub method: Option<WithdrawalMethod>,
    pub destination: Option<String>,
    pub amount: Option<Amount>,
    pub target: Option<UserId>,
    pub claim_keys: Vec<String>,
}

impl Collected {
    pub fn merge(&mut self, field: Field) {
        match field {
            Field::Link(link) => self.link = Some(link),
            Field::Method(method) => self.method = Some(method),
            Field::Destination(destination) => self.destination = Some(destination),
            Field::Amount(amount) => self.amount = Some(amount),
            Field::Target(target) => self.target = Some(target),
            Field::ClaimKeys(keys) => self.claim_keys = keys,
        }
    }
}

/// Side-effecting action produced by a completed flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowAction {
    SubmitProof {
        link: String,
    },
    Withdraw(WithdrawalDraft),
    AdjustBalance {
        target: UserId,
        adjustment: BalanceAdjustment,
    },
    AddClaims {
        keys: Vec<String>,
        reward: Amount,
    },
}

fn expect_text(input: &Input) -> Result<&str, String> {
    match input {
        Input::Text(text) => Ok(text.trim()),
        Input::Choice(_) => Err("Please type your answer.".to_string()),
        Input::Upload => Err("Please send text, not a file.".to_string()),
    }
}

fn parse_amount(text: &str) -> Result<Amount, String> {
    text.parse::<Amount>()
        .map_err(|e| format!("Invalid amount: {}.", e))
}

fn positive_amount(text: &str) -> Result<Amount, String> {
    let amount = parse_amount(text)?;
    if amount.is_zero() {
        return Err("Amount must be positive.".to_string());
    }
    Ok(amount)
}

/// Run `step`'s validator. `Err` carries the re-prompt message.
pub fn validate(
    step: Step,
    input: &Input,
    user: &UserId,
    collected: &Collected,
    ctx: &dyn FlowContext,
) -> Result<Field, String> {
    match step {
        Step::ProofLink => {
            let link = expect_text(input)?;
            if !is_valid_link(link) {
                return Err(
                    "Invalid link format. Send a valid referral link, e.g. https://t.me/Abc?start=123456789"
                        .to_string(),
                );
            }
            Ok(Field::Link(link.to_string()))
        }
        Step::Method => {
            let code = match input {
                Input::Choice(code) => code.as_str(),
                // typed method names are accepted too
                Input::Text(text) => text.trim(),
                Input::Upload => return Err("Please pick a method.".to_string()),
            };
            WithdrawalMethod::from_code(code)
                .map(Field::Method)
                .ok_or_else(|| "Unknown method. Please pick one of the buttons.".to_string())
        }
        Step::Destination => {
            let text = expect_text(input)?;
            let method = collected.method.ok_or("Choose a method first.")?;
            validate_destination(method, text)
                .map(Field::Destination)
                .map_err(|e| format!("Invalid details: {}.", e))
        }
        Step::WithdrawAmount => {
            let amount = parse_amount(expect_text(input)?)?;
            let method = collected.method.ok_or("Choose a method first.")?;
            let balance = ctx.balance_of(user).unwrap_or(Amount::ZERO);
            let draft = WithdrawalDraft {
                user: user.clone(),
                method,
                destination: collected.destination.clone().unwrap_or_default(),
                amount,
            };
            check_draft(&draft, balance, ctx.limits()).map_err(|e| format!("{}.", e))?;
            Ok(Field::Amount(amount))
        }
        Step::TargetUser => {
            let id = UserId::new(expect_text(input)?);
            if ctx.balance_of(&id).is_none() {
                return Err(format!("User {} not found. Send another ID.", id));
            }
            Ok(Field::Target(id))
        }
        Step::AdjustAmount => positive_amount(expect_text(input)?).map(Field::Amount),
        Step::ClaimKeys => {
            let keys = parse_claim_keys(expect_text(input)?, ctx.min_claim_key_len());
            if keys.is_empty() {
                return Err("No valid IDs found. Try again.".to_string());
            }
            Ok(Field::ClaimKeys(keys))
        }
        Step::ClaimReward => parse_amount(expect_text(input)?).map(Field::Amount),
    }
}

/// Build the terminal action once every step has validated.
pub fn finish(kind: FlowKind, user: &UserId, collected: Collected) -> Option<FlowAction> {
    match kind {
        FlowKind::SubmitProof => Some(FlowAction::SubmitProof {
            link: collected.link?,
        }),
        FlowKind::Withdraw => Some(FlowAction::Withdraw(WithdrawalDraft {
            user: user.clone(),
            method: collected.method?,
            destination: collected.destination?,
            amount: collected.amount?,
        })),
        FlowKind::AdminAddBalance => Some(FlowAction::AdjustBalance {
            target: collected.target?,
            adjustment: BalanceAdjustment::Credit(collected.amount?),
        }),
        FlowKind::AdminRemoveBalance => Some(FlowAction::AdjustBalance {
            target: collected.target?,
            adjustment: BalanceAdjustment::Debit(collected.amount?),
        }),
        FlowKind::AdminBulkClaims => {
            if collected.claim_keys.is_empty() {
                return None;
            }
            Some(FlowAction::AddClaims {
                keys: collected.claim_keys,
                reward: collected.amount?,
            })
        }
    }
}
