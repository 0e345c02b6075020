//! Destination-detail shape checks per withdrawal method.

use crate::ledger::WithdrawalMethod;

/// Longest destination detail accepted for any method.
pub const MAX_DESTINATION_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DestinationError {
    #[error("destination is empty")]
    Empty,

    #[error("destination is longer than 200 characters")]
    TooLong,

    #[error("UPI ID must contain '@' or '.', e.g. name@bank")]
    MalformedUpi,

    #[error("wallet number must be 6-15 digits")]
    MalformedWallet,
}

/// Validate and normalise (trim) a destination detail for `method`.
pub fn validate_destination(
    method: WithdrawalMethod,
    detail: &str,
) -> Result<String, DestinationError> {
    let detail = detail.trim();
    if detail.is_empty() {
        return Err(DestinationError::Empty);
    }
    if detail.chars().count() > MAX_DESTINATION_LEN {
        return Err(DestinationError::TooLong);
    }

    match method {
        WithdrawalMethod::Upi => {
            if !detail.contains('@') && !detail.contains('.') {
                return Err(DestinationError::MalformedUpi);
            }
        }
        WithdrawalMethod::Wallet => {
            let digits = detail.strip_prefix('+').unwrap_or(detail);
            if !(6..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(DestinationError::MalformedWallet);
            }
        }
        WithdrawalMethod::Fxl => {}
    }

    Ok(detail.to_string())
}
