// Input validation
// Everything here fails fast, before a request leaves the process

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CreditError, Result};
use crate::models::ledger::{SpendRequest, TransactionHistoryParams};

// Same shape check the remote system applies: one @, no whitespace, a dot in
// the domain part
static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Longest description the ledger accepts
pub const DESCRIPTION_MAX_LEN: usize = 255;

/// Largest page the history endpoint serves
pub const HISTORY_LIMIT_MAX: u32 = 1000;

/// Checks a password-login credential pair before it is submitted
pub fn validate_login(email: &str, password: &str) -> Result<()> {
    if email.is_empty() || password.is_empty() {
        return Err(CreditError::ValidationError(
            "Email and password are required".to_string(),
        ));
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(CreditError::ValidationError(
            "Invalid email format".to_string(),
        ));
    }
    Ok(())
}

/// Credit amounts must be strictly positive
pub fn validate_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(CreditError::InvalidAmount(amount));
    }
    Ok(())
}

pub fn validate_spend_request(request: &SpendRequest) -> Result<()> {
    validate_amount(request.amount)?;
    if request.description.trim().is_empty() {
        return Err(CreditError::ValidationError(
            "Description is required".to_string(),
        ));
    }
    if request.description.len() > DESCRIPTION_MAX_LEN {
        return Err(CreditError::ValidationError(format!(
            "Description must be {DESCRIPTION_MAX_LEN} characters or less"
        )));
    }
    Ok(())
}

pub fn validate_history_params(params: &TransactionHistoryParams) -> Result<()> {
    if let Some(limit) = params.limit {
        if limit == 0 || limit > HISTORY_LIMIT_MAX {
            return Err(CreditError::ValidationError(format!(
                "Limit must be between 1 and {HISTORY_LIMIT_MAX}"
            )));
        }
    }
    if let (Some(start), Some(end)) = (params.start_date, params.end_date) {
        if start > end {
            return Err(CreditError::ValidationError(
                "Start date must be before end date".to_string(),
            ));
        }
    }
    Ok(())
}
