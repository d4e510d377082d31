// Cross-window message protocol
// An embedded session exchanges these with its parent container. Tags and
// field spellings are fixed by the parent-side contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deserialize_expiry;
use crate::models::ledger::{Transaction, User};

/// Identifies this SDK in outbound requests so parents can filter senders
pub const MESSAGE_SOURCE: &str = "credit-ledger-sdk";

/// Messages the SDK posts up to the parent container
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ChildMessage {
    #[serde(rename = "REQUEST_CREDENTIALS")]
    RequestCredentials { source: &'static str },

    #[serde(rename = "USER_CREDENTIALS")]
    UserCredentials { user: User },

    #[serde(rename = "BALANCE_UPDATE")]
    BalanceUpdate { balance: i64 },

    #[serde(rename = "OPERATION_COMPLETE")]
    OperationComplete {
        operation: &'static str,
        transaction: Transaction,
    },
}

impl ChildMessage {
    pub fn request_credentials() -> Self {
        ChildMessage::RequestCredentials {
            source: MESSAGE_SOURCE,
        }
    }
}

/// Messages a parent container sends down to the SDK.
/// Unrecognized types deserialize to `Other` and are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ParentMessage {
    #[serde(rename = "JWT_TOKEN")]
    JwtToken {
        // Defaulted so a malformed handoff still parses and can be rejected
        // as invalid rather than silently skipped
        #[serde(default)]
        token: String,
        #[serde(
            default,
            rename = "expiresAt",
            alias = "expires_at",
            deserialize_with = "deserialize_expiry"
        )]
        expires_at: Option<DateTime<Utc>>,
        #[serde(default)]
        user: Option<User>,
    },

    #[serde(rename = "AUTHENTICATION_ERROR")]
    AuthenticationError { error: String },

    #[serde(rename = "BALANCE_UPDATE")]
    BalanceUpdate { balance: i64 },

    #[serde(rename = "ERROR")]
    Error { error: String },

    #[serde(other)]
    Other,
}
