// Credit Ledger SDK - library root
// Client for the credit ledger API: standalone and parent-delegated
// authentication, balance and transaction operations, and cross-window
// messaging for embedded sessions.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod http;
pub mod models;
pub mod system;
pub mod validate;

pub use auth::{Credential, OperatingMode, SessionManager, SessionState};
pub use client::ApiClient;
pub use config::{AuthMode, Config};
pub use error::{CreditError, Result};
pub use events::EventHandlers;
pub use host::{
    ChannelHost, DetachedHost, HostContext, HostEnvelope, MessageSubscription, PostedMessage,
};
pub use models::ledger::{
    AddCreditsRequest, Balance, RefundRequest, SpendRequest, Transaction, TransactionHistory,
    TransactionHistoryParams, TransactionId, TransactionKind, TransactionOutcome,
    TransactionStatus, User, UserId,
};
pub use models::messages::{ChildMessage, ParentMessage, MESSAGE_SOURCE};
pub use system::CreditSystem;
