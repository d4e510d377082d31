use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==================================================================================================
// Principal
// ==================================================================================================

/// Account identifier as the remote system emits it (numeric or string)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserId::Int(id) => write!(f, "{id}"),
            UserId::Str(id) => write!(f, "{id}"),
        }
    }
}

/// The authenticated principal. Only the id is guaranteed; parents and
/// older backends hand over user objects with fields missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// ==================================================================================================
// Balance
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub balance: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

// ==================================================================================================
// Transactions
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionId::Int(id) => write!(f, "{id}"),
            TransactionId::Str(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
    Spend,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// A single ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ==================================================================================================
// Request Models
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRequest {
    pub amount: i64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SpendRequest {
    pub fn new(amount: i64, description: impl Into<String>) -> Self {
        Self {
            amount,
            description: description.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCreditsRequest {
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AddCreditsRequest {
    pub fn new(amount: i64) -> Self {
        Self {
            amount,
            description: None,
            metadata: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Query parameters for the transaction history endpoint.
/// All fields are optional; the server applies its own defaults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionHistoryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransactionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl TransactionHistoryParams {
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_date_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }
}

// ==================================================================================================
// Response Models
// ==================================================================================================

/// Envelope every ledger endpoint wraps its payload in
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Failure text, preferring `message` over `error`
    pub fn error_message(&self) -> &str {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("Request failed")
    }
}

/// Mutation payload: the recorded transaction plus the post-operation balance
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionOutcome {
    pub transaction: Transaction,
    #[serde(default, alias = "updated_balance")]
    pub new_balance: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionHistory {
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_accepts_both_encodings() {
        let user: User = serde_json::from_str(r#"{"id": 7, "name": "A", "email": "a@b.co"}"#).unwrap();
        assert_eq!(user.id, UserId::Int(7));

        let user: User =
            serde_json::from_str(r#"{"id": "u-7", "name": "A", "email": "a@b.co"}"#).unwrap();
        assert_eq!(user.id, UserId::Str("u-7".to_string()));
        assert_eq!(user.id.to_string(), "u-7");
    }

    #[test]
    fn test_user_tolerates_missing_profile_fields() {
        let user: User = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(user.id, UserId::Int(42));
        assert!(user.name.is_none());
        assert!(user.email.is_none());

        // Absent fields stay off the wire when we serialize back.
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("name"));
    }

    #[test]
    fn test_transaction_accepts_camel_case_timestamp() {
        let json = r#"{
            "id": "tx-1",
            "type": "spend",
            "amount": 25,
            "createdAt": "2026-03-01T10:00:00Z"
        }"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.kind, TransactionKind::Spend);
        assert_eq!(tx.amount, 25);
        assert!(tx.description.is_none());
    }

    #[test]
    fn test_transaction_outcome_accepts_both_balance_fields() {
        let json = r#"{
            "transaction": {"id": 1, "type": "credit", "amount": 10, "created_at": "2026-03-01T10:00:00Z"},
            "new_balance": 110
        }"#;
        let outcome: TransactionOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(outcome.new_balance, Some(110));

        let json = r#"{
            "transaction": {"id": 1, "type": "credit", "amount": 10, "created_at": "2026-03-01T10:00:00Z"},
            "updated_balance": 110
        }"#;
        let outcome: TransactionOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(outcome.new_balance, Some(110));
    }

    #[test]
    fn test_history_params_serialize_only_set_fields() {
        let params = TransactionHistoryParams::default()
            .with_limit(50)
            .with_kind(TransactionKind::Refund);
        let value = serde_json::to_value(&params).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["limit"], 50);
        assert_eq!(obj["type"], "refund");
    }

    #[test]
    fn test_envelope_error_message_fallbacks() {
        let envelope: ApiEnvelope<Balance> =
            serde_json::from_str(r#"{"success": false, "error": "boom"}"#).unwrap();
        assert_eq!(envelope.error_message(), "boom");

        let envelope: ApiEnvelope<Balance> =
            serde_json::from_str(r#"{"success": false, "message": "told you", "error": "boom"}"#)
                .unwrap();
        assert_eq!(envelope.error_message(), "told you");

        let envelope: ApiEnvelope<Balance> = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert_eq!(envelope.error_message(), "Request failed");
    }
}
