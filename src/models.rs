use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Event kinds written to the outbox and published to the event log.
pub mod event_kind {
    pub const WALLET_CREATED: &str = "wallet.created";
    pub const FUNDS_DEPOSITED: &str = "funds.deposited";
    pub const FUNDS_WITHDRAWN: &str = "funds.withdrawn";
    pub const TRANSFER_DEBITED: &str = "funds.transfer.debited";
    pub const TRANSFER_CREDITED: &str = "funds.transfer.credited";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "currency_code", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            "GBP" => Some(Currency::Gbp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Frozen,
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "journal_entry_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Deposit,
    Withdrawal,
    TransferDebit,
    TransferCredit,
}

impl EntryType {
    /// Whether this movement credits the primary wallet when replaying history.
    pub fn is_credit(self) -> bool {
        matches!(self, EntryType::Deposit | EntryType::TransferCredit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "journal_entry_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

/// A (user, currency) balance holder. Mutated only by the money engine
/// under a row write lock.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: String,
    pub balance: Decimal,
    pub currency: Currency,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

/// Immutable record of one balance movement. Transfers produce two,
/// linked by the transfer_id stored in metadata.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JournalEntry {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub related_wallet_id: Option<Uuid>,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub currency: Currency,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: EntryStatus,
    pub idempotency_key: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn transfer_id(&self) -> Option<Uuid> {
        self.metadata
            .get("transfer_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Insert parameters for one journal entry.
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub wallet_id: Uuid,
    pub related_wallet_id: Option<Uuid>,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub currency: Currency,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub idempotency_key: Option<String>,
    pub metadata: serde_json::Value,
}

/// Pending event publication, co-committed with its journal entry.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OutboxEntry {
    pub id: i64,
    pub event_type: String,
    pub aggregate_id: Uuid,
    pub payload: serde_json::Value,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Request / response DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateWalletRequest {
    #[validate(length(min = 3, max = 3))]
    pub currency: String,
}

/// Shared body for deposits and withdrawals.
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct MovementRequest {
    #[validate(length(min = 1, max = 64))]
    pub amount: String,
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct TransferRequest {
    pub source_wallet_id: Uuid,
    pub destination_wallet_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub amount: String,
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct TransferResult {
    pub transfer_id: Uuid,
    pub debit: JournalEntry,
    pub credit: JournalEntry,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub wallet_id: Uuid,
    pub balance: Decimal,
    pub currency: Currency,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    #[serde(rename = "type")]
    pub entry_type: Option<EntryType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Half-open creation-time range plus optional type filter.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub entry_type: Option<EntryType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub items: Vec<JournalEntry>,
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

// ---------------------------------------------------------------------------
// Event payloads (amounts formatted at 2 fractional digits)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletCreatedEvent {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub wallet_id: Uuid,
    pub user_id: String,
    pub currency: Currency,
    pub initial_balance: String,
}

/// Payload for funds.deposited and funds.withdrawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundsMovedEvent {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub wallet_id: Uuid,
    pub transaction_id: Uuid,
    pub amount: String,
    pub currency: Currency,
    pub previous_balance: String,
    pub new_balance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Payload for one leg of a transfer; balances refer to this leg's wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLegEvent {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub source_wallet_id: Uuid,
    pub destination_wallet_id: Uuid,
    pub transfer_id: Uuid,
    pub transaction_id: Uuid,
    pub amount: String,
    pub currency: Currency,
    pub previous_balance: String,
    pub new_balance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("usd"), Some(Currency::Usd));
        assert_eq!(Currency::parse(" GBP "), Some(Currency::Gbp));
        assert_eq!(Currency::parse("JPY"), None);
        assert_eq!(Currency::parse(""), None);
    }

    #[test]
    fn test_entry_type_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_value(EntryType::TransferDebit).unwrap(),
            json!("transfer_debit")
        );
        let parsed: EntryType = serde_json::from_value(json!("transfer_credit")).unwrap();
        assert_eq!(parsed, EntryType::TransferCredit);
    }

    #[test]
    fn test_entry_type_credit_direction() {
        assert!(EntryType::Deposit.is_credit());
        assert!(EntryType::TransferCredit.is_credit());
        assert!(!EntryType::Withdrawal.is_credit());
        assert!(!EntryType::TransferDebit.is_credit());
    }

    #[test]
    fn test_transfer_leg_event_shape() {
        let transfer_id = Uuid::new_v4();
        let event = TransferLegEvent {
            event_type: event_kind::TRANSFER_DEBITED.to_string(),
            timestamp: Utc::now(),
            correlation_id: "corr-1".to_string(),
            source_wallet_id: Uuid::new_v4(),
            destination_wallet_id: Uuid::new_v4(),
            transfer_id,
            transaction_id: Uuid::new_v4(),
            amount: "30.00".to_string(),
            currency: Currency::Usd,
            previous_balance: "100.00".to_string(),
            new_balance: "70.00".to_string(),
            metadata: None,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "funds.transfer.debited");
        assert_eq!(value["currency"], "USD");
        assert_eq!(value["amount"], "30.00");
        assert_eq!(value["transfer_id"], json!(transfer_id));
        // Absent metadata is omitted from the payload entirely.
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_journal_entry_transfer_id_extraction() {
        let transfer_id = Uuid::new_v4();
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            wallet_id: Uuid::new_v4(),
            related_wallet_id: Some(Uuid::new_v4()),
            entry_type: EntryType::TransferDebit,
            amount: Decimal::new(300_000, 4),
            currency: Currency::Usd,
            balance_before: Decimal::new(1_000_000, 4),
            balance_after: Decimal::new(700_000, 4),
            status: EntryStatus::Completed,
            idempotency_key: None,
            metadata: json!({ "transfer_id": transfer_id.to_string() }),
            created_at: Utc::now(),
        };

        assert_eq!(entry.transfer_id(), Some(transfer_id));
    }
}
