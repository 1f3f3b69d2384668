//! The money engine: all balance-mutating logic plus the ownership-checked
//! read paths. Every mutation runs the same pipeline: rate limit,
//! idempotency fast path, syntactic validation, transaction, row lock(s),
//! semantic validation, balance delta, journal entry, outbox entry, commit.

use crate::config::LimitsConfig;
use crate::database::Database;
use crate::errors::{self, Result, WalletEngineError};
use crate::models::{
    event_kind, BalanceResponse, CreateWalletRequest, Currency, EntryType, FundsMovedEvent,
    HistoryFilter, HistoryPage, HistoryQuery, JournalEntry, MovementRequest, NewJournalEntry,
    TransferLegEvent, TransferRequest, TransferResult, Wallet, WalletCreatedEvent, WalletStatus,
};
use crate::money;
use crate::rate_limit::RateLimiter;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

pub struct WalletService {
    db: Arc<Database>,
    rate_limiter: Arc<RateLimiter>,
    limits: LimitsConfig,
}

impl WalletService {
    pub fn new(db: Arc<Database>, rate_limiter: Arc<RateLimiter>, limits: LimitsConfig) -> Self {
        WalletService {
            db,
            rate_limiter,
            limits,
        }
    }

    // =========================================================================
    // WALLET CREATION
    // =========================================================================

    pub async fn create_wallet(
        &self,
        caller: &str,
        request: CreateWalletRequest,
        correlation_id: &str,
    ) -> Result<Wallet> {
        validate_caller(caller)?;
        Validate::validate(&request).map_err(|e| WalletEngineError::Validation(e.to_string()))?;
        let currency = parse_currency(&request.currency)?;

        // No wallet row exists yet, so creation is gated on the user and
        // global scopes only.
        self.rate_limiter.check_creation(caller).await?;

        let mut tx = self.db.begin().await?;

        let wallet = match self.db.insert_wallet(&mut tx, caller, currency).await {
            Ok(wallet) => wallet,
            Err(ref e) if errors::is_unique_violation(e, "wallets_user_currency_key") => {
                return Err(WalletEngineError::Conflict {
                    user: caller.to_string(),
                    currency: currency.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        let payload = serde_json::to_value(WalletCreatedEvent {
            event_type: event_kind::WALLET_CREATED.to_string(),
            timestamp: Utc::now(),
            correlation_id: correlation_id.to_string(),
            wallet_id: wallet.id,
            user_id: wallet.user_id.clone(),
            currency: wallet.currency,
            initial_balance: money::event_amount(wallet.balance),
        })?;
        self.db
            .insert_outbox_entry(&mut tx, event_kind::WALLET_CREATED, wallet.id, &payload)
            .await?;

        tx.commit().await?;

        info!(
            "Created {} wallet {} for user {}",
            wallet.currency, wallet.id, wallet.user_id
        );

        Ok(wallet)
    }

    // =========================================================================
    // DEPOSIT / WITHDRAW
    // =========================================================================

    pub async fn deposit(
        &self,
        wallet_id: Uuid,
        caller: &str,
        request: MovementRequest,
        correlation_id: &str,
    ) -> Result<JournalEntry> {
        self.movement(wallet_id, caller, request, correlation_id, EntryType::Deposit)
            .await
    }

    pub async fn withdraw(
        &self,
        wallet_id: Uuid,
        caller: &str,
        request: MovementRequest,
        correlation_id: &str,
    ) -> Result<JournalEntry> {
        self.movement(
            wallet_id,
            caller,
            request,
            correlation_id,
            EntryType::Withdrawal,
        )
        .await
    }

    async fn movement(
        &self,
        wallet_id: Uuid,
        caller: &str,
        request: MovementRequest,
        correlation_id: &str,
        entry_type: EntryType,
    ) -> Result<JournalEntry> {
        validate_caller(caller)?;
        Validate::validate(&request).map_err(|e| WalletEngineError::Validation(e.to_string()))?;
        validate_metadata(&request.metadata)?;

        self.rate_limiter.check_mutation(wallet_id, caller).await?;

        // Idempotency fast path: a prior committed entry short-circuits
        // before any transaction is opened.
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.db.find_entry_by_idempotency_key(key).await? {
                info!(
                    "Idempotent replay of journal entry {} for key {}",
                    existing.id, key
                );
                return Ok(existing);
            }
        }

        let amount = money::parse_amount(&request.amount)?;

        match self
            .movement_tx(wallet_id, caller, &request, correlation_id, entry_type, amount)
            .await
        {
            Err(ref e)
                if errors::is_unique_violation(e, "journal_entries_idempotency_key_idx") =>
            {
                // Lost an idempotency race after the fast path; return the
                // winner's committed entry.
                let key = request.idempotency_key.as_deref().unwrap_or_default();
                self.db
                    .find_entry_by_idempotency_key(key)
                    .await?
                    .ok_or_else(|| {
                        WalletEngineError::Internal(
                            "idempotency conflict without a stored entry".to_string(),
                        )
                    })
            }
            other => other,
        }
    }

    async fn movement_tx(
        &self,
        wallet_id: Uuid,
        caller: &str,
        request: &MovementRequest,
        correlation_id: &str,
        entry_type: EntryType,
        amount: Decimal,
    ) -> Result<JournalEntry> {
        let mut tx = self.db.begin().await?;

        let wallet = self
            .db
            .lock_wallet(&mut tx, wallet_id)
            .await?
            .ok_or(WalletEngineError::WalletNotFound(wallet_id))?;

        ensure_owner(&wallet, caller)?;
        ensure_active(&wallet)?;
        self.check_transaction_limit(wallet.currency, amount)?;

        let balance_after = match entry_type {
            EntryType::Deposit => {
                let after = wallet.balance + amount;
                self.check_balance_limit(wallet.currency, after)?;
                after
            }
            EntryType::Withdrawal => {
                if wallet.balance < amount {
                    return Err(WalletEngineError::InsufficientFunds {
                        requested: money::event_amount(amount),
                        available: money::event_amount(wallet.balance),
                    });
                }
                wallet.balance - amount
            }
            _ => {
                return Err(WalletEngineError::Internal(
                    "movement pipeline only handles deposits and withdrawals".to_string(),
                ))
            }
        };

        self.db
            .update_wallet_balance(&mut tx, wallet.id, balance_after)
            .await?;

        let entry = self
            .db
            .insert_journal_entry(
                &mut tx,
                &NewJournalEntry {
                    wallet_id: wallet.id,
                    related_wallet_id: None,
                    entry_type,
                    amount,
                    currency: wallet.currency,
                    balance_before: wallet.balance,
                    balance_after,
                    idempotency_key: request.idempotency_key.clone(),
                    metadata: request.metadata.clone().unwrap_or_else(|| json!({})),
                },
            )
            .await?;

        let kind = if entry_type == EntryType::Deposit {
            event_kind::FUNDS_DEPOSITED
        } else {
            event_kind::FUNDS_WITHDRAWN
        };
        let payload = serde_json::to_value(FundsMovedEvent {
            event_type: kind.to_string(),
            timestamp: Utc::now(),
            correlation_id: correlation_id.to_string(),
            wallet_id: wallet.id,
            transaction_id: entry.id,
            amount: money::event_amount(amount),
            currency: wallet.currency,
            previous_balance: money::event_amount(wallet.balance),
            new_balance: money::event_amount(balance_after),
            metadata: request.metadata.clone(),
        })?;
        self.db
            .insert_outbox_entry(&mut tx, kind, entry.id, &payload)
            .await?;

        tx.commit().await?;

        info!(
            "{:?} of {} {} on wallet {} (balance {} -> {})",
            entry_type, amount, wallet.currency, wallet.id, wallet.balance, balance_after
        );

        Ok(entry)
    }

    // =========================================================================
    // TRANSFER
    // =========================================================================

    pub async fn transfer(
        &self,
        caller: &str,
        request: TransferRequest,
        correlation_id: &str,
    ) -> Result<TransferResult> {
        validate_caller(caller)?;
        Validate::validate(&request).map_err(|e| WalletEngineError::Validation(e.to_string()))?;
        validate_metadata(&request.metadata)?;

        if request.source_wallet_id == request.destination_wallet_id {
            return Err(WalletEngineError::InvalidTransfer(
                "source and destination wallets are the same".to_string(),
            ));
        }

        self.rate_limiter
            .check_mutation(request.source_wallet_id, caller)
            .await?;

        if let Some(key) = &request.idempotency_key {
            if let Some(replayed) = self.replay_transfer(key).await? {
                return Ok(replayed);
            }
        }

        let amount = money::parse_amount(&request.amount)?;

        match self.transfer_tx(caller, &request, correlation_id, amount).await {
            Err(ref e)
                if errors::is_unique_violation(e, "journal_entries_idempotency_key_idx") =>
            {
                let key = request.idempotency_key.as_deref().unwrap_or_default();
                self.replay_transfer(key).await?.ok_or_else(|| {
                    WalletEngineError::Internal(
                        "idempotency conflict without a stored transfer".to_string(),
                    )
                })
            }
            other => other,
        }
    }

    /// Resolve a previously committed transfer from its idempotency key.
    /// Both legs are looked up via the transfer_id in their metadata.
    async fn replay_transfer(&self, key: &str) -> Result<Option<TransferResult>> {
        let Some(debit) = self.db.find_entry_by_idempotency_key(key).await? else {
            return Ok(None);
        };

        if debit.entry_type != EntryType::TransferDebit {
            return Err(WalletEngineError::Validation(format!(
                "idempotency key {} was used by a non-transfer operation",
                key
            )));
        }

        let transfer_id = debit.transfer_id().ok_or_else(|| {
            WalletEngineError::Internal(format!(
                "journal entry {} is missing its transfer_id",
                debit.id
            ))
        })?;

        let legs = self.db.find_transfer_legs(transfer_id).await?;
        let credit = legs
            .into_iter()
            .find(|leg| leg.entry_type == EntryType::TransferCredit)
            .ok_or_else(|| {
                WalletEngineError::Internal(format!("transfer {} has no credit leg", transfer_id))
            })?;

        info!("Idempotent replay of transfer {} for key {}", transfer_id, key);

        Ok(Some(TransferResult {
            transfer_id,
            debit,
            credit,
        }))
    }

    async fn transfer_tx(
        &self,
        caller: &str,
        request: &TransferRequest,
        correlation_id: &str,
        amount: Decimal,
    ) -> Result<TransferResult> {
        let mut tx = self.db.begin().await?;

        // Both rows are locked in ascending id order regardless of
        // transfer direction.
        let locked = self
            .db
            .lock_wallet_pair(
                &mut tx,
                request.source_wallet_id,
                request.destination_wallet_id,
            )
            .await?;

        let source = locked
            .iter()
            .find(|w| w.id == request.source_wallet_id)
            .cloned()
            .ok_or(WalletEngineError::WalletNotFound(request.source_wallet_id))?;
        let destination = locked
            .iter()
            .find(|w| w.id == request.destination_wallet_id)
            .cloned()
            .ok_or(WalletEngineError::WalletNotFound(
                request.destination_wallet_id,
            ))?;

        // Ownership is required on the source only.
        ensure_owner(&source, caller)?;
        ensure_active(&source)?;
        ensure_active(&destination)?;

        if source.currency != destination.currency {
            return Err(WalletEngineError::CurrencyMismatch {
                source_currency: source.currency.to_string(),
                destination: destination.currency.to_string(),
            });
        }

        self.check_transaction_limit(source.currency, amount)?;

        if source.balance < amount {
            return Err(WalletEngineError::InsufficientFunds {
                requested: money::event_amount(amount),
                available: money::event_amount(source.balance),
            });
        }

        let source_after = source.balance - amount;
        let destination_after = destination.balance + amount;
        self.check_balance_limit(destination.currency, destination_after)?;

        let transfer_id = Uuid::new_v4();

        self.db
            .update_wallet_balance(&mut tx, source.id, source_after)
            .await?;
        self.db
            .update_wallet_balance(&mut tx, destination.id, destination_after)
            .await?;

        let metadata = transfer_metadata(request.metadata.as_ref(), transfer_id);

        // The idempotency key attaches to the debit leg only.
        let debit = self
            .db
            .insert_journal_entry(
                &mut tx,
                &NewJournalEntry {
                    wallet_id: source.id,
                    related_wallet_id: Some(destination.id),
                    entry_type: EntryType::TransferDebit,
                    amount,
                    currency: source.currency,
                    balance_before: source.balance,
                    balance_after: source_after,
                    idempotency_key: request.idempotency_key.clone(),
                    metadata: metadata.clone(),
                },
            )
            .await?;
        let credit = self
            .db
            .insert_journal_entry(
                &mut tx,
                &NewJournalEntry {
                    wallet_id: destination.id,
                    related_wallet_id: Some(source.id),
                    entry_type: EntryType::TransferCredit,
                    amount,
                    currency: destination.currency,
                    balance_before: destination.balance,
                    balance_after: destination_after,
                    idempotency_key: None,
                    metadata,
                },
            )
            .await?;

        let debit_payload = serde_json::to_value(TransferLegEvent {
            event_type: event_kind::TRANSFER_DEBITED.to_string(),
            timestamp: Utc::now(),
            correlation_id: correlation_id.to_string(),
            source_wallet_id: source.id,
            destination_wallet_id: destination.id,
            transfer_id,
            transaction_id: debit.id,
            amount: money::event_amount(amount),
            currency: source.currency,
            previous_balance: money::event_amount(source.balance),
            new_balance: money::event_amount(source_after),
            metadata: request.metadata.clone(),
        })?;
        self.db
            .insert_outbox_entry(&mut tx, event_kind::TRANSFER_DEBITED, transfer_id, &debit_payload)
            .await?;

        let credit_payload = serde_json::to_value(TransferLegEvent {
            event_type: event_kind::TRANSFER_CREDITED.to_string(),
            timestamp: Utc::now(),
            correlation_id: correlation_id.to_string(),
            source_wallet_id: source.id,
            destination_wallet_id: destination.id,
            transfer_id,
            transaction_id: credit.id,
            amount: money::event_amount(amount),
            currency: destination.currency,
            previous_balance: money::event_amount(destination.balance),
            new_balance: money::event_amount(destination_after),
            metadata: request.metadata.clone(),
        })?;
        self.db
            .insert_outbox_entry(
                &mut tx,
                event_kind::TRANSFER_CREDITED,
                transfer_id,
                &credit_payload,
            )
            .await?;

        tx.commit().await?;

        info!(
            "Transferred {} {} from wallet {} to wallet {} (transfer {})",
            amount, source.currency, source.id, destination.id, transfer_id
        );

        Ok(TransferResult {
            transfer_id,
            debit,
            credit,
        })
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub async fn balance(&self, wallet_id: Uuid, caller: &str) -> Result<BalanceResponse> {
        validate_caller(caller)?;

        let wallet = self
            .db
            .get_wallet(wallet_id)
            .await?
            .ok_or(WalletEngineError::WalletNotFound(wallet_id))?;
        ensure_owner(&wallet, caller)?;

        Ok(BalanceResponse {
            wallet_id: wallet.id,
            balance: wallet.balance,
            currency: wallet.currency,
            as_of: Utc::now(),
        })
    }

    pub async fn history(
        &self,
        wallet_id: Uuid,
        caller: &str,
        query: HistoryQuery,
    ) -> Result<HistoryPage> {
        validate_caller(caller)?;
        let (page, page_size) = validate_pagination(query.page, query.page_size)?;

        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from >= to {
                return Err(WalletEngineError::Validation(
                    "'from' must be earlier than 'to'".to_string(),
                ));
            }
        }

        let wallet = self
            .db
            .get_wallet(wallet_id)
            .await?
            .ok_or(WalletEngineError::WalletNotFound(wallet_id))?;
        ensure_owner(&wallet, caller)?;

        let filter = HistoryFilter {
            entry_type: query.entry_type,
            from: query.from,
            to: query.to,
        };
        let offset = (page - 1) * page_size;

        let items = self
            .db
            .list_journal_entries(wallet.id, &filter, page_size, offset)
            .await?;
        let total_items = self.db.count_journal_entries(wallet.id, &filter).await?;

        Ok(HistoryPage {
            items,
            page,
            page_size,
            total_items,
            total_pages: total_pages(total_items, page_size),
        })
    }

    // =========================================================================
    // LIMIT CHECKS
    // =========================================================================

    fn check_transaction_limit(&self, currency: Currency, amount: Decimal) -> Result<()> {
        if let Some(limit) = self.limits.max_transaction(currency) {
            if amount > limit {
                return Err(WalletEngineError::AmountExceedsLimit {
                    amount: money::event_amount(amount),
                    limit: money::event_amount(limit),
                });
            }
        }
        Ok(())
    }

    fn check_balance_limit(&self, currency: Currency, new_balance: Decimal) -> Result<()> {
        if let Some(limit) = self.limits.max_balance(currency) {
            if new_balance > limit {
                return Err(WalletEngineError::BalanceExceedsLimit {
                    new_balance: money::event_amount(new_balance),
                    limit: money::event_amount(limit),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_caller(caller: &str) -> Result<()> {
    if caller.is_empty() || caller.len() > 255 {
        return Err(WalletEngineError::Validation(
            "caller id must be 1 to 255 characters".to_string(),
        ));
    }
    Ok(())
}

fn parse_currency(raw: &str) -> Result<Currency> {
    Currency::parse(raw)
        .ok_or_else(|| WalletEngineError::Validation(format!("unsupported currency: {}", raw)))
}

fn ensure_owner(wallet: &Wallet, caller: &str) -> Result<()> {
    if wallet.user_id != caller {
        return Err(WalletEngineError::Forbidden(wallet.id));
    }
    Ok(())
}

fn ensure_active(wallet: &Wallet) -> Result<()> {
    if wallet.status != WalletStatus::Active {
        return Err(WalletEngineError::InvalidState {
            wallet_id: wallet.id,
            status: wallet.status.as_str().to_string(),
        });
    }
    Ok(())
}

fn validate_metadata(metadata: &Option<serde_json::Value>) -> Result<()> {
    if let Some(value) = metadata {
        if !value.is_object() {
            return Err(WalletEngineError::Validation(
                "metadata must be a JSON object".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_pagination(page: Option<i64>, page_size: Option<i64>) -> Result<(i64, i64)> {
    let page = page.unwrap_or(1);
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    if page < 1 {
        return Err(WalletEngineError::Validation(
            "page must be at least 1".to_string(),
        ));
    }
    if page_size < 1 || page_size > MAX_PAGE_SIZE {
        return Err(WalletEngineError::Validation(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    Ok((page, page_size))
}

fn total_pages(total_items: i64, page_size: i64) -> i64 {
    (total_items + page_size - 1) / page_size
}

/// Caller metadata with the synthesized transfer_id folded in. Both legs
/// of a transfer carry the same value.
fn transfer_metadata(user_metadata: Option<&serde_json::Value>, transfer_id: Uuid) -> serde_json::Value {
    let mut metadata = user_metadata.cloned().unwrap_or_else(|| json!({}));
    if let Some(object) = metadata.as_object_mut() {
        object.insert("transfer_id".to_string(), json!(transfer_id.to_string()));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn wallet(user: &str, status: WalletStatus) -> Wallet {
        Wallet {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            balance: dec!(100.0000),
            currency: Currency::Usd,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn test_ensure_owner() {
        let w = wallet("alice", WalletStatus::Active);
        assert!(ensure_owner(&w, "alice").is_ok());
        assert!(matches!(
            ensure_owner(&w, "bob"),
            Err(WalletEngineError::Forbidden(_))
        ));
    }

    #[test]
    fn test_ensure_active() {
        assert!(ensure_active(&wallet("alice", WalletStatus::Active)).is_ok());
        assert!(matches!(
            ensure_active(&wallet("alice", WalletStatus::Frozen)),
            Err(WalletEngineError::InvalidState { .. })
        ));
        assert!(matches!(
            ensure_active(&wallet("alice", WalletStatus::Closed)),
            Err(WalletEngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_validate_caller_bounds() {
        assert!(validate_caller("alice").is_ok());
        assert!(validate_caller("").is_err());
        assert!(validate_caller(&"x".repeat(255)).is_ok());
        assert!(validate_caller(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_validate_metadata_requires_object() {
        assert!(validate_metadata(&None).is_ok());
        assert!(validate_metadata(&Some(json!({ "note": "rent" }))).is_ok());
        assert!(validate_metadata(&Some(json!("rent"))).is_err());
        assert!(validate_metadata(&Some(json!([1, 2]))).is_err());
    }

    #[test]
    fn test_validate_pagination_defaults_and_bounds() {
        assert_eq!(validate_pagination(None, None).unwrap(), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(validate_pagination(Some(3), Some(50)).unwrap(), (3, 50));
        assert!(validate_pagination(Some(0), None).is_err());
        assert!(validate_pagination(None, Some(0)).is_err());
        assert!(validate_pagination(None, Some(101)).is_err());
        assert!(validate_pagination(None, Some(100)).is_ok());
    }

    #[test]
    fn test_total_pages_rounds_up() {
        assert_eq!(total_pages(0, 3), 0);
        assert_eq!(total_pages(5, 3), 2);
        assert_eq!(total_pages(6, 3), 2);
        assert_eq!(total_pages(7, 3), 3);
    }

    #[test]
    fn test_transfer_metadata_preserves_caller_fields() {
        let transfer_id = Uuid::new_v4();
        let merged = transfer_metadata(Some(&json!({ "note": "rent" })), transfer_id);
        assert_eq!(merged["note"], "rent");
        assert_eq!(merged["transfer_id"], transfer_id.to_string());

        let bare = transfer_metadata(None, transfer_id);
        assert_eq!(bare["transfer_id"], transfer_id.to_string());
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("USD").unwrap(), Currency::Usd);
        assert!(parse_currency("XXX").is_err());
    }
}
