use crate::errors::Result;
use crate::models::{
    Currency, HistoryFilter, JournalEntry, NewJournalEntry, OutboxEntry, Wallet,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;

        Ok(Database { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // =========================================================================
    // WALLETS
    // =========================================================================

    pub async fn insert_wallet(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        currency: Currency,
    ) -> Result<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (id, user_id, balance, currency, status, created_at, updated_at, version)
            VALUES ($1, $2, 0, $3, 'active', $4, $4, 1)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(currency)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await?;

        Ok(wallet)
    }

    pub async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT * FROM wallets WHERE id = $1
            "#,
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    /// Acquire a row write lock on one wallet for the rest of the transaction.
    pub async fn lock_wallet(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        wallet_id: Uuid,
    ) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT * FROM wallets WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(wallet_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(wallet)
    }

    /// Lock two wallet rows in ascending id order. The deterministic order
    /// makes the global lock order total, so opposing transfers cannot
    /// deadlock.
    pub async fn lock_wallet_pair(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        first: Uuid,
        second: Uuid,
    ) -> Result<Vec<Wallet>> {
        let mut ids = vec![first, second];
        ids.sort();

        let wallets = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT * FROM wallets WHERE id = ANY($1) ORDER BY id FOR UPDATE
            "#,
        )
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(wallets)
    }

    pub async fn update_wallet_balance(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        wallet_id: Uuid,
        new_balance: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $1, updated_at = $2, version = version + 1
            WHERE id = $3
            "#,
        )
        .bind(new_balance)
        .bind(Utc::now())
        .bind(wallet_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // =========================================================================
    // JOURNAL
    // =========================================================================

    pub async fn insert_journal_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewJournalEntry,
    ) -> Result<JournalEntry> {
        let inserted = sqlx::query_as::<_, JournalEntry>(
            r#"
            INSERT INTO journal_entries
                (id, wallet_id, related_wallet_id, entry_type, amount, currency,
                 balance_before, balance_after, status, idempotency_key, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'completed', $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.wallet_id)
        .bind(entry.related_wallet_id)
        .bind(entry.entry_type)
        .bind(entry.amount)
        .bind(entry.currency)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(entry.idempotency_key.as_deref())
        .bind(&entry.metadata)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await?;

        Ok(inserted)
    }

    /// Idempotency lookup, outside any engine transaction.
    pub async fn find_entry_by_idempotency_key(&self, key: &str) -> Result<Option<JournalEntry>> {
        let entry = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT * FROM journal_entries WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Both legs of a transfer, resolved by the transfer_id in their metadata.
    pub async fn find_transfer_legs(&self, transfer_id: Uuid) -> Result<Vec<JournalEntry>> {
        let legs = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT * FROM journal_entries
            WHERE metadata ->> 'transfer_id' = $1
            ORDER BY entry_type
            "#,
        )
        .bind(transfer_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(legs)
    }

    pub async fn list_journal_entries(
        &self,
        wallet_id: Uuid,
        filter: &HistoryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>> {
        let entries = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT * FROM journal_entries
            WHERE wallet_id = $1
              AND ($2::journal_entry_type IS NULL OR entry_type = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(wallet_id)
        .bind(filter.entry_type)
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn count_journal_entries(
        &self,
        wallet_id: Uuid,
        filter: &HistoryFilter,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM journal_entries
            WHERE wallet_id = $1
              AND ($2::journal_entry_type IS NULL OR entry_type = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            "#,
        )
        .bind(wallet_id)
        .bind(filter.entry_type)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // =========================================================================
    // OUTBOX
    // =========================================================================

    pub async fn insert_outbox_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_type: &str,
        aggregate_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO outbox_entries (event_type, aggregate_id, payload, published, created_at)
            VALUES ($1, $2, $3, FALSE, $4)
            RETURNING id
            "#,
        )
        .bind(event_type)
        .bind(aggregate_id)
        .bind(payload)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await?;

        Ok(id)
    }

    /// One FIFO batch of unpublished entries, ordered by creation sequence.
    pub async fn fetch_unpublished_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>> {
        let entries = sqlx::query_as::<_, OutboxEntry>(
            r#"
            SELECT * FROM outbox_entries
            WHERE NOT published
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Flip a set of outbox entries to published in one bulk update.
    pub async fn mark_outbox_published(&self, ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET published = TRUE, published_at = $2
            WHERE id = ANY($1) AND NOT published
            "#,
        )
        .bind(ids.to_vec())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
