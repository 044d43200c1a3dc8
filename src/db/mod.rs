mod queries;
pub mod store;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::models::{Poll, PollOption, User, Vote};
pub use store::{PollStore, StoreError, StoreResult, StoreTransaction, TransactionalStore, VoteFilter};

pub struct Database {
    pool: SqlitePool,
}

/// Open transaction on `Database`; rolled back if dropped before `commit`.
pub struct DatabaseTx {
    tx: Mutex<Transaction<'static, Sqlite>>,
}

impl Database {
    pub async fn connect(config: &Config) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        info!("Connected to {}", config.database_url);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn conn(&self) -> StoreResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                created_by TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                allow_multiple_votes BOOLEAN NOT NULL DEFAULT FALSE,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                vote_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                option_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (poll_id, user_id, option_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE,
                FOREIGN KEY (option_id) REFERENCES poll_options(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_poll_user ON votes (poll_id, user_id)")
            .execute(pool)
            .await?;

        Ok(())
    }
}

impl DatabaseTx {
    async fn conn(&self) -> MutexGuard<'_, Transaction<'static, Sqlite>> {
        self.tx.lock().await
    }
}

#[async_trait]
impl TransactionalStore for Database {
    type Tx = DatabaseTx;

    /// Takes the write lock up front so concurrent writers wait on the busy timeout
    /// instead of failing to upgrade a read lock.
    async fn begin(&self) -> StoreResult<DatabaseTx> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(DatabaseTx { tx: Mutex::new(tx) })
    }
}

#[async_trait]
impl StoreTransaction for DatabaseTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx.into_inner().commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PollStore for Database {
    async fn get_poll(&self, poll_id: &str) -> StoreResult<Option<Poll>> {
        queries::get_poll(&mut *self.conn().await?, poll_id).await
    }

    async fn list_polls(&self, created_by: Option<&str>) -> StoreResult<Vec<Poll>> {
        queries::list_polls(&mut *self.conn().await?, created_by).await
    }

    async fn insert_poll(&self, poll: &Poll) -> StoreResult<()> {
        queries::insert_poll(&mut *self.conn().await?, poll).await
    }

    async fn update_poll(&self, poll: &Poll) -> StoreResult<()> {
        queries::update_poll(&mut *self.conn().await?, poll).await
    }

    async fn delete_poll(&self, poll_id: &str) -> StoreResult<u64> {
        queries::delete_poll(&mut *self.conn().await?, poll_id).await
    }

    async fn set_poll_active(&self, poll_id: &str, is_active: bool) -> StoreResult<()> {
        queries::set_poll_active(&mut *self.conn().await?, poll_id, is_active).await
    }

    async fn get_options(&self, poll_id: &str) -> StoreResult<Vec<PollOption>> {
        queries::get_options(&mut *self.conn().await?, poll_id).await
    }

    async fn insert_options(&self, options: &[PollOption]) -> StoreResult<()> {
        queries::insert_options(&mut *self.conn().await?, options).await
    }

    async fn update_option(&self, option: &PollOption) -> StoreResult<()> {
        queries::update_option(&mut *self.conn().await?, option).await
    }

    async fn delete_options(&self, option_ids: &[String]) -> StoreResult<()> {
        queries::delete_options(&mut *self.conn().await?, option_ids).await
    }

    async fn get_votes(&self, poll_id: &str, user_id: Option<&str>) -> StoreResult<Vec<Vote>> {
        queries::get_votes(&mut *self.conn().await?, poll_id, user_id).await
    }

    async fn insert_votes(&self, votes: &[Vote]) -> StoreResult<()> {
        queries::insert_votes(&mut *self.conn().await?, votes).await
    }

    async fn delete_votes(&self, filter: &VoteFilter) -> StoreResult<u64> {
        queries::delete_votes(&mut *self.conn().await?, filter).await
    }

    async fn update_option_count(&self, option_id: &str, count: i64) -> StoreResult<()> {
        queries::update_option_count(&mut *self.conn().await?, option_id, count).await
    }

    async fn count_votes_since(&self, poll_ids: &[String], since: DateTime<Utc>) -> StoreResult<i64> {
        queries::count_votes_since(&mut *self.conn().await?, poll_ids, since).await
    }

    async fn expired_active_polls(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        queries::expired_active_polls(&mut *self.conn().await?, now).await
    }

    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        queries::upsert_user(&mut *self.conn().await?, user).await
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        queries::get_user(&mut *self.conn().await?, user_id).await
    }
}

#[async_trait]
impl PollStore for DatabaseTx {
    async fn get_poll(&self, poll_id: &str) -> StoreResult<Option<Poll>> {
        queries::get_poll(&mut **self.conn().await, poll_id).await
    }

    async fn list_polls(&self, created_by: Option<&str>) -> StoreResult<Vec<Poll>> {
        queries::list_polls(&mut **self.conn().await, created_by).await
    }

    async fn insert_poll(&self, poll: &Poll) -> StoreResult<()> {
        queries::insert_poll(&mut **self.conn().await, poll).await
    }

    async fn update_poll(&self, poll: &Poll) -> StoreResult<()> {
        queries::update_poll(&mut **self.conn().await, poll).await
    }

    async fn delete_poll(&self, poll_id: &str) -> StoreResult<u64> {
        queries::delete_poll(&mut **self.conn().await, poll_id).await
    }

    async fn set_poll_active(&self, poll_id: &str, is_active: bool) -> StoreResult<()> {
        queries::set_poll_active(&mut **self.conn().await, poll_id, is_active).await
    }

    async fn get_options(&self, poll_id: &str) -> StoreResult<Vec<PollOption>> {
        queries::get_options(&mut **self.conn().await, poll_id).await
    }

    async fn insert_options(&self, options: &[PollOption]) -> StoreResult<()> {
        queries::insert_options(&mut **self.conn().await, options).await
    }

    async fn update_option(&self, option: &PollOption) -> StoreResult<()> {
        queries::update_option(&mut **self.conn().await, option).await
    }

    async fn delete_options(&self, option_ids: &[String]) -> StoreResult<()> {
        queries::delete_options(&mut **self.conn().await, option_ids).await
    }

    async fn get_votes(&self, poll_id: &str, user_id: Option<&str>) -> StoreResult<Vec<Vote>> {
        queries::get_votes(&mut **self.conn().await, poll_id, user_id).await
    }

    async fn insert_votes(&self, votes: &[Vote]) -> StoreResult<()> {
        queries::insert_votes(&mut **self.conn().await, votes).await
    }

    async fn delete_votes(&self, filter: &VoteFilter) -> StoreResult<u64> {
        queries::delete_votes(&mut **self.conn().await, filter).await
    }

    async fn update_option_count(&self, option_id: &str, count: i64) -> StoreResult<()> {
        queries::update_option_count(&mut **self.conn().await, option_id, count).await
    }

    async fn count_votes_since(&self, poll_ids: &[String], since: DateTime<Utc>) -> StoreResult<i64> {
        queries::count_votes_since(&mut **self.conn().await, poll_ids, since).await
    }

    async fn expired_active_polls(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        queries::expired_active_polls(&mut **self.conn().await, now).await
    }

    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        queries::upsert_user(&mut **self.conn().await, user).await
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        queries::get_user(&mut **self.conn().await, user_id).await
    }
}
