//! Data-access contract the poll service is written against.
//!
//! `Database` implements it over SQLite; anything else that can hold users, polls,
//! options and votes (a hosted backend, a test double) can stand in for it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Poll, PollOption, User, Vote};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt {table} row: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Selects vote rows of one poll, optionally narrowed to a voter and/or a set of options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteFilter {
    pub poll_id: String,
    pub user_id: Option<String>,
    pub option_ids: Option<Vec<String>>,
}

impl VoteFilter {
    pub fn poll(poll_id: &str) -> Self {
        Self {
            poll_id: poll_id.to_string(),
            ..Self::default()
        }
    }

    pub fn voter(poll_id: &str, user_id: &str) -> Self {
        Self {
            poll_id: poll_id.to_string(),
            user_id: Some(user_id.to_string()),
            option_ids: None,
        }
    }

    pub fn options(mut self, option_ids: Vec<String>) -> Self {
        self.option_ids = Some(option_ids);
        self
    }

    pub fn matches(&self, vote: &Vote) -> bool {
        vote.poll_id == self.poll_id
            && self.user_id.as_ref().is_none_or(|u| *u == vote.user_id)
            && self
                .option_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&vote.option_id))
    }
}

#[async_trait]
pub trait PollStore: Send + Sync {
    async fn get_poll(&self, poll_id: &str) -> StoreResult<Option<Poll>>;

    /// Newest first; all polls when `created_by` is `None`.
    async fn list_polls(&self, created_by: Option<&str>) -> StoreResult<Vec<Poll>>;

    async fn insert_poll(&self, poll: &Poll) -> StoreResult<()>;

    async fn update_poll(&self, poll: &Poll) -> StoreResult<()>;

    /// Removes the poll with its options and votes. Returns the number of polls removed.
    async fn delete_poll(&self, poll_id: &str) -> StoreResult<u64>;

    async fn set_poll_active(&self, poll_id: &str, is_active: bool) -> StoreResult<()>;

    /// Options of a poll ordered by position.
    async fn get_options(&self, poll_id: &str) -> StoreResult<Vec<PollOption>>;

    async fn insert_options(&self, options: &[PollOption]) -> StoreResult<()>;

    /// Rewrites text and position; the cached count is left alone.
    async fn update_option(&self, option: &PollOption) -> StoreResult<()>;

    async fn delete_options(&self, option_ids: &[String]) -> StoreResult<()>;

    async fn get_votes(&self, poll_id: &str, user_id: Option<&str>) -> StoreResult<Vec<Vote>>;

    async fn insert_votes(&self, votes: &[Vote]) -> StoreResult<()>;

    async fn delete_votes(&self, filter: &VoteFilter) -> StoreResult<u64>;

    async fn update_option_count(&self, option_id: &str, count: i64) -> StoreResult<()>;

    /// Votes on any of `poll_ids` created at or after `since`.
    async fn count_votes_since(&self, poll_ids: &[String], since: DateTime<Utc>) -> StoreResult<i64>;

    /// Ids of polls still flagged active whose expiration is at or before `now`.
    async fn expired_active_polls(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>>;

    async fn upsert_user(&self, user: &User) -> StoreResult<()>;

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;
}

/// A store whose writes can be grouped so they land together or not at all.
#[async_trait]
pub trait TransactionalStore: PollStore {
    type Tx: PollStore + StoreTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn commit(self) -> StoreResult<()>;
}
