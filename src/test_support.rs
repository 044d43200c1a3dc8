use std::env;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db::{Database, PollStore, StoreError, StoreResult, StoreTransaction, TransactionalStore, VoteFilter};
use crate::handlers::poll::create_poll;
use crate::models::{NewPoll, Poll, PollOption, User, Vote};
use uuid::Uuid;

pub async fn memory_db() -> Database {
    Database::connect(&Config::in_memory()).await.unwrap()
}

/// Fresh database file under the temp dir, for tests that need several real connections.
pub async fn file_db() -> (Database, PathBuf) {
    let path = env::temp_dir().join(format!("polly-{}.db", Uuid::new_v4()));
    let config = Config {
        database_url: format!("sqlite:{}", path.display()),
        max_connections: 5,
        ..Config::in_memory()
    };
    (Database::connect(&config).await.unwrap(), path)
}

pub async fn seed_user(db: &Database, name: &str) -> User {
    let user = User::new(&format!("{}@example.com", name), name);
    db.upsert_user(&user).await.unwrap();
    user
}

pub async fn seed_poll(
    db: &Database,
    owner: &User,
    allow_multiple_votes: bool,
    texts: &[&str],
) -> (Poll, Vec<PollOption>) {
    create_poll(
        db,
        &owner.id,
        NewPoll {
            title: "What should we build next?".to_string(),
            description: None,
            options: texts.iter().map(|t| t.to_string()).collect(),
            allow_multiple_votes,
            expires_at: None,
        },
    )
    .await
    .unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    VoteWrite,
    Recount,
    Commit,
}

/// Store wrapper that fails one kind of write.
pub struct Flaky<T> {
    inner: T,
    fail_at: FailAt,
}

impl<T> Flaky<T> {
    pub fn new(inner: T, fail_at: FailAt) -> Self {
        Self { inner, fail_at }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn check(&self, op: FailAt) -> StoreResult<()> {
        if self.fail_at == op {
            Err(StoreError::Backend(format!("injected {:?} failure", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransactionalStore for Flaky<Database> {
    type Tx = Flaky<<Database as TransactionalStore>::Tx>;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        Ok(Flaky::new(self.inner.begin().await?, self.fail_at))
    }
}

#[async_trait]
impl<T: StoreTransaction> StoreTransaction for Flaky<T> {
    async fn commit(self) -> StoreResult<()> {
        self.check(FailAt::Commit)?;
        self.inner.commit().await
    }
}

#[async_trait]
impl<T: PollStore> PollStore for Flaky<T> {
    async fn get_poll(&self, poll_id: &str) -> StoreResult<Option<Poll>> {
        self.inner.get_poll(poll_id).await
    }

    async fn list_polls(&self, created_by: Option<&str>) -> StoreResult<Vec<Poll>> {
        self.inner.list_polls(created_by).await
    }

    async fn insert_poll(&self, poll: &Poll) -> StoreResult<()> {
        self.inner.insert_poll(poll).await
    }

    async fn update_poll(&self, poll: &Poll) -> StoreResult<()> {
        self.inner.update_poll(poll).await
    }

    async fn delete_poll(&self, poll_id: &str) -> StoreResult<u64> {
        self.inner.delete_poll(poll_id).await
    }

    async fn set_poll_active(&self, poll_id: &str, is_active: bool) -> StoreResult<()> {
        self.inner.set_poll_active(poll_id, is_active).await
    }

    async fn get_options(&self, poll_id: &str) -> StoreResult<Vec<PollOption>> {
        self.inner.get_options(poll_id).await
    }

    async fn insert_options(&self, options: &[PollOption]) -> StoreResult<()> {
        self.inner.insert_options(options).await
    }

    async fn update_option(&self, option: &PollOption) -> StoreResult<()> {
        self.inner.update_option(option).await
    }

    async fn delete_options(&self, option_ids: &[String]) -> StoreResult<()> {
        self.inner.delete_options(option_ids).await
    }

    async fn get_votes(&self, poll_id: &str, user_id: Option<&str>) -> StoreResult<Vec<Vote>> {
        self.inner.get_votes(poll_id, user_id).await
    }

    async fn insert_votes(&self, votes: &[Vote]) -> StoreResult<()> {
        self.check(FailAt::VoteWrite)?;
        self.inner.insert_votes(votes).await
    }

    async fn delete_votes(&self, filter: &VoteFilter) -> StoreResult<u64> {
        self.check(FailAt::VoteWrite)?;
        self.inner.delete_votes(filter).await
    }

    async fn update_option_count(&self, option_id: &str, count: i64) -> StoreResult<()> {
        self.check(FailAt::Recount)?;
        self.inner.update_option_count(option_id, count).await
    }

    async fn count_votes_since(&self, poll_ids: &[String], since: DateTime<Utc>) -> StoreResult<i64> {
        self.inner.count_votes_since(poll_ids, since).await
    }

    async fn expired_active_polls(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        self.inner.expired_active_polls(now).await
    }

    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        self.inner.upsert_user(user).await
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.inner.get_user(user_id).await
    }
}
