use async_trait::async_trait;

use crate::db::{PollStore, StoreResult};
use crate::error::{AtStage, PersistenceStage, PollError};
use crate::models::User;

/// Whoever owns the session for the current request.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> StoreResult<Option<User>>;
}

/// Session already resolved by the caller, e.g. from a verified cookie.
pub struct StaticSession(pub Option<User>);

#[async_trait]
impl AuthProvider for StaticSession {
    async fn current_user(&self) -> StoreResult<Option<User>> {
        Ok(self.0.clone())
    }
}

/// Resolves the signed-in user and mirrors them into the `users` table so polls and votes
/// can reference them.
pub async fn require_user<A, S>(auth: &A, store: &S) -> Result<User, PollError>
where
    A: AuthProvider + ?Sized,
    S: PollStore + ?Sized,
{
    let user = auth
        .current_user()
        .await
        .at(PersistenceStage::Lookup)?
        .ok_or(PollError::Unauthorized)?;

    store.upsert_user(&user).await.at(PersistenceStage::Write)?;
    Ok(user)
}
