use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio::time::interval;

use crate::db::{Database, PollStore, StoreTransaction, TransactionalStore};
use crate::error::{AtStage, PersistenceStage, PollError};

/// Marks every poll whose expiration has passed as inactive, in one transaction.
/// Returns how many were closed.
pub async fn sweep_expired_polls<S: TransactionalStore>(store: &S, now: DateTime<Utc>) -> Result<usize, PollError> {
    let tx = store.begin().await.at(PersistenceStage::Lookup)?;
    let expired = tx
        .expired_active_polls(now)
        .await
        .at(PersistenceStage::Lookup)?;

    for poll_id in &expired {
        tx.set_poll_active(poll_id, false)
            .await
            .at(PersistenceStage::Write)?;
    }
    tx.commit().await.at(PersistenceStage::Commit)?;

    for poll_id in &expired {
        info!("Closed expired poll {}", poll_id);
    }
    Ok(expired.len())
}

pub async fn check_expired_polls_task(database: Arc<Database>, every: Duration) {
    info!("Starting background task to close expired polls every {:?}", every);
    let mut interval = interval(every);

    loop {
        interval.tick().await;
        let now = Utc::now();
        debug!("Checking for expired polls at {}", now.to_rfc3339());

        match sweep_expired_polls(database.as_ref(), now).await {
            Ok(0) => {}
            Ok(closed) => info!("Closed {} expired poll(s)", closed),
            Err(e) => error!("Failed to close expired polls: {}", e),
        }
    }
}
