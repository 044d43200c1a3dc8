use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use crate::db::{PollStore, StoreTransaction, TransactionalStore, VoteFilter};
use crate::error::{AtStage, PersistenceStage, PollError};
use crate::handlers::{load_poll, recount, require_owner};
use crate::voting::plan_ballot;
use crate::voting::tally::{self, OptionCount};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyResult {
    pub poll_id: String,
    pub user_id: String,
    /// The voter's options after this ballot.
    pub selection: Vec<String>,
    /// Counts of every option after this ballot.
    pub counts: Vec<OptionCount>,
    /// False when the ballot matched what the voter already had.
    pub changed: bool,
}

/// Records `user_id`'s ballot on a poll and refreshes the option counts, all in one transaction.
///
/// Single-vote polls keep only the first selected option; multiple-vote polls end up with
/// exactly the selected set, so options left out of a new ballot lose this voter's vote.
pub async fn submit_vote<S: TransactionalStore>(
    store: &S,
    poll_id: &str,
    user_id: &str,
    selected: &[String],
) -> Result<TallyResult, PollError> {
    let tx = store.begin().await.at(PersistenceStage::Lookup)?;

    let poll = load_poll(&tx, poll_id).await?;
    let options = tx.get_options(poll_id).await.at(PersistenceStage::Lookup)?;
    let existing = tx
        .get_votes(poll_id, Some(user_id))
        .await
        .at(PersistenceStage::Lookup)?;

    let plan = plan_ballot(&poll, &options, &existing, user_id, selected, Utc::now())?;

    if !plan.remove.is_empty() {
        let filter = VoteFilter::voter(poll_id, user_id).options(plan.remove.clone());
        tx.delete_votes(&filter).await.at(PersistenceStage::VoteWrite)?;
    }
    if !plan.insert.is_empty() {
        tx.insert_votes(&plan.insert).await.at(PersistenceStage::VoteWrite)?;
    }

    let counts = recount(&tx, poll_id).await?;
    tx.commit().await.at(PersistenceStage::Commit)?;

    let changed = !plan.is_noop();
    if changed {
        info!(
            "Recorded vote on poll {} by {}: {} option(s) selected",
            poll_id,
            user_id,
            plan.selection.len()
        );
    }

    Ok(TallyResult {
        poll_id: poll_id.to_string(),
        user_id: user_id.to_string(),
        selection: plan.selection,
        counts,
        changed,
    })
}

/// Option ids the user currently has a vote on, oldest vote first.
pub async fn get_user_votes<S: PollStore + ?Sized>(
    store: &S,
    poll_id: &str,
    user_id: &str,
) -> Result<Vec<String>, PollError> {
    let votes = store
        .get_votes(poll_id, Some(user_id))
        .await
        .at(PersistenceStage::Lookup)?;
    Ok(votes.into_iter().map(|v| v.option_id).collect())
}

/// Rebuilds the cached option counts from the vote rows. Idempotent.
pub async fn recalculate_counts<S: TransactionalStore>(
    store: &S,
    poll_id: &str,
) -> Result<Vec<OptionCount>, PollError> {
    let tx = store.begin().await.at(PersistenceStage::Lookup)?;
    load_poll(&tx, poll_id).await?;

    let options = tx.get_options(poll_id).await.at(PersistenceStage::Lookup)?;
    let votes = tx.get_votes(poll_id, None).await.at(PersistenceStage::Lookup)?;
    let drifted = tally::stale(&options, &tally::count_votes(&options, &votes));
    if !drifted.is_empty() {
        warn!(
            "Poll {} had {} option(s) with a stale vote count",
            poll_id,
            drifted.len()
        );
    }

    let counts = recount(&tx, poll_id).await?;
    tx.commit().await.at(PersistenceStage::Commit)?;

    info!("Recalculated vote counts for poll {}", poll_id);
    Ok(counts)
}

/// Deletes every vote on the poll and zeroes its counts. Owner only; cannot be undone.
pub async fn clear_votes<S: TransactionalStore>(
    store: &S,
    poll_id: &str,
    requester_id: &str,
) -> Result<u64, PollError> {
    let tx = store.begin().await.at(PersistenceStage::Lookup)?;
    let poll = load_poll(&tx, poll_id).await?;
    require_owner(&poll, requester_id)?;

    let removed = tx
        .delete_votes(&VoteFilter::poll(poll_id))
        .await
        .at(PersistenceStage::VoteWrite)?;
    recount(&tx, poll_id).await?;
    tx.commit().await.at(PersistenceStage::Commit)?;

    info!("Cleared {} vote(s) from poll {}", removed, poll_id);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::Database;
    use crate::handlers::poll::poll_view;
    use crate::test_support::{FailAt, Flaky, file_db, memory_db, seed_poll, seed_user};

    async fn counts(db: &Database, poll_id: &str) -> Vec<i64> {
        db.get_options(poll_id)
            .await
            .unwrap()
            .iter()
            .map(|o| o.vote_count)
            .collect()
    }

    #[tokio::test]
    async fn single_vote_poll_keeps_only_latest_choice() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;

        submit_vote(&db, &poll.id, &alice.id, &[options[0].id.clone()]).await.unwrap();
        let result = submit_vote(&db, &poll.id, &alice.id, &[options[1].id.clone()]).await.unwrap();

        assert_eq!(result.selection, vec![options[1].id.clone()]);
        assert_eq!(
            get_user_votes(&db, &poll.id, &alice.id).await.unwrap(),
            vec![options[1].id.clone()]
        );
        assert_eq!(counts(&db, &poll.id).await, vec![0, 1]);
    }

    #[tokio::test]
    async fn single_vote_poll_never_holds_two_rows_per_voter() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B", "C"]).await;

        for picks in [vec![0, 1], vec![2], vec![2], vec![1, 2, 0]] {
            let selected: Vec<String> = picks.iter().map(|&i| options[i].id.clone()).collect();
            submit_vote(&db, &poll.id, &alice.id, &selected).await.unwrap();
            assert_eq!(db.get_votes(&poll.id, Some(&alice.id)).await.unwrap().len(), 1);
        }
        assert_eq!(counts(&db, &poll.id).await, vec![0, 1, 0]);
    }

    #[tokio::test]
    async fn multiple_vote_poll_replaces_selection() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, true, &["A", "B"]).await;
        let both = vec![options[0].id.clone(), options[1].id.clone()];

        submit_vote(&db, &poll.id, &alice.id, &both).await.unwrap();
        assert_eq!(counts(&db, &poll.id).await, vec![1, 1]);

        submit_vote(&db, &poll.id, &alice.id, &[options[0].id.clone()]).await.unwrap();
        assert_eq!(
            get_user_votes(&db, &poll.id, &alice.id).await.unwrap(),
            vec![options[0].id.clone()]
        );
        assert_eq!(counts(&db, &poll.id).await, vec![1, 0]);
    }

    #[tokio::test]
    async fn repeating_a_multiple_ballot_is_idempotent() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, true, &["A", "B", "C"]).await;
        let selection = vec![options[0].id.clone(), options[2].id.clone()];

        let first = submit_vote(&db, &poll.id, &alice.id, &selection).await.unwrap();
        let second = submit_vote(&db, &poll.id, &alice.id, &selection).await.unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(first.counts, second.counts);
        let mut held = get_user_votes(&db, &poll.id, &alice.id).await.unwrap();
        held.sort();
        let mut expected = selection.clone();
        expected.sort();
        assert_eq!(held, expected);
    }

    #[tokio::test]
    async fn votes_from_several_voters_add_up() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;

        for name in ["alice", "bob", "carol"] {
            let voter = seed_user(&db, name).await;
            submit_vote(&db, &poll.id, &voter.id, &[options[1].id.clone()]).await.unwrap();
        }
        assert_eq!(counts(&db, &poll.id).await, vec![0, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_voters_on_a_file_database_all_commit() {
        let (db, path) = file_db().await;
        let owner = seed_user(&db, "owner").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;
        let mut voters = Vec::new();
        for i in 0..20 {
            voters.push(seed_user(&db, &format!("voter{}", i)).await);
        }

        let db = Arc::new(db);
        let handles: Vec<_> = voters
            .into_iter()
            .enumerate()
            .map(|(i, voter)| {
                let db = Arc::clone(&db);
                let poll_id = poll.id.clone();
                let choice = options[i % 2].id.clone();
                tokio::spawn(async move { submit_vote(db.as_ref(), &poll_id, &voter.id, &[choice]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(db.get_votes(&poll.id, None).await.unwrap().len(), 20);
        assert_eq!(counts(&db, &poll.id).await, vec![10, 10]);

        db.pool().close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn rejects_ballots_that_fail_preconditions() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;

        let err = submit_vote(&db, "missing", &alice.id, &[options[0].id.clone()]).await.unwrap_err();
        assert!(matches!(err, PollError::PollNotFound));

        let err = submit_vote(&db, &poll.id, &alice.id, &[]).await.unwrap_err();
        assert!(matches!(err, PollError::NoSelection));

        db.set_poll_active(&poll.id, false).await.unwrap();
        let err = submit_vote(&db, &poll.id, &alice.id, &[options[0].id.clone()]).await.unwrap_err();
        assert!(matches!(err, PollError::PollInactive));

        assert!(db.get_votes(&poll.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_poll_rejects_votes() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (mut poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;
        poll.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        db.update_poll(&poll).await.unwrap();

        let err = submit_vote(&db, &poll.id, &alice.id, &[options[0].id.clone()]).await.unwrap_err();
        assert!(matches!(err, PollError::PollExpired));
    }

    #[tokio::test]
    async fn recount_failure_is_reported_and_rolls_back() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;

        let flaky = Flaky::new(db, FailAt::Recount);
        let err = submit_vote(&flaky, &poll.id, &alice.id, &[options[0].id.clone()])
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(PersistenceStage::Recount));

        let db = flaky.into_inner();
        assert!(db.get_votes(&poll.id, None).await.unwrap().is_empty());
        assert_eq!(counts(&db, &poll.id).await, vec![0, 0]);
    }

    #[tokio::test]
    async fn vote_write_failure_is_distinguished_from_recount() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;

        let flaky = Flaky::new(db, FailAt::VoteWrite);
        let err = submit_vote(&flaky, &poll.id, &alice.id, &[options[1].id.clone()])
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(PersistenceStage::VoteWrite));
    }

    #[tokio::test]
    async fn recalculate_repairs_drifted_counts() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;
        submit_vote(&db, &poll.id, &alice.id, &[options[1].id.clone()]).await.unwrap();

        db.update_option_count(&options[0].id, 9).await.unwrap();
        let recalculated = recalculate_counts(&db, &poll.id).await.unwrap();

        assert_eq!(recalculated.iter().map(|c| c.count).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(counts(&db, &poll.id).await, vec![0, 1]);
        assert_eq!(recalculate_counts(&db, &poll.id).await.unwrap(), recalculated);

        let view = poll_view(&db, &poll.id, Utc::now()).await.unwrap();
        assert_eq!(
            view.summary.per_option.iter().map(|o| o.count).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(view.summary.total_votes, 1);
    }

    #[tokio::test]
    async fn owner_clears_all_votes() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, true, &["A", "B"]).await;
        let both = vec![options[0].id.clone(), options[1].id.clone()];
        submit_vote(&db, &poll.id, &alice.id, &both).await.unwrap();

        assert_eq!(clear_votes(&db, &poll.id, &owner.id).await.unwrap(), 2);
        assert!(db.get_votes(&poll.id, None).await.unwrap().is_empty());
        assert_eq!(counts(&db, &poll.id).await, vec![0, 0]);
    }

    #[tokio::test]
    async fn non_owner_cannot_clear_votes() {
        let db = memory_db().await;
        let owner = seed_user(&db, "owner").await;
        let alice = seed_user(&db, "alice").await;
        let (poll, options) = seed_poll(&db, &owner, false, &["A", "B"]).await;
        submit_vote(&db, &poll.id, &alice.id, &[options[0].id.clone()]).await.unwrap();

        let err = clear_votes(&db, &poll.id, &alice.id).await.unwrap_err();
        assert!(matches!(err, PollError::Unauthorized));
        assert_eq!(db.get_votes(&poll.id, None).await.unwrap().len(), 1);
        assert_eq!(counts(&db, &poll.id).await, vec![1, 0]);
    }
}
