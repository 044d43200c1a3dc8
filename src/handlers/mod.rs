pub mod poll;
pub mod vote;

use log::warn;

use crate::db::PollStore;
use crate::error::{AtStage, PersistenceStage, PollError};
use crate::models::Poll;
use crate::voting::tally::{self, OptionCount};

async fn load_poll<S: PollStore + ?Sized>(store: &S, poll_id: &str) -> Result<Poll, PollError> {
    store
        .get_poll(poll_id)
        .await
        .at(PersistenceStage::Lookup)?
        .ok_or(PollError::PollNotFound)
}

fn require_owner(poll: &Poll, requester_id: &str) -> Result<(), PollError> {
    if poll.created_by == requester_id {
        Ok(())
    } else {
        warn!("User {} attempted an owner-only action on poll {}", requester_id, poll.id);
        Err(PollError::Unauthorized)
    }
}

/// Rewrites every option's cached count from the poll's vote rows.
async fn recount<S: PollStore + ?Sized>(store: &S, poll_id: &str) -> Result<Vec<OptionCount>, PollError> {
    let options = store.get_options(poll_id).await.at(PersistenceStage::Recount)?;
    let votes = store.get_votes(poll_id, None).await.at(PersistenceStage::Recount)?;

    let counts = tally::count_votes(&options, &votes);
    for count in &counts {
        store
            .update_option_count(&count.option_id, count.count)
            .await
            .at(PersistenceStage::Recount)?;
    }
    Ok(counts)
}
