pub mod multiple;
pub mod single;
pub mod summary;
pub mod tally;

use chrono::{DateTime, Utc};
use log::debug;

use crate::error::PollError;
use crate::models::{Poll, PollOption, Vote};

/// Vote rows to change so that a voter's stored votes match their new selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BallotPlan {
    /// Option ids whose existing vote rows by this voter are removed.
    pub remove: Vec<String>,
    /// Fresh rows to insert.
    pub insert: Vec<Vote>,
    /// The voter's selection once the plan is applied, in option order.
    pub selection: Vec<String>,
}

impl BallotPlan {
    pub fn is_noop(&self) -> bool {
        self.remove.is_empty() && self.insert.is_empty()
    }
}

/// Checks that `poll` accepts `selected` from `user_id` and works out the row changes
/// against the voter's `existing` votes.
pub fn plan_ballot(
    poll: &Poll,
    options: &[PollOption],
    existing: &[Vote],
    user_id: &str,
    selected: &[String],
    now: DateTime<Utc>,
) -> Result<BallotPlan, PollError> {
    if !poll.is_active {
        return Err(PollError::PollInactive);
    }
    if poll.is_expired(now) {
        return Err(PollError::PollExpired);
    }
    if selected.is_empty() {
        return Err(PollError::NoSelection);
    }
    if let Some(unknown) = selected.iter().find(|id| !options.iter().any(|o| o.id == **id)) {
        return Err(PollError::OptionNotFound(unknown.clone()));
    }

    let plan = if poll.allow_multiple_votes {
        multiple::plan(poll, options, existing, user_id, selected)
    } else {
        single::plan(poll, existing, user_id, selected)
    };
    debug!(
        "Ballot for poll {} by {}: remove {:?}, insert {}",
        poll.id,
        user_id,
        plan.remove,
        plan.insert.len()
    );
    Ok(plan)
}
