use std::collections::HashSet;

use crate::models::{Poll, PollOption, Vote};
use crate::voting::BallotPlan;

/// Several votes per voter: the stored set becomes exactly the selected set.
///
/// Options the voter keeps are left untouched so their original vote time survives;
/// deselected ones are removed and newly selected ones inserted.
pub fn plan(
    poll: &Poll,
    options: &[PollOption],
    existing: &[Vote],
    user_id: &str,
    selected: &[String],
) -> BallotPlan {
    let wanted: HashSet<&str> = selected.iter().map(String::as_str).collect();
    let held: HashSet<&str> = existing.iter().map(|v| v.option_id.as_str()).collect();

    let mut remove: Vec<String> = held
        .iter()
        .filter(|id| !wanted.contains(*id))
        .map(|id| id.to_string())
        .collect();
    remove.sort();

    // Walk the options rather than the selection so duplicates collapse and order is stable.
    let selection: Vec<String> = options
        .iter()
        .filter(|o| wanted.contains(o.id.as_str()))
        .map(|o| o.id.clone())
        .collect();

    let insert = selection
        .iter()
        .filter(|id| !held.contains(id.as_str()))
        .map(|id| Vote::new(&poll.id, id, user_id))
        .collect();

    BallotPlan {
        remove,
        insert,
        selection,
    }
}
