use crate::models::{Poll, Vote};
use crate::voting::BallotPlan;

/// One vote per voter: the first selected option replaces whatever the voter had before.
/// An empty selection plans nothing.
pub fn plan(poll: &Poll, existing: &[Vote], user_id: &str, selected: &[String]) -> BallotPlan {
    let Some(choice) = selected.first() else {
        return BallotPlan::default();
    };

    let already_chosen = existing.len() == 1 && existing[0].option_id == *choice;
    if already_chosen {
        return BallotPlan {
            selection: vec![choice.clone()],
            ..BallotPlan::default()
        };
    }

    // Every prior row goes, including leftovers from when the poll allowed several.
    let mut remove: Vec<String> = existing.iter().map(|v| v.option_id.clone()).collect();
    remove.sort();
    remove.dedup();

    BallotPlan {
        remove,
        insert: vec![Vote::new(&poll.id, choice, user_id)],
        selection: vec![choice.clone()],
    }
}
