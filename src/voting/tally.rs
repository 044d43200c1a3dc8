use std::collections::HashMap;

use serde::Serialize;

use crate::models::{PollOption, Vote};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionCount {
    pub option_id: String,
    pub count: i64,
}

/// Counts `votes` per option. Every option appears, in the order given, even with zero votes;
/// votes for options not in `options` are ignored.
pub fn count_votes(options: &[PollOption], votes: &[Vote]) -> Vec<OptionCount> {
    let mut counts: HashMap<&str, i64> = options.iter().map(|o| (o.id.as_str(), 0)).collect();
    for vote in votes {
        if let Some(count) = counts.get_mut(vote.option_id.as_str()) {
            *count += 1;
        }
    }

    options
        .iter()
        .map(|o| OptionCount {
            option_id: o.id.clone(),
            count: counts[o.id.as_str()],
        })
        .collect()
}

/// Options whose cached count differs from `counts`.
pub fn stale<'a>(options: &'a [PollOption], counts: &[OptionCount]) -> Vec<&'a PollOption> {
    options
        .iter()
        .filter(|o| {
            counts
                .iter()
                .find(|c| c.option_id == o.id)
                .is_some_and(|c| c.count != o.vote_count)
        })
        .collect()
}
