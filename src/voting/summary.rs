use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Poll, PollOption};

/// Smallest bar drawn for an option once any votes exist.
const MIN_BAR_WIDTH: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSummary {
    pub option_id: String,
    pub text: String,
    pub count: i64,
    /// Whole percent of all votes, rounded half up.
    pub percentage: u32,
    /// Bar length in percent for display.
    pub bar_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub total_votes: i64,
    pub per_option: Vec<OptionSummary>,
    pub is_open: bool,
}

pub fn summarize(poll: &Poll, options: &[PollOption], now: DateTime<Utc>) -> PollSummary {
    let total_votes: i64 = options.iter().map(|o| o.vote_count).sum();

    let per_option = options
        .iter()
        .map(|option| {
            let (percentage, bar_width) = if total_votes > 0 {
                let share = option.vote_count as f64 / total_votes as f64 * 100.0;
                (share.round() as u32, share.max(MIN_BAR_WIDTH))
            } else {
                (0, 0.0)
            };
            OptionSummary {
                option_id: option.id.clone(),
                text: option.text.clone(),
                count: option.vote_count,
                percentage,
                bar_width,
            }
        })
        .collect();

    PollSummary {
        total_votes,
        per_option,
        is_open: poll.is_open(now),
    }
}

/// Figures for a user's own polls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_polls: usize,
    pub open_polls: usize,
    pub total_votes: i64,
    pub votes_today: i64,
}

pub fn dashboard_stats(
    polls: &[(Poll, Vec<PollOption>)],
    votes_today: i64,
    now: DateTime<Utc>,
) -> DashboardStats {
    DashboardStats {
        total_polls: polls.len(),
        open_polls: polls.iter().filter(|(poll, _)| poll.is_open(now)).count(),
        total_votes: polls
            .iter()
            .flat_map(|(_, options)| options.iter())
            .map(|o| o.vote_count)
            .sum(),
        votes_today,
    }
}
