use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveTime, Utc};
use log::info;
use serde::Serialize;

use crate::db::{PollStore, StoreTransaction, TransactionalStore, VoteFilter};
use crate::error::{AtStage, PersistenceStage, PollError};
use crate::handlers::{load_poll, recount, require_owner};
use crate::models::{NewPoll, OptionEdit, Poll, PollOption, PollUpdate, Vote};
use crate::voting::summary::{self, DashboardStats, PollSummary};
use crate::voting::tally;

const MIN_OPTIONS: usize = 2;

/// Poll with its options and derived results, as the detail and list pages show it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub poll: Poll,
    pub options: Vec<PollOption>,
    pub summary: PollSummary,
}

fn clean_title(title: &str) -> Result<String, PollError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PollError::validation("title is required"));
    }
    Ok(title.to_string())
}

fn clean_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

fn require_min_options(count: usize) -> Result<(), PollError> {
    if count < MIN_OPTIONS {
        return Err(PollError::validation(format!(
            "at least {} options are required, got {}",
            MIN_OPTIONS, count
        )));
    }
    Ok(())
}

/// Options each voter holds beyond their oldest vote. `votes` must be oldest first.
fn extra_selections(votes: &[Vote]) -> Vec<(String, Vec<String>)> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut extra: Vec<(String, Vec<String>)> = Vec::new();
    for vote in votes {
        if seen.insert(vote.user_id.as_str()) {
            continue;
        }
        match extra.iter_mut().find(|(user_id, _)| *user_id == vote.user_id) {
            Some((_, option_ids)) => option_ids.push(vote.option_id.clone()),
            None => extra.push((vote.user_id.clone(), vec![vote.option_id.clone()])),
        }
    }
    extra
}

pub async fn create_poll<S: TransactionalStore>(
    store: &S,
    creator_id: &str,
    new_poll: NewPoll,
) -> Result<(Poll, Vec<PollOption>), PollError> {
    let title = clean_title(&new_poll.title)?;
    let options: Vec<String> = new_poll
        .options
        .iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    require_min_options(options.len())?;

    let (poll, options) = Poll::new(
        creator_id,
        title,
        clean_description(new_poll.description),
        options,
        new_poll.allow_multiple_votes,
        new_poll.expires_at,
    );

    let tx = store.begin().await.at(PersistenceStage::Write)?;
    tx.insert_poll(&poll).await.at(PersistenceStage::Write)?;
    tx.insert_options(&options).await.at(PersistenceStage::Write)?;
    tx.commit().await.at(PersistenceStage::Commit)?;

    info!("Created poll {} with {} options", poll.id, options.len());
    Ok((poll, options))
}

/// Edits a poll in place. Options are matched by id so their votes survive; an option
/// that is dropped from the list is deleted only if nobody voted for it.
pub async fn update_poll<S: TransactionalStore>(
    store: &S,
    requester_id: &str,
    poll_id: &str,
    update: PollUpdate,
) -> Result<(Poll, Vec<PollOption>), PollError> {
    let title = clean_title(&update.title)?;
    let edits: Vec<OptionEdit> = update
        .options
        .into_iter()
        .map(|edit| OptionEdit {
            id: edit.id,
            text: edit.text.trim().to_string(),
        })
        .filter(|edit| !edit.text.is_empty())
        .collect();
    require_min_options(edits.len())?;

    let mut seen = HashSet::new();
    if let Some(dup) = edits
        .iter()
        .filter_map(|e| e.id.as_deref())
        .find(|id| !seen.insert(*id))
    {
        return Err(PollError::validation(format!("option {} listed twice", dup)));
    }

    let tx = store.begin().await.at(PersistenceStage::Lookup)?;
    let mut poll = load_poll(&tx, poll_id).await?;
    require_owner(&poll, requester_id)?;

    let current = tx.get_options(poll_id).await.at(PersistenceStage::Lookup)?;
    let votes = tx.get_votes(poll_id, None).await.at(PersistenceStage::Lookup)?;
    let counts: HashMap<String, i64> = tally::count_votes(&current, &votes)
        .into_iter()
        .map(|c| (c.option_id, c.count))
        .collect();

    let mut kept = Vec::new();
    let mut added = Vec::new();
    for (position, edit) in edits.into_iter().enumerate() {
        let position = position as i64;
        match edit.id {
            Some(id) => {
                let existing = current
                    .iter()
                    .find(|o| o.id == id)
                    .ok_or_else(|| PollError::OptionNotFound(id.clone()))?;
                kept.push(PollOption {
                    text: edit.text,
                    position,
                    ..existing.clone()
                });
            }
            None => added.push(PollOption::new(poll_id, edit.text, position)),
        }
    }

    let removed: Vec<String> = current
        .iter()
        .filter(|o| !kept.iter().any(|k| k.id == o.id))
        .map(|o| o.id.clone())
        .collect();
    if let Some(voted) = removed.iter().find(|id| counts.get(*id).copied().unwrap_or(0) > 0) {
        return Err(PollError::OptionHasVotes(voted.clone()));
    }

    let collapse = poll.allow_multiple_votes && !update.allow_multiple_votes;

    poll.title = title;
    poll.description = clean_description(update.description);
    poll.allow_multiple_votes = update.allow_multiple_votes;
    poll.expires_at = update.expires_at;
    poll.updated_at = Utc::now();

    tx.update_poll(&poll).await.at(PersistenceStage::Write)?;
    tx.delete_options(&removed).await.at(PersistenceStage::Write)?;
    for option in &kept {
        tx.update_option(option).await.at(PersistenceStage::Write)?;
    }
    tx.insert_options(&added).await.at(PersistenceStage::Write)?;

    // A single-vote poll holds at most one row per voter; keep each voter's oldest.
    if collapse {
        let extra = extra_selections(&votes);
        for (user_id, option_ids) in &extra {
            let filter = VoteFilter::voter(poll_id, user_id).options(option_ids.clone());
            tx.delete_votes(&filter).await.at(PersistenceStage::VoteWrite)?;
        }
        if !extra.is_empty() {
            info!(
                "Poll {} switched to single vote, trimmed extra votes of {} voter(s)",
                poll_id,
                extra.len()
            );
        }
        recount(&tx, poll_id).await?;
    }

    let options = tx.get_options(poll_id).await.at(PersistenceStage::Lookup)?;
    tx.commit().await.at(PersistenceStage::Commit)?;

    info!(
        "Updated poll {}: {} kept, {} added, {} removed option(s)",
        poll_id,
        kept.len(),
        added.len(),
        removed.len()
    );
    Ok((poll, options))
}

pub async fn delete_poll<S: TransactionalStore>(
    store: &S,
    requester_id: &str,
    poll_id: &str,
) -> Result<(), PollError> {
    let tx = store.begin().await.at(PersistenceStage::Lookup)?;
    let poll = load_poll(&tx, poll_id).await?;
    require_owner(&poll, requester_id)?;

    tx.delete_poll(poll_id).await.at(PersistenceStage::Write)?;
    tx.commit().await.at(PersistenceStage::Commit)?;

    info!("Deleted poll {}", poll_id);
    Ok(())
}

/// Closes (`false`) or reopens (`true`) a poll.
pub async fn set_active<S: TransactionalStore>(
    store: &S,
    requester_id: &str,
    poll_id: &str,
    is_active: bool,
) -> Result<Poll, PollError> {
    let tx = store.begin().await.at(PersistenceStage::Lookup)?;
    let mut poll = load_poll(&tx, poll_id).await?;
    require_owner(&poll, requester_id)?;

    if poll.is_active != is_active {
        tx.set_poll_active(poll_id, is_active)
            .await
            .at(PersistenceStage::Write)?;
        tx.commit().await.at(PersistenceStage::Commit)?;
        poll.is_active = is_active;
        info!(
            "Poll {} {}",
            poll_id,
            if is_active { "reopened" } else { "closed" }
        );
    }
    Ok(poll)
}

pub async fn poll_view<S: PollStore + ?Sized>(
    store: &S,
    poll_id: &str,
    now: DateTime<Utc>,
) -> Result<PollView, PollError> {
    let poll = load_poll(store, poll_id).await?;
    let options = store.get_options(poll_id).await.at(PersistenceStage::Lookup)?;
    let summary = summary::summarize(&poll, &options, now);
    Ok(PollView {
        poll,
        options,
        summary,
    })
}

/// Every poll, or only `created_by`'s, newest first.
pub async fn list_poll_views<S: PollStore + ?Sized>(
    store: &S,
    created_by: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<PollView>, PollError> {
    let polls = store.list_polls(created_by).await.at(PersistenceStage::Lookup)?;

    let mut views = Vec::with_capacity(polls.len());
    for poll in polls {
        let options = store.get_options(&poll.id).await.at(PersistenceStage::Lookup)?;
        let summary = summary::summarize(&poll, &options, now);
        views.push(PollView {
            poll,
            options,
            summary,
        });
    }
    Ok(views)
}

pub async fn dashboard<S: PollStore + ?Sized>(
    store: &S,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<DashboardStats, PollError> {
    let views = list_poll_views(store, Some(user_id), now).await?;
    let poll_ids: Vec<String> = views.iter().map(|v| v.poll.id.clone()).collect();

    let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let votes_today = store
        .count_votes_since(&poll_ids, start_of_day)
        .await
        .at(PersistenceStage::Lookup)?;

    let polls: Vec<(Poll, Vec<PollOption>)> = views.into_iter().map(|v| (v.poll, v.options)).collect();
    Ok(summary::dashboard_stats(&polls, votes_today, now))
}
