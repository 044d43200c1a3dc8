use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_by: String,
    pub is_active: bool,
    pub allow_multiple_votes: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub poll_id: String,
    pub text: String,
    pub position: i64,
    /// Denormalized; rewritten from `votes` in the same transaction as every vote write.
    pub vote_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub poll_id: String,
    pub option_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// User-provided details to create a poll.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPoll {
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub allow_multiple_votes: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One entry of an edited option list. `id` is set for options that already exist.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionEdit {
    pub id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollUpdate {
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<OptionEdit>,
    pub allow_multiple_votes: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Poll {
    pub fn new(
        created_by: &str,
        title: String,
        description: Option<String>,
        options: Vec<String>,
        allow_multiple_votes: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> (Self, Vec<PollOption>) {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let options = options
            .into_iter()
            .enumerate()
            .map(|(position, text)| PollOption::new(&id, text, position as i64))
            .collect();

        let poll = Self {
            id,
            title,
            description,
            created_by: created_by.to_string(),
            is_active: true,
            allow_multiple_votes,
            expires_at,
            created_at: now,
            updated_at: now,
        };
        (poll, options)
    }

    /// Active and not past its expiration at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|ends| ends <= now)
    }
}

impl PollOption {
    pub fn new(poll_id: &str, text: String, position: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            poll_id: poll_id.to_string(),
            text,
            position,
            vote_count: 0,
        }
    }
}

impl Vote {
    pub fn new(poll_id: &str, option_id: &str, user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

impl User {
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}
