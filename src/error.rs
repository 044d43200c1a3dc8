use std::fmt;

use thiserror::Error;

use crate::db::StoreError;

/// Where in an operation a storage call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceStage {
    /// Reading the poll, its options or votes.
    Lookup,
    /// Deleting or inserting vote rows.
    VoteWrite,
    /// Rewriting cached option counts from the vote rows.
    Recount,
    /// Committing the transaction.
    Commit,
    /// Any other write (poll, option or user rows).
    Write,
}

impl fmt::Display for PersistenceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            PersistenceStage::Lookup => "lookup",
            PersistenceStage::VoteWrite => "vote write",
            PersistenceStage::Recount => "vote recount",
            PersistenceStage::Commit => "commit",
            PersistenceStage::Write => "write",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not allowed to modify this poll")]
    Unauthorized,

    #[error("poll not found")]
    PollNotFound,

    #[error("option {0} does not belong to this poll")]
    OptionNotFound(String),

    #[error("poll is closed")]
    PollInactive,

    #[error("poll has expired")]
    PollExpired,

    #[error("no option selected")]
    NoSelection,

    #[error("option {0} has votes and cannot be removed")]
    OptionHasVotes(String),

    #[error("storage failure during {stage}: {source}")]
    Persistence {
        stage: PersistenceStage,
        #[source]
        source: StoreError,
    },
}

impl PollError {
    pub fn validation(message: impl Into<String>) -> Self {
        PollError::Validation(message.into())
    }

    pub fn stage(&self) -> Option<PersistenceStage> {
        match self {
            PollError::Persistence { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Tags a storage result with the stage it belongs to.
pub(crate) trait AtStage<T> {
    fn at(self, stage: PersistenceStage) -> Result<T, PollError>;
}

impl<T> AtStage<T> for Result<T, StoreError> {
    fn at(self, stage: PersistenceStage) -> Result<T, PollError> {
        self.map_err(|source| PollError::Persistence { stage, source })
    }
}
