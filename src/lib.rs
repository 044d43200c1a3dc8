//! Poll creation and voting over a relational store.
//!
//! Voting, recounting and poll edits each run in a single store transaction, so the cached
//! per-option counts always match the vote rows they summarise.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod tasks;
pub mod voting;

#[cfg(test)]
mod test_support;

pub use error::{PersistenceStage, PollError};
