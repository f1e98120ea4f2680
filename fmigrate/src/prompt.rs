use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::errors::{MigrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptReason {
    /// Structural or referential problems found in file-backed source data.
    CsvIssues,
    /// Lookup values that could not be resolved to any known parent record.
    MissingParentLookups,
}

impl fmt::Display for PromptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptReason::CsvIssues => f.write_str("issues found in source CSV files"),
            PromptReason::MissingParentLookups => f.write_str("missing parent lookup records"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Proceed,
    Abort,
}

/// Asks a human whether the job should continue past a recoverable problem.
/// Blocks the job until answered.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn ask_continue(&self, reason: PromptReason, context: &str) -> Result<PromptAnswer>;
}

pub struct AlwaysContinue;

#[async_trait]
impl Prompter for AlwaysContinue {
    async fn ask_continue(&self, reason: PromptReason, context: &str) -> Result<PromptAnswer> {
        log::warn!("Continuing past {reason}: {context}");
        Ok(PromptAnswer::Proceed)
    }
}

pub struct AlwaysAbort;

#[async_trait]
impl Prompter for AlwaysAbort {
    async fn ask_continue(&self, _reason: PromptReason, _context: &str) -> Result<PromptAnswer> {
        Ok(PromptAnswer::Abort)
    }
}

/// Asks and turns a negative answer into `MigrationError::Aborted`.
pub async fn confirm_or_abort(
    prompter: &dyn Prompter,
    reason: PromptReason,
    context: &str,
) -> Result<()> {
    match prompter.ask_continue(reason, context).await? {
        PromptAnswer::Proceed => Ok(()),
        PromptAnswer::Abort => Err(MigrationError::Aborted(reason)),
    }
}
