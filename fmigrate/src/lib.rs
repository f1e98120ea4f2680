//! Orchestration core for moving related records between two endpoints.
//!
//! A run is driven by [`MigrationJob`]:
//! - [`Schedule`] orders the entities so parents are written before children.
//! - file-backed sources are snapshotted, validated and repaired through the
//!   shared [`CsvRecordCache`].
//! - the retrieval coordinator runs its query passes against the injected
//!   [`RecordExecutor`].
//! - the update orchestrator writes inserts and updates in two passes and
//!   collects missing parent lookups.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fmigrate::{
//!     prompt::AlwaysContinue, CsvRecordCache, DescriptorSet, EntityDescriptor, JobConfig,
//!     MigrationJob, RecordExecutor,
//! };
//!
//! async fn migrate(executor: Arc<dyn RecordExecutor>) -> fmigrate::Result<()> {
//!     let descriptors = DescriptorSet::new(vec![
//!         EntityDescriptor::new("Account", "Name"),
//!         EntityDescriptor::new("Contact", "Email").lookup("AccountId", "Account"),
//!     ])?;
//!     let job = MigrationJob::new(
//!         JobConfig::new("./data"),
//!         descriptors,
//!         executor,
//!         Arc::new(AlwaysContinue),
//!         CsvRecordCache::shared(),
//!     );
//!     let outcome = job.run().await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod csv_cache;
pub mod diff;
pub mod errors;
pub mod executor;
pub mod job;
pub mod mapping;
pub mod models;
pub mod prompt;
pub mod reports;
pub mod retrieval;
pub mod scheduler;
pub mod staging;
pub mod task;
pub mod update;
pub mod validation;

pub use crate::config::JobConfig;
pub use crate::csv_cache::{CsvRecordCache, SharedCsvCache};
pub use crate::errors::{MigrationError, Result};
pub use crate::executor::RecordExecutor;
pub use crate::job::{JobOutcome, JobSummary, MigrationJob};
pub use crate::models::{DescriptorSet, EntityDescriptor, Record};
pub use crate::prompt::{PromptAnswer, PromptReason, Prompter};
pub use crate::scheduler::Schedule;
