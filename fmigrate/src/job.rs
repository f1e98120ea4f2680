//! One migration run: schedule, prepare file-backed sources, retrieve, update.
//!
//! Run-scoped state (the shared CSV cache, value mappings, accumulated
//! reports and the one-time prompt flags) lives in [`JobContext`], created with
//! the job and consumed by [`MigrationJob::run`]. Reports are persisted on every
//! way out of a run, including aborts and fatal errors.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::csv_cache::SharedCsvCache;
use crate::diff::{ExternalIdDiff, RecordDiff};
use crate::errors::{MigrationError, Result};
use crate::executor::RecordExecutor;
use crate::mapping::ValueMappings;
use crate::models::DescriptorSet;
use crate::prompt::{confirm_or_abort, PromptReason, Prompter};
use crate::reports::JobReports;
use crate::retrieval::{RetrievalCoordinator, RetrievalSummary};
use crate::scheduler::Schedule;
use crate::staging::Staging;
use crate::update::{UpdateOrchestrator, UpdateSummary};
use crate::validation::CsvValidator;

pub struct JobContext {
    pub run_id: Uuid,
    pub cache: SharedCsvCache,
    pub mappings: ValueMappings,
    pub reports: JobReports,
    pub missing_lookup_prompted: bool,
}

impl JobContext {
    pub fn new(cache: SharedCsvCache) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cache,
            mappings: ValueMappings::default(),
            reports: JobReports::default(),
            missing_lookup_prompted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub run_id: Uuid,
    pub execution_order: Vec<String>,
    pub retrieval: RetrievalSummary,
    pub update: UpdateSummary,
    pub csv_issues: usize,
    pub missing_lookups: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(JobSummary),
    /// Validation ran and the job stopped as asked.
    ValidatedOnly { csv_issues: usize },
}

pub struct MigrationJob {
    config: JobConfig,
    descriptors: DescriptorSet,
    executor: Arc<dyn RecordExecutor>,
    prompter: Arc<dyn Prompter>,
    diff: Arc<dyn RecordDiff>,
    context: JobContext,
}

impl MigrationJob {
    /// `cache` must be the same instance a file-backed executor reads from.
    pub fn new(
        config: JobConfig,
        descriptors: DescriptorSet,
        executor: Arc<dyn RecordExecutor>,
        prompter: Arc<dyn Prompter>,
        cache: SharedCsvCache,
    ) -> Self {
        Self {
            config,
            descriptors,
            executor,
            prompter,
            diff: Arc::new(ExternalIdDiff),
            context: JobContext::new(cache),
        }
    }

    pub fn with_diff(mut self, diff: Arc<dyn RecordDiff>) -> Self {
        self.diff = diff;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.context.run_id
    }

    pub async fn run(mut self) -> Result<JobOutcome> {
        log::info!(
            "Starting migration run {} in {} ({} entities, executor '{}')",
            self.context.run_id,
            self.config.base_path.display(),
            self.descriptors.len(),
            self.executor.name()
        );

        let result = self.execute().await;

        if let Err(err) = self.context.reports.persist(&self.config) {
            log::error!("Failed to write reports for run {}: {}", self.context.run_id, err);
        }
        self.context.cache.lock().await.clear();

        match &result {
            Ok(_) => log::info!("Migration run {} finished", self.context.run_id),
            Err(err) if err.is_abort() => {
                log::warn!("Migration run {} stopped: {}", self.context.run_id, err)
            }
            Err(err) => log::error!("Migration run {} failed: {}", self.context.run_id, err),
        }
        result
    }

    async fn execute(&mut self) -> Result<JobOutcome> {
        self.check_validate_only()?;
        let mut schedule = Schedule::build(&self.descriptors);
        log::info!("Execution and query order:\n{}", schedule.render_table());

        self.context.mappings = ValueMappings::load(&self.config.value_mapping_file())?;

        if self.config.uses_files() {
            let staging = Staging::new(self.config.clone()).await?;
            if self.config.source.is_file()
                && !self.prepare_csv_sources(&staging, &schedule).await?
            {
                return Ok(JobOutcome::ValidatedOnly {
                    csv_issues: self.context.reports.issues.len(),
                });
            }
        }

        let retrieval =
            RetrievalCoordinator::new(self.executor.as_ref(), self.config.retrieval_mode)
                .run(&mut schedule)
                .await?;

        let update = UpdateOrchestrator::new(
            self.executor.as_ref(),
            self.diff.as_ref(),
            self.prompter.as_ref(),
        )
        .run(&mut schedule, &self.config.target, &mut self.context)
        .await?;

        Ok(JobOutcome::Completed(JobSummary {
            run_id: self.context.run_id,
            execution_order: schedule
                .execution_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            retrieval,
            update,
            csv_issues: self.context.reports.issues.len(),
            missing_lookups: self.context.reports.missing_lookups.len(),
        }))
    }

    /// A validate-only run needs something to validate; anything else would
    /// go on to write the target.
    fn check_validate_only(&self) -> Result<()> {
        if !self.config.validate_only {
            return Ok(());
        }
        if !self.config.source.is_file() {
            return Err(MigrationError::Config(
                "validate_only requires a file source".to_string(),
            ));
        }
        if self.config.skip_validation {
            return Err(MigrationError::Config(
                "validate_only and skip_validation cannot be combined".to_string(),
            ));
        }
        Ok(())
    }

    /// Snapshots, validates and repairs the source files.
    /// Returns `false` when the run should stop after validation.
    async fn prepare_csv_sources(
        &mut self,
        staging: &Staging,
        schedule: &Schedule,
    ) -> Result<bool> {
        for pair in &self.config.paired_files {
            staging.merge_paired(pair).await?;
        }
        let mut snapshots = 0;
        for task in &schedule.tasks {
            if staging.snapshot(task.name()).await? {
                snapshots += 1;
            }
        }
        log::info!(
            "Copied {snapshots} source files into {}",
            self.config.source_dir().display()
        );

        let cache = self.context.cache.clone();
        let mut cache = cache.lock().await;
        let validator = CsvValidator::new(&self.config, schedule);

        let mut prompted = false;
        if self.config.skip_validation {
            log::info!("Skipping CSV validation");
        } else {
            let issues = validator.validate(&mut cache)?;
            let count = issues.len();
            self.context.reports.issues.extend(issues);
            if self.config.validate_only {
                log::info!("Validation found {count} issues; stopping as requested");
                return Ok(false);
            }
            if count > 0 {
                prompted = true;
                confirm_or_abort(
                    self.prompter.as_ref(),
                    PromptReason::CsvIssues,
                    &format!("{count} problems found in source files"),
                )
                .await?;
            }
        }
        let issues = validator.repair(&mut cache)?;
        let written = cache.flush()?;
        log::info!("Repair rewrote {} source files", written.len());

        if !issues.is_empty() {
            let count = issues.len();
            self.context.reports.issues.extend(issues);
            if prompted {
                log::warn!("Repair left {count} unresolved references in source files");
            } else {
                confirm_or_abort(
                    self.prompter.as_ref(),
                    PromptReason::CsvIssues,
                    &format!("{count} references in source files could not be resolved"),
                )
                .await?;
            }
        }
        Ok(true)
    }
}
