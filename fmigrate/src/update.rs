use serde::Serialize;

use crate::diff::{PendingRecord, RecordDiff, UpdatePass};
use crate::errors::{MigrationError, Result};
use crate::executor::RecordExecutor;
use crate::job::JobContext;
use crate::models::{Endpoint, Operation, Record, Side, ID_FIELD};
use crate::prompt::{confirm_or_abort, PromptReason, Prompter};
use crate::scheduler::Schedule;
use crate::task::MigrationTask;

#[derive(Debug, Default, Clone, Serialize)]
pub struct UpdateSummary {
    pub passes: Vec<UpdatePass>,
    pub inserted: usize,
    pub updated: usize,
    pub missing_lookups: usize,
}

/// The backward pass only runs against a live target; a file target gets a
/// single forward pass.
pub fn passes_for(target: &Endpoint) -> Vec<UpdatePass> {
    match target {
        Endpoint::Org { .. } => vec![UpdatePass::Forward, UpdatePass::Backward],
        Endpoint::File => vec![UpdatePass::Single],
    }
}

pub struct UpdateOrchestrator<'a> {
    executor: &'a dyn RecordExecutor,
    diff: &'a dyn RecordDiff,
    prompter: &'a dyn Prompter,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(
        executor: &'a dyn RecordExecutor,
        diff: &'a dyn RecordDiff,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            executor,
            diff,
            prompter,
        }
    }

    pub async fn run(
        &self,
        schedule: &mut Schedule,
        target: &Endpoint,
        context: &mut JobContext,
    ) -> Result<UpdateSummary> {
        let mut summary = UpdateSummary {
            passes: passes_for(target),
            ..Default::default()
        };

        for pass in summary.passes.clone() {
            for index in 0..schedule.tasks.len() {
                if schedule.tasks[index].descriptor.traits.readonly {
                    continue;
                }
                let batch = self
                    .diff
                    .build_batch(&schedule.tasks, index, pass, &context.mappings)?;
                let name = schedule.tasks[index].name().to_string();

                if !batch.missing_lookups.is_empty() {
                    let count = batch.missing_lookups.len();
                    summary.missing_lookups += count;
                    context.reports.missing_lookups.extend(batch.missing_lookups);
                    if context.missing_lookup_prompted {
                        log::warn!("{count} missing parent lookups in '{name}' ({pass:?} pass)");
                    } else {
                        context.missing_lookup_prompted = true;
                        confirm_or_abort(
                            self.prompter,
                            PromptReason::MissingParentLookups,
                            &format!("{count} records of '{name}' reference parents that were not found"),
                        )
                        .await?;
                    }
                }

                summary.inserted += self
                    .submit(&mut schedule.tasks, index, Operation::Insert, batch.inserts)
                    .await?;
                summary.updated += self
                    .submit(&mut schedule.tasks, index, Operation::Update, batch.updates)
                    .await?;
            }
            log::info!(
                "{pass:?} update pass done: {} inserted, {} updated so far",
                summary.inserted,
                summary.updated
            );
        }

        Ok(summary)
    }

    /// Writes one batch and folds the written rows back into the task.
    async fn submit(
        &self,
        tasks: &mut [MigrationTask],
        index: usize,
        operation: Operation,
        pending: Vec<PendingRecord>,
    ) -> Result<usize> {
        if pending.is_empty() {
            return Ok(0);
        }
        let descriptor = tasks[index].descriptor.clone();
        let (source_ids, records): (Vec<String>, Vec<Record>) = pending
            .into_iter()
            .map(|pending| (pending.source_id, pending.record))
            .unzip();

        let written = self
            .executor
            .write(Side::Target, operation, &descriptor, records)
            .await?;
        if written.len() != source_ids.len() {
            return Err(MigrationError::Transport(format!(
                "{} returned {} rows for {} {} records of '{}'",
                self.executor.name(),
                written.len(),
                source_ids.len(),
                operation,
                descriptor.name
            )));
        }

        let task = &mut tasks[index];
        let count = written.len();
        for (source_id, row) in source_ids.into_iter().zip(written) {
            let target_id = row
                .get(ID_FIELD)
                .filter(|id| !id.is_empty())
                .cloned()
                .ok_or_else(|| {
                    MigrationError::Transport(format!(
                        "written {operation} row of '{}' carries no id",
                        descriptor.name
                    ))
                })?;
            // Updates only carry changed fields.
            let mut merged = task.target.record(&target_id).cloned().unwrap_or_default();
            merged.extend(row);
            task.absorb(Side::Target, merged);
            task.source_to_target.insert(source_id, target_id);
        }
        log::debug!("{operation} of {count} '{}' records", descriptor.name);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_cache::CsvRecordCache;
    use crate::diff::ExternalIdDiff;
    use crate::executor::QueryContext;
    use crate::models::{DescriptorSet, EntityDescriptor};
    use crate::prompt::PromptAnswer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Target that hands out sequential ids and remembers every write.
    #[derive(Default)]
    struct RecordingTarget {
        writes: Mutex<Vec<(Operation, String, Vec<Record>)>>,
        next_id: AtomicUsize,
        drop_rows: bool,
    }

    #[async_trait]
    impl RecordExecutor for RecordingTarget {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn query(&self, _side: Side, _context: &QueryContext) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }

        async fn write(
            &self,
            _side: Side,
            operation: Operation,
            entity: &EntityDescriptor,
            records: Vec<Record>,
        ) -> Result<Vec<Record>> {
            self.writes
                .lock()
                .unwrap()
                .push((operation, entity.name.clone(), records.clone()));
            if self.drop_rows {
                return Ok(Vec::new());
            }
            Ok(records
                .into_iter()
                .map(|mut row| {
                    if operation == Operation::Insert {
                        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                        row.insert(ID_FIELD.to_string(), format!("T{id}"));
                    }
                    row
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingPrompter {
        asked: AtomicUsize,
    }

    #[async_trait]
    impl Prompter for CountingPrompter {
        async fn ask_continue(&self, _reason: PromptReason, _context: &str) -> Result<PromptAnswer> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            Ok(PromptAnswer::Proceed)
        }
    }

    fn absorb(schedule: &mut Schedule, entity: &str, rows: Vec<Record>) {
        let index = schedule.task_index(entity).unwrap();
        for row in rows {
            schedule.tasks[index].absorb(Side::Source, row).unwrap();
        }
    }

    fn context() -> JobContext {
        JobContext::new(CsvRecordCache::shared())
    }

    #[tokio::test]
    async fn missing_lookups_prompt_once_and_accumulate() {
        let mut schedule = Schedule::build(
            &DescriptorSet::new(vec![
                EntityDescriptor::new("Parent", "Name"),
                EntityDescriptor::new("X", "Name").lookup("ParentId", "Parent"),
                EntityDescriptor::new("Y", "Name").lookup("ParentId", "Parent"),
            ])
            .unwrap(),
        );
        absorb(
            &mut schedule,
            "X",
            vec![
                record(&[("Id", "x1"), ("Name", "x1"), ("ParentId", "p1")]),
                record(&[("Id", "x2"), ("Name", "x2"), ("ParentId", "p2")]),
            ],
        );
        absorb(
            &mut schedule,
            "Y",
            vec![
                record(&[("Id", "y1"), ("Name", "y1"), ("ParentId", "p3")]),
                record(&[("Id", "y2"), ("Name", "y2"), ("ParentId", "p4")]),
                record(&[("Id", "y3"), ("Name", "y3"), ("ParentId", "p5")]),
            ],
        );

        let target = RecordingTarget::default();
        let prompter = CountingPrompter::default();
        let mut context = context();
        let summary = UpdateOrchestrator::new(&target, &ExternalIdDiff, &prompter)
            .run(&mut schedule, &Endpoint::File, &mut context)
            .await
            .unwrap();

        assert_eq!(prompter.asked.load(Ordering::SeqCst), 1);
        assert!(context.missing_lookup_prompted);
        assert_eq!(context.reports.missing_lookups.len(), 5);
        assert_eq!(summary.missing_lookups, 5);
        assert_eq!(summary.inserted, 5);
        assert_eq!(summary.passes, vec![UpdatePass::Single]);
    }

    #[tokio::test]
    async fn one_prompt_covers_both_passes() {
        let mut schedule = Schedule::build(
            &DescriptorSet::new(vec![
                EntityDescriptor::new("Account", "Name").lookup("ParentId", "Account"),
                EntityDescriptor::new("Contact", "Email").lookup("AccountId", "Account"),
            ])
            .unwrap(),
        );
        absorb(
            &mut schedule,
            "Account",
            vec![
                record(&[("Id", "a1"), ("Name", "Child"), ("ParentId", "a2")]),
                record(&[("Id", "a2"), ("Name", "Parent")]),
            ],
        );
        absorb(
            &mut schedule,
            "Contact",
            vec![
                record(&[("Id", "c1"), ("Email", "x@gone.io"), ("AccountId", "a8")]),
                record(&[("Id", "c2"), ("Email", "y@gone.io"), ("AccountId", "a9")]),
            ],
        );

        let target = RecordingTarget::default();
        let prompter = CountingPrompter::default();
        let mut context = context();
        let summary = UpdateOrchestrator::new(&target, &ExternalIdDiff, &prompter)
            .run(
                &mut schedule,
                &Endpoint::Org {
                    alias: "prod".into(),
                },
                &mut context,
            )
            .await
            .unwrap();

        assert_eq!(summary.passes, vec![UpdatePass::Forward, UpdatePass::Backward]);
        assert_eq!(prompter.asked.load(Ordering::SeqCst), 1);
        // Forward and backward each report both contacts.
        assert_eq!(context.reports.missing_lookups.len(), 4);
        assert_eq!(summary.missing_lookups, 4);
        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn written_ids_are_folded_back_and_patched_backward() {
        let mut schedule = Schedule::build(
            &DescriptorSet::new(vec![
                EntityDescriptor::new("Account", "Name").lookup("ParentId", "Account")
            ])
            .unwrap(),
        );
        absorb(
            &mut schedule,
            "Account",
            vec![
                record(&[("Id", "a1"), ("Name", "Child"), ("ParentId", "a2")]),
                record(&[("Id", "a2"), ("Name", "Parent")]),
            ],
        );

        let target = RecordingTarget::default();
        let mut context = context();
        let summary = UpdateOrchestrator::new(&target, &ExternalIdDiff, &CountingPrompter::default())
            .run(
                &mut schedule,
                &Endpoint::Org {
                    alias: "prod".into(),
                },
                &mut context,
            )
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.updated, 1);
        let task = &schedule.tasks[0];
        assert_eq!(task.source_to_target["a1"], "T1");
        assert_eq!(task.source_to_target["a2"], "T2");
        assert_eq!(task.target.record("T1").unwrap()["ParentId"], "T2");
        assert_eq!(task.target.record("T1").unwrap()["Name"], "Child");

        let writes = target.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].0, Operation::Update);
        assert_eq!(writes[1].2, vec![record(&[("Id", "T1"), ("ParentId", "T2")])]);
    }

    #[tokio::test]
    async fn short_write_is_a_transport_error() {
        let mut schedule = Schedule::build(
            &DescriptorSet::new(vec![EntityDescriptor::new("Account", "Name")]).unwrap(),
        );
        absorb(&mut schedule, "Account", vec![record(&[("Id", "a1"), ("Name", "Acme")])]);

        let target = RecordingTarget {
            drop_rows: true,
            ..Default::default()
        };
        let err = UpdateOrchestrator::new(&target, &ExternalIdDiff, &CountingPrompter::default())
            .run(&mut schedule, &Endpoint::File, &mut context())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Transport(_)));
    }

    #[tokio::test]
    async fn readonly_tasks_are_not_written() {
        use crate::models::EntityTraits;

        let mut schedule = Schedule::build(
            &DescriptorSet::new(vec![EntityDescriptor::new("RecordType", "DeveloperName")
                .with_traits(EntityTraits {
                    readonly: true,
                    ..Default::default()
                })])
            .unwrap(),
        );
        absorb(
            &mut schedule,
            "RecordType",
            vec![record(&[("Id", "r1"), ("DeveloperName", "Retail")])],
        );

        let target = RecordingTarget::default();
        let summary = UpdateOrchestrator::new(&target, &ExternalIdDiff, &CountingPrompter::default())
            .run(&mut schedule, &Endpoint::File, &mut context())
            .await
            .unwrap();
        assert_eq!(summary.inserted, 0);
        assert!(target.writes.lock().unwrap().is_empty());
    }
}
