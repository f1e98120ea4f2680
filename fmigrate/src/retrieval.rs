use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::Result;
use crate::executor::{QueryContext, QueryDirection, RecordExecutor, ReverseMode};
use crate::models::Side;
use crate::scheduler::Schedule;
use crate::task::MigrationTask;

pub const DEFAULT_ITERATIVE_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Source forward, four resolution passes, target forward.
    #[default]
    FixedSequence,
    /// Backward/forward rounds until nothing new turns up or the cap is hit.
    Iterative { max_rounds: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPass {
    pub side: Side,
    pub direction: QueryDirection,
    pub reverse: Option<ReverseMode>,
}

impl QueryPass {
    const fn new(side: Side, direction: QueryDirection, reverse: Option<ReverseMode>) -> Self {
        Self {
            side,
            direction,
            reverse,
        }
    }

    fn is_resolution(&self) -> bool {
        self.side == Side::Source && (self.direction == QueryDirection::Backward || self.reverse.is_some())
    }
}

pub const SOURCE_FORWARD: QueryPass = QueryPass::new(Side::Source, QueryDirection::Forward, None);
pub const SOURCE_BACKWARD: QueryPass = QueryPass::new(Side::Source, QueryDirection::Backward, None);
pub const TARGET_FORWARD: QueryPass = QueryPass::new(Side::Target, QueryDirection::Forward, None);

pub const RESOLUTION_PASSES: [QueryPass; 4] = [
    SOURCE_BACKWARD,
    SOURCE_BACKWARD,
    QueryPass::new(Side::Source, QueryDirection::Forward, Some(ReverseMode::First)),
    QueryPass::new(Side::Source, QueryDirection::Forward, Some(ReverseMode::Second)),
];

/// The default pass sequence.
pub fn fixed_sequence() -> Vec<QueryPass> {
    let mut passes = vec![SOURCE_FORWARD];
    passes.extend(RESOLUTION_PASSES);
    passes.push(TARGET_FORWARD);
    passes
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityRetrieval {
    pub entity: String,
    pub source_records: usize,
    pub target_records: usize,
    pub retrieved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalSummary {
    pub entities: Vec<EntityRetrieval>,
    pub passes: usize,
    /// Only meaningful in iterative mode; the fixed sequence always reports `true`.
    pub converged: bool,
}

pub struct RetrievalCoordinator<'a> {
    executor: &'a dyn RecordExecutor,
    mode: RetrievalMode,
}

impl<'a> RetrievalCoordinator<'a> {
    pub fn new(executor: &'a dyn RecordExecutor, mode: RetrievalMode) -> Self {
        Self { executor, mode }
    }

    pub async fn run(&self, schedule: &mut Schedule) -> Result<RetrievalSummary> {
        let mut passes = 0;
        let mut converged = true;

        match self.mode {
            RetrievalMode::FixedSequence => {
                for pass in fixed_sequence() {
                    self.run_pass(schedule, passes, pass).await?;
                    passes += 1;
                }
            }
            RetrievalMode::Iterative { max_rounds } => {
                self.run_pass(schedule, passes, SOURCE_FORWARD).await?;
                passes += 1;

                converged = false;
                for round in 0..max_rounds {
                    let mut discovered = 0;
                    for pass in [SOURCE_BACKWARD, RESOLUTION_PASSES[2]] {
                        discovered += self.run_pass(schedule, passes, pass).await?;
                        passes += 1;
                    }
                    if discovered == 0 {
                        log::info!("Retrieval reached a fixed point after {} rounds", round + 1);
                        converged = true;
                        break;
                    }
                }
                if !converged {
                    log::warn!(
                        "Retrieval stopped after {max_rounds} rounds while still discovering records; remaining references will be reported as missing"
                    );
                }

                self.run_pass(schedule, passes, TARGET_FORWARD).await?;
                passes += 1;
            }
        }

        Ok(RetrievalSummary {
            entities: schedule
                .tasks
                .iter()
                .map(|task| EntityRetrieval {
                    entity: task.name().to_string(),
                    source_records: task.source.len(),
                    target_records: task.target.len(),
                    retrieved: !task.source.is_empty() || !task.target.is_empty(),
                })
                .collect(),
            passes,
            converged,
        })
    }

    /// Queries every task in query order. Returns how many new records turned up.
    async fn run_pass(&self, schedule: &mut Schedule, pass_number: usize, pass: QueryPass) -> Result<usize> {
        let mut discovered = 0;

        for position in 0..schedule.query_order.len() {
            let index = schedule.query_order[position];
            let Some(context) = build_context(&schedule.tasks, index, pass_number, pass) else {
                continue;
            };

            let rows = self.executor.query(pass.side, &context).await?;
            let task = &mut schedule.tasks[index];
            let mut skipped = 0;
            for row in rows {
                match task.absorb(pass.side, row) {
                    Some(true) => discovered += 1,
                    Some(false) => {}
                    None => skipped += 1,
                }
            }
            if skipped > 0 {
                log::warn!(
                    "Skipped {} {} rows of '{}' without an internal id",
                    skipped,
                    pass.side,
                    task.name()
                );
            }
        }

        log::info!(
            "Query pass {} ({} {:?}{}) discovered {} new records",
            pass_number + 1,
            pass.side,
            pass.direction,
            pass.reverse
                .map(|mode| format!(", reverse {mode:?}"))
                .unwrap_or_default(),
            discovered
        );
        Ok(discovered)
    }
}

/// Builds the query context, or `None` when the pass cannot add anything for the task.
fn build_context(
    tasks: &[MigrationTask],
    index: usize,
    pass_number: usize,
    pass: QueryPass,
) -> Option<QueryContext> {
    let task = &tasks[index];
    let descriptor = &task.descriptor;

    let referenced_ids = referenced_ids(tasks, index, pass.side);
    if pass.is_resolution() {
        if descriptor.traits.fetch_all_records {
            return None;
        }
        match pass.direction {
            QueryDirection::Backward if referenced_ids.is_empty() => return None,
            QueryDirection::Forward
                if descriptor.traits.no_relationships || descriptor.relationships.is_empty() =>
            {
                return None
            }
            _ => {}
        }
    }

    let mut parent_ids = BTreeMap::new();
    for rel in &descriptor.relationships {
        if let Some(parent) = tasks.iter().find(|candidate| candidate.name() == rel.parent) {
            parent_ids.insert(
                rel.field.clone(),
                parent.side(pass.side).ids().cloned().collect::<BTreeSet<_>>(),
            );
        }
    }

    Some(QueryContext {
        entity: descriptor.clone(),
        pass: pass_number,
        direction: pass.direction,
        reverse: pass.reverse,
        parent_ids,
        referenced_ids,
        known_records: task.side(pass.side).len(),
    })
}

/// Ids of `tasks[index]` that known records on `side` point at but that are not known yet.
fn referenced_ids(tasks: &[MigrationTask], index: usize, side: Side) -> BTreeSet<String> {
    let target = &tasks[index];
    let known = target.side(side);
    let mut referenced = BTreeSet::new();

    for task in tasks {
        for rel in task
            .descriptor
            .relationships
            .iter()
            .filter(|rel| rel.parent == target.name())
        {
            for (_, record) in task.side(side).records() {
                if let Some(value) = record.get(&rel.field) {
                    if !value.is_empty() && !known.contains(value) {
                        referenced.insert(value.clone());
                    }
                }
            }
        }
    }
    referenced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DescriptorSet, EntityDescriptor, EntityTraits, Operation, Record};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Answers queries the way a filtering remote service would.
    #[derive(Default)]
    struct MockRemote {
        source: HashMap<String, Vec<Record>>,
        target: HashMap<String, Vec<Record>>,
        calls: Mutex<Vec<(Side, String)>>,
    }

    #[async_trait]
    impl RecordExecutor for MockRemote {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn query(&self, side: Side, context: &QueryContext) -> Result<Vec<Record>> {
            self.calls
                .lock()
                .unwrap()
                .push((side, context.entity.name.clone()));
            let store = match side {
                Side::Source => &self.source,
                Side::Target => &self.target,
            };
            let rows = store.get(&context.entity.name).cloned().unwrap_or_default();

            if side == Side::Target
                || (context.is_initial() && context.entity.traits.fetch_all_records)
            {
                return Ok(rows);
            }
            let matches = |row: &Record| match context.direction {
                QueryDirection::Backward => context.referenced_ids.contains(&row["Id"]),
                QueryDirection::Forward => context.parent_ids.iter().any(|(field, ids)| {
                    row.get(field).map(|value| ids.contains(value)).unwrap_or(false)
                }),
            };
            Ok(rows.into_iter().filter(|row| matches(row)).collect())
        }

        async fn write(
            &self,
            _side: Side,
            _operation: Operation,
            _entity: &EntityDescriptor,
            records: Vec<Record>,
        ) -> Result<Vec<Record>> {
            Ok(records)
        }
    }

    fn hierarchy() -> (Schedule, MockRemote) {
        let descriptors = DescriptorSet::new(vec![
            EntityDescriptor::new("Account", "Name").lookup("ParentId", "Account"),
            EntityDescriptor::new("Contact", "Email")
                .lookup("AccountId", "Account")
                .with_traits(EntityTraits {
                    fetch_all_records: true,
                    ..Default::default()
                }),
        ])
        .unwrap();

        let mut remote = MockRemote::default();
        remote.source.insert(
            "Account".into(),
            vec![
                record(&[("Id", "A1"), ("Name", "Leaf"), ("ParentId", "A2")]),
                record(&[("Id", "A2"), ("Name", "Mid"), ("ParentId", "A3")]),
                record(&[("Id", "A3"), ("Name", "Root"), ("ParentId", "")]),
                record(&[("Id", "A4"), ("Name", "Unrelated"), ("ParentId", "")]),
            ],
        );
        remote.source.insert(
            "Contact".into(),
            vec![record(&[("Id", "C1"), ("Email", "a@b.c"), ("AccountId", "A1")])],
        );
        remote.target.insert(
            "Account".into(),
            vec![record(&[("Id", "T1"), ("Name", "Leaf"), ("ParentId", "")])],
        );

        (Schedule::build(&descriptors), remote)
    }

    fn source_ids(schedule: &Schedule, entity: &str) -> Vec<String> {
        let index = schedule.task_index(entity).unwrap();
        schedule.tasks[index].source.ids().cloned().collect()
    }

    #[tokio::test]
    async fn fixed_sequence_resolves_two_levels_of_self_reference() {
        let (mut schedule, remote) = hierarchy();
        let summary = RetrievalCoordinator::new(&remote, RetrievalMode::FixedSequence)
            .run(&mut schedule)
            .await
            .unwrap();

        assert_eq!(summary.passes, 6);
        assert_eq!(source_ids(&schedule, "Account"), vec!["A1", "A2"]);
        assert_eq!(source_ids(&schedule, "Contact"), vec!["C1"]);

        let account = schedule.task_index("Account").unwrap();
        assert_eq!(
            schedule.tasks[account].target.id_by_external_id("Leaf"),
            Some("T1")
        );

        let calls = remote.calls.lock().unwrap();
        let contact_calls = calls.iter().filter(|(_, name)| name == "Contact").count();
        assert_eq!(contact_calls, 2, "fetch-all entities skip resolution passes");
    }

    #[tokio::test]
    async fn iterative_mode_follows_deeper_chains() {
        let (mut schedule, remote) = hierarchy();
        let summary = RetrievalCoordinator::new(&remote, RetrievalMode::Iterative { max_rounds: 10 })
            .run(&mut schedule)
            .await
            .unwrap();

        assert!(summary.converged);
        assert_eq!(source_ids(&schedule, "Account"), vec!["A1", "A2", "A3"]);
        assert!(summary.entities.iter().all(|entity| entity.retrieved));
    }

    #[tokio::test]
    async fn iterative_mode_reports_exhausted_cap() {
        let (mut schedule, remote) = hierarchy();
        let summary = RetrievalCoordinator::new(&remote, RetrievalMode::Iterative { max_rounds: 1 })
            .run(&mut schedule)
            .await
            .unwrap();

        assert!(!summary.converged);
        assert_eq!(source_ids(&schedule, "Account"), vec!["A1"]);
    }

    #[test]
    fn fixed_sequence_shape() {
        let passes = fixed_sequence();
        assert_eq!(passes.len(), 6);
        assert_eq!(passes[0], SOURCE_FORWARD);
        assert_eq!(passes[1].direction, QueryDirection::Backward);
        assert_eq!(passes[2].direction, QueryDirection::Backward);
        assert_eq!(passes[3].reverse, Some(ReverseMode::First));
        assert_eq!(passes[4].reverse, Some(ReverseMode::Second));
        assert_eq!(passes[5], TARGET_FORWARD);
    }
}
