use chrono::Utc;
use serde::Serialize;

use crate::errors::Result;
use crate::mapping::ValueMappings;
use crate::models::{Record, RelationshipField, ID_FIELD};
use crate::reports::MissingLookup;
use crate::task::MigrationTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePass {
    /// Inserts and updates with every relationship that can already be resolved.
    /// Parents written later are left to the backward pass.
    Forward,
    /// The forward pass of a run without a backward pass. Parents that are not
    /// written yet are reported as missing lookups.
    Single,
    /// Relationship fields whose parents were written after their children.
    Backward,
}

/// A target record waiting to be written, tied to the source record it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub source_id: String,
    pub record: Record,
}

#[derive(Debug, Default)]
pub struct UpdateBatch {
    pub inserts: Vec<PendingRecord>,
    pub updates: Vec<PendingRecord>,
    pub missing_lookups: Vec<MissingLookup>,
}

/// Decides which target records one task needs in one pass.
pub trait RecordDiff: Send + Sync {
    fn build_batch(
        &self,
        tasks: &[MigrationTask],
        index: usize,
        pass: UpdatePass,
        mappings: &ValueMappings,
    ) -> Result<UpdateBatch>;
}

enum Resolution {
    Resolved(String),
    /// The parent is known on the source side but has no target record yet.
    Deferred(String),
    Missing(String),
}

/// Matches records across sides by external id and rewrites relationship
/// fields to target ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalIdDiff;

impl ExternalIdDiff {
    fn resolve(
        tasks: &[MigrationTask],
        rel: &RelationshipField,
        raw: &str,
        source_record: &Record,
    ) -> Resolution {
        let Some(parent) = tasks.iter().find(|task| task.name() == rel.parent) else {
            return Resolution::Missing(raw.to_string());
        };
        let reference = rel.reference_column(&parent.descriptor.external_id);
        let reported = source_record
            .get(&reference)
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| raw.to_string());

        if !parent.source.contains(raw) {
            return Resolution::Missing(reported);
        }
        match parent.target_id_for(raw) {
            Some(target_id) => Resolution::Resolved(target_id.to_string()),
            None => Resolution::Deferred(reported),
        }
    }

    fn missing(
        task: &MigrationTask,
        tasks: &[MigrationTask],
        rel: &RelationshipField,
        value: String,
    ) -> MissingLookup {
        let parent_external_id_field = tasks
            .iter()
            .find(|candidate| candidate.name() == rel.parent)
            .map(|parent| parent.descriptor.external_id.clone())
            .unwrap_or_default();
        MissingLookup {
            timestamp: Utc::now(),
            child_entity: task.name().to_string(),
            child_field: rel.field.clone(),
            child_external_id_field: task.descriptor.external_id.clone(),
            parent_entity: rel.parent.clone(),
            parent_external_id_field,
            missing_value: value,
        }
    }

    fn forward(
        &self,
        tasks: &[MigrationTask],
        task: &MigrationTask,
        mappings: &ValueMappings,
        defer: bool,
    ) -> UpdateBatch {
        let descriptor = &task.descriptor;
        let mut batch = UpdateBatch::default();

        for (source_id, source_record) in task.source.records() {
            let target_id = task.target_id_for(source_id).map(str::to_string);

            let mut record = Record::new();
            for (field, value) in source_record {
                // Traversal columns like `AccountId.Name` are never written.
                if field == ID_FIELD || field.contains('.') {
                    continue;
                }
                let value = mappings.apply(&descriptor.name, field, value);
                record.insert(field.clone(), value.to_string());
            }

            for rel in &descriptor.relationships {
                let raw = match source_record.get(&rel.field) {
                    Some(raw) if !raw.is_empty() => raw,
                    _ => continue,
                };
                let unresolved = match Self::resolve(tasks, rel, raw, source_record) {
                    Resolution::Resolved(id) => {
                        record.insert(rel.field.clone(), id);
                        continue;
                    }
                    Resolution::Deferred(_) if defer => None,
                    Resolution::Deferred(value) | Resolution::Missing(value) => Some(value),
                };
                // Updates keep whatever the target already holds.
                if target_id.is_some() {
                    record.remove(&rel.field);
                } else {
                    record.insert(rel.field.clone(), String::new());
                }
                if let Some(value) = unresolved {
                    batch.missing_lookups.push(Self::missing(task, tasks, rel, value));
                }
            }

            match target_id {
                None => {
                    if descriptor.traits.complex_or_autonumber_external_id {
                        for field in descriptor.external_id_fields() {
                            record.remove(field);
                        }
                    }
                    batch.inserts.push(PendingRecord {
                        source_id: source_id.clone(),
                        record,
                    });
                }
                Some(target_id) => {
                    let known = task.target.record(&target_id);
                    let mut changed: Record = record
                        .into_iter()
                        .filter(|(field, value)| {
                            known
                                .and_then(|known| known.get(field))
                                .map_or(!value.is_empty(), |current| current != value)
                        })
                        .collect();
                    if changed.is_empty() {
                        continue;
                    }
                    changed.insert(ID_FIELD.to_string(), target_id);
                    batch.updates.push(PendingRecord {
                        source_id: source_id.clone(),
                        record: changed,
                    });
                }
            }
        }
        batch
    }

    fn backward(&self, tasks: &[MigrationTask], task: &MigrationTask) -> UpdateBatch {
        let mut batch = UpdateBatch::default();

        for (source_id, source_record) in task.source.records() {
            let Some(target_id) = task.target_id_for(source_id) else {
                continue;
            };
            let known = task.target.record(target_id);

            let mut update = Record::new();
            for rel in &task.descriptor.relationships {
                let raw = match source_record.get(&rel.field) {
                    Some(raw) if !raw.is_empty() => raw,
                    _ => continue,
                };
                match Self::resolve(tasks, rel, raw, source_record) {
                    Resolution::Resolved(id) => {
                        let current = known.and_then(|known| known.get(&rel.field));
                        if current != Some(&id) {
                            update.insert(rel.field.clone(), id);
                        }
                    }
                    Resolution::Deferred(value) | Resolution::Missing(value) => {
                        batch.missing_lookups.push(Self::missing(task, tasks, rel, value));
                    }
                }
            }

            if !update.is_empty() {
                update.insert(ID_FIELD.to_string(), target_id.to_string());
                batch.updates.push(PendingRecord {
                    source_id: source_id.clone(),
                    record: update,
                });
            }
        }
        batch
    }
}

impl RecordDiff for ExternalIdDiff {
    fn build_batch(
        &self,
        tasks: &[MigrationTask],
        index: usize,
        pass: UpdatePass,
        mappings: &ValueMappings,
    ) -> Result<UpdateBatch> {
        let task = &tasks[index];
        Ok(match pass {
            UpdatePass::Forward => self.forward(tasks, task, mappings, true),
            UpdatePass::Single => self.forward(tasks, task, mappings, false),
            UpdatePass::Backward => self.backward(tasks, task),
        })
    }
}
