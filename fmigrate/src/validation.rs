//! Structural checks and repairs of file-backed source data.
//!
//! Both work on the snapshot copies held in the [`CsvRecordCache`]; repairs
//! mark the touched paths dirty and the caller decides when to flush.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::config::JobConfig;
use crate::csv_cache::CsvRecordCache;
use crate::errors::Result;
use crate::models::{EntityDescriptor, RelationshipField, ID_FIELD};
use crate::reports::CsvIssue;
use crate::scheduler::Schedule;
use chrono::Utc;

pub struct CsvValidator<'a> {
    config: &'a JobConfig,
    schedule: &'a Schedule,
}

impl<'a> CsvValidator<'a> {
    pub fn new(config: &'a JobConfig, schedule: &'a Schedule) -> Self {
        Self { config, schedule }
    }

    fn path(&self, entity: &str) -> PathBuf {
        self.config.source_file(entity)
    }

    fn descriptor(&self, entity: &str) -> Option<&EntityDescriptor> {
        self.schedule
            .task_index(entity)
            .map(|index| self.schedule.tasks[index].descriptor.as_ref())
    }

    /// Loads every task's file into the cache and reports structural problems.
    pub fn validate(&self, cache: &mut CsvRecordCache) -> Result<Vec<CsvIssue>> {
        let mut issues = Vec::new();

        for task in &self.schedule.tasks {
            let descriptor = &task.descriptor;
            let table = cache.load(&self.path(&descriptor.name))?;
            if table.headers.is_empty() {
                log::debug!("No source file for '{}'", descriptor.name);
                continue;
            }

            if !descriptor.traits.complex_or_autonumber_external_id {
                for field in descriptor.external_id_fields() {
                    if !table.has_column(field) {
                        issues.push(CsvIssue::structural(
                            &descriptor.name,
                            field,
                            "",
                            "external id column is missing",
                        ));
                    }
                }
            }

            for rel in &descriptor.relationships {
                let parent_external_id = self
                    .descriptor(&rel.parent)
                    .map(|parent| parent.external_id.clone())
                    .unwrap_or_default();
                let reference = rel.reference_column(&parent_external_id);
                if !table.has_column(&rel.field) && !table.has_column(&reference) {
                    issues.push(CsvIssue {
                        timestamp: Utc::now(),
                        child_value: String::new(),
                        child_entity: descriptor.name.clone(),
                        child_field: rel.field.clone(),
                        parent_value: String::new(),
                        parent_entity: rel.parent.clone(),
                        parent_field: parent_external_id,
                        error: format!(
                            "neither '{}' nor '{}' column is present",
                            rel.field, reference
                        ),
                    });
                }
            }

            if table.has_column(ID_FIELD) {
                let mut seen = HashSet::new();
                for row in &table.rows {
                    let id = row.get(ID_FIELD).map(String::as_str).unwrap_or("");
                    if !id.is_empty() && !seen.insert(id) {
                        issues.push(CsvIssue::structural(
                            &descriptor.name,
                            ID_FIELD,
                            id,
                            "duplicate id",
                        ));
                    }
                }
            }
        }

        Ok(issues)
    }

    /// Assigns missing ids and reconciles relationship columns with parents.
    pub fn repair(&self, cache: &mut CsvRecordCache) -> Result<Vec<CsvIssue>> {
        for task in &self.schedule.tasks {
            self.assign_missing_ids(cache, &task.descriptor.name)?;
        }

        let mut issues = Vec::new();
        for task in &self.schedule.tasks {
            for rel in &task.descriptor.relationships {
                self.resolve_relationship(cache, &task.descriptor, rel, &mut issues)?;
            }
        }
        Ok(issues)
    }

    fn assign_missing_ids(&self, cache: &mut CsvRecordCache, entity: &str) -> Result<()> {
        let path = self.path(entity);
        let (added_column, missing) = {
            let table = cache.load(&path)?;
            if table.headers.is_empty() {
                return Ok(());
            }
            let added_column = table.ensure_column(ID_FIELD);
            let missing: Vec<usize> = table
                .rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row.get(ID_FIELD).map_or(true, |id| id.is_empty()))
                .map(|(position, _)| position)
                .collect();
            (added_column, missing)
        };

        if missing.is_empty() && !added_column {
            return Ok(());
        }
        let ids: Vec<String> = missing.iter().map(|_| cache.next_synthetic_id()).collect();
        if let Some(table) = cache.get_mut(&path) {
            for (position, id) in missing.iter().zip(ids) {
                table.rows[*position].insert(ID_FIELD.to_string(), id);
            }
        }
        cache.mark_dirty(&path);
        log::info!(
            "Assigned {} synthetic ids in {}",
            missing.len(),
            path.display()
        );
        Ok(())
    }

    fn resolve_relationship(
        &self,
        cache: &mut CsvRecordCache,
        child: &EntityDescriptor,
        rel: &RelationshipField,
        issues: &mut Vec<CsvIssue>,
    ) -> Result<()> {
        let Some(parent) = self.descriptor(&rel.parent) else {
            return Ok(());
        };
        let reference = rel.reference_column(&parent.external_id);

        // Parent lookups are built before the child table is borrowed mutably;
        // for self references both are the same table.
        let (by_external_id, by_id) = {
            let table = cache.load(&self.path(&parent.name))?;
            let mut by_external_id = HashMap::new();
            let mut by_id = HashMap::new();
            for row in &table.rows {
                let id = row.get(ID_FIELD).cloned().unwrap_or_default();
                let external_id = parent.external_id_value(row);
                if !id.is_empty() {
                    if !external_id.is_empty() {
                        by_external_id.insert(external_id.clone(), id.clone());
                    }
                    by_id.insert(id, external_id);
                }
            }
            (by_external_id, by_id)
        };

        let path = self.path(&child.name);
        let mut changed = false;
        {
            let table = cache.load(&path)?;
            if table.headers.is_empty() {
                return Ok(());
            }
            let has_reference = table.has_column(&reference);
            if has_reference && table.ensure_column(&rel.field) {
                changed = true;
            }

            for row in table.rows.iter_mut() {
                let value = row.get(&rel.field).cloned().unwrap_or_default();
                let reference_value = row.get(&reference).cloned().unwrap_or_default();

                if !value.is_empty() {
                    if let Some(external_id) = by_id.get(&value) {
                        if has_reference && reference_value.is_empty() && !external_id.is_empty() {
                            row.insert(reference.clone(), external_id.clone());
                            changed = true;
                        }
                        continue;
                    }
                }

                if !reference_value.is_empty() {
                    if let Some(id) = by_external_id.get(&reference_value) {
                        row.insert(rel.field.clone(), id.clone());
                        changed = true;
                        continue;
                    }
                }

                if value.is_empty() && reference_value.is_empty() {
                    continue;
                }
                let (parent_value, parent_field) = if reference_value.is_empty() {
                    (value.clone(), ID_FIELD.to_string())
                } else {
                    (reference_value.clone(), parent.external_id.clone())
                };
                issues.push(CsvIssue {
                    timestamp: Utc::now(),
                    child_value: if reference_value.is_empty() {
                        value
                    } else {
                        reference_value
                    },
                    child_entity: child.name.clone(),
                    child_field: if has_reference {
                        reference.clone()
                    } else {
                        rel.field.clone()
                    },
                    parent_value,
                    parent_entity: parent.name.clone(),
                    parent_field,
                    error: "parent record not found".to_string(),
                });
            }
        }

        if changed {
            cache.mark_dirty(&path);
        }
        Ok(())
    }
}
