use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::models::{EntityDescriptor, Record, Side, ID_FIELD};

/// Records known for one entity on one side of the job.
#[derive(Debug, Default, Clone)]
pub struct SideState {
    ext_ids: HashMap<String, String>,
    records: BTreeMap<String, Record>,
}

impl SideState {
    /// Stores `record` under `id`. Returns `true` when the id was not known yet.
    ///
    /// An existing record is replaced, so a later write-back wins over the
    /// retrieved copy.
    pub fn upsert(&mut self, id: String, external_id: String, record: Record) -> bool {
        if !external_id.is_empty() {
            self.ext_ids.insert(external_id, id.clone());
        }
        self.records.insert(id, record).is_none()
    }

    pub fn id_by_external_id(&self, external_id: &str) -> Option<&str> {
        self.ext_ids.get(external_id).map(String::as_str)
    }

    pub fn record(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &Record)> {
        self.records.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The unit of work for one entity type.
#[derive(Debug, Clone)]
pub struct MigrationTask {
    pub descriptor: Arc<EntityDescriptor>,
    pub source: SideState,
    pub target: SideState,
    /// Source internal id to target internal id, filled during update.
    pub source_to_target: HashMap<String, String>,
}

impl MigrationTask {
    pub fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            descriptor,
            source: SideState::default(),
            target: SideState::default(),
            source_to_target: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn side(&self, side: Side) -> &SideState {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideState {
        match side {
            Side::Source => &mut self.source,
            Side::Target => &mut self.target,
        }
    }

    /// Folds a retrieved or written row into the side state.
    /// Rows without an internal id are rejected and `None` is returned.
    pub fn absorb(&mut self, side: Side, record: Record) -> Option<bool> {
        let id = record.get(ID_FIELD).filter(|id| !id.is_empty())?.clone();
        let external_id = self.descriptor.external_id_value(&record);
        Some(self.side_mut(side).upsert(id, external_id, record))
    }

    /// The target id of a source record: correlation first, then external-id match.
    pub fn target_id_for(&self, source_id: &str) -> Option<&str> {
        if let Some(target_id) = self.source_to_target.get(source_id) {
            return Some(target_id.as_str());
        }
        let record = self.source.record(source_id)?;
        let external_id = self.descriptor.external_id_value(record);
        if external_id.is_empty() {
            return None;
        }
        self.target.id_by_external_id(&external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn absorb_keeps_external_ids_pointing_at_records() {
        let mut task = MigrationTask::new(Arc::new(EntityDescriptor::new("Account", "Name")));
        assert_eq!(
            task.absorb(Side::Source, record(&[("Id", "a1"), ("Name", "Acme")])),
            Some(true)
        );
        assert_eq!(
            task.absorb(Side::Source, record(&[("Id", "a1"), ("Name", "Acme")])),
            Some(false)
        );
        assert_eq!(task.absorb(Side::Source, record(&[("Name", "NoId")])), None);

        let id = task.source.id_by_external_id("Acme").unwrap();
        assert!(task.source.contains(id));
        assert_eq!(task.source.len(), 1);
    }

    #[test]
    fn target_id_prefers_correlation_over_external_id() {
        let mut task = MigrationTask::new(Arc::new(EntityDescriptor::new("Account", "Name")));
        task.absorb(Side::Source, record(&[("Id", "s1"), ("Name", "Acme")]));
        task.absorb(Side::Target, record(&[("Id", "t1"), ("Name", "Acme")]));
        assert_eq!(task.target_id_for("s1"), Some("t1"));

        task.source_to_target.insert("s1".into(), "t9".into());
        assert_eq!(task.target_id_for("s1"), Some("t9"));
        assert_eq!(task.target_id_for("unknown"), None);
    }
}
