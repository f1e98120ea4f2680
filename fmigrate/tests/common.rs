use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use fmigrate::executor::{QueryContext, QueryDirection, RecordExecutor};
use fmigrate::models::{EntityDescriptor, Endpoint, Operation, Record, Side, ID_FIELD};
use fmigrate::JobConfig;
use tempfile::TempDir;

#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub config: JobConfig,
}

#[allow(dead_code)]
pub fn init_test_context() -> anyhow::Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let config = JobConfig::new(temp_dir.path());
    Ok(TestContext { temp_dir, config })
}

#[allow(dead_code)]
pub fn org(alias: &str) -> Endpoint {
    Endpoint::Org {
        alias: alias.to_string(),
    }
}

#[allow(dead_code)]
pub fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Two in-memory orgs behind one executor. Source queries filter the way a
/// remote service would; target writes hand out `T1`, `T2`, ...
#[allow(dead_code)]
#[derive(Default)]
pub struct InMemoryOrgs {
    pub source: HashMap<String, Vec<Record>>,
    pub target: Mutex<HashMap<String, Vec<Record>>>,
    pub queries: AtomicUsize,
    pub writes: AtomicUsize,
    next_id: AtomicUsize,
}

#[allow(dead_code)]
impl InMemoryOrgs {
    pub fn with_source(mut self, entity: &str, rows: Vec<Record>) -> Self {
        self.source.insert(entity.to_string(), rows);
        self
    }

    pub fn with_target(self, entity: &str, rows: Vec<Record>) -> Self {
        self.target.lock().unwrap().insert(entity.to_string(), rows);
        self
    }

    pub fn target_rows(&self, entity: &str) -> Vec<Record> {
        self.target
            .lock()
            .unwrap()
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn target_by_field(&self, entity: &str, field: &str, value: &str) -> Option<Record> {
        self.target_rows(entity)
            .into_iter()
            .find(|row| row.get(field).map(String::as_str) == Some(value))
    }
}

#[async_trait]
impl RecordExecutor for InMemoryOrgs {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn query(&self, side: Side, context: &QueryContext) -> fmigrate::Result<Vec<Record>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if side == Side::Target {
            return Ok(self.target_rows(&context.entity.name));
        }

        let rows = self
            .source
            .get(&context.entity.name)
            .cloned()
            .unwrap_or_default();
        if context.is_initial() {
            return Ok(rows);
        }
        Ok(rows
            .into_iter()
            .filter(|row| match context.direction {
                QueryDirection::Backward => context.referenced_ids.contains(&row[ID_FIELD]),
                QueryDirection::Forward => context.parent_ids.iter().any(|(field, ids)| {
                    row.get(field).map(|value| ids.contains(value)).unwrap_or(false)
                }),
            })
            .collect())
    }

    async fn write(
        &self,
        _side: Side,
        operation: Operation,
        entity: &EntityDescriptor,
        records: Vec<Record>,
    ) -> fmigrate::Result<Vec<Record>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut target = self.target.lock().unwrap();
        let rows = target.entry(entity.name.clone()).or_default();
        let mut written = Vec::with_capacity(records.len());

        for mut record in records {
            match operation {
                Operation::Insert => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    record.insert(ID_FIELD.to_string(), format!("T{id}"));
                    rows.push(record.clone());
                }
                Operation::Update => {
                    if let Some(existing) = rows
                        .iter_mut()
                        .find(|row| row.get(ID_FIELD) == record.get(ID_FIELD))
                    {
                        existing.extend(record.clone());
                    }
                }
            }
            written.push(record);
        }
        Ok(written)
    }
}
