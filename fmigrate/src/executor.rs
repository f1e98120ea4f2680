use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::errors::Result;
use crate::models::{EntityDescriptor, Operation, Record, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDirection {
    /// Children of already known parents.
    Forward,
    /// Parents referenced by already known children.
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseMode {
    First,
    Second,
}

/// What the coordinator already knows when it asks for one entity's rows.
/// The executor decides which of it ends up in the actual filter.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub entity: Arc<EntityDescriptor>,
    /// Zero-based position of the pass in the retrieval sequence.
    pub pass: usize,
    pub direction: QueryDirection,
    pub reverse: Option<ReverseMode>,
    /// Known internal ids of each relationship field's parent, keyed by field.
    pub parent_ids: BTreeMap<String, BTreeSet<String>>,
    /// Ids of this entity referenced by other known records and not retrieved yet.
    pub referenced_ids: BTreeSet<String>,
    /// Number of records of this entity already known on the queried side.
    pub known_records: usize,
}

impl QueryContext {
    /// The first, unfiltered-by-history query of an entity on a side.
    pub fn is_initial(&self) -> bool {
        self.direction == QueryDirection::Forward && self.reverse.is_none() && self.known_records == 0
    }
}

/// Reads and writes records on one endpoint. Batching, pagination and retry
/// belong to the implementation.
#[async_trait]
pub trait RecordExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn query(&self, side: Side, context: &QueryContext) -> Result<Vec<Record>>;

    /// Writes `records` and returns the written rows in the same order, each
    /// carrying its internal id.
    async fn write(
        &self,
        side: Side,
        operation: Operation,
        entity: &EntityDescriptor,
        records: Vec<Record>,
    ) -> Result<Vec<Record>>;
}

/// Sends each side to its own executor.
pub struct SideRouter {
    source: Arc<dyn RecordExecutor>,
    target: Arc<dyn RecordExecutor>,
}

impl SideRouter {
    pub fn new(source: Arc<dyn RecordExecutor>, target: Arc<dyn RecordExecutor>) -> Self {
        Self { source, target }
    }

    fn route(&self, side: Side) -> &Arc<dyn RecordExecutor> {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }
}

#[async_trait]
impl RecordExecutor for SideRouter {
    fn name(&self) -> &'static str {
        "side-router"
    }

    async fn query(&self, side: Side, context: &QueryContext) -> Result<Vec<Record>> {
        self.route(side).query(side, context).await
    }

    async fn write(
        &self,
        side: Side,
        operation: Operation,
        entity: &EntityDescriptor,
        records: Vec<Record>,
    ) -> Result<Vec<Record>> {
        self.route(side).write(side, operation, entity, records).await
    }
}
