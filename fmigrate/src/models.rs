use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::errors::{MigrationError, Result};

/// Field holding a record's internal identifier on either side.
pub const ID_FIELD: &str = "Id";

/// Separator between the parts of a composite external id.
pub const COMPOSITE_SEPARATOR: char = ';';

/// A record is a flat map of field name to textual value. Empty means null.
pub type Record = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// Where one side of the job reads or writes its records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// A live remote data service reached through an injected executor.
    Org { alias: String },
    /// A set of CSV files under the job's base path.
    #[default]
    File,
}

impl Endpoint {
    pub fn is_file(&self) -> bool {
        matches!(self, Endpoint::File)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => f.write_str("insert"),
            Operation::Update => f.write_str("update"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipField {
    /// Child field holding the parent's internal id.
    pub field: String,
    pub parent: String,
    #[serde(default)]
    pub master_detail: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityTraits {
    pub readonly: bool,
    /// Type-metadata entities that must be processed before everything else.
    pub special: bool,
    pub no_relationships: bool,
    pub fetch_all_records: bool,
    pub complex_or_autonumber_external_id: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub external_id: String,
    #[serde(default)]
    pub relationships: Vec<RelationshipField>,
    #[serde(flatten)]
    pub traits: EntityTraits,
    #[serde(default)]
    pub query_limit: Option<u64>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: external_id.into(),
            relationships: Vec::new(),
            traits: EntityTraits::default(),
            query_limit: None,
        }
    }

    pub fn lookup(mut self, field: impl Into<String>, parent: impl Into<String>) -> Self {
        self.relationships.push(RelationshipField {
            field: field.into(),
            parent: parent.into(),
            master_detail: false,
        });
        self
    }

    pub fn master_detail(mut self, field: impl Into<String>, parent: impl Into<String>) -> Self {
        self.relationships.push(RelationshipField {
            field: field.into(),
            parent: parent.into(),
            master_detail: true,
        });
        self
    }

    pub fn with_traits(mut self, traits: EntityTraits) -> Self {
        self.traits = traits;
        self
    }

    /// Every parent this entity references, master-detail parents included.
    /// Ordered by declaration, de-duplicated, self-references excluded.
    pub fn parent_lookups(&self) -> Vec<&str> {
        self.parents_where(|_| true)
    }

    pub fn parent_master_details(&self) -> Vec<&str> {
        self.parents_where(|rel| rel.master_detail)
    }

    fn parents_where(&self, keep: impl Fn(&RelationshipField) -> bool) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.relationships
            .iter()
            .filter(|rel| keep(rel) && rel.parent != self.name)
            .filter(|rel| seen.insert(rel.parent.as_str()))
            .map(|rel| rel.parent.as_str())
            .collect()
    }

    pub fn is_lookup_child_of(&self, parent: &str) -> bool {
        parent != self.name && self.relationships.iter().any(|rel| rel.parent == parent)
    }

    pub fn is_master_detail_child_of(&self, parent: &str) -> bool {
        parent != self.name
            && self
                .relationships
                .iter()
                .any(|rel| rel.master_detail && rel.parent == parent)
    }

    /// Entities queried without a relationship filter go first in query order.
    pub fn requires_unfiltered_query(&self) -> bool {
        self.traits.fetch_all_records || self.query_limit.is_some()
    }

    pub fn external_id_fields(&self) -> Vec<&str> {
        self.external_id
            .split(COMPOSITE_SEPARATOR)
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .collect()
    }

    pub fn is_composite_external_id(&self) -> bool {
        self.external_id_fields().len() > 1
    }

    /// The external id of `record`, or an empty string when every part is empty.
    pub fn external_id_value(&self, record: &Record) -> String {
        let parts: Vec<&str> = self
            .external_id_fields()
            .into_iter()
            .map(|field| record.get(field).map(String::as_str).unwrap_or(""))
            .collect();
        if parts.iter().all(|part| part.is_empty()) {
            String::new()
        } else {
            parts.join(&COMPOSITE_SEPARATOR.to_string())
        }
    }
}

impl RelationshipField {
    /// Column carrying the parent's external-id value next to the id column,
    /// e.g. `AccountId.Name`.
    pub fn reference_column(&self, parent_external_id: &str) -> String {
        format!("{}.{}", self.field, parent_external_id)
    }
}

/// A validated, name-indexed set of descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    descriptors: Vec<Arc<EntityDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl DescriptorSet {
    pub fn new(descriptors: Vec<EntityDescriptor>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            if by_name.insert(descriptor.name.clone(), index).is_some() {
                return Err(MigrationError::Config(format!(
                    "entity '{}' is declared more than once",
                    descriptor.name
                )));
            }
            if descriptor.external_id_fields().is_empty() {
                return Err(MigrationError::Config(format!(
                    "entity '{}' has no external id field",
                    descriptor.name
                )));
            }
        }

        for descriptor in &descriptors {
            for rel in &descriptor.relationships {
                if !by_name.contains_key(&rel.parent) {
                    return Err(MigrationError::Config(format!(
                        "entity '{}' field '{}' references unknown entity '{}'",
                        descriptor.name, rel.field, rel.parent
                    )));
                }
            }
        }

        Ok(Self {
            descriptors: descriptors.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_name.get(name).map(|&index| &self.descriptors[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
