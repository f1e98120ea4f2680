use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::errors::Result;

#[derive(Debug, Deserialize)]
struct ValueMappingRow {
    #[serde(rename = "EntityName")]
    entity_name: String,
    #[serde(rename = "FieldName")]
    field_name: String,
    #[serde(rename = "RawValue")]
    raw_value: String,
    #[serde(rename = "Value")]
    value: String,
}

/// Replacement values per `entity.field`, applied while building target records.
#[derive(Debug, Default, Clone)]
pub struct ValueMappings {
    by_field: HashMap<String, HashMap<String, String>>,
}

impl ValueMappings {
    /// Reads the mapping table. A missing file means no mappings.
    pub fn load(path: &Path) -> Result<Self> {
        let mut mappings = Self::default();
        if !path.exists() {
            return Ok(mappings);
        }

        let mut reader = csv::Reader::from_path(path)?;
        for row in reader.deserialize::<ValueMappingRow>() {
            let row = row?;
            mappings.insert(&row.entity_name, &row.field_name, row.raw_value, row.value);
        }
        log::info!(
            "Loaded {} value mappings from {}",
            mappings.len(),
            path.display()
        );
        Ok(mappings)
    }

    pub fn insert(&mut self, entity: &str, field: &str, raw: String, value: String) {
        self.by_field
            .entry(field_key(entity, field))
            .or_default()
            .insert(raw, value);
    }

    pub fn apply<'a>(&'a self, entity: &str, field: &str, raw: &'a str) -> &'a str {
        self.by_field
            .get(&field_key(entity, field))
            .and_then(|values| values.get(raw))
            .map(String::as_str)
            .unwrap_or(raw)
    }

    pub fn len(&self) -> usize {
        self.by_field.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_field.is_empty()
    }
}

fn field_key(entity: &str, field: &str) -> String {
    format!("{entity}.{field}")
}
