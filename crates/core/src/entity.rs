//! Typed wrappers around raw catalog rows.
//!
//! The catalog returns entity rows rooted at a single key naming the server
//! type, e.g. `{"Dataset": {"id": 5, "name": "x"}}`. Projection queries
//! (`select d.name from Dataset d`) return plain scalars instead; those are
//! passed through untouched.

use crate::error::{Error, Result};
use crate::facility::Facility;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};

/// A facility-bound catalog entity.
#[derive(Clone, Debug)]
pub struct Entity {
    entity_type: String,
    fields: Map<String, Value>,
    facility: Weak<Facility>,
}

impl Entity {
    /// Wrap one single-key-rooted record.
    pub fn from_record(record: Value, facility: &Arc<Facility>) -> Result<Self> {
        match record {
            Value::Object(root) if root.len() == 1 => match root.into_iter().next() {
                Some((server_type, Value::Object(fields))) => Ok(Self {
                    entity_type: uncapitalize(&server_type),
                    fields,
                    facility: Arc::downgrade(facility),
                }),
                Some((server_type, _)) => Err(Error::NotAnEntity(server_type)),
                None => Err(Error::NotAnEntity("{}".to_string())),
            },
            other => Err(Error::NotAnEntity(other.to_string())),
        }
    }

    /// Lower-camel entity type, e.g. "dataset" or "datafileFormat".
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Deserialize one field; `None` when absent or of the wrong shape.
    pub fn field<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.fields
            .get(field)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn id(&self) -> Option<i64> {
        self.fields.get("id").and_then(Value::as_i64)
    }

    /// Owning facility, if it is still loaded.
    pub fn facility(&self) -> Option<Arc<Facility>> {
        self.facility.upgrade()
    }

    /// Re-root the fields under the server type name, ready for writing.
    pub fn to_record(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            capitalize(&self.entity_type),
            Value::Object(self.fields.clone()),
        );
        Value::Object(root)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type
            && self.fields == other.fields
            && Weak::ptr_eq(&self.facility, &other.facility)
    }
}

/// One row of a query result.
#[derive(Clone, Debug, PartialEq)]
pub enum Row {
    Entity(Entity),
    Value(Value),
}

impl Row {
    /// Wrap a raw row; anything that is not entity-shaped passes through.
    pub fn wrap(raw: Value, facility: &Arc<Facility>) -> Self {
        if is_entity_shaped(&raw) {
            if let Ok(entity) = Entity::from_record(raw.clone(), facility) {
                return Self::Entity(entity);
            }
        }
        Self::Value(raw)
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            Self::Value(_) => None,
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            Self::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Entity(_) => None,
            Self::Value(value) => Some(value),
        }
    }
}

fn is_entity_shaped(raw: &Value) -> bool {
    matches!(raw, Value::Object(root)
        if root.len() == 1 && root.values().all(Value::is_object))
}

/// Lower-case the first character: "DatasetType" -> "datasetType".
pub fn uncapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Upper-case the first character: "datasetType" -> "DatasetType".
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facility::FacilityConfig;
    use serde_json::json;

    fn facility() -> Arc<Facility> {
        Arc::new(Facility::new(FacilityConfig {
            name: "LILS".to_string(),
            icat_url: "https://icat.example.org".to_string(),
            ids_url: None,
            authentication_types: Vec::new(),
            ids_upload_dataset_type: None,
            ids_upload_datafile_format: None,
        }))
    }

    #[test]
    fn test_wraps_dataset_record() {
        let facility = facility();
        let row = Row::wrap(json!({"Dataset": {"id": 5, "name": "x"}}), &facility);
        let entity = row.as_entity().unwrap();
        assert_eq!(entity.entity_type(), "dataset");
        assert_eq!(entity.field::<String>("name").as_deref(), Some("x"));
        assert_eq!(entity.id(), Some(5));
        assert_eq!(entity.facility().unwrap().name(), "LILS");
    }

    #[test]
    fn test_camel_case_type_names() {
        let facility = facility();
        let row = Row::wrap(json!({"DatafileFormat": {"id": 1}}), &facility);
        assert_eq!(row.as_entity().unwrap().entity_type(), "datafileFormat");
    }

    #[test]
    fn test_non_entity_rows_pass_through() {
        let facility = facility();
        for raw in [
            json!(42),
            json!("Jane Doe"),
            json!(null),
            json!({"a": 1, "b": 2}),
            json!({"count": 3}),
        ] {
            let row = Row::wrap(raw.clone(), &facility);
            assert_eq!(row.as_value(), Some(&raw));
        }
    }

    #[test]
    fn test_facility_reference_is_non_owning() {
        let facility = facility();
        let entity = Entity::from_record(json!({"User": {"name": "bob"}}), &facility).unwrap();
        drop(facility);
        assert!(entity.facility().is_none());
    }

    #[test]
    fn test_to_record_restores_server_type() {
        let facility = facility();
        let entity =
            Entity::from_record(json!({"DatasetType": {"id": 2, "name": "raw"}}), &facility)
                .unwrap();
        assert_eq!(
            entity.to_record(),
            json!({"DatasetType": {"id": 2, "name": "raw"}})
        );
    }
}
