//! # Collection Schemas
//!
//! Each collection declares the fields every record must carry and the field
//! that identifies a record for upserts.
//!
//! ```text
//! ┌──────────────┬───────────────────────────────────────────┬──────────┐
//! │ collection   │ required fields                           │ identity │
//! ├──────────────┼───────────────────────────────────────────┼──────────┤
//! │ products     │ id, name, price, quantity, timestamp      │ id       │
//! │ inventory    │ id, productId, quantity, timestamp, action│ id       │
//! └──────────────┴───────────────────────────────────────────┴──────────┘
//! ```

use serde_json::{Map, Value};

use crate::error::{DbError, DbResult};

/// Collection holding products received from the remote service.
pub const PRODUCTS: &str = "products";

/// Collection holding stock movements.
pub const INVENTORY: &str = "inventory";

/// Field that identifies a record in both built-in collections.
pub const ID_FIELD: &str = "id";

/// Declared shape of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub required: Vec<String>,
    pub identity: String,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, required: &[&str], identity: impl Into<String>) -> Self {
        CollectionSchema {
            name: name.into(),
            required: required.iter().map(|f| f.to_string()).collect(),
            identity: identity.into(),
        }
    }

    /// Schema of the `products` collection.
    pub fn products() -> Self {
        Self::new(
            PRODUCTS,
            &["id", "name", "price", "quantity", "timestamp"],
            ID_FIELD,
        )
    }

    /// Schema of the `inventory` collection.
    pub fn inventory() -> Self {
        Self::new(
            INVENTORY,
            &["id", "productId", "quantity", "timestamp", "action"],
            ID_FIELD,
        )
    }

    /// Checks `record` against this schema and returns it as an object.
    ///
    /// A required field that is present but `null` counts as missing.
    pub fn validate<'a>(&self, record: &'a Value) -> DbResult<&'a Map<String, Value>> {
        let object = record.as_object().ok_or_else(|| DbError::InvalidRecord {
            collection: self.name.clone(),
            reason: "record must be a JSON object".to_string(),
        })?;

        for field in &self.required {
            if object.get(field).map_or(true, Value::is_null) {
                return Err(DbError::schema_violation(&self.name, field));
            }
        }

        Ok(object)
    }
}

/// Schemas the device store is opened with.
pub fn default_schemas() -> Vec<CollectionSchema> {
    vec![CollectionSchema::products(), CollectionSchema::inventory()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_product() {
        let record = json!({
            "id": "P-1", "name": "Widget", "price": 1.5,
            "quantity": 3, "timestamp": "2024-05-01T10:00:00Z"
        });
        assert!(CollectionSchema::products().validate(&record).is_ok());
    }

    #[test]
    fn test_missing_field_names_the_field() {
        let record = json!({ "id": "I-1", "productId": "P-1", "quantity": 1, "timestamp": "t" });
        match CollectionSchema::inventory().validate(&record) {
            Err(DbError::SchemaViolation { collection, field }) => {
                assert_eq!(collection, "inventory");
                assert_eq!(field, "action");
            }
            other => panic!("expected schema violation, got {other:?}"),
        }
    }

    #[test]
    fn test_null_counts_as_missing() {
        let record = json!({
            "id": "P-1", "name": null, "price": 1.5,
            "quantity": 3, "timestamp": "t"
        });
        assert!(CollectionSchema::products().validate(&record).is_err());
    }

    #[test]
    fn test_non_object_rejected() {
        let err = CollectionSchema::products()
            .validate(&json!(["id", "name"]))
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidRecord { .. }));
    }
}
