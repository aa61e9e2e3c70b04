//! # Domain Types
//!
//! Entities exchanged with the remote inventory service and kept in the
//! local store.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │  InventoryItem  │   │  SyncSnapshot   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │◄──│  productId      │   │  products[]     │       │
//! │  │  name           │   │  id (UUID)      │   │  inventoryItems │       │
//! │  │  price          │   │  quantity       │   │  timestamp      │       │
//! │  │  quantity       │   │  action in|out  │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  Product:       remote-owned reference data, cached locally            │
//! │  InventoryItem: stock movements generated on the device or confirmed   │
//! │                 by the remote service                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All types serialize with camelCase field names, matching the wire format
//! and the records held by the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Envelope Vocabulary
// =============================================================================

/// What an envelope is about. Decides the shape of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ProductLookup,
    InventoryIn,
    InventoryOut,
    TagWrite,
    Sync,
    ModeSwitch,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::ProductLookup => write!(f, "product_lookup"),
            Action::InventoryIn => write!(f, "inventory_in"),
            Action::InventoryOut => write!(f, "inventory_out"),
            Action::TagWrite => write!(f, "tag_write"),
            Action::Sync => write!(f, "sync"),
            Action::ModeSwitch => write!(f, "mode_switch"),
        }
    }
}

/// Whether an envelope asks for something or answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
        }
    }
}

/// Origin of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Web,
    /// The edge device itself.
    #[default]
    Iot,
    Api,
}

/// Outcome carried by responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

// =============================================================================
// Product
// =============================================================================

/// A product known to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Product identifier, also the value written onto tags.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Unit price as published by the remote service.
    pub price: f64,

    /// Stock level as last reported by the remote service.
    pub quantity: i64,

    /// When the remote service last changed this product.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Inventory Item
// =============================================================================

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockDirection {
    In,
    Out,
}

/// A single stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    /// Unique identifier (UUID v4 when generated on the device).
    pub id: String,

    /// Product the movement applies to.
    pub product_id: String,

    /// Number of units moved (always positive; direction is in `action`).
    pub quantity: i64,

    /// When the movement was confirmed.
    pub timestamp: DateTime<Utc>,

    /// Stock in or stock out.
    pub action: StockDirection,
}

impl InventoryItem {
    /// Creates a new movement with a fresh id and the current time.
    pub fn new(product_id: impl Into<String>, quantity: i64, action: StockDirection) -> Self {
        InventoryItem {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            quantity,
            timestamp: Utc::now(),
            action,
        }
    }
}

// =============================================================================
// Sync Snapshot
// =============================================================================

/// Full-state payload exchanged in both directions during snapshot sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    #[serde(default)]
    pub products: Vec<Product>,

    #[serde(default)]
    pub inventory_items: Vec<InventoryItem>,

    pub timestamp: DateTime<Utc>,
}

impl SyncSnapshot {
    /// Creates a snapshot stamped with the current time.
    pub fn new(products: Vec<Product>, inventory_items: Vec<InventoryItem>) -> Self {
        SyncSnapshot {
            products,
            inventory_items,
            timestamp: Utc::now(),
        }
    }

    /// Returns true if the snapshot carries no records.
    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.inventory_items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_wire_names() {
        let product = Product {
            id: "P-100".into(),
            name: "Widget".into(),
            price: 2.5,
            quantity: 12,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["id"], "P-100");
        assert_eq!(value["quantity"], 12);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_inventory_item_wire_names() {
        let item = InventoryItem::new("P-100", 3, StockDirection::Out);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["productId"], "P-100");
        assert_eq!(value["action"], "out");
        assert!(Uuid::parse_str(value["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_snapshot_defaults_missing_lists() {
        let snapshot: SyncSnapshot =
            serde_json::from_str(r#"{"timestamp":"2024-05-01T10:00:00Z"}"#).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_action_display_matches_wire() {
        for action in [
            Action::ProductLookup,
            Action::InventoryIn,
            Action::InventoryOut,
            Action::TagWrite,
            Action::Sync,
            Action::ModeSwitch,
        ] {
            let wire = serde_json::to_string(&action).unwrap();
            assert_eq!(wire, format!("\"{}\"", action));
        }
    }
}
