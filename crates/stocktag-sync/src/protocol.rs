//! # Wire Protocol
//!
//! Envelope exchanged with the remote inventory service, one JSON text frame
//! per envelope.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Envelope Flows                                  │
//! │                                                                         │
//! │  LOOKUP                                                                │
//! │  ──────                                                                │
//! │  DEVICE ───► product_lookup/request  { productId }                     │
//! │  SERVER ───► product_lookup/response { products: [...] }               │
//! │                                                                         │
//! │  STOCK MOVEMENT                                                        │
//! │  ──────────────                                                        │
//! │  DEVICE ───► inventory_in|inventory_out/request { inventoryItems }     │
//! │                                                                         │
//! │  SNAPSHOT SYNC                                                         │
//! │  ─────────────                                                         │
//! │  DEVICE ───► sync/request  { products, inventoryItems, timestamp }     │
//! │  SERVER ───► sync/response { products, inventoryItems, timestamp }     │
//! │                                                                         │
//! │  TAG WRITE                                                             │
//! │  ─────────                                                             │
//! │  SERVER ───► tag_write/request  { productId }                          │
//! │  DEVICE ───► tag_write/response { productId }  status: success|error   │
//! │                                                                         │
//! │  MODE                                                                  │
//! │  ────                                                                  │
//! │  DEVICE ───► mode_switch/request { mode }                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! ```json
//! {
//!   "action": "product_lookup",
//!   "kind": "request",
//!   "component": "iot",
//!   "messageId": "7f0c…",
//!   "status": null,
//!   "timestamp": "2024-05-01T10:00:00Z",
//!   "payload": { "productId": "P-100" }
//! }
//! ```
//!
//! The payload shape is fixed by `(action, kind)`. Decoding is exhaustive:
//! an envelope whose payload does not match is a
//! [`SyncError::MalformedMessage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use stocktag_core::{
    Action, Component, InventoryItem, MessageKind, Mode, Product, Status, StockDirection,
    SyncSnapshot,
};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Payloads
// =============================================================================

/// `{productId}`: lookup requests and tag writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRef {
    pub product_id: String,
}

/// `{products}`: lookup responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductList {
    pub products: Vec<Product>,
}

/// `{inventoryItems}`: stock movements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryBatch {
    pub inventory_items: Vec<InventoryItem>,
}

/// `{mode}`: mode change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    pub mode: Mode,
}

/// Closed set of payloads. Which variant an envelope carries is decided by
/// its `(action, kind)` pair, see [`Payload::decode`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    LookupRequest(ProductRef),
    LookupResponse(ProductList),
    Inventory(InventoryBatch),
    Sync(SyncSnapshot),
    TagWrite(ProductRef),
    ModeSwitch(ModeChange),
}

impl Payload {
    /// Decodes `value` as the payload `(action, kind)` requires.
    pub fn decode(action: Action, kind: MessageKind, value: Value) -> SyncResult<Payload> {
        let decoded = match (action, kind) {
            (Action::ProductLookup, MessageKind::Request) => {
                serde_json::from_value(value).map(Payload::LookupRequest)
            }
            (Action::ProductLookup, MessageKind::Response) => {
                serde_json::from_value(value).map(Payload::LookupResponse)
            }
            (Action::InventoryIn | Action::InventoryOut, _) => {
                serde_json::from_value(value).map(Payload::Inventory)
            }
            (Action::Sync, _) => serde_json::from_value(value).map(Payload::Sync),
            (Action::TagWrite, _) => serde_json::from_value(value).map(Payload::TagWrite),
            (Action::ModeSwitch, _) => serde_json::from_value(value).map(Payload::ModeSwitch),
        };

        decoded.map_err(|e| {
            SyncError::MalformedMessage(format!("payload of {action}/{kind} does not match: {e}"))
        })
    }

    /// Returns true if this payload is the one `(action, kind)` requires.
    pub fn matches(&self, action: Action, kind: MessageKind) -> bool {
        match self {
            Payload::LookupRequest(_) => {
                action == Action::ProductLookup && kind == MessageKind::Request
            }
            Payload::LookupResponse(_) => {
                action == Action::ProductLookup && kind == MessageKind::Response
            }
            Payload::Inventory(_) => {
                matches!(action, Action::InventoryIn | Action::InventoryOut)
            }
            Payload::Sync(_) => action == Action::Sync,
            Payload::TagWrite(_) => action == Action::TagWrite,
            Payload::ModeSwitch(_) => action == Action::ModeSwitch,
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A typed message with its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireEnvelope")]
pub struct Envelope {
    pub action: Action,
    pub kind: MessageKind,
    pub component: Component,
    pub message_id: String,
    pub status: Option<Status>,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

/// Envelope as it appears on the wire, before payload decoding.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    action: Action,
    kind: MessageKind,
    #[serde(default)]
    component: Component,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    status: Option<Status>,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    payload: Value,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = SyncError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let payload = Payload::decode(wire.action, wire.kind, wire.payload)?;
        Ok(Envelope {
            action: wire.action,
            kind: wire.kind,
            component: wire.component,
            message_id: wire
                .message_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            status: wire.status,
            timestamp: wire.timestamp,
            payload,
        })
    }
}

impl Envelope {
    /// Creates a device-originated envelope.
    ///
    /// ## Errors
    /// [`SyncError::MalformedMessage`] if `payload` is not the one
    /// `(action, kind)` requires.
    pub fn new(
        action: Action,
        kind: MessageKind,
        status: Option<Status>,
        payload: Payload,
    ) -> SyncResult<Self> {
        if !payload.matches(action, kind) {
            return Err(SyncError::MalformedMessage(format!(
                "payload does not match {action}/{kind}"
            )));
        }
        Ok(Self::assemble(action, kind, status, payload))
    }

    fn assemble(
        action: Action,
        kind: MessageKind,
        status: Option<Status>,
        payload: Payload,
    ) -> Self {
        Envelope {
            action,
            kind,
            component: Component::Iot,
            message_id: Uuid::new_v4().to_string(),
            status,
            timestamp: Utc::now(),
            payload,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Lookup request for the product id read from a tag.
    pub fn lookup_request(product_id: impl Into<String>) -> Self {
        Self::assemble(
            Action::ProductLookup,
            MessageKind::Request,
            None,
            Payload::LookupRequest(ProductRef {
                product_id: product_id.into(),
            }),
        )
    }

    /// Stock movement confirmed on the device.
    pub fn inventory(direction: StockDirection, items: Vec<InventoryItem>) -> Self {
        let action = match direction {
            StockDirection::In => Action::InventoryIn,
            StockDirection::Out => Action::InventoryOut,
        };
        Self::assemble(
            action,
            MessageKind::Request,
            None,
            Payload::Inventory(InventoryBatch {
                inventory_items: items,
            }),
        )
    }

    /// Full-state snapshot push.
    pub fn sync_request(snapshot: SyncSnapshot) -> Self {
        Self::assemble(
            Action::Sync,
            MessageKind::Request,
            None,
            Payload::Sync(snapshot),
        )
    }

    /// Outcome of a requested tag write.
    pub fn tag_write_response(product_id: impl Into<String>, status: Status) -> Self {
        Self::assemble(
            Action::TagWrite,
            MessageKind::Response,
            Some(status),
            Payload::TagWrite(ProductRef {
                product_id: product_id.into(),
            }),
        )
    }

    /// Notification that the operator changed the mode.
    pub fn mode_switch(mode: Mode) -> Self {
        Self::assemble(
            Action::ModeSwitch,
            MessageKind::Request,
            None,
            Payload::ModeSwitch(ModeChange { mode }),
        )
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Serializes to a JSON text frame.
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a JSON text frame.
    ///
    /// Every failure (bad JSON, unknown action, mismatched payload) is a
    /// [`SyncError::MalformedMessage`].
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }

    /// Short label for logs, e.g. `product_lookup/request`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.action, self.kind)
    }
}
