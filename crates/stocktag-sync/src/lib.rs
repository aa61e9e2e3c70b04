//! # stocktag-sync: Coordination Engine for the Edge Device
//!
//! This crate runs every concurrent duty of the inventory edge device: the
//! WebSocket link to the remote inventory service, inbound routing, periodic
//! snapshot sync, tag scanning and quantity selection.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Device Architecture                              │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  Coordinator (agent.rs)                          │  │
//! │  │                                                                  │  │
//! │  │  Builds DeviceContext, spawns duties, bounded shutdown joins     │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ SensorPoller   │  │  LinkManager   │  │  InboundDispatcher     │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Mode button    │  │ WebSocket with │  │ Lookup → interaction   │    │
//! │  │ Tag scans      │  │ reconnect,     │  │ Sync → merge           │    │
//! │  │ Tag writes     │  │ ordered resend │  │ TagWrite → pending     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Interaction    │  │  SyncEngine    │  │  Hardware              │    │
//! │  │ Controller     │  │                │  │                        │    │
//! │  │ Quantity pick  │  │ Timer push     │  │ Ports on the blocking  │    │
//! │  │ Confirm/Cancel │  │ Snapshot merge │  │ pool with a timeout    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `Coordinator`, `DeviceContext` and the sensor poller
//! - [`config`] - Device configuration (TOML + environment)
//! - [`error`] - Sync error types
//! - [`hardware`] - Bounded calls into the hardware collaborators
//! - [`inbound`] - Routing of inbound envelopes
//! - [`interaction`] - Quantity selection after a lookup
//! - [`protocol`] - Wire envelope and payloads
//! - [`sync_engine`] - Snapshot push and merge
//! - [`transport`] - WebSocket link with reconnection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stocktag_sync::{Coordinator, DeviceConfig};
//!
//! let config = DeviceConfig::load_or_default(None);
//! let coordinator = Coordinator::start(config, store, ports).await?;
//!
//! tokio::signal::ctrl_c().await?;
//! coordinator.shutdown(Duration::from_secs(5)).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod hardware;
pub mod inbound;
pub mod interaction;
pub mod protocol;
pub mod sync_engine;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{Coordinator, DeviceContext, SensorPoller};
pub use config::DeviceConfig;
pub use error::{SyncError, SyncResult};
pub use hardware::{Hardware, HardwarePorts, QuantityButtons};
pub use inbound::{InboundDispatcher, PendingWrite, Routed};
pub use interaction::{InteractionController, InteractionOutcome, InteractionSettings};
pub use protocol::{Envelope, Payload};
pub use sync_engine::SyncEngine;
pub use transport::{ConnectionState, LinkConfig, LinkHandle, LinkManager, ReconnectPolicy};
