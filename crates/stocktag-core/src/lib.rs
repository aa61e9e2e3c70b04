//! # stocktag-core: Pure Domain Logic for the Edge Device
//!
//! This crate holds everything about the inventory edge device that can be
//! expressed without touching a socket, a file, or a pin.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stocktag Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Hardware adapters (tag reader, buttons, display)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ ports::*                               │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               stocktag-sync (coordination engine)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stocktag-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌─────────────┐  ┌──────────┐  │   │
//! │  │   │   types   │  │   mode    │  │ interaction │  │  ports   │  │   │
//! │  │   │  Product  │  │ Mode      │  │ Quantity    │  │TagSensor │  │   │
//! │  │   │ Inventory │  │ StateMach │  │ Selector    │  │ Display  │  │   │
//! │  │   └───────────┘  └───────────┘  └─────────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entities exchanged with the remote service
//! - [`mode`] - Device operating mode and its fixed transition cycle
//! - [`interaction`] - Quantity selection state machine
//! - [`ports`] - Interfaces of the hardware collaborators
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use stocktag_core::mode::{Mode, ModeStateMachine};
//!
//! let modes = ModeStateMachine::new();
//! assert_eq!(modes.current_mode(), Mode::InventoryIn);
//!
//! assert_eq!(modes.advance(), Mode::InventoryOut);
//! assert!(modes.transition_to(Mode::InventoryIn).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod interaction;
pub mod mode;
pub mod ports;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use interaction::{Button, InteractionStep, QuantitySelector};
pub use mode::{Mode, ModeStateMachine};
pub use ports::{Buzzer, DiscreteInput, DisplayPanel, EdgeDetector, TagId, TagSensor};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of bytes a single tag data block holds.
///
/// Product ids written to a tag are padded or truncated to this length by the
/// reader driver, so anything longer cannot round-trip.
pub const TAG_BLOCK_SIZE: usize = 16;

/// Tag data slot holding the product id, unless configured otherwise.
pub const DEFAULT_TAG_SLOT: u8 = 8;
