//! # stocktag-db: Local Store for the Edge Device
//!
//! This crate keeps the device's offline copy of products and stock
//! movements. It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stocktag Data Flow                               │
//! │                                                                         │
//! │  SyncEngine (merge / snapshot)     InteractionController (confirm)     │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    stocktag-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  LocalStore   │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│  (store.rs)   │    │  (embedded)  │  │   │
//! │  │   │ SqlitePool    │    │ schema.rs     │    │ 001_local_   │  │   │
//! │  │   │ WAL           │    │ products      │    │   store.sql  │  │   │
//! │  │   │               │    │ inventory     │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/stocktag/store.db                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`schema`] - Collection schemas
//! - [`store`] - The collection store
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stocktag_db::{Database, DbConfig, LocalStore};
//!
//! let db = Database::new(DbConfig::new("store.db")).await?;
//! let store = LocalStore::new(db);
//!
//! store.upsert("products", &records, "id").await?;
//! let products = store.read_all("products").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod schema;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use schema::{CollectionSchema, ID_FIELD, INVENTORY, PRODUCTS};
pub use store::{LocalStore, UpsertOutcome};
