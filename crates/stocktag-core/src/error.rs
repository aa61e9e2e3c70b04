//! # Error Types
//!
//! Domain-specific error types for stocktag-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stocktag-core errors (this file)                                      │
//! │  ├── CoreError        - Mode and domain rule violations                │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  stocktag-db errors (separate crate)                                   │
//! │  └── DbError          - Store failures, SchemaViolation                │
//! │                                                                         │
//! │  stocktag-sync errors (separate crate)                                 │
//! │  └── SyncError        - Link, protocol, hardware, config               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → logged by the duty    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::mode::Mode;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A mode change outside the fixed cycle was requested.
    ///
    /// ## When This Occurs
    /// - `transition_to` with a target that is not the successor of the
    ///   current mode (skipping, going backwards, or staying put)
    ///
    /// The mode is left unchanged.
    #[error("Invalid mode transition from {from} to {to}")]
    InvalidTransition { from: Mode, to: Mode },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} bytes")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// A list that must carry at least one element was empty.
    #[error("{field} must not be empty")]
    Empty { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = CoreError::InvalidTransition {
            from: Mode::InventoryIn,
            to: Mode::TagWrite,
        };
        assert_eq!(
            err.to_string(),
            "Invalid mode transition from Inventory In to Tag Write"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "productId".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
