//! # Validation Module
//!
//! Checks applied to values before they reach a tag or leave the device.
//!
//! ## Usage
//! ```rust
//! use stocktag_core::validation::{validate_product_id, validate_quantity};
//!
//! validate_product_id("P-100").unwrap();
//! validate_quantity(5).unwrap();
//! assert!(validate_quantity(0).is_err());
//! ```

use crate::error::ValidationError;
use crate::TAG_BLOCK_SIZE;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a product id destined for a tag data block.
///
/// ## Rules
/// - Must not be empty after trimming
/// - Must fit in a single tag block ([`TAG_BLOCK_SIZE`] bytes)
///
/// ## Returns
/// The trimmed id.
pub fn validate_product_id(product_id: &str) -> ValidationResult<String> {
    let product_id = product_id.trim();

    if product_id.is_empty() {
        return Err(ValidationError::Required {
            field: "productId".to_string(),
        });
    }

    if product_id.len() > TAG_BLOCK_SIZE {
        return Err(ValidationError::TooLong {
            field: "productId".to_string(),
            max: TAG_BLOCK_SIZE,
        });
    }

    Ok(product_id.to_string())
}

/// Validates a confirmed stock movement quantity.
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    Ok(())
}

/// Validates that a lookup answered with at least one product.
pub fn validate_non_empty<T>(field: &str, items: &[T]) -> ValidationResult<()> {
    if items.is_empty() {
        return Err(ValidationError::Empty {
            field: field.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_trimmed() {
        assert_eq!(validate_product_id("  P-100 ").unwrap(), "P-100");
    }

    #[test]
    fn test_product_id_required() {
        assert!(matches!(
            validate_product_id("   "),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_product_id_must_fit_block() {
        assert!(validate_product_id(&"A".repeat(TAG_BLOCK_SIZE)).is_ok());
        assert!(matches!(
            validate_product_id(&"A".repeat(TAG_BLOCK_SIZE + 1)),
            Err(ValidationError::TooLong { max: 16, .. })
        ));
    }

    #[test]
    fn test_quantity_must_be_positive() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-3).is_err());
    }

    #[test]
    fn test_non_empty() {
        assert!(validate_non_empty::<u8>("products", &[]).is_err());
        assert!(validate_non_empty("products", &[1]).is_ok());
    }
}
