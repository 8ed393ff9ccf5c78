//! Common types and traits for capacity bookkeeping.
//!
//! Storage units and carriers share one capability: they have a fixed
//! capacity and a mutable occupancy. This module defines that interface
//! once so the catalog, the selector and the shipment flow can treat both
//! the same way.

use thiserror::Error;

/// Global numerical tolerance for floating-point capacity comparisons.
///
/// Only used to absorb rounding noise when an occupancy update lands exactly
/// on the capacity boundary. Fit decisions themselves compare exactly.
pub const EPSILON_GENERAL: f64 = 1e-9;

/// Raised when an occupancy update would push a unit past its capacity.
///
/// Reaching this error means an earlier fit check was bypassed or wrong.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "capacity invariant violated on {holder}: occupancy {occupancy} + {amount} exceeds capacity {capacity}"
)]
pub struct CapacityInvariantViolation {
    pub holder: String,
    pub capacity: f64,
    pub occupancy: f64,
    pub amount: f64,
}

/// Read access to anything with a fixed capacity and a current occupancy.
///
/// # Examples
/// ```
/// use stow_it_now::model::StorageUnit;
/// use stow_it_now::types::Capacitated;
///
/// let unit = StorageUnit::new(101, 15.0, 4.0).unwrap();
/// assert_eq!(unit.remaining_capacity(), 11.0);
/// assert!(unit.can_hold(11.0));
/// ```
pub trait Capacitated {
    /// Returns the immutable capacity.
    fn capacity(&self) -> f64;

    /// Returns the currently occupied amount.
    fn occupancy(&self) -> f64;

    /// Free space left in the holder.
    fn remaining_capacity(&self) -> f64 {
        self.capacity() - self.occupancy()
    }

    /// Checks whether `amount` fits into the remaining space.
    fn can_hold(&self, amount: f64) -> bool {
        self.remaining_capacity() >= amount
    }

    /// Occupancy as a percentage of capacity (0.0 to 100.0).
    fn utilization_percent(&self) -> f64 {
        let capacity = self.capacity();
        if capacity <= 0.0 {
            return 0.0;
        }
        (self.occupancy() / capacity) * 100.0
    }
}

/// Mutable occupancy for capacity holders.
pub trait Occupiable: Capacitated {
    /// Adds `amount` to the occupancy.
    ///
    /// Rejects the update, leaving the holder untouched, if it would exceed
    /// the capacity.
    fn occupy(&mut self, amount: f64) -> Result<(), CapacityInvariantViolation>;

    /// Removes `amount` from the occupancy, never going below zero.
    fn free(&mut self, amount: f64);
}

/// Computes the occupancy after adding `amount`, or the violation if it
/// would not fit.
///
/// Shared by every [`Occupiable`] implementation.
pub(crate) fn checked_occupy(
    holder: impl FnOnce() -> String,
    capacity: f64,
    occupancy: f64,
    amount: f64,
) -> Result<f64, CapacityInvariantViolation> {
    let next = occupancy + amount;
    if !amount.is_finite() || amount < 0.0 || next > capacity + EPSILON_GENERAL {
        return Err(CapacityInvariantViolation {
            holder: holder(),
            capacity,
            occupancy,
            amount,
        });
    }
    Ok(next.min(capacity))
}

/// Computes the occupancy after removing `amount`, clamped at zero.
pub(crate) fn saturating_free(occupancy: f64, amount: f64) -> f64 {
    (occupancy - amount).max(0.0)
}

/// Validation helpers shared by the model constructors.
pub mod validation {

    /// Validates a strictly positive, finite quantity.
    ///
    /// # Parameters
    /// * `value` - The value to validate
    /// * `name` - Name of the quantity for error messages
    ///
    /// # Returns
    /// `Ok(())` for valid values, otherwise error text
    pub fn validate_positive(value: f64, name: &str) -> Result<(), String> {
        if value.is_nan() {
            return Err(format!("{} must not be NaN", name));
        }
        if value.is_infinite() {
            return Err(format!("{} must not be infinite", name));
        }
        if value <= 0.0 {
            return Err(format!("{} must be positive, got: {}", name, value));
        }
        Ok(())
    }

    /// Validates an occupancy against its capacity.
    pub fn validate_occupancy(occupancy: f64, capacity: f64) -> Result<(), String> {
        if !occupancy.is_finite() || occupancy < 0.0 {
            return Err(format!(
                "Occupancy must be a finite non-negative number, got: {}",
                occupancy
            ));
        }
        if occupancy > capacity {
            return Err(format!(
                "Occupancy {} exceeds capacity {}",
                occupancy, capacity
            ));
        }
        Ok(())
    }

    /// Validates that a required text field is present.
    pub fn validate_non_empty(value: &str, name: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err(format!("{} must not be empty", name));
        }
        Ok(())
    }
}
