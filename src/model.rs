//! Data models for the warehouse allocation engine.
//!
//! This module defines the fundamental records the engine reasons about:
//! - `Item`: A parcel waiting for, or occupying, storage space
//! - `StorageUnit`: A fixed-capacity bin items are allocated into
//! - `Carrier`: An outbound vehicle whose capacity bounds a shipment
//!
//! Storage units and carriers implement the traits from the `types` module.

use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::{
    Capacitated, CapacityInvariantViolation, Occupiable, checked_occupy, saturating_free,
    validation,
};

/// Identifier of a storage unit.
pub type UnitId = u32;

/// Identifier of a carrier.
pub type CarrierId = u32;

/// Validation error for malformed records.
///
/// Raised before any state is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid size: {0}")]
    InvalidSize(String),
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),
    #[error("Invalid occupancy: {0}")]
    InvalidOccupancy(String),
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Duplicate storage unit id {0}")]
    DuplicateUnit(UnitId),
    #[error("Duplicate carrier id {0}")]
    DuplicateCarrier(CarrierId),
    #[error("Duplicate tracking id {0}")]
    DuplicateItem(String),
    #[error("Too many shipment candidates: {count} exceeds the limit of {max}")]
    TooManyCandidates { count: usize, max: usize },
}

fn validate_capacity(capacity: f64) -> Result<(), ValidationError> {
    validation::validate_positive(capacity, "Capacity").map_err(ValidationError::InvalidCapacity)
}

fn validate_fill(occupancy: f64, capacity: f64) -> Result<(), ValidationError> {
    validation::validate_occupancy(occupancy, capacity).map_err(ValidationError::InvalidOccupancy)
}

/// Represents an item moving through the warehouse.
///
/// # Fields
/// * `tracking_id` - Unique tracking number
/// * `size` - Space the item takes up, strictly positive
/// * `destination` - Destination code used to group shipments
/// * `fragile` - Handling flag carried through to persistence
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "tracking_id": "P001",
    "size": 11.0,
    "destination": "10001",
    "fragile": false
}))]
pub struct Item {
    pub tracking_id: String,
    pub size: f64,
    pub destination: String,
    #[serde(default, alias = "is_fragile")]
    pub fragile: bool,
}

impl Item {
    /// Creates a new item with validation.
    ///
    /// # Parameters
    /// * `tracking_id` - Unique tracking number
    /// * `size` - Space the item takes up
    /// * `destination` - Destination code
    /// * `fragile` - Handling flag
    ///
    /// # Returns
    /// `Ok(Item)` for valid values, otherwise `Err(ValidationError)`
    ///
    /// # Examples
    /// ```
    /// use stow_it_now::model::Item;
    ///
    /// let ok = Item::new("P001", 11.0, "10001", false);
    /// assert!(ok.is_ok());
    ///
    /// let invalid = Item::new("P002", -4.0, "10001", false);
    /// assert!(invalid.is_err());
    /// ```
    pub fn new(
        tracking_id: impl Into<String>,
        size: f64,
        destination: impl Into<String>,
        fragile: bool,
    ) -> Result<Self, ValidationError> {
        let item = Self {
            tracking_id: tracking_id.into(),
            size,
            destination: destination.into(),
            fragile,
        };
        item.validate()?;
        Ok(item)
    }

    /// Re-checks the fields of an item that was built without `new`,
    /// e.g. one deserialized from a request body.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_non_empty(&self.tracking_id, "Tracking id")
            .map_err(ValidationError::MissingField)?;
        validation::validate_non_empty(&self.destination, "Destination")
            .map_err(ValidationError::MissingField)?;
        validation::validate_positive(self.size, "Size").map_err(ValidationError::InvalidSize)
    }
}

/// A fixed-capacity storage location.
///
/// The capacity never changes after construction, which is what keeps a
/// capacity-sorted catalog valid while occupancy moves.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct StorageUnit {
    id: UnitId,
    capacity: f64,
    occupancy: f64,
    location: Option<String>,
}

impl StorageUnit {
    /// Creates a new storage unit with validation.
    ///
    /// # Parameters
    /// * `id` - Unique unit id
    /// * `capacity` - Total capacity, strictly positive
    /// * `occupancy` - Space already in use, within `[0, capacity]`
    pub fn new(id: UnitId, capacity: f64, occupancy: f64) -> Result<Self, ValidationError> {
        validate_capacity(capacity)?;
        validate_fill(occupancy, capacity)?;
        Ok(Self {
            id,
            capacity,
            occupancy,
            location: None,
        })
    }

    /// Attaches a physical location code (Builder pattern light).
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl Capacitated for StorageUnit {
    fn capacity(&self) -> f64 {
        self.capacity
    }

    fn occupancy(&self) -> f64 {
        self.occupancy
    }
}

impl Occupiable for StorageUnit {
    fn occupy(&mut self, amount: f64) -> Result<(), CapacityInvariantViolation> {
        self.occupancy = checked_occupy(
            || format!("storage unit {}", self.id),
            self.capacity,
            self.occupancy,
            amount,
        )?;
        Ok(())
    }

    fn free(&mut self, amount: f64) {
        self.occupancy = saturating_free(self.occupancy, amount);
    }
}

/// Loading state of a carrier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CarrierStatus {
    #[default]
    ReadyToLoad,
    LoadingInProgress,
}

/// An outbound vehicle.
///
/// The engine only uses it as a capacity ceiling for shipments and as the
/// bookkeeping target once a shipment commits.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Carrier {
    id: CarrierId,
    capacity: f64,
    current_load: f64,
    status: CarrierStatus,
    label: Option<String>,
}

impl Carrier {
    /// Creates a new carrier with validation.
    pub fn new(id: CarrierId, capacity: f64, current_load: f64) -> Result<Self, ValidationError> {
        validate_capacity(capacity)?;
        validate_fill(current_load, capacity)?;
        Ok(Self {
            id,
            capacity,
            current_load,
            status: CarrierStatus::default(),
            label: None,
        })
    }

    /// Stores display metadata for the carrier (e.g. a licence plate).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_status(mut self, status: CarrierStatus) -> Self {
        self.status = status;
        self
    }

    pub fn id(&self) -> CarrierId {
        self.id
    }

    pub fn current_load(&self) -> f64 {
        self.current_load
    }

    pub fn status(&self) -> CarrierStatus {
        self.status
    }

    pub fn set_status(&mut self, status: CarrierStatus) {
        self.status = status;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl Capacitated for Carrier {
    fn capacity(&self) -> f64 {
        self.capacity
    }

    fn occupancy(&self) -> f64 {
        self.current_load
    }
}

impl Occupiable for Carrier {
    fn occupy(&mut self, amount: f64) -> Result<(), CapacityInvariantViolation> {
        self.current_load = checked_occupy(
            || format!("carrier {}", self.id),
            self.capacity,
            self.current_load,
            amount,
        )?;
        Ok(())
    }

    fn free(&mut self, amount: f64) {
        self.current_load = saturating_free(self.current_load, amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_rejects_invalid_fields() {
        assert!(matches!(
            Item::new("P1", 0.0, "10001", false),
            Err(ValidationError::InvalidSize(_))
        ));
        assert!(matches!(
            Item::new("", 1.0, "10001", false),
            Err(ValidationError::MissingField(_))
        ));
        assert!(matches!(
            Item::new("P1", 1.0, " ", false),
            Err(ValidationError::MissingField(_))
        ));
    }

    #[test]
    fn item_deserializes_without_fragile_flag() {
        let item: Item =
            serde_json::from_str(r#"{"tracking_id":"P9","size":2.5,"destination":"40004"}"#)
                .unwrap();
        assert!(!item.fragile);
        assert!(item.validate().is_ok());
    }

    #[test]
    fn storage_unit_rejects_occupancy_above_capacity() {
        assert!(matches!(
            StorageUnit::new(1, 5.0, 6.0),
            Err(ValidationError::InvalidOccupancy(_))
        ));
        assert!(matches!(
            StorageUnit::new(1, 0.0, 0.0),
            Err(ValidationError::InvalidCapacity(_))
        ));
    }

    #[test]
    fn storage_unit_occupy_and_free() {
        let mut unit = StorageUnit::new(201, 15.0, 0.0).unwrap();
        unit.occupy(11.0).unwrap();
        assert_eq!(unit.occupancy(), 11.0);
        assert!(unit.occupy(5.0).is_err());
        assert_eq!(unit.occupancy(), 11.0, "rejected occupy must not mutate");
        unit.free(20.0);
        assert_eq!(unit.occupancy(), 0.0);
    }

    #[test]
    fn carrier_tracks_load_and_status() {
        let mut carrier = Carrier::new(1, 500.0, 0.0).unwrap().with_label("LOGI-001");
        assert_eq!(carrier.status(), CarrierStatus::ReadyToLoad);
        carrier.occupy(30.0).unwrap();
        carrier.set_status(CarrierStatus::LoadingInProgress);
        assert_eq!(carrier.current_load(), 30.0);
        assert_eq!(carrier.remaining_capacity(), 470.0);
        assert_eq!(carrier.label(), Some("LOGI-001"));
    }

    #[test]
    fn carrier_status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&CarrierStatus::LoadingInProgress).unwrap();
        assert_eq!(json, "\"LOADING_IN_PROGRESS\"");
    }
}
