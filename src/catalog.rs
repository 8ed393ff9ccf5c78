//! Capacity catalog: storage units ordered by capacity.
//!
//! The order is established once when the catalog is loaded. Capacity is
//! immutable, so occupancy updates never require a re-sort and the binary
//! search in the selector stays valid for the catalog's whole lifetime.

use std::collections::HashMap;

use crate::error::{CoreError, EntityKind};
use crate::model::{StorageUnit, UnitId, ValidationError};
use crate::types::{Capacitated, Occupiable};

/// Capacity-ascending collection of storage units.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapacityCatalog {
    units: Vec<StorageUnit>,
    positions: HashMap<UnitId, usize>,
}

impl CapacityCatalog {
    /// Builds a catalog from a set of units.
    ///
    /// Units are sorted ascending by capacity; the sort is stable, so units
    /// of equal capacity keep their input order.
    ///
    /// # Returns
    /// `Err(ValidationError::DuplicateUnit)` if two units share an id.
    pub fn load(units: impl IntoIterator<Item = StorageUnit>) -> Result<Self, ValidationError> {
        let mut units: Vec<StorageUnit> = units.into_iter().collect();
        units.sort_by(|a, b| a.capacity().total_cmp(&b.capacity()));

        let mut positions = HashMap::with_capacity(units.len());
        for (idx, unit) in units.iter().enumerate() {
            if positions.insert(unit.id(), idx).is_some() {
                return Err(ValidationError::DuplicateUnit(unit.id()));
            }
        }

        Ok(Self { units, positions })
    }

    /// Applies a signed occupancy change to a unit.
    ///
    /// Positive deltas occupy space (rejected if the unit would overflow),
    /// negative deltas free it.
    pub fn update_occupancy(&mut self, unit_id: UnitId, delta: f64) -> Result<(), CoreError> {
        if !delta.is_finite() {
            return Err(ValidationError::InvalidSize(format!(
                "Occupancy delta must be finite, got: {}",
                delta
            ))
            .into());
        }
        let unit = self
            .get_mut(unit_id)
            .ok_or_else(|| CoreError::not_found(EntityKind::StorageUnit, unit_id))?;
        if delta >= 0.0 {
            unit.occupy(delta)?;
        } else {
            unit.free(-delta);
        }
        Ok(())
    }

    pub fn get(&self, unit_id: UnitId) -> Option<&StorageUnit> {
        self.positions.get(&unit_id).map(|&idx| &self.units[idx])
    }

    pub(crate) fn get_mut(&mut self, unit_id: UnitId) -> Option<&mut StorageUnit> {
        let idx = *self.positions.get(&unit_id)?;
        self.units.get_mut(idx)
    }

    pub(crate) fn unit_at_mut(&mut self, idx: usize) -> Option<&mut StorageUnit> {
        self.units.get_mut(idx)
    }

    /// Units in catalog order.
    pub fn units(&self) -> &[StorageUnit] {
        &self.units
    }

    pub fn contains(&self, unit_id: UnitId) -> bool {
        self.positions.contains_key(&unit_id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn total_capacity(&self) -> f64 {
        self.units.iter().map(|u| u.capacity()).sum()
    }

    pub fn total_occupancy(&self) -> f64 {
        self.units.iter().map(|u| u.occupancy()).sum()
    }
}
