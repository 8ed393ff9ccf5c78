//! Best-fit selection over the capacity catalog.
//!
//! The selector binary-searches the capacity-ascending catalog for the
//! leftmost unit whose capacity covers the item, then checks that this unit
//! has enough free space. Under the default policy the search stops there:
//! a capacity-qualifying unit that is too full yields `NoFitFound` even if a
//! larger unit further right still has room.

use std::fmt;
use std::str::FromStr;

use crate::catalog::CapacityCatalog;
use crate::error::CoreError;
use crate::model::{UnitId, ValidationError};
use crate::types::{Capacitated, Occupiable, validation};

/// How far the selector looks past the capacity lower bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Only the smallest capacity-qualifying unit is considered.
    #[default]
    FirstQualifying,
    /// Walk rightward from the lower bound to the first unit with enough
    /// free space.
    NextAvailable,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::FirstQualifying => "first-qualifying",
            SelectionPolicy::NextAvailable => "next-available",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "first-qualifying" | "first" => Ok(SelectionPolicy::FirstQualifying),
            "next-available" | "next" => Ok(SelectionPolicy::NextAvailable),
            other => Err(format!("unknown selection policy '{}'", other)),
        }
    }
}

/// Assigns items to the smallest sufficiently large and free unit.
#[derive(Clone, Copy, Debug, Default)]
pub struct BestFitSelector {
    policy: SelectionPolicy,
}

impl BestFitSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Finds the catalog index of the unit an item of `item_size` would go
    /// into, without mutating anything.
    pub fn find(&self, catalog: &CapacityCatalog, item_size: f64) -> Option<usize> {
        let units = catalog.units();
        // Leftmost index with capacity >= item_size.
        let lower_bound = units.partition_point(|u| u.capacity() < item_size);

        match self.policy {
            SelectionPolicy::FirstQualifying => units
                .get(lower_bound)
                .filter(|u| u.can_hold(item_size))
                .map(|_| lower_bound),
            SelectionPolicy::NextAvailable => units[lower_bound..]
                .iter()
                .position(|u| u.can_hold(item_size))
                .map(|offset| lower_bound + offset),
        }
    }

    /// Selects a unit for an item and occupies its space.
    ///
    /// # Parameters
    /// * `catalog` - The capacity catalog, mutated on success
    /// * `item_size` - Size of the item, strictly positive
    ///
    /// # Returns
    /// The chosen unit id, `CoreError::NoFitFound` if no unit qualifies,
    /// `CoreError::Validation` for a malformed size.
    pub fn select(
        &self,
        catalog: &mut CapacityCatalog,
        item_size: f64,
    ) -> Result<UnitId, CoreError> {
        validation::validate_positive(item_size, "Size").map_err(ValidationError::InvalidSize)?;

        let idx = self
            .find(catalog, item_size)
            .ok_or_else(|| CoreError::NoFitFound {
                subject: "item".to_string(),
                size: item_size,
            })?;

        // `find` returned an index into this same catalog.
        let unit = catalog
            .unit_at_mut(idx)
            .ok_or_else(|| CoreError::NoFitFound {
                subject: "item".to_string(),
                size: item_size,
            })?;
        unit.occupy(item_size)?;
        Ok(unit.id())
    }
}
