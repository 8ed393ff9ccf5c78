//! Ingestion pipeline: a FIFO queue feeding the best-fit selector.
//!
//! Items are processed strictly in arrival order. An item whose assignment
//! cannot be persisted goes back to the front of the queue with its space
//! released, so it is retried before anything that arrived later. An item
//! with no fitting unit is dropped and reported instead.

use std::collections::VecDeque;

use crate::catalog::CapacityCatalog;
use crate::error::CoreError;
use crate::model::{Item, StorageUnit, UnitId};
use crate::persistence::PersistenceError;
use crate::selector::BestFitSelector;

/// Result of one `process_one` step.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The queue was empty; nothing happened.
    Empty,
    /// The item was placed and the placement persisted.
    Assigned { unit_id: UnitId, item: Item },
    /// No unit could take the item; it has left the queue.
    NoFit { item: Item },
    /// Persisting the placement failed; the space was released and the item
    /// is back at the head of the queue.
    Requeued {
        tracking_id: String,
        cause: PersistenceError,
    },
}

impl ProcessOutcome {
    pub fn is_assigned(&self) -> bool {
        matches!(self, ProcessOutcome::Assigned { .. })
    }
}

/// FIFO queue plus the selector it feeds.
#[derive(Debug, Default)]
pub struct IngestionPipeline {
    queue: VecDeque<Item>,
    selector: BestFitSelector,
}

impl IngestionPipeline {
    pub fn new(selector: BestFitSelector) -> Self {
        Self {
            queue: VecDeque::new(),
            selector,
        }
    }

    /// Appends an item to the tail of the queue.
    pub fn ingest(&mut self, item: Item) {
        self.queue.push_back(item);
    }

    /// Pops the head item and tries to place it.
    ///
    /// `persist` is called with the item and the unit it was placed into
    /// (already carrying the new occupancy). If it fails, the occupancy is
    /// released and the item is put back at the front of the queue.
    ///
    /// # Returns
    /// A [`ProcessOutcome`] for every expected result. `Err` only for a
    /// capacity invariant breach, in which case the item is also requeued.
    pub fn process_one<F>(
        &mut self,
        catalog: &mut CapacityCatalog,
        persist: F,
    ) -> Result<ProcessOutcome, CoreError>
    where
        F: FnOnce(&Item, &StorageUnit) -> Result<(), PersistenceError>,
    {
        let Some(item) = self.queue.pop_front() else {
            return Ok(ProcessOutcome::Empty);
        };

        let unit_id = match self.selector.select(catalog, item.size) {
            Ok(unit_id) => unit_id,
            Err(CoreError::NoFitFound { .. }) | Err(CoreError::Validation(_)) => {
                return Ok(ProcessOutcome::NoFit { item });
            }
            Err(err) => {
                self.queue.push_front(item);
                return Err(err);
            }
        };

        let persisted = match catalog.get(unit_id) {
            Some(unit) => persist(&item, unit),
            None => Err(PersistenceError::MissingRecord(format!(
                "storage unit {}",
                unit_id
            ))),
        };

        match persisted {
            Ok(()) => Ok(ProcessOutcome::Assigned { unit_id, item }),
            Err(cause) => {
                let tracking_id = self.requeue(catalog, unit_id, item)?;
                Ok(ProcessOutcome::Requeued { tracking_id, cause })
            }
        }
    }

    /// Puts `item` back at the head and releases its space in `unit_id`.
    /// The item stays queued even when the release fails.
    fn requeue(
        &mut self,
        catalog: &mut CapacityCatalog,
        unit_id: UnitId,
        item: Item,
    ) -> Result<String, CoreError> {
        let tracking_id = item.tracking_id.clone();
        let size = item.size;
        self.queue.push_front(item);
        catalog.update_occupancy(unit_id, -size)?;
        Ok(tracking_id)
    }

    /// Items waiting in the queue, head first.
    pub fn queued(&self) -> impl Iterator<Item = &Item> {
        self.queue.iter()
    }

    pub fn queued_ids(&self) -> Vec<String> {
        self.queue.iter().map(|i| i.tracking_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn selector(&self) -> &BestFitSelector {
        &self.selector
    }
}
