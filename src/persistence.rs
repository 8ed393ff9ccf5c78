//! Contracts with the durable store, plus an in-memory implementation.
//!
//! The engine never talks to a database directly. It reads its startup
//! state, writes relocations and shipments, and queries shipment candidates
//! through [`WarehouseStore`]; audit entries go through [`AuditSink`].
//! Every write is all-or-nothing so the engine can roll back its in-memory
//! state when a write fails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::audit::AuditRecord;
use crate::model::{
    Carrier, CarrierId, CarrierStatus, Item, StorageUnit, UnitId, ValidationError,
};
use crate::types::Capacitated;

/// Failure reported by the store. The transaction was not applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistenceError {
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
    #[error("record not found: {0}")]
    MissingRecord(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Stored configuration of a storage unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: UnitId,
    pub capacity: f64,
    pub occupancy: f64,
    pub location: Option<String>,
}

impl UnitRecord {
    pub fn new(id: UnitId, capacity: f64, location: impl Into<String>) -> Self {
        Self {
            id,
            capacity,
            occupancy: 0.0,
            location: Some(location.into()),
        }
    }

    pub fn into_unit(self) -> Result<StorageUnit, ValidationError> {
        let unit = StorageUnit::new(self.id, self.capacity, self.occupancy)?;
        Ok(match self.location {
            Some(location) => unit.with_location(location),
            None => unit,
        })
    }
}

/// Stored state of a carrier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarrierRecord {
    pub id: CarrierId,
    pub capacity: f64,
    pub current_load: f64,
    pub status: CarrierStatus,
    pub label: Option<String>,
}

impl CarrierRecord {
    pub fn new(id: CarrierId, capacity: f64, label: impl Into<String>) -> Self {
        Self {
            id,
            capacity,
            current_load: 0.0,
            status: CarrierStatus::ReadyToLoad,
            label: Some(label.into()),
        }
    }

    pub fn into_carrier(self) -> Result<Carrier, ValidationError> {
        let carrier = Carrier::new(self.id, self.capacity, self.current_load)?
            .with_status(self.status);
        Ok(match self.label {
            Some(label) => carrier.with_label(label),
            None => carrier,
        })
    }
}

/// Stored state of an item, including where it currently is.
///
/// At most one of `current_unit_id` and `current_carrier_id` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ItemRecord {
    pub tracking_id: String,
    pub size: f64,
    pub destination: String,
    pub fragile: bool,
    pub current_unit_id: Option<UnitId>,
    pub current_carrier_id: Option<CarrierId>,
}

impl ItemRecord {
    pub fn item(&self) -> Item {
        Item {
            tracking_id: self.tracking_id.clone(),
            size: self.size,
            destination: self.destination.clone(),
            fragile: self.fragile,
        }
    }
}

/// An item placed into a storage unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Relocation {
    pub tracking_id: String,
    pub size: f64,
    pub destination: String,
    pub fragile: bool,
    pub unit_id: UnitId,
    /// Occupancy of the unit after the placement.
    pub unit_occupancy: f64,
}

impl Relocation {
    pub fn assign(item: &Item, unit: &StorageUnit) -> Self {
        Self {
            tracking_id: item.tracking_id.clone(),
            size: item.size,
            destination: item.destination.clone(),
            fragile: item.fragile,
            unit_id: unit.id(),
            unit_occupancy: unit.occupancy(),
        }
    }
}

/// One item leaving a unit for the carrier of a shipment.
#[derive(Clone, Debug, PartialEq)]
pub struct ShipmentMove {
    pub tracking_id: String,
    pub from_unit_id: UnitId,
    pub size: f64,
}

/// All moves of a shipment, applied as one transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct ShipmentBatch {
    pub carrier_id: CarrierId,
    pub moves: Vec<ShipmentMove>,
    pub current_load: f64,
    pub status: CarrierStatus,
}

/// An item currently resident in a storage unit.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredItem {
    pub item: Item,
    pub unit_id: UnitId,
}

/// Durable store behind the engine.
pub trait WarehouseStore {
    fn load_units(&self) -> Result<Vec<UnitRecord>, PersistenceError>;

    fn load_carriers(&self) -> Result<Vec<CarrierRecord>, PersistenceError>;

    /// Creates the item in its unit and stores the unit's new occupancy.
    /// A tracking id that is already stored aborts the transaction.
    fn persist_relocation(&mut self, relocation: &Relocation) -> Result<(), PersistenceError>;

    /// Moves every item of the batch onto the carrier and updates the
    /// carrier's load and status. On failure none of it is applied.
    fn persist_shipment(&mut self, batch: &ShipmentBatch) -> Result<(), PersistenceError>;

    /// Items resident in any storage unit whose destination matches.
    fn candidate_items(&self, destination: &str) -> Result<Vec<StoredItem>, PersistenceError>;

    fn item(&self, tracking_id: &str) -> Result<Option<ItemRecord>, PersistenceError>;
}

/// Append-only audit log.
pub trait AuditSink {
    fn append(&mut self, record: AuditRecord) -> Result<(), PersistenceError>;
}

/// Faults armed for the next matching call.
#[derive(Debug, Default)]
struct Faults {
    relocation: Option<String>,
    shipment: Option<String>,
    audit: bool,
}

/// Process-local store used by the service binary and by tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    units: BTreeMap<UnitId, UnitRecord>,
    carriers: BTreeMap<CarrierId, CarrierRecord>,
    items: BTreeMap<String, ItemRecord>,
    audit: Vec<AuditRecord>,
    faults: Faults,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with six bins (5 to 100) and two carriers (500, 1200).
    pub fn with_demo_data() -> Self {
        Self::new()
            .with_unit(UnitRecord::new(101, 5.0, "A01S01"))
            .with_unit(UnitRecord::new(102, 10.0, "A01S02"))
            .with_unit(UnitRecord::new(201, 15.0, "A05S10"))
            .with_unit(UnitRecord::new(202, 20.0, "A05S11"))
            .with_unit(UnitRecord::new(301, 50.0, "B10S05"))
            .with_unit(UnitRecord::new(302, 100.0, "B10S06"))
            .with_carrier(CarrierRecord::new(1, 500.0, "LOGI-001"))
            .with_carrier(CarrierRecord::new(2, 1200.0, "LOGI-002"))
    }

    pub fn with_unit(mut self, unit: UnitRecord) -> Self {
        self.units.insert(unit.id, unit);
        self
    }

    pub fn with_carrier(mut self, carrier: CarrierRecord) -> Self {
        self.carriers.insert(carrier.id, carrier);
        self
    }

    /// Makes the next `persist_relocation` fail.
    pub fn fail_next_relocation(&mut self, reason: impl Into<String>) {
        self.faults.relocation = Some(reason.into());
    }

    /// Makes the next `persist_shipment` fail.
    pub fn fail_next_shipment(&mut self, reason: impl Into<String>) {
        self.faults.shipment = Some(reason.into());
    }

    /// Makes every audit append fail while set.
    pub fn fail_audit(&mut self, failing: bool) {
        self.faults.audit = failing;
    }

    pub fn audit_log(&self) -> &[AuditRecord] {
        &self.audit
    }

    pub fn unit_record(&self, unit_id: UnitId) -> Option<&UnitRecord> {
        self.units.get(&unit_id)
    }

    pub fn carrier_record(&self, carrier_id: CarrierId) -> Option<&CarrierRecord> {
        self.carriers.get(&carrier_id)
    }
}

impl WarehouseStore for InMemoryStore {
    fn load_units(&self) -> Result<Vec<UnitRecord>, PersistenceError> {
        Ok(self.units.values().cloned().collect())
    }

    fn load_carriers(&self) -> Result<Vec<CarrierRecord>, PersistenceError> {
        Ok(self.carriers.values().cloned().collect())
    }

    fn persist_relocation(&mut self, relocation: &Relocation) -> Result<(), PersistenceError> {
        if let Some(reason) = self.faults.relocation.take() {
            return Err(PersistenceError::TransactionAborted(reason));
        }

        if self.items.contains_key(&relocation.tracking_id) {
            return Err(PersistenceError::TransactionAborted(format!(
                "item {} is already stored",
                relocation.tracking_id
            )));
        }

        let unit = self.units.get_mut(&relocation.unit_id).ok_or_else(|| {
            PersistenceError::MissingRecord(format!("storage unit {}", relocation.unit_id))
        })?;
        unit.occupancy = relocation.unit_occupancy;

        self.items.insert(
            relocation.tracking_id.clone(),
            ItemRecord {
                tracking_id: relocation.tracking_id.clone(),
                size: relocation.size,
                destination: relocation.destination.clone(),
                fragile: relocation.fragile,
                current_unit_id: Some(relocation.unit_id),
                current_carrier_id: None,
            },
        );
        Ok(())
    }

    fn persist_shipment(&mut self, batch: &ShipmentBatch) -> Result<(), PersistenceError> {
        if let Some(reason) = self.faults.shipment.take() {
            return Err(PersistenceError::TransactionAborted(reason));
        }

        // Validate the whole batch before touching anything.
        if !self.carriers.contains_key(&batch.carrier_id) {
            return Err(PersistenceError::MissingRecord(format!(
                "carrier {}",
                batch.carrier_id
            )));
        }
        for mv in &batch.moves {
            let record = self.items.get(&mv.tracking_id).ok_or_else(|| {
                PersistenceError::MissingRecord(format!("item {}", mv.tracking_id))
            })?;
            if record.current_unit_id != Some(mv.from_unit_id) {
                return Err(PersistenceError::TransactionAborted(format!(
                    "item {} is not in storage unit {}",
                    mv.tracking_id, mv.from_unit_id
                )));
            }
            if !self.units.contains_key(&mv.from_unit_id) {
                return Err(PersistenceError::MissingRecord(format!(
                    "storage unit {}",
                    mv.from_unit_id
                )));
            }
        }

        for mv in &batch.moves {
            if let Some(unit) = self.units.get_mut(&mv.from_unit_id) {
                unit.occupancy = (unit.occupancy - mv.size).max(0.0);
            }
            if let Some(record) = self.items.get_mut(&mv.tracking_id) {
                record.current_unit_id = None;
                record.current_carrier_id = Some(batch.carrier_id);
            }
        }
        if let Some(carrier) = self.carriers.get_mut(&batch.carrier_id) {
            carrier.current_load = batch.current_load;
            carrier.status = batch.status;
        }
        Ok(())
    }

    fn candidate_items(&self, destination: &str) -> Result<Vec<StoredItem>, PersistenceError> {
        Ok(self
            .items
            .values()
            .filter(|r| r.destination == destination)
            .filter_map(|r| {
                r.current_unit_id.map(|unit_id| StoredItem {
                    item: r.item(),
                    unit_id,
                })
            })
            .collect())
    }

    fn item(&self, tracking_id: &str) -> Result<Option<ItemRecord>, PersistenceError> {
        Ok(self.items.get(tracking_id).cloned())
    }
}

impl AuditSink for InMemoryStore {
    fn append(&mut self, record: AuditRecord) -> Result<(), PersistenceError> {
        if self.faults.audit {
            return Err(PersistenceError::Unavailable(
                "audit log rejected the write".to_string(),
            ));
        }
        self.audit.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStatus;

    fn relocation(id: &str, size: f64, unit_id: UnitId, occupancy: f64) -> Relocation {
        Relocation {
            tracking_id: id.to_string(),
            size,
            destination: "40004".to_string(),
            fragile: false,
            unit_id,
            unit_occupancy: occupancy,
        }
    }

    #[test]
    fn demo_data_seeds_units_and_carriers() {
        let store = InMemoryStore::with_demo_data();
        assert_eq!(store.load_units().unwrap().len(), 6);
        let carriers = store.load_carriers().unwrap();
        assert_eq!(carriers.len(), 2);
        assert_eq!(carriers[1].capacity, 1200.0);
    }

    #[test]
    fn relocation_creates_item_and_updates_unit() {
        let mut store = InMemoryStore::with_demo_data();
        store
            .persist_relocation(&relocation("P005", 5.0, 102, 5.0))
            .unwrap();
        let record = store.item("P005").unwrap().unwrap();
        assert_eq!(record.current_unit_id, Some(102));
        assert_eq!(store.unit_record(102).unwrap().occupancy, 5.0);
        assert_eq!(store.candidate_items("40004").unwrap().len(), 1);
        assert!(store.candidate_items("10001").unwrap().is_empty());
    }

    #[test]
    fn relocation_to_unknown_unit_fails() {
        let mut store = InMemoryStore::with_demo_data();
        let err = store
            .persist_relocation(&relocation("P1", 1.0, 999, 1.0))
            .unwrap_err();
        assert!(matches!(err, PersistenceError::MissingRecord(_)));
        assert!(store.item("P1").unwrap().is_none());
    }

    #[test]
    fn relocation_of_stored_item_is_aborted() {
        let mut store = InMemoryStore::with_demo_data();
        store
            .persist_relocation(&relocation("P001", 11.0, 201, 11.0))
            .unwrap();
        let err = store
            .persist_relocation(&relocation("P001", 30.0, 301, 30.0))
            .unwrap_err();
        assert!(matches!(err, PersistenceError::TransactionAborted(_)));
        assert_eq!(store.unit_record(301).unwrap().occupancy, 0.0);
        let record = store.item("P001").unwrap().unwrap();
        assert_eq!(record.size, 11.0);
        assert_eq!(record.current_unit_id, Some(201));
    }

    #[test]
    fn injected_relocation_fault_fires_once() {
        let mut store = InMemoryStore::with_demo_data();
        store.fail_next_relocation("deadlock");
        assert!(store
            .persist_relocation(&relocation("P1", 1.0, 101, 1.0))
            .is_err());
        assert!(store
            .persist_relocation(&relocation("P1", 1.0, 101, 1.0))
            .is_ok());
    }

    #[test]
    fn shipment_with_bad_move_applies_nothing() {
        let mut store = InMemoryStore::with_demo_data();
        store
            .persist_relocation(&relocation("P005", 5.0, 102, 5.0))
            .unwrap();
        let batch = ShipmentBatch {
            carrier_id: 1,
            moves: vec![
                ShipmentMove {
                    tracking_id: "P005".into(),
                    from_unit_id: 102,
                    size: 5.0,
                },
                ShipmentMove {
                    tracking_id: "GHOST".into(),
                    from_unit_id: 301,
                    size: 25.0,
                },
            ],
            current_load: 30.0,
            status: CarrierStatus::LoadingInProgress,
        };
        assert!(store.persist_shipment(&batch).is_err());
        assert_eq!(
            store.item("P005").unwrap().unwrap().current_unit_id,
            Some(102)
        );
        assert_eq!(store.carrier_record(1).unwrap().current_load, 0.0);
    }

    #[test]
    fn shipment_moves_items_onto_carrier() {
        let mut store = InMemoryStore::with_demo_data();
        store
            .persist_relocation(&relocation("P005", 5.0, 102, 5.0))
            .unwrap();
        let batch = ShipmentBatch {
            carrier_id: 1,
            moves: vec![ShipmentMove {
                tracking_id: "P005".into(),
                from_unit_id: 102,
                size: 5.0,
            }],
            current_load: 5.0,
            status: CarrierStatus::LoadingInProgress,
        };
        store.persist_shipment(&batch).unwrap();

        let record = store.item("P005").unwrap().unwrap();
        assert_eq!(record.current_unit_id, None);
        assert_eq!(record.current_carrier_id, Some(1));
        assert_eq!(store.unit_record(102).unwrap().occupancy, 0.0);
        let carrier = store.carrier_record(1).unwrap();
        assert_eq!(carrier.current_load, 5.0);
        assert_eq!(carrier.status, CarrierStatus::LoadingInProgress);
        assert!(store.candidate_items("40004").unwrap().is_empty());
    }

    #[test]
    fn audit_fault_rejects_appends() {
        let mut store = InMemoryStore::new();
        let item = Item::new("P1", 1.0, "10001", false).unwrap();
        store.fail_audit(true);
        assert!(store
            .append(AuditRecord::new(&item, AuditStatus::Ingested))
            .is_err());
        store.fail_audit(false);
        store
            .append(AuditRecord::new(&item, AuditStatus::Ingested))
            .unwrap();
        assert_eq!(store.audit_log().len(), 1);
    }

    #[test]
    fn records_convert_into_domain_types() {
        let unit = UnitRecord::new(201, 15.0, "A05S10").into_unit().unwrap();
        assert_eq!(unit.location(), Some("A05S10"));
        let bad = UnitRecord {
            occupancy: 20.0,
            ..UnitRecord::new(202, 15.0, "A05S11")
        };
        assert!(bad.into_unit().is_err());
        let carrier = CarrierRecord::new(2, 1200.0, "LOGI-002")
            .into_carrier()
            .unwrap();
        assert_eq!(carrier.remaining_capacity(), 1200.0);
    }
}
