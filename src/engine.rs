//! The warehouse context: one owned instance of all allocation state.
//!
//! A `Warehouse` holds the capacity catalog, the carriers, the ingestion
//! pipeline and the load ledger, together with the store they are persisted
//! to. Construct it once and hand it (or a [`SharedWarehouse`]) to callers.
//! Every mutating sequence runs to completion under `&mut self`, so wrapping
//! it in a mutex makes "select, occupy, persist" and "optimize, relocate,
//! persist" single critical sections.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use utoipa::ToSchema;

use crate::audit::{self, AuditRecord, AuditStatus};
use crate::catalog::CapacityCatalog;
use crate::error::{CoreError, EntityKind};
use crate::ledger::{LedgerStage, LoadLedger};
use crate::model::{Carrier, CarrierId, CarrierStatus, Item, StorageUnit, ValidationError};
use crate::optimizer::{OptimizerEvent, SearchStats, optimize_load_with_progress};
use crate::persistence::{
    AuditSink, ItemRecord, Relocation, ShipmentBatch, ShipmentMove, UnitRecord, WarehouseStore,
};
use crate::pipeline::{IngestionPipeline, ProcessOutcome};
use crate::selector::{BestFitSelector, SelectionPolicy};
use crate::types::{Capacitated, Occupiable, validation};

/// Tuning knobs of the warehouse engine.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// How the selector treats a full lower-bound candidate.
    pub selection_policy: SelectionPolicy,
    /// Upper bound on the candidates handed to the load optimizer.
    pub max_shipment_candidates: usize,
}

impl EngineConfig {
    pub const DEFAULT_MAX_SHIPMENT_CANDIDATES: usize = 32;

    /// Creates a builder for a custom configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            selection_policy: SelectionPolicy::default(),
            max_shipment_candidates: Self::DEFAULT_MAX_SHIPMENT_CANDIDATES,
        }
    }
}

/// Builder for `EngineConfig`.
#[derive(Clone, Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Sets the selection policy.
    pub fn selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.config.selection_policy = policy;
        self
    }

    /// Sets the candidate limit for shipments.
    pub fn max_shipment_candidates(mut self, max: usize) -> Self {
        self.config.max_shipment_candidates = max;
        self
    }

    /// Builds the final configuration.
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Summary of a committed shipment.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ShipmentReport {
    pub carrier_id: CarrierId,
    /// Loaded items in load order.
    pub loaded: Vec<String>,
    pub total_size: f64,
    /// Capacity that was available on the carrier before loading.
    pub ceiling: f64,
    /// Carrier load after the shipment.
    pub carrier_load: f64,
    pub stats: SearchStats,
}

/// Result of preparing a shipment.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ShipmentOutcome {
    /// No stored item matches the destination.
    NoCandidates,
    /// Candidates exist but none fits on the carrier.
    NoFit { candidates: usize },
    /// The shipment was persisted and committed.
    Loaded(ShipmentReport),
}

/// Point-in-time view of the engine state.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct WarehouseStatus {
    pub queue_length: usize,
    /// Queued tracking ids, head first.
    pub queued: Vec<String>,
    /// Load ledger, oldest commit first.
    pub ledger: Vec<String>,
    pub units: Vec<StorageUnit>,
    pub carriers: Vec<Carrier>,
    pub selection_policy: String,
}

/// Thread-safe warehouse handle.
pub type SharedWarehouse<S> = Arc<Mutex<Warehouse<S>>>;

/// Owned allocation state plus the store behind it.
#[derive(Debug)]
pub struct Warehouse<S> {
    store: S,
    catalog: CapacityCatalog,
    carriers: BTreeMap<CarrierId, Carrier>,
    pipeline: IngestionPipeline,
    ledger: LoadLedger,
    config: EngineConfig,
}

impl<S> Warehouse<S>
where
    S: WarehouseStore + AuditSink,
{
    /// Loads units and carriers from `store` and builds the catalog.
    pub fn open(store: S, config: EngineConfig) -> Result<Self, CoreError> {
        let catalog = load_catalog(&store)?;
        let carriers = load_carriers(&store)?;

        tracing::info!(
            units = catalog.len(),
            carriers = carriers.len(),
            policy = %config.selection_policy,
            "Warehouse initialized"
        );

        Ok(Self {
            store,
            catalog,
            carriers,
            pipeline: IngestionPipeline::new(BestFitSelector::new(config.selection_policy)),
            ledger: LoadLedger::new(),
            config,
        })
    }

    /// Rebuilds the catalog from the store.
    pub fn reload_catalog(&mut self) -> Result<(), CoreError> {
        self.catalog = load_catalog(&self.store)?;
        tracing::debug!(units = self.catalog.len(), "Catalog reloaded");
        Ok(())
    }

    /// Validates an item and appends it to the ingestion queue.
    ///
    /// A tracking id that is already queued or known to the store is
    /// rejected with `ValidationError::DuplicateItem`.
    pub fn ingest(&mut self, item: Item) -> Result<(), CoreError> {
        item.validate()?;
        let queued = self
            .pipeline
            .queued()
            .any(|q| q.tracking_id == item.tracking_id);
        if queued || self.store.item(&item.tracking_id)?.is_some() {
            tracing::warn!(tracking_id = %item.tracking_id, "Duplicate tracking id rejected");
            return Err(ValidationError::DuplicateItem(item.tracking_id).into());
        }
        tracing::info!(
            tracking_id = %item.tracking_id,
            size = item.size,
            queue_length = self.pipeline.len() + 1,
            "Item ingested"
        );
        audit::record(
            &mut self.store,
            AuditRecord::new(&item, AuditStatus::Ingested),
        );
        self.pipeline.ingest(item);
        Ok(())
    }

    /// Places the item at the head of the queue.
    pub fn process_one(&mut self) -> Result<ProcessOutcome, CoreError> {
        let store = &mut self.store;
        let outcome = self
            .pipeline
            .process_one(&mut self.catalog, |item, unit| {
                store.persist_relocation(&Relocation::assign(item, unit))
            })
            .inspect_err(|err| {
                tracing::error!(error = %err, "Processing aborted");
            })?;

        match &outcome {
            ProcessOutcome::Empty => {
                tracing::debug!("Ingestion queue empty");
            }
            ProcessOutcome::Assigned { unit_id, item } => {
                tracing::info!(
                    tracking_id = %item.tracking_id,
                    unit_id = *unit_id,
                    size = item.size,
                    "Item assigned"
                );
                audit::record(
                    &mut self.store,
                    AuditRecord::new(item, AuditStatus::Assigned).in_unit(*unit_id),
                );
            }
            ProcessOutcome::NoFit { item } => {
                tracing::warn!(
                    tracking_id = %item.tracking_id,
                    size = item.size,
                    "No suitable storage unit found"
                );
                audit::record(&mut self.store, AuditRecord::new(item, AuditStatus::Failed));
            }
            ProcessOutcome::Requeued { tracking_id, cause } => {
                tracing::warn!(
                    tracking_id = %tracking_id,
                    error = %cause,
                    "Assignment rolled back, item requeued"
                );
                if let Some(item) = self.pipeline.queued().next() {
                    let record = AuditRecord::new(item, AuditStatus::Failed);
                    audit::record(&mut self.store, record);
                }
            }
        }

        Ok(outcome)
    }

    /// Ingests an item and immediately processes the queue head.
    ///
    /// The head is the new item only if the queue was empty before.
    pub fn ingest_and_process(&mut self, item: Item) -> Result<ProcessOutcome, CoreError> {
        self.ingest(item)?;
        self.process_one()
    }

    /// Loads the best subset of stored items for `destination` onto a
    /// carrier.
    pub fn prepare_shipment(
        &mut self,
        carrier_id: CarrierId,
        destination: &str,
    ) -> Result<ShipmentOutcome, CoreError> {
        self.prepare_shipment_with_progress(carrier_id, destination, |_| {})
    }

    /// Like `prepare_shipment`, reporting optimizer progress to `on_event`.
    ///
    /// In-memory state (ledger, carrier load, unit occupancy) only changes
    /// after the store has accepted the whole shipment.
    pub fn prepare_shipment_with_progress(
        &mut self,
        carrier_id: CarrierId,
        destination: &str,
        on_event: impl FnMut(&OptimizerEvent),
    ) -> Result<ShipmentOutcome, CoreError> {
        validation::validate_non_empty(destination, "Destination")
            .map_err(ValidationError::MissingField)?;
        let ceiling = self
            .carrier(carrier_id)
            .ok_or_else(|| CoreError::not_found(EntityKind::Carrier, carrier_id))?
            .remaining_capacity();

        tracing::info!(carrier_id, destination, ceiling, "Preparing shipment");

        let candidates = self.store.candidate_items(destination)?;
        if candidates.is_empty() {
            tracing::info!(carrier_id, destination, "No items stored for destination");
            return Ok(ShipmentOutcome::NoCandidates);
        }
        let candidate_count = candidates.len();
        if candidate_count > self.config.max_shipment_candidates {
            return Err(ValidationError::TooManyCandidates {
                count: candidate_count,
                max: self.config.max_shipment_candidates,
            }
            .into());
        }
        if let Some(unknown) = candidates.iter().find(|c| !self.catalog.contains(c.unit_id)) {
            return Err(CoreError::not_found(EntityKind::StorageUnit, unknown.unit_id));
        }
        if ceiling <= 0.0 {
            tracing::warn!(carrier_id, "Carrier has no remaining capacity");
            return Ok(ShipmentOutcome::NoFit {
                candidates: candidate_count,
            });
        }

        let origins: HashMap<String, _> = candidates
            .iter()
            .map(|c| (c.item.tracking_id.clone(), c.unit_id))
            .collect();
        let plan = optimize_load_with_progress(
            candidates.into_iter().map(|c| c.item).collect(),
            ceiling,
            on_event,
        )?;

        if plan.is_empty() {
            tracing::warn!(
                carrier_id,
                candidates = candidate_count,
                "No candidate fits on the carrier"
            );
            return Ok(ShipmentOutcome::NoFit {
                candidates: candidate_count,
            });
        }

        let moves = plan
            .items
            .iter()
            .map(|item| {
                let from_unit_id = origins
                    .get(&item.tracking_id)
                    .copied()
                    .ok_or_else(|| CoreError::not_found(EntityKind::Item, &item.tracking_id))?;
                Ok(ShipmentMove {
                    tracking_id: item.tracking_id.clone(),
                    from_unit_id,
                    size: item.size,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let stage: LedgerStage = plan.items.iter().map(|i| i.tracking_id.as_str()).collect();
        let loaded_carrier = self.loaded_carrier(carrier_id, plan.total_size)?;
        let carrier_load = loaded_carrier.current_load();
        let batch = ShipmentBatch {
            carrier_id,
            moves,
            current_load: carrier_load,
            status: loaded_carrier.status(),
        };

        if let Err(err) = self.store.persist_shipment(&batch) {
            tracing::error!(
                carrier_id,
                error = %err,
                "Shipment rolled back, nothing was loaded"
            );
            for item in &plan.items {
                let record = AuditRecord::new(item, AuditStatus::Failed).on_carrier(carrier_id);
                audit::record(&mut self.store, record);
            }
            return Err(err.into());
        }

        // Nothing below can fail: every source unit was checked against the
        // catalog and the carrier update was computed up front.
        for mv in &batch.moves {
            if let Some(unit) = self.catalog.get_mut(mv.from_unit_id) {
                unit.free(mv.size);
            }
        }
        self.carriers.insert(carrier_id, loaded_carrier);
        self.ledger.apply(stage);
        for item in &plan.items {
            let record = AuditRecord::new(item, AuditStatus::Loaded).on_carrier(carrier_id);
            audit::record(&mut self.store, record);
        }

        tracing::info!(
            carrier_id,
            items = plan.item_count(),
            total_size = plan.total_size,
            ceiling,
            calls = plan.stats.calls,
            "Shipment loaded"
        );

        Ok(ShipmentOutcome::Loaded(ShipmentReport {
            carrier_id,
            loaded: plan.tracking_ids(),
            total_size: plan.total_size,
            ceiling,
            carrier_load,
            stats: plan.stats,
        }))
    }

    /// The carrier as it will look once `amount` is loaded onto it.
    fn loaded_carrier(&self, carrier_id: CarrierId, amount: f64) -> Result<Carrier, CoreError> {
        let mut carrier = self
            .carrier(carrier_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(EntityKind::Carrier, carrier_id))?;
        carrier.occupy(amount)?;
        carrier.set_status(CarrierStatus::LoadingInProgress);
        Ok(carrier)
    }

    /// Current stored state of an item.
    pub fn item_status(&self, tracking_id: &str) -> Result<ItemRecord, CoreError> {
        self.store
            .item(tracking_id)?
            .ok_or_else(|| CoreError::not_found(EntityKind::Item, tracking_id))
    }

    pub fn status(&self) -> WarehouseStatus {
        WarehouseStatus {
            queue_length: self.pipeline.len(),
            queued: self.pipeline.queued_ids(),
            ledger: self.ledger.snapshot().to_vec(),
            units: self.catalog.units().to_vec(),
            carriers: self.carriers.values().cloned().collect(),
            selection_policy: self.config.selection_policy.to_string(),
        }
    }

    /// Wraps the warehouse into a shareable single-writer handle.
    pub fn into_shared(self) -> SharedWarehouse<S> {
        Arc::new(Mutex::new(self))
    }
}

impl<S> Warehouse<S> {
    pub fn catalog(&self) -> &CapacityCatalog {
        &self.catalog
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    pub fn ledger(&self) -> &LoadLedger {
        &self.ledger
    }

    pub fn carrier(&self, carrier_id: CarrierId) -> Option<&Carrier> {
        self.carriers.get(&carrier_id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

fn load_catalog(store: &impl WarehouseStore) -> Result<CapacityCatalog, CoreError> {
    let units = store
        .load_units()?
        .into_iter()
        .map(UnitRecord::into_unit)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CapacityCatalog::load(units)?)
}

fn load_carriers(
    store: &impl WarehouseStore,
) -> Result<BTreeMap<CarrierId, Carrier>, CoreError> {
    let mut carriers = BTreeMap::new();
    for record in store.load_carriers()? {
        let carrier = record.into_carrier()?;
        let id = carrier.id();
        if carriers.insert(id, carrier).is_some() {
            return Err(ValidationError::DuplicateCarrier(id).into());
        }
    }
    Ok(carriers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{CarrierRecord, InMemoryStore, PersistenceError};
    use std::thread;

    fn warehouse() -> Warehouse<InMemoryStore> {
        Warehouse::open(InMemoryStore::with_demo_data(), EngineConfig::default()).unwrap()
    }

    fn item(id: &str, size: f64, destination: &str) -> Item {
        Item::new(id, size, destination, false).unwrap()
    }

    fn occupancy(wh: &Warehouse<InMemoryStore>, unit_id: u32) -> f64 {
        wh.catalog().get(unit_id).unwrap().occupancy()
    }

    /// Demo run. P005 meets a nearly full 101 as its lower bound and is
    /// rejected, which leaves 102 free for P006.
    fn stocked_warehouse() -> Warehouse<InMemoryStore> {
        let mut wh = warehouse();
        for (id, size, dest) in [
            ("P001", 11.0, "10001"),
            ("P002", 4.0, "20002"),
            ("P003", 16.0, "30003"),
            ("P005", 5.0, "40004"),
            ("P006", 10.0, "40004"),
            ("P007", 25.0, "40004"),
        ] {
            wh.ingest(item(id, size, dest)).unwrap();
        }
        let outcomes: Vec<_> = (0..6).map(|_| wh.process_one().unwrap()).collect();
        assert!(matches!(outcomes[0], ProcessOutcome::Assigned { unit_id: 201, .. }));
        assert!(matches!(outcomes[1], ProcessOutcome::Assigned { unit_id: 101, .. }));
        assert!(matches!(outcomes[2], ProcessOutcome::Assigned { unit_id: 202, .. }));
        assert!(matches!(outcomes[3], ProcessOutcome::NoFit { .. }));
        assert!(matches!(outcomes[4], ProcessOutcome::Assigned { unit_id: 102, .. }));
        assert!(matches!(outcomes[5], ProcessOutcome::Assigned { unit_id: 301, .. }));
        wh
    }

    #[test]
    fn open_builds_sorted_catalog_and_carriers() {
        let wh = warehouse();
        let ids: Vec<_> = wh.catalog().units().iter().map(|u| u.id()).collect();
        assert_eq!(ids, vec![101, 102, 201, 202, 301, 302]);
        assert_eq!(wh.carrier(2).unwrap().capacity(), 1200.0);
    }

    #[test]
    fn open_rejects_invalid_unit_records() {
        let store = InMemoryStore::new().with_unit(UnitRecord::new(1, -5.0, "X"));
        let err = Warehouse::open(store, EngineConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn reload_catalog_is_idempotent() {
        let mut wh = stocked_warehouse();
        wh.reload_catalog().unwrap();
        let first = wh.catalog().clone();
        wh.reload_catalog().unwrap();
        assert_eq!(&first, wh.catalog());
        assert_eq!(occupancy(&wh, 201), 11.0);
    }

    #[test]
    fn ingest_rejects_malformed_item_without_queueing() {
        let mut wh = warehouse();
        let bad = Item {
            tracking_id: "P1".into(),
            size: -1.0,
            destination: "10001".into(),
            fragile: false,
        };
        assert!(matches!(wh.ingest(bad), Err(CoreError::Validation(_))));
        assert!(wh.pipeline().is_empty());
        assert!(wh.store().audit_log().is_empty());
    }

    #[test]
    fn persistence_failure_restores_occupancy_and_requeues_at_front() {
        let mut wh = warehouse();
        wh.ingest(item("A", 4.0, "10001")).unwrap();
        wh.ingest(item("B", 12.0, "10001")).unwrap();
        wh.ingest(item("C", 30.0, "10001")).unwrap();
        assert!(wh.process_one().unwrap().is_assigned());

        let before: Vec<f64> = wh.catalog().units().iter().map(|u| u.occupancy()).collect();
        wh.store_mut().fail_next_relocation("connection reset");
        let outcome = wh.process_one().unwrap();

        assert!(matches!(
            outcome,
            ProcessOutcome::Requeued {
                cause: PersistenceError::TransactionAborted(_),
                ..
            }
        ));
        assert_eq!(wh.pipeline().queued_ids(), vec!["B", "C"]);
        let after: Vec<f64> = wh.catalog().units().iter().map(|u| u.occupancy()).collect();
        assert_eq!(before, after);

        // The retry goes through and takes B first.
        assert!(matches!(
            wh.process_one().unwrap(),
            ProcessOutcome::Assigned { ref item, .. } if item.tracking_id == "B"
        ));
    }

    #[test]
    fn process_on_empty_queue_reports_empty() {
        let mut wh = warehouse();
        assert_eq!(wh.process_one().unwrap(), ProcessOutcome::Empty);
    }

    #[test]
    fn audit_trail_records_transitions() {
        let mut wh = warehouse();
        wh.ingest_and_process(item("P001", 11.0, "10001")).unwrap();
        wh.ingest_and_process(item("HUGE", 500.0, "10001")).unwrap();

        let trail: Vec<_> = wh
            .store()
            .audit_log()
            .iter()
            .map(|r| (r.tracking_id.as_str(), r.status, r.unit_id))
            .collect();
        assert_eq!(
            trail,
            vec![
                ("P001", AuditStatus::Ingested, None),
                ("P001", AuditStatus::Assigned, Some(201)),
                ("HUGE", AuditStatus::Ingested, None),
                ("HUGE", AuditStatus::Failed, None),
            ]
        );
    }

    #[test]
    fn audit_failure_does_not_abort_assignment() {
        let mut wh = warehouse();
        wh.store_mut().fail_audit(true);
        let outcome = wh.ingest_and_process(item("P001", 11.0, "10001")).unwrap();
        assert!(outcome.is_assigned());
        assert!(wh.store().audit_log().is_empty());
        assert_eq!(
            wh.item_status("P001").unwrap().current_unit_id,
            Some(201)
        );
    }

    #[test]
    fn duplicate_tracking_id_is_rejected_at_ingest() {
        let mut wh = warehouse();
        assert!(
            wh.ingest_and_process(item("P001", 11.0, "10001"))
                .unwrap()
                .is_assigned()
        );

        // Already stored.
        let err = wh.ingest(item("P001", 30.0, "10001")).unwrap_err();
        assert_eq!(
            err,
            CoreError::Validation(ValidationError::DuplicateItem("P001".into()))
        );
        assert!(wh.pipeline().is_empty());
        assert_eq!(occupancy(&wh, 201), 11.0);
        assert_eq!(occupancy(&wh, 301), 0.0);

        // Still waiting in the queue.
        wh.ingest(item("P002", 4.0, "10001")).unwrap();
        assert!(matches!(
            wh.ingest(item("P002", 4.0, "10001")),
            Err(CoreError::Validation(ValidationError::DuplicateItem(_)))
        ));
        assert_eq!(wh.pipeline().queued_ids(), vec!["P002"]);
        wh.process_one().unwrap();

        // Shipping frees every unit the accepted items occupy.
        let outcome = wh.prepare_shipment(2, "10001").unwrap();
        let ShipmentOutcome::Loaded(report) = outcome else {
            panic!("expected a loaded shipment, got {:?}", outcome);
        };
        assert_eq!(report.total_size, 15.0);
        assert_eq!(wh.catalog().total_occupancy(), 0.0);
    }

    #[test]
    fn loaded_carrier_overflow_leaves_state_untouched() {
        let mut wh = stocked_warehouse();
        let err = wh.loaded_carrier(1, 600.0).unwrap_err();
        assert!(matches!(err, CoreError::CapacityInvariant(_)));
        assert_eq!(wh.carrier(1).unwrap().current_load(), 0.0);
        assert_eq!(wh.carrier(1).unwrap().status(), CarrierStatus::ReadyToLoad);
        assert!(wh.ledger().is_empty());

        let carrier = wh.loaded_carrier(1, 35.0).unwrap();
        assert_eq!(carrier.current_load(), 35.0);
        assert_eq!(wh.carrier(1).unwrap().current_load(), 0.0);
        assert!(matches!(
            wh.loaded_carrier(9, 1.0),
            Err(CoreError::NotFound { .. })
        ));
        // The ledger only changes once the whole shipment has committed.
        assert!(matches!(
            wh.prepare_shipment(1, "40004").unwrap(),
            ShipmentOutcome::Loaded(_)
        ));
        assert_eq!(wh.ledger().snapshot(), ["P007", "P006"]);
    }

    #[test]
    fn shipment_loads_optimal_subset_and_updates_state() {
        let mut wh = stocked_warehouse();

        let outcome = wh.prepare_shipment(1, "40004").unwrap();
        let ShipmentOutcome::Loaded(report) = outcome else {
            panic!("expected a loaded shipment, got {:?}", outcome);
        };
        assert_eq!(report.loaded, vec!["P007", "P006"]);
        assert_eq!(report.total_size, 35.0);
        assert_eq!(report.ceiling, 500.0);
        assert_eq!(report.carrier_load, 35.0);

        assert_eq!(wh.ledger().snapshot(), ["P007", "P006"]);
        assert_eq!(occupancy(&wh, 102), 0.0);
        assert_eq!(occupancy(&wh, 301), 0.0);
        let carrier = wh.carrier(1).unwrap();
        assert_eq!(carrier.current_load(), 35.0);
        assert_eq!(carrier.status(), CarrierStatus::LoadingInProgress);
        assert_eq!(wh.item_status("P006").unwrap().current_carrier_id, Some(1));
        assert!(wh.item_status("P005").is_err());

        let second = wh.prepare_shipment(2, "10001").unwrap();
        assert!(matches!(second, ShipmentOutcome::Loaded(_)));
        assert_eq!(wh.ledger().snapshot(), ["P007", "P006", "P001"]);
        assert_eq!(occupancy(&wh, 201), 0.0);

        let loaded = wh
            .store()
            .audit_log()
            .iter()
            .filter(|r| r.status == AuditStatus::Loaded)
            .count();
        assert_eq!(loaded, 3);
    }

    #[test]
    fn shipment_persistence_failure_changes_nothing() {
        let mut wh = stocked_warehouse();
        let catalog_before = wh.catalog().clone();
        wh.store_mut().fail_next_shipment("serialization failure");

        let err = wh.prepare_shipment(1, "40004").unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));
        assert!(wh.ledger().is_empty());
        assert_eq!(wh.catalog(), &catalog_before);
        assert_eq!(wh.carrier(1).unwrap().current_load(), 0.0);
        assert_eq!(wh.item_status("P006").unwrap().current_unit_id, Some(102));

        // Nothing stuck: the same shipment goes through on retry.
        assert!(matches!(
            wh.prepare_shipment(1, "40004").unwrap(),
            ShipmentOutcome::Loaded(_)
        ));
    }

    #[test]
    fn shipment_outcomes_for_missing_or_unfit_candidates() {
        let store = InMemoryStore::with_demo_data().with_carrier(CarrierRecord::new(3, 3.0, "VAN-3"));
        let mut wh = Warehouse::open(store, EngineConfig::default()).unwrap();
        wh.ingest_and_process(item("P005", 5.0, "40004")).unwrap();

        assert_eq!(
            wh.prepare_shipment(3, "99999").unwrap(),
            ShipmentOutcome::NoCandidates
        );
        assert_eq!(
            wh.prepare_shipment(3, "40004").unwrap(),
            ShipmentOutcome::NoFit { candidates: 1 }
        );
        assert!(wh.ledger().is_empty());
    }

    #[test]
    fn shipment_input_errors() {
        let mut wh = stocked_warehouse();
        assert!(matches!(
            wh.prepare_shipment(42, "40004"),
            Err(CoreError::NotFound {
                kind: EntityKind::Carrier,
                ..
            })
        ));
        assert!(matches!(
            wh.prepare_shipment(1, "  "),
            Err(CoreError::Validation(ValidationError::MissingField(_)))
        ));
    }

    #[test]
    fn shipment_respects_candidate_limit() {
        let config = EngineConfig::builder().max_shipment_candidates(1).build();
        let mut wh = Warehouse::open(InMemoryStore::with_demo_data(), config).unwrap();
        wh.ingest_and_process(item("P005", 5.0, "40004")).unwrap();
        wh.ingest_and_process(item("P007", 25.0, "40004")).unwrap();

        assert!(matches!(
            wh.prepare_shipment(1, "40004"),
            Err(CoreError::Validation(ValidationError::TooManyCandidates {
                count: 2,
                max: 1
            }))
        ));
    }

    #[test]
    fn shipment_ceiling_is_remaining_carrier_capacity() {
        let store = InMemoryStore::new()
            .with_unit(UnitRecord::new(1, 50.0, "A"))
            .with_carrier(CarrierRecord::new(9, 30.0, "VAN-9"));
        let mut wh = Warehouse::open(store, EngineConfig::default()).unwrap();
        wh.ingest_and_process(item("X1", 20.0, "D")).unwrap();
        assert!(matches!(
            wh.prepare_shipment(9, "D").unwrap(),
            ShipmentOutcome::Loaded(_)
        ));

        wh.ingest_and_process(item("X2", 15.0, "D")).unwrap();
        // Only 10 left on the carrier.
        assert_eq!(
            wh.prepare_shipment(9, "D").unwrap(),
            ShipmentOutcome::NoFit { candidates: 1 }
        );
    }

    #[test]
    fn shipment_progress_events_end_with_finished() {
        let mut wh = stocked_warehouse();
        let mut events = Vec::new();
        wh.prepare_shipment_with_progress(1, "40004", |evt| events.push(evt.clone()))
            .unwrap();
        assert!(matches!(
            events.last(),
            Some(OptimizerEvent::Finished { item_count: 2, .. })
        ));
    }

    #[test]
    fn status_reflects_queue_and_ledger() {
        let mut wh = stocked_warehouse();
        wh.ingest(item("P010", 1.0, "10001")).unwrap();
        wh.prepare_shipment(1, "40004").unwrap();

        let status = wh.status();
        assert_eq!(status.queue_length, 1);
        assert_eq!(status.queued, vec!["P010"]);
        assert_eq!(status.ledger, vec!["P007", "P006"]);
        assert_eq!(status.units.len(), 6);
        assert_eq!(status.selection_policy, "first-qualifying");
    }

    #[test]
    fn item_status_unknown_is_not_found() {
        let wh = warehouse();
        assert!(matches!(
            wh.item_status("NOPE"),
            Err(CoreError::NotFound {
                kind: EntityKind::Item,
                ..
            })
        ));
    }

    #[test]
    fn concurrent_processing_never_overfills_units() {
        let config = EngineConfig::builder()
            .selection_policy(SelectionPolicy::NextAvailable)
            .build();
        let shared = Warehouse::open(InMemoryStore::with_demo_data(), config)
            .unwrap()
            .into_shared();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for n in 0..25 {
                        let size = f64::from((worker * 7 + n * 3) % 12 + 1);
                        let mut wh = shared.lock().unwrap();
                        if n % 5 == 0 {
                            wh.store_mut().fail_next_relocation("injected");
                        }
                        wh.ingest(item(&format!("W{}-{}", worker, n), size, "10001"))
                            .unwrap();
                        drop(wh);

                        let mut wh = shared.lock().unwrap();
                        wh.process_one().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let wh = shared.lock().unwrap();
        for unit in wh.catalog().units() {
            assert!(unit.occupancy() <= unit.capacity());
            let stored = wh.store().unit_record(unit.id()).unwrap().occupancy;
            assert_eq!(unit.occupancy(), stored, "unit {} drifted from store", unit.id());
        }
    }
}
