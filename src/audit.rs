//! Audit trail of item state transitions.
//!
//! Recording is fire-and-forget: a failing sink is logged and otherwise
//! ignored, it never aborts the operation that produced the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CarrierId, Item, UnitId};
use crate::persistence::AuditSink;

/// Transition recorded for an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Ingested,
    Assigned,
    Loaded,
    Failed,
}

/// One append-only audit entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tracking_id: String,
    pub unit_id: Option<UnitId>,
    pub carrier_id: Option<CarrierId>,
    pub status: AuditStatus,
    pub size: f64,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(item: &Item, status: AuditStatus) -> Self {
        Self {
            tracking_id: item.tracking_id.clone(),
            unit_id: None,
            carrier_id: None,
            status,
            size: item.size,
            timestamp: Utc::now(),
        }
    }

    pub fn in_unit(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn on_carrier(mut self, carrier_id: CarrierId) -> Self {
        self.carrier_id = Some(carrier_id);
        self
    }
}

/// Appends `record` to `sink`, logging instead of propagating failures.
pub fn record(sink: &mut impl AuditSink, record: AuditRecord) {
    let tracking_id = record.tracking_id.clone();
    let status = record.status;
    if let Err(err) = sink.append(record) {
        tracing::warn!(
            tracking_id = %tracking_id,
            ?status,
            error = %err,
            "Failed to append audit record"
        );
    }
}
