//! Load ledger: the order in which items were committed onto carriers.
//!
//! Entries are only ever appended. The most recent entry is the last item
//! loaded, which is the first one to come off in an unwind.
//!
//! Entries are staged while a shipment is in flight and applied once the
//! store has confirmed the shipment, so the ledger never lists an item
//! without a durable relocation behind it.

/// Append-only LIFO record of committed item ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadLedger {
    entries: Vec<String>,
}

impl LoadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes one committed item id.
    pub fn commit(&mut self, tracking_id: impl Into<String>) {
        self.entries.push(tracking_id.into());
    }

    /// Appends every staged id, in staging order.
    pub fn apply(&mut self, stage: LedgerStage) {
        self.entries.extend(stage.pending);
    }

    /// Read-only view in commit order (oldest first).
    pub fn snapshot(&self) -> &[String] {
        &self.entries
    }

    /// The item committed last.
    pub fn most_recent(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ids waiting for a shipment to be confirmed. Dropping the stage discards
/// them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerStage {
    pending: Vec<String>,
}

impl LedgerStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, tracking_id: impl Into<String>) {
        self.pending.push(tracking_id.into());
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for LedgerStage {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            pending: iter.into_iter().map(Into::into).collect(),
        }
    }
}
