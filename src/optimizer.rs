//! Load optimization for outbound carriers.
//!
//! This module picks the subset of candidate items that fills a carrier as
//! closely as possible without exceeding its capacity ceiling:
//! - Candidates are sorted by size, largest first, so the bound prunes early
//! - A depth-first include/exclude search explores feasible subsets
//! - Branches that would overshoot the ceiling are never entered
//! - An exact fill ends the whole search at once
//!
//! Sums are compared against the ceiling within `EPSILON_GENERAL`, so a
//! load like 0.2 + 0.1 counts as filling a ceiling of 0.3.
//!
//! The search is exponential in the number of candidates in the worst case.
//! Callers are expected to bound the candidate count.

use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{Item, ValidationError};
use crate::types::{EPSILON_GENERAL, validation};

/// Counters collected while searching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SearchStats {
    /// Number of search nodes visited, including the root.
    pub calls: u64,
    /// Number of branches skipped because they would overshoot the ceiling.
    pub pruned: u64,
    /// Whether the search ended on an exact fill.
    pub exact_match: bool,
}

/// Result of a load optimization.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadPlan {
    /// Chosen items, in the order the search selected them (largest first).
    pub items: Vec<Item>,
    pub total_size: f64,
    pub ceiling: f64,
    pub stats: SearchStats,
}

impl LoadPlan {
    /// Returns true when no combination of candidates fits.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Fill ratio of the ceiling in percent.
    pub fn utilization_percent(&self) -> f64 {
        if self.ceiling <= 0.0 {
            return 0.0;
        }
        (self.total_size / self.ceiling) * 100.0
    }

    pub fn tracking_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.tracking_id.clone()).collect()
    }
}

/// Events emitted during the search, suitable for live progress streams.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum OptimizerEvent {
    /// A better feasible load was found.
    Improved { total_size: f64, item_count: usize },
    /// A load filling the ceiling exactly was found; the search stops.
    ExactMatch { total_size: f64, item_count: usize },
    /// The search is done.
    Finished {
        total_size: f64,
        item_count: usize,
        calls: u64,
    },
}

/// Finds the best load for a carrier.
///
/// # Parameters
/// * `candidates` - Items eligible for the shipment
/// * `ceiling` - Capacity available on the carrier
///
/// # Returns
/// The best `LoadPlan` found, possibly empty. `Err` if the ceiling is not a
/// positive finite number.
///
/// # Examples
/// ```
/// use stow_it_now::model::Item;
/// use stow_it_now::optimizer::optimize_load;
///
/// let candidates = vec![
///     Item::new("P005", 5.0, "40004", false).unwrap(),
///     Item::new("P007", 25.0, "40004", false).unwrap(),
/// ];
/// let plan = optimize_load(candidates, 500.0).unwrap();
/// assert_eq!(plan.total_size, 30.0);
/// ```
pub fn optimize_load(candidates: Vec<Item>, ceiling: f64) -> Result<LoadPlan, ValidationError> {
    optimize_load_with_progress(candidates, ceiling, |_| {})
}

/// Like `optimize_load`, with a callback for every improvement.
pub fn optimize_load_with_progress(
    candidates: Vec<Item>,
    ceiling: f64,
    mut on_event: impl FnMut(&OptimizerEvent),
) -> Result<LoadPlan, ValidationError> {
    validation::validate_positive(ceiling, "Capacity ceiling")
        .map_err(ValidationError::InvalidCapacity)?;

    let mut candidates = candidates;
    // Largest first; stable, so equal sizes keep their query order.
    candidates.sort_by(|a, b| b.size.total_cmp(&a.size));

    let (best, best_size, stats) = {
        let mut search = Search {
            sizes: candidates.iter().map(|c| c.size).collect(),
            ceiling,
            current: Vec::with_capacity(candidates.len()),
            best: Vec::new(),
            best_size: 0.0,
            done: false,
            stats: SearchStats::default(),
            on_event: &mut on_event,
        };
        search.explore(0, 0.0);
        (search.best, search.best_size, search.stats)
    };

    on_event(&OptimizerEvent::Finished {
        total_size: best_size,
        item_count: best.len(),
        calls: stats.calls,
    });

    let mut slots: Vec<Option<Item>> = candidates.into_iter().map(Some).collect();
    let items = best
        .iter()
        .filter_map(|&idx| slots.get_mut(idx).and_then(Option::take))
        .collect();

    Ok(LoadPlan {
        items,
        total_size: best_size,
        ceiling,
        stats,
    })
}

/// Backtracking state. Selections are kept as indices into the sorted
/// candidate list.
struct Search<'a, F: FnMut(&OptimizerEvent)> {
    sizes: Vec<f64>,
    ceiling: f64,
    current: Vec<usize>,
    best: Vec<usize>,
    best_size: f64,
    done: bool,
    stats: SearchStats,
    on_event: &'a mut F,
}

impl<F: FnMut(&OptimizerEvent)> Search<'_, F> {
    fn explore(&mut self, index: usize, current_size: f64) {
        self.stats.calls += 1;

        if !self.current.is_empty() && (current_size - self.ceiling).abs() <= EPSILON_GENERAL {
            self.record_best(current_size);
            self.done = true;
            self.stats.exact_match = true;
            (self.on_event)(&OptimizerEvent::ExactMatch {
                total_size: current_size,
                item_count: self.best.len(),
            });
            return;
        }

        if current_size > self.best_size {
            self.record_best(current_size);
            (self.on_event)(&OptimizerEvent::Improved {
                total_size: current_size,
                item_count: self.best.len(),
            });
        }

        for i in index..self.sizes.len() {
            let next_size = current_size + self.sizes[i];
            if next_size > self.ceiling + EPSILON_GENERAL {
                self.stats.pruned += 1;
                continue;
            }

            self.current.push(i);
            self.explore(i + 1, next_size);
            self.current.pop();

            if self.done {
                return;
            }
        }
    }

    fn record_best(&mut self, size: f64) {
        self.best.clone_from(&self.current);
        self.best_size = size;
    }
}
