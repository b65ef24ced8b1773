// 📊 Aggregator - spend per (LegalName, StateCode)
//
// Only records without registry linkage are excluded; every other flag is
// informational here. Groups are sorted by TotalExpense descending with a
// stable sort, so ties keep the order in which groups were first seen.

use crate::records::{AggregatedGroup, CanonicalExpenseRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{info, warn};

// ============================================================================
// AGGREGATOR
// ============================================================================

#[derive(Debug, Default)]
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Aggregator
    }

    pub fn aggregate(&self, records: &[CanonicalExpenseRecord]) -> Vec<AggregatedGroup> {
        let mut index: HashMap<(Option<&str>, Option<&str>), usize> = HashMap::new();
        let mut buckets: Vec<((Option<&str>, Option<&str>), Vec<f64>)> = Vec::new();

        for record in records.iter().filter(|r| !r.missing_registry_flag) {
            let key = (record.legal_name.as_deref(), record.state_code.as_deref());
            let slot = *index.entry(key).or_insert_with(|| {
                buckets.push((key, Vec::new()));
                buckets.len() - 1
            });
            buckets[slot].1.push(record.expense_value);
        }

        let mut groups: Vec<AggregatedGroup> = buckets
            .into_iter()
            .map(|((legal_name, state_code), values)| {
                let stats = GroupStats::from_values(&values);
                AggregatedGroup {
                    legal_name: legal_name.map(str::to_string),
                    state_code: state_code.map(str::to_string),
                    total_expense: stats.total,
                    mean_expense: stats.mean,
                    std_dev_expense: stats.std_dev,
                    record_count: values.len(),
                }
            })
            .collect();

        groups.sort_by(|a, b| {
            b.total_expense
                .partial_cmp(&a.total_expense)
                .unwrap_or(Ordering::Equal)
        });

        info!(groups = groups.len(), "Aggregation finished");
        groups
    }
}

struct GroupStats {
    total: f64,
    mean: f64,
    std_dev: Option<f64>,
}

impl GroupStats {
    /// Sum, mean and sample standard deviation (n - 1). A single value has
    /// no deviation, which is reported as `None`, not 0.
    fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        let total: f64 = values.iter().sum();
        let mean = if n == 0 { 0.0 } else { total / n as f64 };

        let std_dev = if n < 2 {
            None
        } else {
            let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            Some((squares / (n - 1) as f64).sqrt())
        };

        GroupStats { total, mean, std_dev }
    }
}

// ============================================================================
// RECONCILIATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    /// Group totals match the record-level total within tolerance
    Balanced { total: f64 },

    Discrepancy {
        /// Sum of ExpenseValue over records with registry linkage
        expected: f64,
        /// Sum of TotalExpense over all groups
        actual: f64,
        difference: f64,
    },
}

impl ReconciliationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ReconciliationResult::Balanced { .. })
    }

    pub fn difference(&self) -> f64 {
        match self {
            ReconciliationResult::Balanced { .. } => 0.0,
            ReconciliationResult::Discrepancy { difference, .. } => *difference,
        }
    }
}

/// Compare aggregated totals with the record-level total. A discrepancy is
/// logged and returned, never an error.
pub fn reconcile(
    records: &[CanonicalExpenseRecord],
    groups: &[AggregatedGroup],
    tolerance: f64,
) -> ReconciliationResult {
    let expected: f64 = records
        .iter()
        .filter(|r| !r.missing_registry_flag)
        .map(|r| r.expense_value)
        .sum();
    let actual: f64 = groups.iter().map(|g| g.total_expense).sum();
    let difference = actual - expected;

    if difference.abs() <= tolerance {
        info!(total = expected, "Aggregation reconciled");
        ReconciliationResult::Balanced { total: expected }
    } else {
        warn!(expected, actual, difference, "Aggregation does not reconcile");
        ReconciliationResult::Discrepancy {
            expected,
            actual,
            difference,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
