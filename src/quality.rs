// 🔍 Quality Flagger - suspicious values and duplicate records
//
// Two ordered passes over the whole canonical set:
//   1. SuspiciousValueFlag: ExpenseValue <= 0 or not a number
//   2. DuplicateFlag: exact duplicate OR same (RegistryId, Year, Quarter, ExpenseValue)
//
// Duplicate detection reads field values only, never the flags. Every member
// of a duplicate group is flagged, so the relation is symmetric.

use crate::records::CanonicalExpenseRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, info};

// ============================================================================
// DUPLICATE RULE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateRule {
    /// All canonical field values identical
    ExactMatch,

    /// Same RegistryId, Year, Quarter and ExpenseValue. One operator can
    /// legitimately repeat within a period (several ledger accounts), so this
    /// marks a suspicion rather than a certainty.
    LogicalKey,
}

impl DuplicateRule {
    pub fn name(&self) -> &str {
        match self {
            DuplicateRule::ExactMatch => "exact match",
            DuplicateRule::LogicalKey => "registry/period/value",
        }
    }
}

/// Indices of records sharing one duplicate key (always two or more)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub rule: DuplicateRule,
    pub members: Vec<usize>,
}

// ============================================================================
// QUALITY SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub total_records: usize,
    pub suspicious_count: usize,
    pub negative_count: usize,
    pub zero_count: usize,
    pub exact_duplicate_count: usize,
    pub logical_duplicate_count: usize,
    pub duplicate_count: usize,
}

impl QualitySummary {
    pub fn summary(&self) -> String {
        format!(
            "{} records: {} suspicious ({} negative, {} zero), {} duplicates ({} exact, {} by registry/period/value)",
            self.total_records,
            self.suspicious_count,
            self.negative_count,
            self.zero_count,
            self.duplicate_count,
            self.exact_duplicate_count,
            self.logical_duplicate_count
        )
    }
}

// ============================================================================
// QUALITY FLAGGER
// ============================================================================

#[derive(Debug, Default)]
pub struct QualityFlagger;

impl QualityFlagger {
    pub fn new() -> Self {
        QualityFlagger
    }

    /// Run both passes in order, mutating the flags in place
    pub fn flag(&self, records: &mut [CanonicalExpenseRecord]) -> QualitySummary {
        let mut summary = QualitySummary {
            total_records: records.len(),
            ..Default::default()
        };

        // Pass 1: suspicious values
        for record in records.iter_mut() {
            record.suspicious_value_flag = is_suspicious(record.expense_value);
            if record.suspicious_value_flag {
                summary.suspicious_count += 1;
            }
            if record.expense_value < 0.0 {
                summary.negative_count += 1;
            } else if record.expense_value == 0.0 {
                summary.zero_count += 1;
            }
        }

        // Pass 2: duplicates, both rules over the full set, OR-combined
        let exact = self.rule_members(records, DuplicateRule::ExactMatch);
        let logical = self.rule_members(records, DuplicateRule::LogicalKey);

        for (idx, record) in records.iter_mut().enumerate() {
            record.duplicate_flag = exact[idx] || logical[idx];
            if exact[idx] {
                summary.exact_duplicate_count += 1;
            }
            if logical[idx] {
                summary.logical_duplicate_count += 1;
            }
            if record.duplicate_flag {
                summary.duplicate_count += 1;
            }
        }

        info!(
            suspicious = summary.suspicious_count,
            duplicates = summary.duplicate_count,
            "Quality flagging finished"
        );
        summary
    }

    fn rule_members(&self, records: &[CanonicalExpenseRecord], rule: DuplicateRule) -> Vec<bool> {
        let groups = self.find_duplicates(records, rule);
        debug!(rule = rule.name(), groups = groups.len(), "Duplicate rule evaluated");
        flagged_members(records.len(), &groups)
    }

    /// Group records by the rule's key; groups of one are not duplicates.
    /// Groups come out in order of first member.
    pub fn find_duplicates(
        &self,
        records: &[CanonicalExpenseRecord],
        rule: DuplicateRule,
    ) -> Vec<DuplicateGroup> {
        let groups = match rule {
            DuplicateRule::ExactMatch => group_by_key(records, |r| r.fingerprint()),
            DuplicateRule::LogicalKey => group_by_key(records, |r| r.logical_key()),
        };

        groups
            .into_iter()
            .filter(|members| members.len() > 1)
            .map(|members| DuplicateGroup { rule, members })
            .collect()
    }
}

/// Suspicious when not strictly positive, or not a number at all
pub fn is_suspicious(value: f64) -> bool {
    !value.is_finite() || value <= 0.0
}

fn group_by_key<'a, K, F>(records: &'a [CanonicalExpenseRecord], key: F) -> Vec<Vec<usize>>
where
    K: Eq + Hash,
    F: Fn(&'a CanonicalExpenseRecord) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (i, record) in records.iter().enumerate() {
        let slot = *index.entry(key(record)).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }

    groups
}

fn flagged_members(len: usize, groups: &[DuplicateGroup]) -> Vec<bool> {
    let mut flags = vec![false; len];
    for group in groups {
        for &i in &group.members {
            flags[i] = true;
        }
    }
    flags
}

// ============================================================================
// TESTS
// ============================================================================
