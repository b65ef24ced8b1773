// 🧾 Record Model - the shapes each pipeline stage reads and writes
//
// RawRecord → CanonicalExpenseRecord (flagged, enriched, validated in place)
//           → AggregatedGroup

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

// ============================================================================
// RAW RECORD
// ============================================================================

/// RawRecord - one source row, keyed by the column names the file used
///
/// A key present in `values` means the column existed in the source file;
/// a `None` value means the cell was empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub values: HashMap<String, Option<String>>,

    /// Origin file name. `None` only for rows built without provenance.
    pub source_file: Option<String>,

    /// 1-based data row within the origin file (header excluded)
    pub line_number: usize,
}

impl RawRecord {
    pub fn new(source_file: impl Into<String>, line_number: usize) -> Self {
        RawRecord {
            values: HashMap::new(),
            source_file: Some(source_file.into()),
            line_number,
        }
    }

    /// Builder pattern: add a cell. Empty or whitespace-only cells become null.
    pub fn with_value(mut self, column: &str, value: &str) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: &str) {
        let trimmed = value.trim();
        let cell = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self.values.insert(column.trim().to_string(), cell);
    }

    /// Look up a column by name, ignoring case and surrounding whitespace.
    ///
    /// Returns `None` when the column is absent, `Some(None)` when it is
    /// present but the cell is empty.
    pub fn column(&self, name: &str) -> Option<Option<&str>> {
        let wanted = name.trim();
        if let Some(v) = self.values.get(wanted) {
            return Some(v.as_deref());
        }
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v.as_deref())
    }
}

// ============================================================================
// CANONICAL EXPENSE RECORD
// ============================================================================

/// CanonicalExpenseRecord - uniform 8-field expense row plus the flags and
/// registry attributes added by later stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalExpenseRecord {
    // Canonical fields
    pub registry_id: Option<String>,
    pub tax_id: Option<String>,
    pub legal_name: Option<String>,
    pub year: Option<String>,
    pub quarter: Option<String>,
    pub expense_value: f64,
    pub suspicious_value_flag: bool,
    pub duplicate_flag: bool,

    // Set by the registry enricher
    pub missing_registry_flag: bool,
    pub modality: Option<String>,
    pub state_code: Option<String>,

    // Set by the tax-id validator
    pub invalid_tax_id_flag: bool,
    pub invalid_name_flag: bool,
}

impl CanonicalExpenseRecord {
    pub fn new(
        registry_id: Option<String>,
        tax_id: Option<String>,
        legal_name: Option<String>,
        year: Option<String>,
        quarter: Option<String>,
        expense_value: f64,
    ) -> Self {
        CanonicalExpenseRecord {
            registry_id,
            tax_id,
            legal_name,
            year,
            quarter,
            expense_value,
            ..Default::default()
        }
    }

    /// Expense value with -0.0 folded into 0.0 so equal amounts compare equal bitwise
    pub fn expense_bits(&self) -> u64 {
        if self.expense_value == 0.0 {
            0.0f64.to_bits()
        } else {
            self.expense_value.to_bits()
        }
    }

    /// SHA-256 over every canonical field value. Two records with the same
    /// fingerprint are exact duplicates. Flags are derived from the values,
    /// so they are left out.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [
            &self.registry_id,
            &self.tax_id,
            &self.legal_name,
            &self.year,
            &self.quarter,
        ] {
            match field {
                Some(v) => {
                    hasher.update(b"S");
                    hasher.update(v.as_bytes());
                }
                None => hasher.update(b"N"),
            }
            hasher.update([0x1f]);
        }
        hasher.update(self.expense_bits().to_be_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// (RegistryId, Year, Quarter, ExpenseValue) key for logical duplicates
    pub fn logical_key(&self) -> (Option<&str>, Option<&str>, Option<&str>, u64) {
        (
            self.registry_id.as_deref(),
            self.year.as_deref(),
            self.quarter.as_deref(),
            self.expense_bits(),
        )
    }

    /// No quality, registry or validation flag set
    pub fn is_fully_valid(&self) -> bool {
        !(self.suspicious_value_flag
            || self.duplicate_flag
            || self.missing_registry_flag
            || self.invalid_tax_id_flag
            || self.invalid_name_flag)
    }
}

// ============================================================================
// REGISTRY ENTRY
// ============================================================================

/// RegistryEntry - one operator from the official registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub registry_id: String,
    pub tax_id: Option<String>,
    pub legal_name: Option<String>,
    pub modality: Option<String>,
    pub state_code: Option<String>,
}

// ============================================================================
// AGGREGATED GROUP
// ============================================================================

/// AggregatedGroup - spend statistics for one (LegalName, StateCode) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedGroup {
    pub legal_name: Option<String>,
    pub state_code: Option<String>,
    pub total_expense: f64,
    pub mean_expense: f64,
    /// Sample standard deviation; `None` for groups with fewer than 2 records
    pub std_dev_expense: Option<f64>,
    pub record_count: usize,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: f64) -> CanonicalExpenseRecord {
        CanonicalExpenseRecord::new(
            Some("123".to_string()),
            None,
            Some("Operadora A".to_string()),
            Some("2025".to_string()),
            Some("1T".to_string()),
            value,
        )
    }

    #[test]
    fn test_raw_record_empty_cell_is_null() {
        let raw = RawRecord::new("1T2025.csv", 1)
            .with_value("REG_ANS", "123")
            .with_value("CNPJ", "   ");

        assert_eq!(raw.column("REG_ANS"), Some(Some("123")));
        assert_eq!(raw.column("CNPJ"), Some(None));
        assert_eq!(raw.column("VL_SALDO_FINAL"), None);
    }

    #[test]
    fn test_raw_record_column_lookup_ignores_case() {
        let raw = RawRecord::new("1T2025.csv", 1).with_value(" reg_ans ", "42");
        assert_eq!(raw.column("REG_ANS"), Some(Some("42")));
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = record(500.0);
        let b = record(500.0);
        let c = record(500.01);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_null_from_empty() {
        let mut a = record(1.0);
        let mut b = record(1.0);
        a.tax_id = None;
        b.tax_id = Some(String::new());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        assert_eq!(record(0.0).expense_bits(), record(-0.0).expense_bits());
        assert_eq!(record(0.0).fingerprint(), record(-0.0).fingerprint());
    }

    #[test]
    fn test_fully_valid() {
        let mut r = record(10.0);
        assert!(r.is_fully_valid());
        r.invalid_name_flag = true;
        assert!(!r.is_fully_valid());
    }
}
