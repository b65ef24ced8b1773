// ✅ Tax-ID Validator stage - InvalidTaxIdFlag and InvalidNameFlag
//
// Runs after enrichment, so it checks the registry's values for matched
// records and the source values for unmatched ones.

use crate::records::CanonicalExpenseRecord;
use crate::tax_id::{check_tax_id, TaxIdCheck};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

// ============================================================================
// VALIDATION SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_records: usize,
    pub invalid_tax_id_count: usize,
    pub invalid_name_count: usize,
    /// Failing step → record count
    pub tax_id_failures: BTreeMap<String, usize>,
    /// Records with no quality, registry or validation flag
    pub fully_valid_count: usize,
}

impl ValidationSummary {
    pub fn fully_valid_percentage(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.fully_valid_count as f64 / self.total_records as f64 * 100.0
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records: {} invalid tax ids, {} invalid names, {} fully valid ({:.1}%)",
            self.total_records,
            self.invalid_tax_id_count,
            self.invalid_name_count,
            self.fully_valid_count,
            self.fully_valid_percentage()
        )
    }
}

// ============================================================================
// TAX-ID VALIDATOR
// ============================================================================

#[derive(Debug, Default)]
pub struct TaxIdValidator;

impl TaxIdValidator {
    pub fn new() -> Self {
        TaxIdValidator
    }

    pub fn validate(&self, records: &mut [CanonicalExpenseRecord]) -> ValidationSummary {
        let mut summary = ValidationSummary {
            total_records: records.len(),
            ..Default::default()
        };

        for record in records.iter_mut() {
            let check = check_tax_id(record.tax_id.as_deref());
            record.invalid_tax_id_flag = !check.is_valid();
            record.invalid_name_flag = !is_valid_legal_name(record.legal_name.as_deref());

            if check != TaxIdCheck::Valid {
                summary.invalid_tax_id_count += 1;
                *summary
                    .tax_id_failures
                    .entry(check.description().to_string())
                    .or_insert(0) += 1;
            }
            if record.invalid_name_flag {
                summary.invalid_name_count += 1;
            }
            if record.is_fully_valid() {
                summary.fully_valid_count += 1;
            }
        }

        info!(
            invalid_tax_ids = summary.invalid_tax_id_count,
            invalid_names = summary.invalid_name_count,
            fully_valid = summary.fully_valid_count,
            "Validation finished"
        );

        summary
    }
}

/// Invalid when null, blank, or the literal "nan" left by upstream
/// missing-value serialization
pub fn is_valid_legal_name(name: Option<&str>) -> bool {
    match name.map(str::trim) {
        None => false,
        Some(n) => !n.is_empty() && !n.eq_ignore_ascii_case("nan"),
    }
}

// ============================================================================
// TESTS
// ============================================================================
