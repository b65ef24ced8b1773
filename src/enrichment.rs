// 🔗 Registry Enricher - left join of expense records against the registry
//
// On a match the registry is authoritative: TaxId and LegalName are
// overwritten, even with null. No match → MissingRegistryFlag, fields untouched.

use crate::records::CanonicalExpenseRecord;
use crate::registry::OperatorRegistry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub total_records: usize,
    pub matched: usize,
    pub unmatched: usize,
}

impl EnrichmentSummary {
    /// Fraction of records without a registry match (0.0 for an empty set)
    pub fn unmatched_rate(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.unmatched as f64 / self.total_records as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records: {} matched, {} without registry ({:.2}%)",
            self.total_records,
            self.matched,
            self.unmatched,
            self.unmatched_rate() * 100.0
        )
    }
}

pub struct RegistryEnricher<'a> {
    registry: &'a OperatorRegistry,
}

impl<'a> RegistryEnricher<'a> {
    pub fn new(registry: &'a OperatorRegistry) -> Self {
        RegistryEnricher { registry }
    }

    pub fn enrich(&self, records: &mut [CanonicalExpenseRecord]) -> EnrichmentSummary {
        let mut summary = EnrichmentSummary {
            total_records: records.len(),
            ..Default::default()
        };

        for record in records.iter_mut() {
            let entry = record
                .registry_id
                .as_deref()
                .and_then(|id| self.registry.get(id));

            match entry {
                Some(entry) => {
                    record.tax_id = entry.tax_id.clone();
                    record.legal_name = entry.legal_name.clone();
                    record.modality = entry.modality.clone();
                    record.state_code = entry.state_code.clone();
                    record.missing_registry_flag = false;
                    summary.matched += 1;
                }
                None => {
                    record.missing_registry_flag = true;
                    summary.unmatched += 1;
                }
            }
        }

        if summary.unmatched > 0 {
            warn!(
                unmatched = summary.unmatched,
                rate = %format!("{:.2}%", summary.unmatched_rate() * 100.0),
                "Records without registry match"
            );
        }
        info!(matched = summary.matched, "Registry enrichment finished");

        summary
    }
}

// ============================================================================
// TESTS
// ============================================================================
