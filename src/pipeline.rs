// 🚚 Pipeline - sequential batch run over one complete record set
//
// Registry → Load → Normalize → Flag → Enrich → Validate → Aggregate → Export
//
// Each stage consumes the whole output of the previous one. The registry is
// loaded first so a missing or unparsable registry fails the run before any
// artifact is touched.

use crate::aggregation::{reconcile, Aggregator, ReconciliationResult};
use crate::config::PipelineConfig;
use crate::enrichment::{EnrichmentSummary, RegistryEnricher};
use crate::error::{PipelineError, Result};
use crate::export;
use crate::loader::{discover_source_files, LoadReport, Loader};
use crate::normalizer::Normalizer;
use crate::quality::{QualityFlagger, QualitySummary};
use crate::records::{AggregatedGroup, CanonicalExpenseRecord, RawRecord};
use crate::registry::OperatorRegistry;
use crate::validation::{TaxIdValidator, ValidationSummary};
use crate::VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// RUN REPORT
// ============================================================================

/// Groups kept in the report, highest total first
pub const TOP_GROUPS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub load: LoadReport,
    pub canonical_records: usize,
    pub quality: QualitySummary,
    pub registry_entries: usize,
    pub registry_duplicates_discarded: usize,
    pub enrichment: EnrichmentSummary,
    pub unmatched_rate: f64,
    pub validation: ValidationSummary,
    pub fully_valid_percentage: f64,
    pub group_count: usize,
    pub total_aggregated_expense: f64,
    pub top_groups: Vec<AggregatedGroup>,
    pub reconciliation: ReconciliationResult,
    pub artifacts: Vec<PathBuf>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "Run {}: {} records from {} files, {} fully valid ({:.1}%), {:.2}% without registry, {} groups, {}",
            self.run_id,
            self.canonical_records,
            self.load.files_loaded(),
            self.validation.fully_valid_count,
            self.fully_valid_percentage,
            self.unmatched_rate * 100.0,
            self.group_count,
            if self.reconciliation.is_balanced() {
                "reconciled".to_string()
            } else {
                format!("reconciliation off by {:.2}", self.reconciliation.difference())
            }
        )
    }
}

/// In-memory result of the processing stages, before anything is written
#[derive(Debug, Clone)]
pub struct ProcessedBatch {
    pub records: Vec<CanonicalExpenseRecord>,
    pub groups: Vec<AggregatedGroup>,
    pub quality: QualitySummary,
    pub enrichment: EnrichmentSummary,
    pub validation: ValidationSummary,
    pub reconciliation: ReconciliationResult,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Explicit files win; otherwise discover under `input.source_dir`
    pub fn resolve_inputs(&self, explicit: &[PathBuf]) -> Result<Vec<PathBuf>> {
        if !explicit.is_empty() {
            return Ok(explicit.to_vec());
        }

        let dir = self.config.input.source_dir.as_ref().ok_or_else(|| {
            PipelineError::NoInput("no files given and input.source_dir is not set".to_string())
        })?;

        let files = discover_source_files(dir, &self.config.input)?;
        if files.is_empty() {
            return Err(PipelineError::NoInput(format!(
                "no expense files found under {}",
                dir.display()
            )));
        }
        Ok(files)
    }

    /// Load the configured registry. Fatal when unset, missing or unparsable.
    pub fn load_registry(&self) -> Result<OperatorRegistry> {
        let path = self
            .config
            .registry
            .path
            .as_ref()
            .ok_or_else(|| PipelineError::Config("registry.path is not set".to_string()))?;
        OperatorRegistry::load(path, &self.config.registry)
    }

    /// Normalize, flag, enrich, validate and aggregate one complete batch
    pub fn process(&self, raw: &[RawRecord], registry: &OperatorRegistry) -> Result<ProcessedBatch> {
        let normalizer = Normalizer::new(
            &self.config.columns,
            &self.config.period,
            &self.config.normalize,
        )?;
        let mut records = normalizer.normalize(raw);

        let quality = QualityFlagger::new().flag(&mut records);
        let enrichment = RegistryEnricher::new(registry).enrich(&mut records);
        let validation = TaxIdValidator::new().validate(&mut records);

        let groups = Aggregator::new().aggregate(&records);
        let reconciliation = reconcile(&records, &groups, self.config.reconciliation.tolerance);

        Ok(ProcessedBatch {
            records,
            groups,
            quality,
            enrichment,
            validation,
            reconciliation,
        })
    }

    /// Full run over the given source files, writing every configured artifact
    pub fn run(&self, files: &[PathBuf]) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(run_id = %run_id, version = VERSION, files = files.len(), "Pipeline run started");

        let registry = self.load_registry()?;

        let batch = Loader::new(&self.config.input).load_files(files);
        info!("{}", batch.report.summary());

        let processed = self.process(&batch.records, &registry)?;
        info!("{}", processed.quality.summary());
        info!("{}", processed.enrichment.summary());
        info!("{}", processed.validation.summary());

        let artifacts = self.write_artifacts(&run_id, &processed)?;

        let mut report = RunReport {
            run_id,
            version: VERSION.to_string(),
            started_at,
            finished_at: Utc::now(),
            load: batch.report,
            canonical_records: processed.records.len(),
            registry_entries: registry.len(),
            registry_duplicates_discarded: registry.duplicates_discarded(),
            unmatched_rate: processed.enrichment.unmatched_rate(),
            fully_valid_percentage: processed.validation.fully_valid_percentage(),
            group_count: processed.groups.len(),
            total_aggregated_expense: processed.groups.iter().map(|g| g.total_expense).sum(),
            top_groups: processed.groups.iter().take(TOP_GROUPS).cloned().collect(),
            quality: processed.quality,
            enrichment: processed.enrichment,
            validation: processed.validation,
            reconciliation: processed.reconciliation,
            artifacts,
        };

        if let Some(name) = &self.config.output.report_file {
            let path = self.config.output.path_for(name);
            report.artifacts.push(path.clone());
            write_report(&path, &report)?;
        }

        info!("{}", report.summary());
        Ok(report)
    }

    fn write_artifacts(&self, run_id: &str, processed: &ProcessedBatch) -> Result<Vec<PathBuf>> {
        let output = &self.config.output;
        let mut written = Vec::new();

        let canonical = output.path_for(&output.canonical_file);
        export::write_canonical(&canonical, &processed.records, output.canonical_delimiter)?;
        written.push(canonical);

        let validated = output.path_for(&output.validated_file);
        export::write_validated(&validated, &processed.records, output.delimiter)?;
        written.push(validated);

        let aggregated = output.path_for(&output.aggregated_file);
        export::write_aggregated(&aggregated, &processed.groups, output.delimiter)?;
        written.push(aggregated);

        if let Some(name) = &output.enriched_file {
            let enriched = output.path_for(name);
            export::write_enriched(&enriched, &processed.records, output.delimiter)?;
            written.push(enriched);
        }

        if let Some(db_path) = &output.sqlite_path {
            self.store_in_database(db_path, run_id, processed)?;
            written.push(db_path.clone());
        }

        if let Some(name) = &output.archive_file {
            let archive = output.path_for(name);
            export::bundle_archive(&archive, &written_csv(&written))?;
            written.push(archive);
        }

        Ok(written)
    }

    #[cfg(feature = "sqlite")]
    fn store_in_database(&self, path: &Path, run_id: &str, processed: &ProcessedBatch) -> Result<()> {
        use crate::db;

        let mut conn = db::open_database(path)?;
        db::replace_artifacts(&mut conn, run_id, &processed.records, &processed.groups)?;

        let event = db::Event::new(
            "run_completed",
            "run",
            run_id,
            serde_json::json!({
                "records": processed.records.len(),
                "groups": processed.groups.len(),
                "fully_valid": processed.validation.fully_valid_count,
                "unmatched": processed.enrichment.unmatched,
                "reconciled": processed.reconciliation.is_balanced(),
            }),
            "operator-expenses",
        );
        db::insert_event(&conn, &event)?;
        Ok(())
    }

    #[cfg(not(feature = "sqlite"))]
    fn store_in_database(&self, path: &Path, _run_id: &str, _processed: &ProcessedBatch) -> Result<()> {
        Err(PipelineError::Config(format!(
            "output.sqlite_path is set ({}) but this build has no sqlite support",
            path.display()
        )))
    }
}

/// CSV artifacts only; the database file never goes into the bundle
fn written_csv(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .filter(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    if !report.reconciliation.is_balanced() {
        warn!(report = %path.display(), "Run report records a reconciliation discrepancy");
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RegistryEntry;
    use tempfile::TempDir;

    fn registry() -> OperatorRegistry {
        OperatorRegistry::from_entries(vec![
            RegistryEntry {
                registry_id: "123".to_string(),
                tax_id: Some("11222333000181".to_string()),
                legal_name: Some("Operadora A".to_string()),
                modality: Some("Cooperativa Médica".to_string()),
                state_code: Some("SP".to_string()),
            },
            RegistryEntry {
                registry_id: "456".to_string(),
                tax_id: Some("12345678000100".to_string()),
                legal_name: Some("nan".to_string()),
                modality: None,
                state_code: Some("RJ".to_string()),
            },
        ])
    }

    fn raw(file: &str, line: usize, reg: &str, value: &str) -> RawRecord {
        RawRecord::new(file, line)
            .with_value("REG_ANS", reg)
            .with_value("VL_SALDO_FINAL", value)
    }

    #[test]
    fn test_process_stage_order() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let rows = vec![
            raw("1T2025.csv", 1, "123", "100"),
            raw("1T2025.csv", 2, "123", "50"),
            raw("1T2025.csv", 3, "456", "-10"),
            raw("1T2025.csv", 4, "999", "70"),
        ];

        let batch = pipeline.process(&rows, &registry()).unwrap();

        assert_eq!(batch.records.len(), 4);
        assert_eq!(batch.quality.suspicious_count, 1);
        assert_eq!(batch.enrichment.unmatched, 1);
        assert!(batch.records[3].missing_registry_flag);

        // Enriched before validation: the registry's name "nan" is what gets checked
        assert!(batch.records[2].invalid_name_flag);
        assert!(!batch.records[0].invalid_tax_id_flag);
        assert!(batch.records[2].invalid_tax_id_flag);

        assert_eq!(batch.groups.len(), 2);
        assert_eq!(batch.groups[0].legal_name.as_deref(), Some("Operadora A"));
        assert_eq!(batch.groups[0].total_expense, 150.0);
        assert!(batch.reconciliation.is_balanced());
    }

    #[test]
    fn test_resolve_inputs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("1T2025_despesas.csv"), "REG_ANS\n1\n").unwrap();
        fs::write(dir.path().join("cadastro.csv"), "x\n").unwrap();

        let mut config = PipelineConfig::default();
        let pipeline = Pipeline::new(config.clone()).unwrap();
        assert!(matches!(
            pipeline.resolve_inputs(&[]),
            Err(PipelineError::NoInput(_))
        ));

        let explicit = vec![PathBuf::from("a.csv")];
        assert_eq!(pipeline.resolve_inputs(&explicit).unwrap(), explicit);

        config.input.source_dir = Some(dir.path().to_path_buf());
        let pipeline = Pipeline::new(config).unwrap();
        let files = pipeline.resolve_inputs(&[]).unwrap();
        assert_eq!(files, vec![dir.path().join("1T2025_despesas.csv")]);
    }

    #[test]
    fn test_missing_registry_is_fatal() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("1T2025.csv");
        fs::write(&source, "REG_ANS;VL_SALDO_FINAL\n123;10\n").unwrap();

        let mut config = PipelineConfig::default();
        config.output.dir = dir.path().join("out");
        config.registry.path = Some(dir.path().join("missing_registry.csv"));
        let pipeline = Pipeline::new(config).unwrap();

        let result = pipeline.run(&[source]);
        assert!(matches!(result, Err(PipelineError::Registry { .. })));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_unset_registry_is_config_error() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        assert!(matches!(
            pipeline.load_registry(),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_written_csv_excludes_database() {
        let paths = vec![
            PathBuf::from("out/a.csv"),
            PathBuf::from("out/store.db"),
            PathBuf::from("out/b.CSV"),
        ];
        assert_eq!(
            written_csv(&paths),
            vec![PathBuf::from("out/a.csv"), PathBuf::from("out/b.CSV")]
        );
    }
}
