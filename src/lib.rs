// Operator Expenses - Core Library
// Exposes the pipeline stages for the CLI and integration tests

pub mod records;
pub mod error;
pub mod config;
pub mod logging;
pub mod loader;         // Stage 1: source tables → raw rows
pub mod normalizer;     // Stage 2: raw rows → canonical records
pub mod quality;        // Stage 3: suspicious values + duplicates
pub mod registry;       // Operator registry source
pub mod enrichment;     // Stage 4: registry left join
pub mod tax_id;         // CNPJ checksum
pub mod validation;     // Stage 5: tax-id + legal-name flags
pub mod aggregation;    // Stage 6: per operator/state statistics
pub mod export;
#[cfg(feature = "sqlite")]
pub mod db;
pub mod pipeline;

// Re-export commonly used types
pub use records::{AggregatedGroup, CanonicalExpenseRecord, RawRecord, RegistryEntry};
pub use error::{PipelineError, Result};
pub use config::{
    ColumnAliases, InputConfig, NormalizeConfig, OutputConfig, PeriodConfig, PipelineConfig,
    ReconciliationConfig, RegistryConfig,
};
pub use logging::{init_logging, LogFormat};
pub use loader::{
    detect_format, discover_source_files, get_reader, LoadBatch, LoadOutcome, LoadReport,
    Loader, SourceFormat, TableReader,
};
pub use normalizer::{coerce_expense, Normalizer};
pub use quality::{DuplicateGroup, DuplicateRule, QualityFlagger, QualitySummary};
pub use registry::{normalize_registry_id, OperatorRegistry};
pub use enrichment::{EnrichmentSummary, RegistryEnricher};
pub use tax_id::{check_tax_id, compute_check_digits, is_valid_tax_id, TaxIdCheck};
pub use validation::{is_valid_legal_name, TaxIdValidator, ValidationSummary};
pub use aggregation::{reconcile, Aggregator, ReconciliationResult};
pub use export::{
    bundle_archive, write_aggregated, write_canonical, write_enriched, write_validated,
    AGGREGATED_COLUMNS, CANONICAL_COLUMNS, ENRICHED_COLUMNS, VALIDATED_COLUMNS,
};
#[cfg(feature = "sqlite")]
pub use db::{
    get_events, insert_event, open_database, replace_artifacts, setup_database, verify_count,
    ArtifactTable, Event,
};
pub use pipeline::{Pipeline, ProcessedBatch, RunReport, TOP_GROUPS};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
