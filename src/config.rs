// ⚙️ Pipeline configuration
//
// One explicit structure handed to every component at construction.
// Every key is optional in the TOML file; missing keys take the defaults below.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub columns: ColumnAliases,
    pub period: PeriodConfig,
    pub normalize: NormalizeConfig,
    pub registry: RegistryConfig,
    pub output: OutputConfig,
    pub reconciliation: ReconciliationConfig,
}

impl PipelineConfig {
    /// Read and parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            PipelineError::Config(msg) => {
                PipelineError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Delimiters must be single-byte characters for the CSV reader/writer
    pub fn validate(&self) -> Result<()> {
        for (name, delimiter) in [
            ("registry.delimiter", self.registry.delimiter),
            ("output.canonical_delimiter", self.output.canonical_delimiter),
            ("output.delimiter", self.output.delimiter),
        ] {
            if !delimiter.is_ascii() {
                return Err(PipelineError::Config(format!(
                    "{} must be an ASCII character, got '{}'",
                    name, delimiter
                )));
            }
        }
        if self.reconciliation.tolerance < 0.0 {
            return Err(PipelineError::Config(
                "reconciliation.tolerance must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// INPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory of already retrieved and extracted source files
    pub source_dir: Option<PathBuf>,

    /// File-name keywords that mark an expense table
    pub keywords: Vec<String>,

    /// Extensions considered when no file matches a keyword
    pub extensions: Vec<String>,

    /// Load files on the rayon pool
    pub parallel: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            source_dir: None,
            keywords: vec![
                "despesa".to_string(),
                "evento".to_string(),
                "sinistro".to_string(),
            ],
            extensions: vec![
                "csv".to_string(),
                "txt".to_string(),
                "xls".to_string(),
                "xlsx".to_string(),
            ],
            parallel: true,
        }
    }
}

// ============================================================================
// COLUMN ALIASES
// ============================================================================

/// Source column names accepted for each canonical field, in priority order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnAliases {
    pub registry_id: Vec<String>,
    pub tax_id: Vec<String>,
    pub legal_name: Vec<String>,
    pub expense_value: Vec<String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        ColumnAliases {
            registry_id: vec!["REG_ANS".to_string()],
            tax_id: vec!["CNPJ".to_string()],
            legal_name: vec!["RazaoSocial".to_string(), "Razao_Social".to_string()],
            expense_value: vec!["VL_SALDO_FINAL".to_string()],
        }
    }
}

// ============================================================================
// PERIOD / NORMALIZATION
// ============================================================================

/// Year/Quarter extraction from the origin file name.
/// The defaults apply only when a row carries no origin file name at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    pub quarter_pattern: String,
    pub year_pattern: String,
    pub default_year: String,
    pub default_quarter: String,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        PeriodConfig {
            quarter_pattern: r"\dT".to_string(),
            year_pattern: r"20\d{2}".to_string(),
            default_year: "2025".to_string(),
            default_quarter: "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Read `1234,56` and `1.234,56` as decimal comma amounts
    pub decimal_comma: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        NormalizeConfig { decimal_comma: true }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub path: Option<PathBuf>,
    pub delimiter: char,
    /// Operator-registration column, renamed to RegistryId on ingestion
    pub id_column: String,
    pub tax_id_column: String,
    pub legal_name_columns: Vec<String>,
    pub modality_column: String,
    pub state_column: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            path: None,
            delimiter: ';',
            id_column: "REGISTRO_OPERADORA".to_string(),
            tax_id_column: "CNPJ".to_string(),
            legal_name_columns: vec!["Razao_Social".to_string(), "RazaoSocial".to_string()],
            modality_column: "Modalidade".to_string(),
            state_column: "UF".to_string(),
        }
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub canonical_file: String,
    pub canonical_delimiter: char,
    pub validated_file: String,
    pub aggregated_file: String,
    /// Delimiter for validated, aggregated and enriched exports
    pub delimiter: char,
    pub enriched_file: Option<String>,
    pub archive_file: Option<String>,
    pub report_file: Option<String>,
    pub sqlite_path: Option<PathBuf>,
}

impl OutputConfig {
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: PathBuf::from("processados"),
            canonical_file: "consolidado_despesas.csv".to_string(),
            canonical_delimiter: ';',
            validated_file: "dados_validados.csv".to_string(),
            aggregated_file: "despesas_agregadas.csv".to_string(),
            delimiter: ',',
            enriched_file: None,
            archive_file: None,
            report_file: Some("run_report.json".to_string()),
            sqlite_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Absolute tolerance between aggregated and record-level totals
    pub tolerance: f64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        ReconciliationConfig { tolerance: 0.01 }
    }
}

// ============================================================================
// TESTS
// ============================================================================
