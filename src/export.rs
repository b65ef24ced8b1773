// 📤 Export - CSV artifacts and the optional zip bundle
//
// Headers are written explicitly so an empty artifact still carries them.

use crate::error::Result;
use crate::records::{AggregatedGroup, CanonicalExpenseRecord};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const CANONICAL_COLUMNS: [&str; 8] = [
    "RegistryId",
    "TaxId",
    "LegalName",
    "Year",
    "Quarter",
    "ExpenseValue",
    "SuspiciousValueFlag",
    "DuplicateFlag",
];

pub const VALIDATED_COLUMNS: [&str; 11] = [
    "RegistryId",
    "TaxId",
    "LegalName",
    "Year",
    "Quarter",
    "ExpenseValue",
    "SuspiciousValueFlag",
    "DuplicateFlag",
    "MissingRegistryFlag",
    "InvalidTaxIdFlag",
    "InvalidNameFlag",
];

pub const ENRICHED_COLUMNS: [&str; 11] = [
    "RegistryId",
    "TaxId",
    "LegalName",
    "Year",
    "Quarter",
    "ExpenseValue",
    "SuspiciousValueFlag",
    "DuplicateFlag",
    "Modality",
    "StateCode",
    "MissingRegistryFlag",
];

pub const AGGREGATED_COLUMNS: [&str; 6] = [
    "LegalName",
    "StateCode",
    "TotalExpense",
    "MeanExpense",
    "StdDevExpense",
    "RecordCount",
];

// ============================================================================
// ROW SHAPES
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CanonicalRow<'a> {
    registry_id: Option<&'a str>,
    tax_id: Option<&'a str>,
    legal_name: Option<&'a str>,
    year: Option<&'a str>,
    quarter: Option<&'a str>,
    expense_value: f64,
    suspicious_value_flag: bool,
    duplicate_flag: bool,
}

impl<'a> From<&'a CanonicalExpenseRecord> for CanonicalRow<'a> {
    fn from(r: &'a CanonicalExpenseRecord) -> Self {
        CanonicalRow {
            registry_id: r.registry_id.as_deref(),
            tax_id: r.tax_id.as_deref(),
            legal_name: r.legal_name.as_deref(),
            year: r.year.as_deref(),
            quarter: r.quarter.as_deref(),
            expense_value: r.expense_value,
            suspicious_value_flag: r.suspicious_value_flag,
            duplicate_flag: r.duplicate_flag,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ValidatedRow<'a> {
    registry_id: Option<&'a str>,
    tax_id: Option<&'a str>,
    legal_name: Option<&'a str>,
    year: Option<&'a str>,
    quarter: Option<&'a str>,
    expense_value: f64,
    suspicious_value_flag: bool,
    duplicate_flag: bool,
    missing_registry_flag: bool,
    invalid_tax_id_flag: bool,
    invalid_name_flag: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EnrichedRow<'a> {
    registry_id: Option<&'a str>,
    tax_id: Option<&'a str>,
    legal_name: Option<&'a str>,
    year: Option<&'a str>,
    quarter: Option<&'a str>,
    expense_value: f64,
    suspicious_value_flag: bool,
    duplicate_flag: bool,
    modality: Option<&'a str>,
    state_code: Option<&'a str>,
    missing_registry_flag: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AggregatedRow<'a> {
    legal_name: Option<&'a str>,
    state_code: Option<&'a str>,
    total_expense: f64,
    mean_expense: f64,
    std_dev_expense: Option<f64>,
    record_count: usize,
}

// ============================================================================
// WRITERS
// ============================================================================

/// Canonical 8-field export
pub fn write_canonical(path: &Path, records: &[CanonicalExpenseRecord], delimiter: char) -> Result<()> {
    write_rows(path, delimiter, &CANONICAL_COLUMNS, records.iter().map(CanonicalRow::from))?;
    info!(path = %path.display(), rows = records.len(), "Canonical export written");
    Ok(())
}

/// Canonical fields plus the registry and validation flags
pub fn write_validated(path: &Path, records: &[CanonicalExpenseRecord], delimiter: char) -> Result<()> {
    let rows = records.iter().map(|r| ValidatedRow {
        registry_id: r.registry_id.as_deref(),
        tax_id: r.tax_id.as_deref(),
        legal_name: r.legal_name.as_deref(),
        year: r.year.as_deref(),
        quarter: r.quarter.as_deref(),
        expense_value: r.expense_value,
        suspicious_value_flag: r.suspicious_value_flag,
        duplicate_flag: r.duplicate_flag,
        missing_registry_flag: r.missing_registry_flag,
        invalid_tax_id_flag: r.invalid_tax_id_flag,
        invalid_name_flag: r.invalid_name_flag,
    });
    write_rows(path, delimiter, &VALIDATED_COLUMNS, rows)?;
    info!(path = %path.display(), rows = records.len(), "Validated export written");
    Ok(())
}

pub fn write_enriched(path: &Path, records: &[CanonicalExpenseRecord], delimiter: char) -> Result<()> {
    let rows = records.iter().map(|r| EnrichedRow {
        registry_id: r.registry_id.as_deref(),
        tax_id: r.tax_id.as_deref(),
        legal_name: r.legal_name.as_deref(),
        year: r.year.as_deref(),
        quarter: r.quarter.as_deref(),
        expense_value: r.expense_value,
        suspicious_value_flag: r.suspicious_value_flag,
        duplicate_flag: r.duplicate_flag,
        modality: r.modality.as_deref(),
        state_code: r.state_code.as_deref(),
        missing_registry_flag: r.missing_registry_flag,
    });
    write_rows(path, delimiter, &ENRICHED_COLUMNS, rows)?;
    info!(path = %path.display(), rows = records.len(), "Enriched export written");
    Ok(())
}

pub fn write_aggregated(path: &Path, groups: &[AggregatedGroup], delimiter: char) -> Result<()> {
    let rows = groups.iter().map(|g| AggregatedRow {
        legal_name: g.legal_name.as_deref(),
        state_code: g.state_code.as_deref(),
        total_expense: g.total_expense,
        mean_expense: g.mean_expense,
        std_dev_expense: g.std_dev_expense,
        record_count: g.record_count,
    });
    write_rows(path, delimiter, &AGGREGATED_COLUMNS, rows)?;
    info!(path = %path.display(), rows = groups.len(), "Aggregated export written");
    Ok(())
}

fn write_rows<S, I>(path: &Path, delimiter: char, header: &[&str], rows: I) -> Result<()>
where
    S: Serialize,
    I: IntoIterator<Item = S>,
{
    create_parent_dir(path)?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .from_path(path)?;

    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn create_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

// ============================================================================
// ARCHIVE
// ============================================================================

/// Bundle artifacts into one deflate zip, each under its bare file name.
/// Missing files are skipped with a warning. Returns the bundled entry names.
pub fn bundle_archive(archive_path: &Path, files: &[PathBuf]) -> Result<Vec<String>> {
    create_parent_dir(archive_path)?;

    let mut zip = ZipWriter::new(File::create(archive_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut bundled = Vec::new();

    for file in files {
        if !file.is_file() {
            warn!(file = %file.display(), "Artifact missing, not bundled");
            continue;
        }
        let name = match file.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => continue,
        };

        zip.start_file(name.as_str(), options)?;
        zip.write_all(&fs::read(file)?)?;
        bundled.push(name);
    }

    zip.finish()?;
    info!(archive = %archive_path.display(), entries = bundled.len(), "Archive written");
    Ok(bundled)
}

// ============================================================================
// TESTS
// ============================================================================
