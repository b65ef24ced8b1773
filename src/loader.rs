// 📂 Loader - heterogeneous source tables → raw rows tagged with provenance
//
// Dispatch is by file extension. A file that cannot be read is skipped and
// reported; the batch always continues with the remaining files.

use crate::config::InputConfig;
use crate::error::{PipelineError, Result};
use crate::records::RawRecord;
use calamine::{open_workbook_auto, Data, Reader};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// SOURCE FORMAT
// ============================================================================

/// SourceFormat - how a file's rows are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    /// `.csv` - semicolon or comma, sniffed from the first lines
    Delimited,
    /// `.txt` / `.tsv` - tab separated
    TabDelimited,
    /// `.xls` / `.xlsx` / `.ods` - first worksheet, first row is the header
    Spreadsheet,
}

impl SourceFormat {
    pub fn name(&self) -> &str {
        match self {
            SourceFormat::Delimited => "delimited text",
            SourceFormat::TabDelimited => "tab-delimited text",
            SourceFormat::Spreadsheet => "spreadsheet",
        }
    }
}

/// Detect the source format from the file extension
pub fn detect_format(file_path: &Path) -> Result<SourceFormat> {
    let extension = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "csv" => Ok(SourceFormat::Delimited),
        "txt" | "tsv" => Ok(SourceFormat::TabDelimited),
        "xls" | "xlsx" | "xlsm" | "ods" => Ok(SourceFormat::Spreadsheet),
        _ => Err(PipelineError::UnsupportedFormat {
            path: file_path.to_path_buf(),
            extension,
        }),
    }
}

// ============================================================================
// TABLE READERS
// ============================================================================

/// TableReader - reads one file into raw rows, preserving source row order
pub trait TableReader: Send + Sync {
    fn read(&self, file_path: &Path) -> Result<Vec<RawRecord>>;

    fn format(&self) -> SourceFormat;
}

/// Get the reader for a source format
pub fn get_reader(format: SourceFormat) -> Box<dyn TableReader> {
    match format {
        SourceFormat::Delimited => Box::new(DelimitedReader::sniffing()),
        SourceFormat::TabDelimited => Box::new(DelimitedReader::with_delimiter(b'\t')),
        SourceFormat::Spreadsheet => Box::new(SpreadsheetReader),
    }
}

/// Delimited text reader. `delimiter: None` sniffs between `;` and `,`.
pub struct DelimitedReader {
    delimiter: Option<u8>,
}

impl DelimitedReader {
    pub fn sniffing() -> Self {
        DelimitedReader { delimiter: None }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        DelimitedReader {
            delimiter: Some(delimiter),
        }
    }
}

impl TableReader for DelimitedReader {
    fn read(&self, file_path: &Path) -> Result<Vec<RawRecord>> {
        let content = read_file_as_utf8(file_path)?;
        let delimiter = self.delimiter.unwrap_or_else(|| sniff_delimiter(&content));
        parse_delimited(&content, delimiter, &file_name(file_path))
    }

    fn format(&self) -> SourceFormat {
        match self.delimiter {
            Some(b'\t') => SourceFormat::TabDelimited,
            _ => SourceFormat::Delimited,
        }
    }
}

/// Spreadsheet reader (first worksheet only)
pub struct SpreadsheetReader;

impl TableReader for SpreadsheetReader {
    fn read(&self, file_path: &Path) -> Result<Vec<RawRecord>> {
        let mut workbook = open_workbook_auto(file_path)?;
        let sheet_name = match workbook.sheet_names().first() {
            Some(name) => name.clone(),
            None => return Ok(Vec::new()),
        };
        let range = workbook.worksheet_range(&sheet_name)?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| cell_to_string(cell).unwrap_or_default())
                .collect(),
            None => return Ok(Vec::new()),
        };

        let source = file_name(file_path);
        let mut records = Vec::new();
        for (idx, row) in rows.enumerate() {
            if row.iter().all(is_blank_cell) {
                debug!(file = %source, line = idx + 1, "Skipping blank row");
                continue;
            }
            let mut record = RawRecord::new(source.clone(), idx + 1);
            for (col, header) in headers.iter().enumerate() {
                if header.trim().is_empty() {
                    continue;
                }
                let value = row.get(col).and_then(cell_to_string).unwrap_or_default();
                record.insert(header, &value);
            }
            records.push(record);
        }

        Ok(records)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Spreadsheet
    }
}

fn is_blank_cell(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        // Integral floats print without decimals so ids survive ("123", not "123.0")
        Data::Float(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
        Data::Float(n) => Some(format!("{}", n)),
        Data::Int(n) => Some(format!("{}", n)),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// TEXT HELPERS
// ============================================================================

/// Read a file as UTF-8, falling back to Windows-1252 for legacy exports.
/// A leading byte-order mark is dropped.
pub fn read_file_as_utf8(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;

    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            decoded.into_owned()
        }
    };

    Ok(match content.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => content,
    })
}

/// Pick `;` or `,` by field-count consistency over the first lines.
/// Ties go to `;`, the regulator's own separator.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b';', b','];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    let mut best = b';';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let target = match counts.first() {
            Some(&c) if c > 1 => c,
            _ => continue,
        };
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Parse delimited text with a header row. Rows shorter than the header get
/// null cells for the missing columns; rows with every field blank are dropped.
fn parse_delimited(content: &str, delimiter: u8, source: &str) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let row = result?;
        if row.iter().all(|field| field.trim().is_empty()) {
            debug!(file = source, line = idx + 1, "Skipping blank row");
            continue;
        }
        let mut record = RawRecord::new(source, idx + 1);
        for (col, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            record.insert(header, row.get(col).unwrap_or(""));
        }
        records.push(record);
    }

    Ok(records)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// LOAD REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded { file: String, rows: usize },
    Skipped { file: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub outcomes: Vec<LoadOutcome>,
}

impl LoadReport {
    pub fn files_loaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, LoadOutcome::Loaded { .. }))
            .count()
    }

    pub fn files_skipped(&self) -> usize {
        self.outcomes.len() - self.files_loaded()
    }

    pub fn total_rows(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                LoadOutcome::Loaded { rows, .. } => *rows,
                LoadOutcome::Skipped { .. } => 0,
            })
            .sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} files loaded ({} rows), {} skipped",
            self.files_loaded(),
            self.total_rows(),
            self.files_skipped()
        )
    }
}

/// All rows of a load pass plus the per-file outcomes
#[derive(Debug, Clone, Default)]
pub struct LoadBatch {
    pub records: Vec<RawRecord>,
    pub report: LoadReport,
}

// ============================================================================
// LOADER
// ============================================================================

pub struct Loader {
    parallel: bool,
}

impl Loader {
    pub fn new(config: &InputConfig) -> Self {
        Loader {
            parallel: config.parallel,
        }
    }

    /// Load every file. Rows keep their source order within a file; files are
    /// concatenated in the order given.
    pub fn load_files(&self, paths: &[PathBuf]) -> LoadBatch {
        let results: Vec<(LoadOutcome, Vec<RawRecord>)> = if self.parallel {
            paths.par_iter().map(|p| self.load_one(p)).collect()
        } else {
            paths.iter().map(|p| self.load_one(p)).collect()
        };

        let mut batch = LoadBatch::default();
        for (outcome, rows) in results {
            batch.records.extend(rows);
            batch.report.outcomes.push(outcome);
        }

        info!(
            files_loaded = batch.report.files_loaded(),
            files_skipped = batch.report.files_skipped(),
            rows = batch.records.len(),
            "Loading finished"
        );
        batch
    }

    fn load_one(&self, path: &Path) -> (LoadOutcome, Vec<RawRecord>) {
        let file = file_name(path);

        let format = match detect_format(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(file = %file, "Skipping unsupported file: {}", e);
                return (
                    LoadOutcome::Skipped {
                        file,
                        reason: e.to_string(),
                    },
                    Vec::new(),
                );
            }
        };

        match get_reader(format).read(path) {
            Ok(rows) => {
                debug!(file = %file, format = format.name(), rows = rows.len(), "Loaded file");
                (
                    LoadOutcome::Loaded {
                        file,
                        rows: rows.len(),
                    },
                    rows,
                )
            }
            Err(e) => {
                warn!(file = %file, "Skipping file that failed to parse: {}", e);
                (
                    LoadOutcome::Skipped {
                        file,
                        reason: e.to_string(),
                    },
                    Vec::new(),
                )
            }
        }
    }
}

// ============================================================================
// DISCOVERY
// ============================================================================

/// Find expense tables under `dir`: files whose name contains a keyword, or,
/// when none do, every file with a configured extension. Sorted by path.
pub fn discover_source_files(dir: &Path, config: &InputConfig) -> Result<Vec<PathBuf>> {
    let mut all_files = Vec::new();
    collect_files(dir, &mut all_files)?;
    all_files.sort();

    let keywords: Vec<String> = config.keywords.iter().map(|k| k.to_lowercase()).collect();
    let by_keyword: Vec<PathBuf> = all_files
        .iter()
        .filter(|p| {
            let name = file_name(p).to_lowercase();
            keywords.iter().any(|k| name.contains(k.as_str()))
        })
        .cloned()
        .collect();

    if !by_keyword.is_empty() {
        info!(count = by_keyword.len(), "Expense files matched by keyword");
        return Ok(by_keyword);
    }

    warn!("No file name matched an expense keyword, falling back to all supported files");
    let extensions: Vec<String> = config.extensions.iter().map(|e| e.to_lowercase()).collect();
    Ok(all_files
        .into_iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.contains(&e.to_lowercase()))
                .unwrap_or(false)
        })
        .collect())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn sequential() -> Loader {
        Loader::new(&InputConfig {
            parallel: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("1T2025.csv")).unwrap(), SourceFormat::Delimited);
        assert_eq!(detect_format(Path::new("a.TXT")).unwrap(), SourceFormat::TabDelimited);
        assert_eq!(detect_format(Path::new("a.xlsx")).unwrap(), SourceFormat::Spreadsheet);
        assert!(matches!(
            detect_format(Path::new("a.pdf")),
            Err(PipelineError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_get_reader_format() {
        assert_eq!(get_reader(SourceFormat::TabDelimited).format(), SourceFormat::TabDelimited);
        assert_eq!(get_reader(SourceFormat::Spreadsheet).format(), SourceFormat::Spreadsheet);
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("A;B;C\n1;2;3\n"), b';');
        assert_eq!(sniff_delimiter("A,B,C\n1,2,3\n"), b',');
        // Decimal commas inside a semicolon file must not win
        assert_eq!(sniff_delimiter("REG_ANS;VL_SALDO_FINAL\n1;10,5\n2;3,25\n"), b';');
    }

    #[test]
    fn test_read_semicolon_csv_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "1T2025.csv",
            b"REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n1;41;100\n2;41;200\n3;41;\n",
        );

        let rows = get_reader(SourceFormat::Delimited).read(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].column("REG_ANS"), Some(Some("1")));
        assert_eq!(rows[2].column("REG_ANS"), Some(Some("3")));
        assert_eq!(rows[2].column("VL_SALDO_FINAL"), Some(None));
        assert_eq!(rows[1].source_file.as_deref(), Some("1T2025.csv"));
        assert_eq!(rows[1].line_number, 2);
    }

    #[test]
    fn test_read_tab_delimited() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "2T2025.txt", b"REG_ANS\tVL_SALDO_FINAL\n7\t55.5\n");

        let rows = get_reader(SourceFormat::TabDelimited).read(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].column("VL_SALDO_FINAL"), Some(Some("55.5")));
    }

    #[test]
    fn test_short_row_yields_null_cells() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "x.csv", b"REG_ANS;CNPJ;VL_SALDO_FINAL\n1;2\n");

        let rows = get_reader(SourceFormat::Delimited).read(&path).unwrap();
        assert_eq!(rows[0].column("VL_SALDO_FINAL"), Some(None));
    }

    #[test]
    fn test_blank_rows_dropped_by_both_readers() {
        let dir = TempDir::new().unwrap();
        let text = write(&dir, "1T2025.csv", b"REG_ANS;CNPJ;VL_SALDO_FINAL\n1;;10\n;;\n ; ;\n2;;20\n");

        let rows = get_reader(SourceFormat::Delimited).read(&text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].column("REG_ANS"), Some(Some("2")));
        assert_eq!(rows[1].line_number, 4);

        let sheet_path = dir.path().join("1T2025.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "REG_ANS").unwrap();
        sheet.write_string(0, 1, "VL_SALDO_FINAL").unwrap();
        sheet.write_number(1, 0, 1.0).unwrap();
        sheet.write_number(1, 1, 10.0).unwrap();
        sheet.write_string(2, 0, " ").unwrap();
        sheet.write_number(3, 0, 2.0).unwrap();
        sheet.write_number(3, 1, 20.0).unwrap();
        workbook.save(&sheet_path).unwrap();

        let rows = get_reader(SourceFormat::Spreadsheet).read(&sheet_path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].column("REG_ANS"), Some(Some("2")));
        assert_eq!(rows[1].line_number, 3);
    }

    #[test]
    fn test_latin1_fallback_and_bom() {
        let dir = TempDir::new().unwrap();
        let latin1 = write(&dir, "a.csv", b"REG_ANS;RazaoSocial\n1;Jos\xe9 Sa\xfade\n");
        let bom = write(&dir, "b.csv", "\u{feff}REG_ANS;X\n9;y\n".as_bytes());

        let rows = get_reader(SourceFormat::Delimited).read(&latin1).unwrap();
        assert_eq!(rows[0].column("RazaoSocial"), Some(Some("José Saúde")));

        let rows = get_reader(SourceFormat::Delimited).read(&bom).unwrap();
        assert_eq!(rows[0].column("REG_ANS"), Some(Some("9")));
    }

    #[test]
    fn test_read_spreadsheet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3T2025_despesas.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "REG_ANS").unwrap();
        sheet.write_string(0, 1, "VL_SALDO_FINAL").unwrap();
        sheet.write_number(1, 0, 123.0).unwrap();
        sheet.write_number(1, 1, 10.5).unwrap();
        sheet.write_number(2, 0, 456.0).unwrap();
        workbook.save(&path).unwrap();

        let rows = get_reader(SourceFormat::Spreadsheet).read(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].column("REG_ANS"), Some(Some("123")));
        assert_eq!(rows[0].column("VL_SALDO_FINAL"), Some(Some("10.5")));
        assert_eq!(rows[1].column("REG_ANS"), Some(Some("456")));
        assert_eq!(rows[1].column("VL_SALDO_FINAL"), Some(None));
    }

    #[test]
    fn test_load_files_skips_bad_files_and_continues() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "1T2025.csv", b"REG_ANS;VL_SALDO_FINAL\n1;10\n2;20\n");
        let unsupported = write(&dir, "readme.pdf", b"%PDF");
        let corrupt = write(&dir, "2T2025.xlsx", b"definitely not a zip archive");
        let missing = dir.path().join("3T2025.csv");

        let batch = sequential().load_files(&[unsupported, good, corrupt, missing]);

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.report.files_loaded(), 1);
        assert_eq!(batch.report.files_skipped(), 3);
        assert_eq!(batch.report.total_rows(), 2);
        assert!(matches!(
            &batch.report.outcomes[1],
            LoadOutcome::Loaded { file, rows: 2 } if file == "1T2025.csv"
        ));
    }

    #[test]
    fn test_parallel_load_keeps_rows_together_in_order() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "1T2025.csv", b"REG_ANS\n1\n2\n3\n");
        let b = write(&dir, "2T2025.csv", b"REG_ANS\n4\n5\n");

        let loader = Loader::new(&InputConfig::default());
        let batch = loader.load_files(&[a, b]);
        let ids: Vec<&str> = batch
            .records
            .iter()
            .filter_map(|r| r.column("REG_ANS").flatten())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_discover_by_keyword() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("1T2025")).unwrap();
        write(&dir, "1T2025/Despesas_Eventos.csv", b"x");
        write(&dir, "2T2025_sinistros.txt", b"x");
        write(&dir, "cadastro.csv", b"x");

        let files = discover_source_files(dir.path(), &InputConfig::default()).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["Despesas_Eventos.csv", "2T2025_sinistros.txt"]);
    }

    #[test]
    fn test_discover_falls_back_to_supported_extensions() {
        let dir = TempDir::new().unwrap();
        write(&dir, "1T2025.csv", b"x");
        write(&dir, "2T2025.xlsx", b"x");
        write(&dir, "notes.md", b"x");

        let files = discover_source_files(dir.path(), &InputConfig::default()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| file_name(p) != "notes.md"));
    }
}
