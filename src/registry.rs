// 📇 Operator Registry - official registry, one entry per RegistryId
//
// Loaded once per run, read-only afterward. When the source repeats a
// RegistryId the first occurrence in file order wins.

use crate::config::RegistryConfig;
use crate::error::{PipelineError, Result};
use crate::loader::read_file_as_utf8;
use crate::records::RegistryEntry;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

pub struct OperatorRegistry {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
    duplicates_discarded: usize,
    rows_without_id: usize,
}

impl OperatorRegistry {
    /// Load the registry table. Any failure here is fatal for the run.
    pub fn load(path: &Path, config: &RegistryConfig) -> Result<Self> {
        let content = read_file_as_utf8(path).map_err(|e| PipelineError::Registry {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let unparsable = |e: csv::Error| PipelineError::Registry {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(config.delimiter as u8)
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(unparsable)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(PipelineError::Registry {
                path: path.to_path_buf(),
                reason: "no header row".to_string(),
            });
        }

        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .or_else(|| headers.iter().position(|h| h.eq_ignore_ascii_case(name)))
        };

        let id_col = position(&config.id_column).ok_or_else(|| PipelineError::MissingRegistryColumn {
            path: path.to_path_buf(),
            column: config.id_column.clone(),
        })?;
        let tax_id_col = position(&config.tax_id_column);
        let name_col = config.legal_name_columns.iter().find_map(|c| position(c.as_str()));
        let modality_col = position(&config.modality_column);
        let state_col = position(&config.state_column);

        for (column, found) in [
            (config.tax_id_column.as_str(), tax_id_col.is_some()),
            ("legal name", name_col.is_some()),
            (config.modality_column.as_str(), modality_col.is_some()),
            (config.state_column.as_str(), state_col.is_some()),
        ] {
            if !found {
                warn!(column, registry = %path.display(), "Registry column missing, values will be null");
            }
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let row = result.map_err(unparsable)?;
            let cell = |col: Option<usize>| {
                col.and_then(|c| row.get(c))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };

            rows.push((
                cell(Some(id_col)),
                RegistryEntry {
                    registry_id: String::new(),
                    tax_id: cell(tax_id_col),
                    legal_name: cell(name_col),
                    modality: cell(modality_col),
                    state_code: cell(state_col),
                },
            ));
        }

        let mut registry = Self::empty();
        for (id, mut entry) in rows {
            match id {
                Some(id) => {
                    entry.registry_id = id;
                    registry.insert(entry);
                }
                None => registry.rows_without_id += 1,
            }
        }

        if registry.rows_without_id > 0 {
            warn!(rows = registry.rows_without_id, "Registry rows without an id were ignored");
        }
        info!(
            entries = registry.len(),
            duplicates_discarded = registry.duplicates_discarded,
            "Operator registry loaded"
        );

        Ok(registry)
    }

    /// Build from entries in input order, keeping the first of each RegistryId
    pub fn from_entries(entries: impl IntoIterator<Item = RegistryEntry>) -> Self {
        let mut registry = Self::empty();
        for entry in entries {
            registry.insert(entry);
        }
        registry
    }

    fn empty() -> Self {
        OperatorRegistry {
            entries: Vec::new(),
            index: HashMap::new(),
            duplicates_discarded: 0,
            rows_without_id: 0,
        }
    }

    fn insert(&mut self, entry: RegistryEntry) {
        let key = normalize_registry_id(&entry.registry_id);
        if self.index.contains_key(&key) {
            self.duplicates_discarded += 1;
            return;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
    }

    pub fn get(&self, registry_id: &str) -> Option<&RegistryEntry> {
        self.index
            .get(&normalize_registry_id(registry_id))
            .map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duplicates_discarded(&self) -> usize {
        self.duplicates_discarded
    }
}

/// Join key for registry ids: trimmed, with a spreadsheet float suffix
/// (`"123.0"`) removed
pub fn normalize_registry_id(id: &str) -> String {
    let trimmed = id.trim();
    trimmed
        .strip_suffix(".0")
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(trimmed)
        .to_string()
}

// ============================================================================
// TESTS
// ============================================================================
