// 🔄 Normalizer - raw, inconsistent columns → 8-field canonical schema
//
// Each canonical field is projected independently. A missing source column
// never aborts the run; it yields null for that field.

use crate::config::{ColumnAliases, NormalizeConfig, PeriodConfig};
use crate::error::{PipelineError, Result};
use crate::records::{CanonicalExpenseRecord, RawRecord};
use regex::Regex;
use tracing::{debug, info, warn};

pub struct Normalizer {
    aliases: ColumnAliases,
    quarter_re: Regex,
    year_re: Regex,
    default_year: String,
    default_quarter: String,
    decimal_comma: bool,
}

/// Rows that lacked each source column, for the stage log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissingColumnCounts {
    pub registry_id: usize,
    pub tax_id: usize,
    pub legal_name: usize,
    pub expense_value: usize,
}

impl Normalizer {
    pub fn new(
        aliases: &ColumnAliases,
        period: &PeriodConfig,
        normalize: &NormalizeConfig,
    ) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| PipelineError::Config(format!("invalid period pattern '{}': {}", pattern, e)))
        };

        Ok(Normalizer {
            aliases: aliases.clone(),
            quarter_re: compile(&period.quarter_pattern)?,
            year_re: compile(&period.year_pattern)?,
            default_year: period.default_year.clone(),
            default_quarter: period.default_quarter.clone(),
            decimal_comma: normalize.decimal_comma,
        })
    }

    /// Normalize every raw row. Output order follows input order.
    pub fn normalize(&self, raw: &[RawRecord]) -> Vec<CanonicalExpenseRecord> {
        let mut missing = MissingColumnCounts::default();

        let records: Vec<CanonicalExpenseRecord> = raw
            .iter()
            .map(|row| {
                let registry_id = pick(row, &self.aliases.registry_id);
                let tax_id = pick(row, &self.aliases.tax_id);
                let legal_name = pick(row, &self.aliases.legal_name);
                let expense = pick(row, &self.aliases.expense_value);

                if registry_id.is_none() {
                    missing.registry_id += 1;
                }
                if tax_id.is_none() {
                    missing.tax_id += 1;
                }
                if legal_name.is_none() {
                    missing.legal_name += 1;
                }
                if expense.is_none() {
                    missing.expense_value += 1;
                }

                let (year, quarter) = self.extract_period(row.source_file.as_deref());
                let expense_cell = expense.flatten();
                let expense_value = coerce_expense(expense_cell.as_deref(), self.decimal_comma);
                if let Some(cell) = expense_cell.as_deref() {
                    if expense_value == 0.0 && !cell.trim().is_empty() && !is_zero_literal(cell) {
                        debug!(
                            file = row.source_file.as_deref().unwrap_or("-"),
                            line = row.line_number,
                            value = cell,
                            "Unparsable expense value, coerced to 0.0"
                        );
                    }
                }

                CanonicalExpenseRecord::new(
                    registry_id.flatten(),
                    tax_id.flatten(),
                    legal_name.flatten(),
                    year,
                    quarter,
                    expense_value,
                )
            })
            .collect();

        for (field, count) in [
            ("RegistryId", missing.registry_id),
            ("TaxId", missing.tax_id),
            ("LegalName", missing.legal_name),
            ("ExpenseValue", missing.expense_value),
        ] {
            if count > 0 {
                warn!(field, rows = count, "No source column for field, filled with null");
            }
        }
        info!(records = records.len(), "Normalization finished");

        records
    }

    /// Year and quarter from the origin file name.
    ///
    /// No file name at all → configured defaults. A file name that does not
    /// match → null for that field.
    pub fn extract_period(&self, source_file: Option<&str>) -> (Option<String>, Option<String>) {
        match source_file {
            None => (
                Some(self.default_year.clone()),
                Some(self.default_quarter.clone()),
            ),
            Some(name) => {
                let year = self.year_re.find(name).map(|m| m.as_str().to_string());
                let quarter = self.quarter_re.find(name).map(|m| m.as_str().to_string());
                (year, quarter)
            }
        }
    }
}

/// First alias whose column exists in the row. The outer `Option` is column
/// presence; the inner one is the cell value.
fn pick(row: &RawRecord, aliases: &[String]) -> Option<Option<String>> {
    aliases
        .iter()
        .find_map(|alias| row.column(alias))
        .map(|cell| cell.map(str::to_string))
}

/// Numeric coercion of an expense cell. Null, unparsable or non-finite → 0.0.
///
/// With `decimal_comma`, `1234,56` and the grouped form `1.234,56` both read
/// as 1234.56. Dots are only dropped when they sit in groups of three before
/// the single comma.
pub fn coerce_expense(value: Option<&str>, decimal_comma: bool) -> f64 {
    let text = match value {
        Some(v) => v.trim(),
        None => return 0.0,
    };

    if let Ok(v) = text.parse::<f64>() {
        return finite_or_zero(v);
    }

    if decimal_comma {
        if let Some(v) = parse_decimal_comma(text) {
            return finite_or_zero(v);
        }
    }

    0.0
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn parse_decimal_comma(text: &str) -> Option<f64> {
    let (int_part, frac) = text.split_once(',')?;
    if frac.contains(',') || frac.contains('.') {
        return None;
    }

    let unsigned = int_part.trim_start_matches(&['-', '+'][..]);
    let mut groups = unsigned.split('.');
    let head = groups.next()?;
    if unsigned.contains('.') && (head.is_empty() || head.len() > 3) {
        return None;
    }
    if !groups.all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }

    format!("{}.{}", int_part.replace('.', ""), frac).parse().ok()
}

fn is_zero_literal(cell: &str) -> bool {
    cell.trim()
        .trim_start_matches(&['-', '+'][..])
        .chars()
        .all(|c| c == '0' || c == '.' || c == ',')
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(
            &ColumnAliases::default(),
            &PeriodConfig::default(),
            &NormalizeConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_full_row() {
        let raw = RawRecord::new("1T2025.csv", 1)
            .with_value("REG_ANS", "123")
            .with_value("CNPJ", "11222333000181")
            .with_value("RazaoSocial", "Operadora A")
            .with_value("VL_SALDO_FINAL", "500.25");

        let records = normalizer().normalize(&[raw]);
        let r = &records[0];
        assert_eq!(r.registry_id.as_deref(), Some("123"));
        assert_eq!(r.tax_id.as_deref(), Some("11222333000181"));
        assert_eq!(r.legal_name.as_deref(), Some("Operadora A"));
        assert_eq!(r.year.as_deref(), Some("2025"));
        assert_eq!(r.quarter.as_deref(), Some("1T"));
        assert_eq!(r.expense_value, 500.25);
        assert!(!r.suspicious_value_flag);
        assert!(!r.duplicate_flag);
    }

    #[test]
    fn test_missing_columns_yield_null() {
        let raw = RawRecord::new("2T2024.txt", 1).with_value("CD_CONTA_CONTABIL", "41");

        let r = &normalizer().normalize(&[raw])[0];
        assert_eq!(r.registry_id, None);
        assert_eq!(r.tax_id, None);
        assert_eq!(r.legal_name, None);
        assert_eq!(r.expense_value, 0.0);
        assert_eq!(r.year.as_deref(), Some("2024"));
        assert_eq!(r.quarter.as_deref(), Some("2T"));
    }

    #[test]
    fn test_legal_name_alias_priority() {
        let both = RawRecord::new("f.csv", 1)
            .with_value("RazaoSocial", "Primeira")
            .with_value("Razao_Social", "Segunda");
        let underscore_only = RawRecord::new("f.csv", 2).with_value("Razao_Social", "Segunda");

        let records = normalizer().normalize(&[both, underscore_only]);
        assert_eq!(records[0].legal_name.as_deref(), Some("Primeira"));
        assert_eq!(records[1].legal_name.as_deref(), Some("Segunda"));
    }

    #[test]
    fn test_present_but_empty_primary_alias_stays_null() {
        let raw = RawRecord::new("f.csv", 1)
            .with_value("RazaoSocial", "")
            .with_value("Razao_Social", "Segunda");

        let r = &normalizer().normalize(&[raw])[0];
        assert_eq!(r.legal_name, None);
    }

    #[test]
    fn test_period_default_only_without_file_name() {
        let n = normalizer();

        assert_eq!(
            n.extract_period(None),
            (Some("2025".to_string()), Some("N/A".to_string()))
        );
        assert_eq!(n.extract_period(Some("cadastro.csv")), (None, None));
        assert_eq!(
            n.extract_period(Some("Demonstracoes_3T2023.csv")),
            (Some("2023".to_string()), Some("3T".to_string()))
        );
    }

    #[test]
    fn test_row_without_provenance_uses_defaults() {
        let raw = RawRecord {
            source_file: None,
            ..Default::default()
        };
        let r = &normalizer().normalize(&[raw])[0];
        assert_eq!(r.year.as_deref(), Some("2025"));
        assert_eq!(r.quarter.as_deref(), Some("N/A"));
    }

    #[test]
    fn test_coerce_expense() {
        assert_eq!(coerce_expense(Some("1500.75"), true), 1500.75);
        assert_eq!(coerce_expense(Some("-20"), true), -20.0);
        assert_eq!(coerce_expense(Some("1500,75"), true), 1500.75);
        assert_eq!(coerce_expense(Some("1500,75"), false), 0.0);
        assert_eq!(coerce_expense(Some("abc"), true), 0.0);
        assert_eq!(coerce_expense(Some("NaN"), true), 0.0);
        assert_eq!(coerce_expense(Some("inf"), true), 0.0);
        assert_eq!(coerce_expense(None, true), 0.0);
    }

    #[test]
    fn test_coerce_grouped_decimal_comma() {
        assert_eq!(coerce_expense(Some("1.500,75"), true), 1500.75);
        assert_eq!(coerce_expense(Some("-1.234.567,5"), true), -1234567.5);
        assert_eq!(coerce_expense(Some("1.500,75"), false), 0.0);
        // Groups must be three digits after a one-to-three digit head
        assert_eq!(coerce_expense(Some("1.50,75"), true), 0.0);
        assert_eq!(coerce_expense(Some("1500.000,75"), true), 0.0);
        assert_eq!(coerce_expense(Some("1,500,75"), true), 0.0);
        assert_eq!(coerce_expense(Some("1,500.75"), true), 0.0);
    }

    #[test]
    fn test_expense_value_always_finite() {
        let inputs = ["", "x", "1e400", "-inf", "nan", "12", "3,5", ";"];
        let raws: Vec<RawRecord> = inputs
            .iter()
            .enumerate()
            .map(|(i, v)| RawRecord::new("1T2025.csv", i + 1).with_value("VL_SALDO_FINAL", v))
            .collect();

        for r in normalizer().normalize(&raws) {
            assert!(r.expense_value.is_finite());
        }
    }

    #[test]
    fn test_invalid_period_pattern_rejected() {
        let period = PeriodConfig {
            quarter_pattern: "(".to_string(),
            ..Default::default()
        };
        let result = Normalizer::new(&ColumnAliases::default(), &period, &NormalizeConfig::default());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
