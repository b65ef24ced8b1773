// 🪪 Tax-ID check - 14-digit legal-entity identifier (CNPJ) checksum
//
// Steps run in order and stop at the first failure:
//   1. missing  2. not 14 digits  3. all digits equal
//   4. first check digit  5. second check digit
//
// Remainders 0 and 1 both map to check digit 0. A substitution in the first
// 12 digits therefore goes undetected when both check digits are 0 and the
// change keeps both weighted-sum remainders inside {0, 1}. Known cases:
//   71046563414800 ~ 51046563414800 ~ 71040563414800 ~ 71046563214800

use serde::{Deserialize, Serialize};

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Outcome of a tax-id check; every variant but `Valid` names the failing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxIdCheck {
    Missing,
    WrongLength,
    NonNumeric,
    RepeatedDigits,
    FirstCheckDigit,
    SecondCheckDigit,
    Valid,
}

impl TaxIdCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, TaxIdCheck::Valid)
    }

    pub fn description(&self) -> &str {
        match self {
            TaxIdCheck::Missing => "missing",
            TaxIdCheck::WrongLength => "not 14 characters",
            TaxIdCheck::NonNumeric => "contains non-digit characters",
            TaxIdCheck::RepeatedDigits => "all digits identical",
            TaxIdCheck::FirstCheckDigit => "first check digit mismatch",
            TaxIdCheck::SecondCheckDigit => "second check digit mismatch",
            TaxIdCheck::Valid => "valid",
        }
    }
}

/// Run the full check. Dots, slashes and dashes are stripped first.
pub fn check_tax_id(value: Option<&str>) -> TaxIdCheck {
    let raw = match value {
        Some(v) => v,
        None => return TaxIdCheck::Missing,
    };

    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '.' | '/' | '-'))
        .collect();

    if cleaned.chars().count() != 14 {
        return TaxIdCheck::WrongLength;
    }
    if !cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return TaxIdCheck::NonNumeric;
    }

    let digits: Vec<u32> = cleaned.bytes().map(|b| u32::from(b - b'0')).collect();

    if digits.iter().all(|&d| d == digits[0]) {
        return TaxIdCheck::RepeatedDigits;
    }

    if check_digit(&digits[..12], &FIRST_WEIGHTS) != digits[12] {
        return TaxIdCheck::FirstCheckDigit;
    }
    if check_digit(&digits[..13], &SECOND_WEIGHTS) != digits[13] {
        return TaxIdCheck::SecondCheckDigit;
    }

    TaxIdCheck::Valid
}

pub fn is_valid_tax_id(value: Option<&str>) -> bool {
    check_tax_id(value).is_valid()
}

/// Both check digits for a 12-digit base. `None` when the base is not
/// exactly 12 ASCII digits.
pub fn compute_check_digits(base: &str) -> Option<(u8, u8)> {
    if base.len() != 12 || !base.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut digits: Vec<u32> = base.bytes().map(|b| u32::from(b - b'0')).collect();
    let first = check_digit(&digits, &FIRST_WEIGHTS);
    digits.push(first);
    let second = check_digit(&digits, &SECOND_WEIGHTS);

    Some((first as u8, second as u8))
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_identifiers() {
        assert_eq!(check_tax_id(Some("11222333000181")), TaxIdCheck::Valid);
        assert_eq!(check_tax_id(Some("11.222.333/0001-81")), TaxIdCheck::Valid);
        assert_eq!(check_tax_id(Some(" 11222333000181 ")), TaxIdCheck::Valid);
        assert_eq!(check_tax_id(Some("11222333000182")), TaxIdCheck::SecondCheckDigit);
        assert_eq!(check_tax_id(Some("11222333000191")), TaxIdCheck::FirstCheckDigit);
    }

    #[test]
    fn test_step_order() {
        assert_eq!(check_tax_id(None), TaxIdCheck::Missing);
        assert_eq!(check_tax_id(Some("")), TaxIdCheck::WrongLength);
        assert_eq!(check_tax_id(Some("1122233300018")), TaxIdCheck::WrongLength);
        assert_eq!(check_tax_id(Some("1122233300018A")), TaxIdCheck::NonNumeric);
        assert_eq!(check_tax_id(Some("11111111111111")), TaxIdCheck::RepeatedDigits);
        assert_eq!(check_tax_id(Some("00000000000000")), TaxIdCheck::RepeatedDigits);
    }

    #[test]
    fn test_compute_check_digits() {
        assert_eq!(compute_check_digits("112223330001"), Some((8, 1)));
        assert_eq!(compute_check_digits("11222333000"), None);
        assert_eq!(compute_check_digits("11222333000x"), None);
    }

    #[test]
    fn test_generated_identifiers_validate() {
        for base in ["112223330001", "123456780001", "987654320001", "000000010001"] {
            let (d1, d2) = compute_check_digits(base).unwrap();
            let full = format!("{}{}{}", base, d1, d2);
            assert!(is_valid_tax_id(Some(&full)), "{}", full);
        }
    }

    #[test]
    fn test_single_digit_substitution() {
        let valid = "11222333000181";
        for pos in 0..14 {
            for replacement in b'0'..=b'9' {
                let mut bytes = valid.as_bytes().to_vec();
                if bytes[pos] == replacement {
                    continue;
                }
                bytes[pos] = replacement;
                let mutant = String::from_utf8(bytes).unwrap();

                assert!(!is_valid_tax_id(Some(&mutant)), "{}", mutant);
            }
        }
    }

    #[test]
    fn test_zero_check_digit_collisions() {
        let base = "71046563414800";
        let collisions = ["51046563414800", "71040563414800", "71046563214800"];
        assert!(is_valid_tax_id(Some(base)));

        let mut found = Vec::new();
        for pos in 0..14 {
            for replacement in b'0'..=b'9' {
                let mut bytes = base.as_bytes().to_vec();
                if bytes[pos] == replacement {
                    continue;
                }
                bytes[pos] = replacement;
                let mutant = String::from_utf8(bytes).unwrap();
                if is_valid_tax_id(Some(&mutant)) {
                    found.push(mutant);
                }
            }
        }

        // Exactly the documented substitutions pass, all in the base digits
        assert_eq!(found, collisions);
        for mutant in &found {
            assert!(mutant.ends_with("00"));
        }
    }
}
