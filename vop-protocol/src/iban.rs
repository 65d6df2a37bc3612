//! IBAN checksum and routing-prefix helpers.
//!
//! The checksum is the standard mod-97 scheme: move the first four characters
//! to the end, substitute letters with their base-36 values (A=10 .. Z=35)
//! and the IBAN is valid iff the resulting decimal string is congruent to 1
//! modulo 97. The remainder is folded one digit at a time so arbitrarily long
//! IBANs never overflow.

/// Length of the routing-index key: country code + check digits + the
/// leading segment of the national bank code.
pub const ROUTING_PREFIX_LEN: usize = 6;

/// Validate an IBAN's mod-97 checksum. Pure and total: any string that is
/// not uppercase alphanumeric simply fails the check.
pub fn validate_checksum(iban: &str) -> bool {
    if iban.len() < 5 || !iban.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return false;
    }

    let (head, tail) = iban.split_at(4);
    let mut remainder: u32 = 0;

    for ch in tail.chars().chain(head.chars()) {
        let value = match ch {
            '0'..='9' => ch as u32 - '0' as u32,
            'A'..='Z' => ch as u32 - 'A' as u32 + 10,
            _ => return false,
        };

        if value < 10 {
            remainder = (remainder * 10 + value) % 97;
        } else {
            // Two-digit substitution for letters.
            remainder = (remainder * 100 + value) % 97;
        }
    }

    remainder == 1
}

/// Derive the directory routing key from an IBAN.
///
/// Returns `None` when the IBAN is too short to carry a bank-code segment.
pub fn routing_prefix(iban: &str) -> Option<&str> {
    if iban.len() < ROUTING_PREFIX_LEN {
        return None;
    }
    Some(&iban[..ROUTING_PREFIX_LEN])
}

/// Extract the full national bank code (MFO) from a Ukrainian IBAN.
/// Format: UA + 2 check digits + 6-digit bank code + account number.
pub fn bank_code(iban: &str) -> Option<&str> {
    if iban.len() < 10 {
        return None;
    }
    Some(&iban[4..10])
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_IBAN: &str = "UA743052990000026007233566001";

    #[test]
    fn accepts_valid_ukrainian_iban() {
        assert!(validate_checksum(VALID_IBAN));
    }

    #[test]
    fn rejects_corrupted_check_digits() {
        assert!(!validate_checksum("UA223052990000026007233566001"));
    }

    #[test]
    fn rejects_transposed_digits() {
        // A single swapped pair breaks mod-97.
        assert!(!validate_checksum("UA743052990000026007233566010"));
    }

    #[test]
    fn rejects_non_alphanumeric_input() {
        assert!(!validate_checksum("UA21 3052 9900"));
        assert!(!validate_checksum(""));
        assert!(!validate_checksum("UA2"));
    }

    #[test]
    fn checksum_is_deterministic() {
        for _ in 0..3 {
            assert!(validate_checksum(VALID_IBAN));
        }
    }

    #[test]
    fn routing_prefix_takes_first_six_characters() {
        assert_eq!(routing_prefix(VALID_IBAN), Some("UA7430"));
        assert_eq!(routing_prefix("UA21"), None);
    }

    #[test]
    fn bank_code_is_mfo_segment() {
        assert_eq!(bank_code(VALID_IBAN), Some("305299"));
    }
}
