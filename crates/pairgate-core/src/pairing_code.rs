//! Phone number normalization and pairing code display formatting

/// Width of each dash-separated block in a displayed pairing code
const CODE_BLOCK_LEN: usize = 4;

/// Strip everything but ASCII digits from a phone number
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Group a raw pairing code into 4-character blocks joined by dashes
///
/// The final block may be shorter. An empty code stays empty.
pub fn format_pairing_code(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    chars
        .chunks(CODE_BLOCK_LEN)
        .map(|block| block.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "15551234567");
        assert_eq!(normalize_phone("44 7700.900.123"), "447700900123");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[test]
    fn test_normalize_ignores_non_ascii_digits() {
        // Arabic-Indic digits are not accepted by the pairing endpoint
        assert_eq!(normalize_phone("٣12"), "12");
    }

    #[test]
    fn test_format_groups_in_fours() {
        assert_eq!(format_pairing_code("ABCD1234WXYZ"), "ABCD-1234-WXYZ");
        assert_eq!(format_pairing_code("ABCD1234"), "ABCD-1234");
    }

    #[test]
    fn test_format_short_tail() {
        assert_eq!(format_pairing_code("ABCDE"), "ABCD-E");
        assert_eq!(format_pairing_code("AB"), "AB");
        assert_eq!(format_pairing_code(""), "");
    }
}
