//! Standard-symbol format gates (§6 "Symbol regex gates"). Compiled once at
//! process start; checked before a symbol is allowed into a subscription or
//! mapping lookup.

use once_cell::sync::Lazy;
use regex::Regex;

static HK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[0-9]{4,5}\.HK$").unwrap());
static US_SUFFIXED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[A-Z]{1,5}\.US$").unwrap());
static US_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[A-Z]+$").unwrap());
static CN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[0-9]{6}\.(SH|SZ)$").unwrap());
static SG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[A-Z0-9]{3,5}\.SG$").unwrap());

/// True iff `symbol` matches one of the recognised standard-symbol market formats
/// and is within the 50-character opaque-string bound (§3).
pub fn is_valid_standard_symbol(symbol: &str) -> bool {
    if symbol.is_empty() || symbol.len() > 50 {
        return false;
    }
    HK.is_match(symbol)
        || US_SUFFIXED.is_match(symbol)
        || US_BARE.is_match(symbol)
        || CN.is_match(symbol)
        || SG.is_match(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_market_formats() {
        assert!(is_valid_standard_symbol("700.HK"));
        assert!(is_valid_standard_symbol("AAPL.US"));
        assert!(is_valid_standard_symbol("AAPL"));
        assert!(is_valid_standard_symbol("600000.SH"));
        assert!(is_valid_standard_symbol("D05.SG"));
    }

    #[test]
    fn rejects_malformed_or_oversized_symbols() {
        assert!(!is_valid_standard_symbol(""));
        assert!(!is_valid_standard_symbol("700.XX"));
        assert!(!is_valid_standard_symbol(&"A".repeat(51)));
        assert!(!is_valid_standard_symbol("12345678.HK"));
    }
}
