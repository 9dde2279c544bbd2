//! Phone number normalization
//!
//! Maps user-entered subscriber numbers to the gateway's international
//! format. Length and prefix are not validated; a malformed number is passed
//! through and left for the gateway to reject.

/// Default country prefix (Kenya)
pub const DEFAULT_COUNTRY_CODE: &str = "254";

/// Replace one leading `0` with `country_code`, then drop every non-digit.
///
/// ```
/// use safepull_ledger::domain::normalize_phone;
///
/// assert_eq!(normalize_phone("0712 345-678", "254"), "254712345678");
/// assert_eq!(normalize_phone("+254712345678", "254"), "254712345678");
/// ```
pub fn normalize_phone(input: &str, country_code: &str) -> String {
    let prefixed = match input.strip_prefix('0') {
        Some(rest) => format!("{}{}", country_code, rest),
        None => input.to_string(),
    };

    prefixed.chars().filter(|c| c.is_ascii_digit()).collect()
}
