//! Resource identifier helpers

/// Canonical form of an exchange ticker: trimmed, uppercase, without
/// `NSE:`/`BSE:` prefixes or `.NS`/`.BO` suffixes.
///
/// Returns `None` for empty input or characters that never appear in
/// NSE/BSE symbols.
///
/// ```
/// use investr::symbol::normalize_symbol;
///
/// assert_eq!(normalize_symbol(" tcs.ns ").as_deref(), Some("TCS"));
/// assert_eq!(normalize_symbol("NSE:M&M").as_deref(), Some("M&M"));
/// assert_eq!(normalize_symbol("   "), None);
/// ```
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let mut symbol = raw.trim().to_uppercase();

    for prefix in ["NSE:", "BSE:"] {
        if let Some(rest) = symbol.strip_prefix(prefix) {
            symbol = rest.trim_start().to_string();
        }
    }
    for suffix in [".NS", ".BO"] {
        if let Some(rest) = symbol.strip_suffix(suffix) {
            symbol = rest.to_string();
        }
    }

    let valid = !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '&' || c == '-');
    valid.then_some(symbol)
}

/// First character uppercase, the rest lowercase
pub fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
