//! Turkish-aware text normalization.
//!
//! Normalization is a correctness requirement here, not cosmetics: cache
//! fingerprints and chunk boundaries both depend on it, and Turkish casing
//! does not follow the Unicode default (`I` lowercases to `ı`, `İ` to `i`).

/// Lowercase a string using Turkish casing rules.
///
/// The two characters the default algorithm gets wrong are handled
/// explicitly; everything else goes through `char::to_lowercase`.
pub fn turkish_lowercase(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            'I' => out.push('ı'),
            'İ' => out.push('i'),
            _ => out.extend(c.to_lowercase()),
        }
    }
    out
}

/// Collapse whitespace runs and strip byte-order marks.
///
/// Runs of two or more whitespace characters (including newlines) collapse
/// to a single space; leading and trailing whitespace is removed. Turkish
/// letters pass through untouched.
pub fn normalize_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_whitespace = false;
    for c in input.chars() {
        if c == '\u{feff}' {
            continue;
        }
        if c.is_whitespace() {
            in_whitespace = true;
            continue;
        }
        if in_whitespace && !out.is_empty() {
            out.push(' ');
        }
        in_whitespace = false;
        out.push(c);
    }
    out
}

/// Canonical form of a query used for cache keys.
pub fn normalize_query(input: &str) -> String {
    normalize_whitespace(&turkish_lowercase(input))
}
