use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Normalize a string for search: case-insensitive, accent-insensitive,
/// ignoring punctuation and whitespace.
///
/// Lowercases, decomposes (NFKD), removes combining marks and keeps only
/// alphanumeric characters.
pub fn normalize_string(input: &str) -> String {
    input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .filter(|c| c.is_alphanumeric())
        .collect()
}
