//! Text helpers shared by the catalog importers

use unicode_normalization::UnicodeNormalization;

/// Build a URL slug from a display name
///
/// Accented letters are decomposed (NFKD) and reduced to their ASCII base.
/// Lowercases, drops characters other than ASCII alphanumerics, spaces,
/// hyphens and underscores, and collapses runs of whitespace/hyphens into a
/// single hyphen. Leading and trailing separators are removed.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for ch in value.nfkd() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' {
            pending_separator = true;
        }
    }

    slug.trim_matches('_').to_string()
}
