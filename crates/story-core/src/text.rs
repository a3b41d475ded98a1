//! Search text folding.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold text for case- and diacritic-insensitive matching.
///
/// Decomposes to NFD, drops combining marks, then lowercases, so
/// `"Crème Brûlée"` folds to `"creme brulee"`.
pub fn fold_for_search(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Whether `haystack` contains `needle` after folding both.
pub fn folded_contains(haystack: &str, needle: &str) -> bool {
    fold_for_search(haystack).contains(&fold_for_search(needle))
}
