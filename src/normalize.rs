//! Text canonicalization shared by outbound query parameters and match checks.

use unicode_normalization::UnicodeNormalization;

/// Folds `s` to plain ASCII: NFKD decomposition with every non-ASCII code
/// point dropped, whitespace runs collapsed to one space, ends trimmed.
///
/// `None` maps to an empty string.
pub fn normalize_text(s: Option<&str>) -> String {
    let Some(s) = s else {
        return String::new();
    };
    let folded: String = s.nfkd().filter(char::is_ascii).collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keeps the digits of `s` and returns at most the first five.
pub fn normalize_zip(s: Option<&str>) -> String {
    let Some(s) = s else {
        return String::new();
    };
    s.chars().filter(char::is_ascii_digit).take(5).collect()
}

/// Word-initial capitalization for display columns. Never used for matching.
pub fn title_case(s: Option<&str>) -> String {
    let Some(s) = s.filter(|v| !v.is_empty()) else {
        return String::new();
    };
    let mut out = String::with_capacity(s.len());
    let mut prev_is_letter = false;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if prev_is_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(ch);
            prev_is_letter = false;
        }
    }
    out
}

/// Comparison key used on both the input side and the registry side.
pub fn fold_for_compare(s: &str) -> String {
    normalize_text(Some(s)).to_ascii_uppercase()
}

/// True when both values fold to the same non-empty key.
pub fn same_text(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let a = fold_for_compare(a);
            !a.is_empty() && a == fold_for_compare(b)
        }
        _ => false,
    }
}

/// A value is present when it is non-null and non-blank after trimming.
pub fn is_present(value: Option<&str>) -> bool {
    value.map(str::trim).is_some_and(|v| !v.is_empty())
}
