//! Canonical comparison form for field labels.

const NO_BREAK_SPACE: char = '\u{00A0}';

/// Normalizes label text into the key used for matching.
///
/// Non-breaking spaces and line breaks become ordinary spaces, whitespace
/// runs collapse to a single space, the ends are trimmed and the result is
/// lower-cased. Never fails; the empty string maps to itself.
pub fn normalize(text: &str) -> String {
    let spaced: String = text
        .chars()
        .map(|c| match c {
            NO_BREAK_SPACE | '\n' | '\r' => ' ',
            other => other,
        })
        .collect();

    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");

    collapsed.to_lowercase()
}
