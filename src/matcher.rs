use crate::index::{FieldIndex, IndexedField};
use crate::schema::MatchPolicy;

/// Resolves a normalized row label to at most one indexed field.
///
/// A field applies when its key occurs anywhere inside the label. With
/// [`MatchPolicy::FirstDeclared`] the scan stops at the first such key in
/// declaration order; with [`MatchPolicy::LongestKey`] the contained key with
/// the most characters wins and ties go to the earlier declaration. An empty label matches
/// nothing.
pub fn resolve<'a>(
    label: &str,
    index: &'a FieldIndex,
    policy: MatchPolicy,
) -> Option<&'a IndexedField> {
    if label.is_empty() {
        return None;
    }

    let mut candidates = index
        .iter()
        .filter(|field| !field.key.is_empty() && label.contains(field.key.as_str()));

    match policy {
        MatchPolicy::FirstDeclared => candidates.next(),
        MatchPolicy::LongestKey => candidates
            .map(|field| (field.key.chars().count(), field))
            .fold(None, |best: Option<(usize, &IndexedField)>, (len, field)| match best {
                Some((best_len, _)) if best_len >= len => best,
                _ => Some((len, field)),
            })
            .map(|(_, field)| field),
    }
}

/// Value of the field [`resolve`] picks for `label`.
pub fn resolve_value<'a>(
    label: &str,
    index: &'a FieldIndex,
    policy: MatchPolicy,
) -> Option<&'a str> {
    resolve(label, index, policy).map(|field| field.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::schema::FieldMap;

    fn index_of(pairs: &[(&str, &str)]) -> FieldIndex {
        let fields: FieldMap = pairs.iter().copied().collect();
        FieldIndex::build(&fields)
    }

    #[test]
    fn test_containment_match() {
        let index = index_of(&[("protocol title", "Study ABC-123")]);
        let label = normalize("Protocol Title:");
        assert_eq!(
            resolve_value(&label, &index, MatchPolicy::FirstDeclared),
            Some("Study ABC-123")
        );
    }

    #[test]
    fn test_no_match() {
        let index = index_of(&[("sponsor name", "X")]);
        let label = normalize("Unrelated Field");
        assert!(resolve(&label, &index, MatchPolicy::FirstDeclared).is_none());
        assert!(resolve(&label, &index, MatchPolicy::LongestKey).is_none());
    }

    #[test]
    fn test_key_longer_than_label_does_not_match() {
        let index = index_of(&[("protocol title", "X")]);
        assert!(resolve("title", &index, MatchPolicy::FirstDeclared).is_none());
    }

    #[test]
    fn test_empty_label_never_matches() {
        let index = index_of(&[("a", "1"), ("title", "2")]);
        assert!(resolve("", &index, MatchPolicy::FirstDeclared).is_none());
        assert!(resolve("", &index, MatchPolicy::LongestKey).is_none());
    }

    #[test]
    fn test_first_declared_wins_among_multiple_matches() {
        let index = index_of(&[("date", "2024-01-01"), ("start date", "2023-12-01")]);
        let label = normalize("Trial Start Date");

        for _ in 0..10 {
            let field = resolve(&label, &index, MatchPolicy::FirstDeclared).unwrap();
            assert_eq!(field.key, "date");
            assert_eq!(field.value, "2024-01-01");
        }
    }

    #[test]
    fn test_declaration_order_decides_first_match() {
        let index = index_of(&[("start date", "2023-12-01"), ("date", "2024-01-01")]);
        assert_eq!(
            resolve_value("trial start date", &index, MatchPolicy::FirstDeclared),
            Some("2023-12-01")
        );
    }

    #[test]
    fn test_longest_key_policy() {
        let index = index_of(&[("date", "2024-01-01"), ("start date", "2023-12-01")]);
        assert_eq!(
            resolve_value("trial start date", &index, MatchPolicy::LongestKey),
            Some("2023-12-01")
        );
    }

    #[test]
    fn test_longest_key_counts_characters_not_bytes() {
        let index = index_of(&[("ääää", "umlauts"), ("abcdef", "ascii")]);
        assert_eq!(
            resolve_value("ääää abcdef", &index, MatchPolicy::LongestKey),
            Some("ascii")
        );

        let index = index_of(&[("abc", "ascii"), ("äää", "umlauts")]);
        assert_eq!(
            resolve_value("abc äää", &index, MatchPolicy::LongestKey),
            Some("ascii")
        );
    }

    #[test]
    fn test_longest_key_ties_go_to_earlier_field() {
        let index = index_of(&[("site a", "first"), ("site b", "second")]);
        assert_eq!(
            resolve_value("site a and site b", &index, MatchPolicy::LongestKey),
            Some("first")
        );
    }
}
