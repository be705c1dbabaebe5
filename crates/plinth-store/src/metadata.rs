//! Metadata maps and the exact-match query predicate.
//!
//! Keys are plain case-sensitive strings with no imposed structure; metadata
//! is a string-keyed map of JSON-representable values. The store contract's
//! only query mechanism is exact-match conjunction over these maps.

/// Metadata mapping for a key: metadata key to JSON-representable value.
///
/// The same map shape is used for event attributes, so store metadata can be
/// attached to events without conversion.
pub type Metadata = plinth_events::Attributes;

/// The subset of `metadata` named by `select`.
///
/// Selected keys absent from the metadata are silently absent from the
/// result.
pub fn select_metadata(metadata: &Metadata, select: &[&str]) -> Metadata {
    select
        .iter()
        .filter_map(|name| {
            metadata
                .get(*name)
                .map(|value| (name.to_string(), value.clone()))
        })
        .collect()
}

/// Whether `metadata` contains every predicate key with an exactly equal
/// value. An empty predicate map matches everything.
pub fn matches_all(metadata: &Metadata, predicates: &Metadata) -> bool {
    predicates
        .iter()
        .all(|(name, expected)| metadata.get(name) == Some(expected))
}

/// Build a [`Metadata`] map from `key => value` pairs; values go through
/// [`serde_json::json!`].
///
/// ```
/// use plinth_store::metadata;
///
/// let meta = metadata! { "author" => "alice", "revision" => 3 };
/// assert_eq!(meta["revision"], serde_json::json!(3));
/// ```
#[macro_export]
macro_rules! metadata {
    () => { $crate::Metadata::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Metadata::new();
        $(map.insert($name.to_string(), ::serde_json::json!($value));)+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_drops_missing_keys() {
        let meta = metadata! { "author" => "alice", "org" => "o1" };
        let selected = select_metadata(&meta, &["author", "absent"]);
        assert_eq!(selected, metadata! { "author" => "alice" });
    }

    #[test]
    fn matches_all_is_conjunctive() {
        let meta = metadata! { "author" => "alice", "org" => "o1" };
        assert!(matches_all(&meta, &metadata! { "author" => "alice" }));
        assert!(matches_all(
            &meta,
            &metadata! { "author" => "alice", "org" => "o1" }
        ));
        assert!(!matches_all(
            &meta,
            &metadata! { "author" => "alice", "org" => "o2" }
        ));
        assert!(!matches_all(&meta, &metadata! { "absent" => true }));
    }

    #[test]
    fn empty_predicates_match_everything() {
        assert!(matches_all(&metadata! { "a" => 1 }, &Metadata::new()));
        assert!(matches_all(&Metadata::new(), &Metadata::new()));
    }

    #[test]
    fn values_compare_exactly_not_textually() {
        let meta = metadata! { "revision" => 3 };
        assert!(!matches_all(&meta, &metadata! { "revision" => "3" }));
    }
}
