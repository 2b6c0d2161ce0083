// crates/sync-engine/src/conflict.rs
//! Last-writer-wins planning for cross-backend reconciliation

use crate::types::RemotePosition;
use std::collections::{BTreeSet, HashMap};
use storystream_core::BookId;

/// What reconciliation should do for one book
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Secondary holds the newer value: adopt it and push it to the primary
    AdoptSecondary(RemotePosition),
    /// Primary holds the newer value: push it to the secondary
    HealSecondary(RemotePosition),
    /// Both sides agree on the timestamp
    Unchanged,
}

/// Compares the positions held by the two backends
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolves one book; at least one side must be present
    pub fn resolve(
        &self,
        primary: Option<&RemotePosition>,
        secondary: Option<&RemotePosition>,
    ) -> Resolution {
        match (primary, secondary) {
            (Some(p), Some(s)) if s.timestamp > p.timestamp => Resolution::AdoptSecondary(s.clone()),
            (Some(p), Some(s)) if p.timestamp > s.timestamp => Resolution::HealSecondary(p.clone()),
            (Some(_), Some(_)) | (None, None) => Resolution::Unchanged,
            (Some(p), None) => Resolution::HealSecondary(p.clone()),
            (None, Some(s)) => Resolution::AdoptSecondary(s.clone()),
        }
    }

    /// Resolves every book present on either side, in book id order
    pub fn plan(
        &self,
        primary: &HashMap<BookId, RemotePosition>,
        secondary: &HashMap<BookId, RemotePosition>,
    ) -> Vec<(BookId, Resolution)> {
        let books: BTreeSet<&BookId> = primary.keys().chain(secondary.keys()).collect();
        books
            .into_iter()
            .map(|book| {
                let resolution = self.resolve(primary.get(book), secondary.get(book));
                (book.clone(), resolution)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storystream_core::{Locator, Timestamp};

    fn pos(href: &str, ts: i64) -> RemotePosition {
        RemotePosition::new(Locator::new(href).unwrap(), Timestamp::from_millis(ts))
    }

    #[test]
    fn test_newer_secondary_is_adopted() {
        let resolver = ConflictResolver::new();
        let secondary = pos("b", 200);
        assert_eq!(
            resolver.resolve(Some(&pos("a", 100)), Some(&secondary)),
            Resolution::AdoptSecondary(secondary)
        );
    }

    #[test]
    fn test_newer_primary_heals_secondary() {
        let resolver = ConflictResolver::new();
        let primary = pos("a", 300);
        assert_eq!(
            resolver.resolve(Some(&primary), Some(&pos("b", 200))),
            Resolution::HealSecondary(primary)
        );
    }

    #[test]
    fn test_equal_timestamps_unchanged() {
        let resolver = ConflictResolver::new();
        assert_eq!(
            resolver.resolve(Some(&pos("a", 100)), Some(&pos("b", 100))),
            Resolution::Unchanged
        );
    }

    #[test]
    fn test_one_sided_books() {
        let resolver = ConflictResolver::new();
        let mut primary = HashMap::new();
        let mut secondary = HashMap::new();
        primary.insert(BookId::new("only-primary").unwrap(), pos("a", 1));
        secondary.insert(BookId::new("only-secondary").unwrap(), pos("b", 2));

        let plan = resolver.plan(&primary, &secondary);
        assert_eq!(plan.len(), 2);
        assert!(matches!(plan[0].1, Resolution::HealSecondary(_)));
        assert!(matches!(plan[1].1, Resolution::AdoptSecondary(_)));
    }
}
