//! Abbreviated-UUID resolver.
//!
//! Full UUIDs live in an ordered set. All ids sharing a prefix form one contiguous
//! range starting at the first id >= prefix, so resolution is a single range scan that
//! looks at no more than two entries: one match resolves, two is ambiguous.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::consts::{DEFAULT_MIN_ABBREV_LEN, UUID_LEN};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TruncIndex {
    ids: BTreeSet<String>,
    min_len: usize,
}

impl Default for TruncIndex {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_ABBREV_LEN)
    }
}

impl TruncIndex {
    pub fn new(min_len: usize) -> Self {
        Self {
            ids: BTreeSet::new(),
            min_len: min_len.clamp(1, UUID_LEN),
        }
    }

    pub fn min_len(&self) -> usize {
        self.min_len
    }

    pub fn add(&mut self, id: &str) -> Result<()> {
        if id.is_empty() || id.contains(char::is_whitespace) {
            return Err(Error::invalid(format!("illegal id '{id}'")));
        }
        if !self.ids.insert(id.to_string()) {
            return Err(Error::conflict(format!("id '{id}' already indexed")));
        }
        Ok(())
    }

    /// Idempotent.
    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Resolve `prefix` to the single full id it abbreviates.
    pub fn get(&self, prefix: &str) -> Result<String> {
        if prefix.len() < self.min_len {
            return Err(Error::invalid(format!(
                "abbreviated id '{}' is shorter than {} characters",
                prefix, self.min_len
            )));
        }
        let mut hits = self
            .ids
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|id| id.starts_with(prefix));

        match (hits.next(), hits.next()) {
            (None, _) => Err(Error::not_found(format!("no id matches '{prefix}'"))),
            (Some(id), None) => Ok(id.clone()),
            (Some(_), Some(_)) => Err(Error::AmbiguousId {
                prefix: prefix.to_string(),
                matches: self.count_prefix(prefix),
            }),
        }
    }

    /// Number of ids starting with `prefix` (error reporting only; walks the whole range).
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.ids
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|id| id.starts_with(prefix))
            .count()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const A: &str = "0badc0de-1111-4000-8000-000000000001";
    const B: &str = "0badc0de-2222-4000-8000-000000000002";
    const C: &str = "7e57ab1e-3333-4000-8000-000000000003";

    fn filled() -> TruncIndex {
        let mut idx = TruncIndex::new(6);
        for id in [A, B, C] {
            idx.add(id).unwrap();
        }
        idx
    }

    #[test]
    fn resolves_unique_prefix_and_full_id() {
        let idx = filled();
        assert_eq!(idx.get("7e57ab").unwrap(), C);
        assert_eq!(idx.get("0badc0de-1").unwrap(), A);
        assert_eq!(idx.get(B).unwrap(), B);
    }

    #[test]
    fn shared_prefix_is_ambiguous() {
        let idx = filled();
        match idx.get("0badc0de") {
            Err(Error::AmbiguousId { matches, .. }) => assert_eq!(matches, 2),
            other => panic!("expected AmbiguousId, got {other:?}"),
        }
    }

    #[test]
    fn short_and_unknown_prefixes() {
        let idx = filled();
        assert_eq!(idx.get("0bad").unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(idx.get("ffffff").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn add_remove() {
        let mut idx = filled();
        assert_eq!(idx.add(A).unwrap_err().kind(), ErrorKind::Conflict);
        assert!(idx.remove(B));
        assert!(!idx.remove(B));
        assert_eq!(idx.get("0badc0de").unwrap(), A);
        assert_eq!(idx.len(), 2);
    }
}
