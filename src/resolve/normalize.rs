use pgrx::pg_sys::Oid;

/// Collations gathered during one resolution, duplicates allowed
///
/// Invalid OIDs ("no collation") are dropped on insertion, so a normalized
/// result never contains them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollationList(Vec<Oid>);

impl CollationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, collation: Oid) {
        if collation != Oid::INVALID {
            self.0.push(collation);
        }
    }

    pub fn append(&mut self, other: CollationList) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted, duplicate-free result
    pub fn normalize(self) -> Vec<Oid> {
        normalize(self.0)
    }
}

/// Sort ascending by OID value and drop adjacent duplicates
pub fn normalize(mut collations: Vec<Oid>) -> Vec<Oid> {
    collations.sort_unstable_by_key(|collation| collation.as_u32());
    collations.dedup();
    collations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oids(values: &[u32]) -> Vec<Oid> {
        values.iter().copied().map(Oid::from).collect()
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        assert_eq!(normalize(oids(&[951, 100, 950, 100, 951])), oids(&[100, 950, 951]));
    }

    #[test]
    fn test_normalize_is_order_independent() {
        let a = normalize(oids(&[3, 1, 2, 1]));
        let b = normalize(oids(&[1, 1, 2, 3]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize(Vec::new()).is_empty());
    }

    #[test]
    fn test_list_skips_invalid() {
        let mut list = CollationList::new();
        list.push(Oid::INVALID);
        list.push(Oid::from(950));
        list.push(Oid::INVALID);

        assert_eq!(list.len(), 1);
        assert_eq!(list.normalize(), oids(&[950]));
    }

    #[test]
    fn test_list_append_keeps_duplicates_until_normalized() {
        let mut left = CollationList::new();
        left.push(Oid::from(100));
        let mut right = CollationList::new();
        right.push(Oid::from(100));

        left.append(right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.normalize(), oids(&[100]));
    }
}
