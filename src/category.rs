// 🏷️ Category Model - closed ranked set plus one sentinel
//
// Raw values arrive dirty ("q1 ", "Q 2", "N/A", ""). Every raw value maps to
// exactly one Category: either a member of the closed set or the sentinel.
// Normalization never fails.

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

// ============================================================================
// CATEGORY
// ============================================================================

/// A resolved category for one entity in one period
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Member of the closed set, by position (Q1 = 0, Q2 = 1, ...)
    Ranked(usize),

    /// Catch-all for unrecognized or missing classifications
    Uncategorized,
}

impl Category {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Category::Uncategorized)
    }
}

/// Canonical matching key: uppercase with every whitespace character removed
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

// ============================================================================
// CATEGORY SET
// ============================================================================

/// The closed category set and its sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    /// Display labels in rank order
    labels: Vec<String>,

    /// Normalized keys, parallel to `labels`
    keys: Vec<String>,

    sentinel: String,
}

impl CategorySet {
    pub fn new(closed: Vec<String>, sentinel: String) -> FlowResult<Self> {
        let mut keys: Vec<String> = Vec::with_capacity(closed.len());

        for label in &closed {
            let key = normalize_key(label);
            if key.is_empty() {
                return Err(FlowError::EmptyCategoryLabel);
            }
            if keys.contains(&key) {
                return Err(FlowError::DuplicateCategory {
                    label: label.clone(),
                    key,
                });
            }
            keys.push(key);
        }

        if sentinel.trim().is_empty() {
            return Err(FlowError::EmptyCategoryLabel);
        }

        // The sentinel label must itself normalize to the sentinel
        let sentinel_key = normalize_key(&sentinel);
        if let Some(i) = keys.iter().position(|k| *k == sentinel_key) {
            return Err(FlowError::SentinelCollision {
                sentinel,
                closed: closed[i].clone(),
            });
        }

        Ok(CategorySet {
            labels: closed,
            keys,
            sentinel,
        })
    }

    /// SJR quartiles with the given sentinel label
    pub fn quartiles(sentinel: &str) -> FlowResult<Self> {
        Self::new(
            ["Q1", "Q2", "Q3", "Q4"].iter().map(|q| q.to_string()).collect(),
            sentinel.to_string(),
        )
    }

    /// Map a raw value onto the closed set, or the sentinel
    pub fn normalize(&self, raw: &str) -> Category {
        let key = normalize_key(raw);
        match self.keys.iter().position(|k| *k == key) {
            Some(i) => Category::Ranked(i),
            None => Category::Uncategorized,
        }
    }

    /// Display label of a category
    pub fn label(&self, category: Category) -> &str {
        match category {
            Category::Ranked(i) => self.labels.get(i).map(String::as_str).unwrap_or(&self.sentinel),
            Category::Uncategorized => &self.sentinel,
        }
    }

    /// Dense slot: closed categories first, sentinel last
    pub fn slot(&self, category: Category) -> usize {
        match category {
            Category::Ranked(i) if i < self.labels.len() => i,
            _ => self.labels.len(),
        }
    }

    /// Inverse of `slot`
    pub fn from_slot(&self, slot: usize) -> Category {
        if slot < self.labels.len() {
            Category::Ranked(slot)
        } else {
            Category::Uncategorized
        }
    }

    /// Closed categories in rank order, then the sentinel
    pub fn all(&self) -> impl Iterator<Item = Category> + '_ {
        (0..self.labels.len())
            .map(Category::Ranked)
            .chain(std::iter::once(Category::Uncategorized))
    }

    /// Number of closed categories (sentinel excluded)
    pub fn closed_len(&self) -> usize {
        self.labels.len()
    }

    /// Number of categories including the sentinel
    pub fn len(&self) -> usize {
        self.labels.len() + 1
    }

    /// A set always holds the sentinel, so it is never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn sentinel_label(&self) -> &str {
        &self.sentinel
    }

    pub fn closed_labels(&self) -> &[String] {
        &self.labels
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quartiles() -> CategorySet {
        CategorySet::quartiles("Uncategorized").unwrap()
    }

    #[test]
    fn test_normalize_dirty_values() {
        let set = quartiles();

        assert_eq!(set.normalize("Q1"), Category::Ranked(0));
        assert_eq!(set.normalize("q1 "), Category::Ranked(0));
        assert_eq!(set.normalize(" q 4"), Category::Ranked(3));
        assert_eq!(set.normalize("\tQ2\n"), Category::Ranked(1));
    }

    #[test]
    fn test_unknown_values_collapse_to_sentinel() {
        let set = quartiles();

        assert_eq!(set.normalize("N/A"), Category::Uncategorized);
        assert_eq!(set.normalize(""), Category::Uncategorized);
        assert_eq!(set.normalize("   "), Category::Uncategorized);
        assert_eq!(set.normalize("Q5"), Category::Uncategorized);
        assert_eq!(set.normalize("Q1Q2"), Category::Uncategorized);
    }

    #[test]
    fn test_sentinel_label_normalizes_to_sentinel() {
        let set = quartiles();
        assert_eq!(set.normalize(set.sentinel_label()), Category::Uncategorized);
    }

    #[test]
    fn test_slots_and_labels() {
        let set = quartiles();

        assert_eq!(set.len(), 5);
        assert_eq!(set.slot(Category::Ranked(2)), 2);
        assert_eq!(set.slot(Category::Uncategorized), 4);
        assert_eq!(set.from_slot(4), Category::Uncategorized);
        assert_eq!(set.label(Category::Ranked(3)), "Q4");
        assert_eq!(set.label(Category::Uncategorized), "Uncategorized");

        let labels: Vec<&str> = set.all().map(|c| set.label(c)).collect();
        assert_eq!(labels, vec!["Q1", "Q2", "Q3", "Q4", "Uncategorized"]);
    }

    #[test]
    fn test_duplicate_closed_labels_rejected() {
        let err = CategorySet::new(
            vec!["Q1".to_string(), "q 1".to_string()],
            "None".to_string(),
        )
        .unwrap_err();

        assert!(matches!(err, FlowError::DuplicateCategory { .. }));
    }

    #[test]
    fn test_sentinel_collision_rejected() {
        let err = CategorySet::new(vec!["Q1".to_string()], "q1".to_string()).unwrap_err();
        assert!(matches!(err, FlowError::SentinelCollision { .. }));
    }

    #[test]
    fn test_empty_labels_rejected() {
        assert_eq!(
            CategorySet::new(vec![" ".to_string()], "None".to_string()).unwrap_err(),
            FlowError::EmptyCategoryLabel
        );
        assert_eq!(
            CategorySet::new(vec!["Q1".to_string()], "".to_string()).unwrap_err(),
            FlowError::EmptyCategoryLabel
        );
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(raw in "[ a-zA-Z0-9/\\t-]{0,12}") {
            let set = quartiles();
            let once = set.normalize(&raw);
            let twice = set.normalize(set.label(once));
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_normalize_key_is_idempotent(raw in "[ a-zA-Z0-9/\\t-]{0,12}") {
            let key = normalize_key(&raw);
            prop_assert_eq!(normalize_key(&key), key);
        }
    }
}
