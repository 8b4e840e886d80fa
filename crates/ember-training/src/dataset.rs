use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Binary class of an item. Class "a" of a location pair is the positive class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassLabel {
    Negative,
    Positive,
}

impl ClassLabel {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }

    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        if value == 0 { Self::Negative } else { Self::Positive }
    }
}

/// Where the two classes of a dataset live. Both halves always share a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetLocation {
    Local { class_a: PathBuf, class_b: PathBuf },
    Remote { class_a_prefix: String, class_b_prefix: String },
}

impl DatasetLocation {
    /// Count-table keys for (class a, class b).
    #[must_use]
    pub fn keys(&self) -> (String, String) {
        match self {
            Self::Local { class_a, class_b } => {
                (class_a.display().to_string(), class_b.display().to_string())
            }
            Self::Remote { class_a_prefix, class_b_prefix } => {
                (class_a_prefix.clone(), class_b_prefix.clone())
            }
        }
    }
}

/// Observed item counts keyed by location (path or prefix).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCountTable {
    counts: BTreeMap<String, usize>,
}

impl ImageCountTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the result of a scan of `key`.
    pub fn record(&mut self, key: impl Into<String>, count: usize) {
        self.counts.insert(key.into(), count);
    }

    /// Count for `key`; unscanned keys read as zero.
    #[must_use]
    pub fn get(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// (class a, class b) counts for a location.
    #[must_use]
    pub fn pair(&self, location: &DatasetLocation) -> (usize, usize) {
        let (a, b) = location.keys();
        (self.get(&a), self.get(&b))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl std::fmt::Display for ImageCountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Derives labels from the item's path or key.
///
/// Precedence, first match wins:
/// 1. Directory segments, walked from the file name outwards. A segment equal
///    to the negative marker gives `Negative`; one equal to the positive
///    marker gives `Positive`.
/// 2. The negative marker anywhere in the item, as a substring.
/// 3. The positive marker anywhere in the item, as a substring.
/// 4. Otherwise `Negative`.
///
/// Checking the negative marker before the positive one keeps `nofire/x.jpg`
/// out of the `fire` class, which a plain "contains the positive marker" test
/// would get wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRule {
    pub positive_marker: String,
    #[serde(default)]
    pub negative_marker: Option<String>,
}

impl Default for LabelRule {
    fn default() -> Self {
        Self { positive_marker: "fire".to_string(), negative_marker: Some("nofire".to_string()) }
    }
}

impl LabelRule {
    #[must_use]
    pub fn new(positive_marker: impl Into<String>, negative_marker: Option<String>) -> Self {
        Self { positive_marker: positive_marker.into(), negative_marker }
    }

    /// Local directory names that [`label_for`](Self::label_for) maps back to
    /// (positive, negative) through the segment rule.
    #[must_use]
    pub fn class_dir_names(&self) -> (String, String) {
        let positive = self.positive_marker.clone();
        let negative = match self.negative_marker.as_deref().filter(|m| !m.is_empty()) {
            Some(marker) => marker.to_string(),
            None => ["negative", "background", "other", "0"]
                .into_iter()
                .find(|name| !name.contains(positive.as_str()))
                .unwrap_or("1")
                .to_string(),
        };
        (positive, negative)
    }

    #[must_use]
    pub fn label_for(&self, item: &str) -> ClassLabel {
        let negative = self.negative_marker.as_deref().filter(|m| !m.is_empty());

        for segment in item.rsplit(['/', '\\']).skip(1) {
            if Some(segment) == negative {
                return ClassLabel::Negative;
            }
            if segment == self.positive_marker {
                return ClassLabel::Positive;
            }
        }

        if negative.is_some_and(|m| item.contains(m)) {
            ClassLabel::Negative
        } else if item.contains(&self.positive_marker) {
            ClassLabel::Positive
        } else {
            ClassLabel::Negative
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_rule_does_not_confuse_nofire_with_fire() {
        let rule = LabelRule::default();
        assert_eq!(rule.label_for("/mnt/data/training/fire/img1.jpg"), ClassLabel::Positive);
        assert_eq!(rule.label_for("/mnt/data/training/nofire/img1.jpg"), ClassLabel::Negative);
        assert_eq!(rule.label_for("fire/img1.jpg"), ClassLabel::Positive);
        assert_eq!(rule.label_for("nofire/img1.jpg"), ClassLabel::Negative);
    }

    #[test]
    fn test_label_rule_prefers_closest_segment() {
        let rule = LabelRule::default();
        assert_eq!(rule.label_for("/srv/fire-detection/nofire/a.png"), ClassLabel::Negative);
        assert_eq!(rule.label_for("/srv/fire/nofire/a.png"), ClassLabel::Negative);
        assert_eq!(rule.label_for("/srv/nofire-archive/fire/a.png"), ClassLabel::Positive);
    }

    #[test]
    fn test_label_rule_without_negative_marker_is_plain_substring() {
        let rule = LabelRule::new("smoke", None);
        assert_eq!(rule.label_for("bucket/smoke_01.jpg"), ClassLabel::Positive);
        assert_eq!(rule.label_for("bucket/clear_01.jpg"), ClassLabel::Negative);
    }

    #[test]
    fn test_class_dir_names_round_trip_through_label_for() {
        for rule in [LabelRule::default(), LabelRule::new("smoke", None), LabelRule::new("neg", None)] {
            let (positive, negative) = rule.class_dir_names();
            assert_ne!(positive, negative);
            let root = "/mnt/data/materialized/nofire-and-fire";
            assert_eq!(rule.label_for(&format!("{root}/{positive}/1.png")), ClassLabel::Positive);
            assert_eq!(rule.label_for(&format!("{root}/{negative}/1.png")), ClassLabel::Negative);
        }
    }

    #[test]
    fn test_count_table_pair_and_display() {
        let location = DatasetLocation::Remote {
            class_a_prefix: "fire/".to_string(),
            class_b_prefix: "nofire/".to_string(),
        };
        let mut table = ImageCountTable::new();
        table.record("fire/", 3);
        assert_eq!(table.pair(&location), (3, 0));
        table.record("nofire/", 5);
        assert_eq!(table.pair(&location), (3, 5));
        assert_eq!(table.total(), 8);
        assert_eq!(table.to_string(), "{fire/=3, nofire/=5}");
    }
}
