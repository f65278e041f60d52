//! Fields of interest a consumer wants rendered for each value.

use std::collections::BTreeSet;

/// A single field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Field {
    Value,
    Timestamp,
    Alarm,
    Severity,
    Status,
    Units,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Value,
        Field::Timestamp,
        Field::Alarm,
        Field::Severity,
        Field::Status,
        Field::Units,
    ];

    /// The wire tag for this field.
    pub fn tag(&self) -> &'static str {
        match self {
            Field::Value => "value",
            Field::Timestamp => "timestamp",
            Field::Alarm => "alarm",
            Field::Severity => "severity",
            Field::Status => "status",
            Field::Units => "units",
        }
    }

    /// Look up a field by its wire tag (case-insensitive).
    pub fn from_tag(tag: &str) -> Option<Field> {
        let tag = tag.trim();
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.tag().eq_ignore_ascii_case(tag))
    }
}

/// An ordered set of fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct FieldSet(BTreeSet<Field>);

impl FieldSet {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Self(fields.into_iter().collect())
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Value, timestamp, alarm and severity.
impl Default for FieldSet {
    fn default() -> Self {
        Self::new([Field::Value, Field::Timestamp, Field::Alarm, Field::Severity])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_tag(field.tag()), Some(field));
        }
        assert_eq!(Field::from_tag(" VALUE "), Some(Field::Value));
        assert_eq!(Field::from_tag("colour"), None);
    }

    #[test]
    fn default_set() {
        let set = FieldSet::default();
        assert_eq!(set.len(), 4);
        assert!(set.contains(Field::Value));
        assert!(!set.contains(Field::Units));
    }

    #[test]
    fn duplicates_collapse() {
        let set = FieldSet::new([Field::Value, Field::Value, Field::Status]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Field::Value, Field::Status]);
    }
}
