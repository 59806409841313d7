
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::{Metadata, MetadataValue};

/// A single metadata predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterCondition {
    /// Equality; a list-valued field matches when it contains the value
    Eq { field: String, value: MetadataValue },
    /// Matches when any of the values satisfies `Eq`
    In {
        field: String,
        values: Vec<MetadataValue>,
    },
    /// Inclusive bounds; numbers compare numerically, text lexicographically
    Range {
        field: String,
        gte: Option<MetadataValue>,
        lte: Option<MetadataValue>,
    },
}

impl FilterCondition {
    #[inline]
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. } | Self::In { field, .. } | Self::Range { field, .. } => field,
        }
    }

    #[inline]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let Some(stored) = metadata.get(self.field()) else {
            return false;
        };

        match self {
            Self::Eq { value, .. } => value_equals(stored, value),
            Self::In { values, .. } => values.iter().any(|value| value_equals(stored, value)),
            Self::Range { gte, lte, .. } => {
                let lower_ok = gte.as_ref().is_none_or(|bound| {
                    compare_values(stored, bound).is_some_and(Ordering::is_ge)
                });
                let upper_ok = lte.as_ref().is_none_or(|bound| {
                    compare_values(stored, bound).is_some_and(Ordering::is_le)
                });
                lower_ok && upper_ok
            }
        }
    }

    /// Whether this is a range over text values, which some backends can only
    /// evaluate client-side
    #[inline]
    pub fn is_text_range(&self) -> bool {
        match self {
            Self::Range { gte, lte, .. } => [gte, lte]
                .into_iter()
                .flatten()
                .any(|bound| matches!(bound, MetadataValue::Text(_))),
            _ => false,
        }
    }

    fn sort_key(&self) -> (String, String) {
        (
            self.field().to_string(),
            serde_json::to_string(self).unwrap_or_default(),
        )
    }
}

fn value_equals(stored: &MetadataValue, wanted: &MetadataValue) -> bool {
    match (stored, wanted) {
        (MetadataValue::List(items), MetadataValue::Text(text)) => items.contains(text),
        (MetadataValue::List(items), MetadataValue::List(wanted_items)) => {
            wanted_items.iter().any(|w| items.contains(w))
        }
        (MetadataValue::Number(a), MetadataValue::Number(b)) => a == b,
        (stored, wanted) => stored == wanted,
    }
}

fn compare_values(stored: &MetadataValue, bound: &MetadataValue) -> Option<Ordering> {
    match (stored, bound) {
        (MetadataValue::Number(a), MetadataValue::Number(b)) => a.partial_cmp(b),
        (MetadataValue::Text(a), MetadataValue::Text(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// AND-combined metadata conditions applied to a similarity query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    conditions: Vec<FilterCondition>,
}

impl SearchFilters {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.push(FilterCondition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[inline]
    pub fn any_of(mut self, field: impl Into<String>, values: Vec<MetadataValue>) -> Self {
        self.conditions.push(FilterCondition::In {
            field: field.into(),
            values,
        });
        self
    }

    #[inline]
    pub fn range(
        mut self,
        field: impl Into<String>,
        gte: Option<MetadataValue>,
        lte: Option<MetadataValue>,
    ) -> Self {
        self.conditions.push(FilterCondition::Range {
            field: field.into(),
            gte,
            lte,
        });
        self
    }

    #[inline]
    pub fn push(&mut self, condition: FilterCondition) {
        self.conditions.push(condition);
    }

    #[inline]
    pub fn conditions(&self) -> &[FilterCondition] {
        &self.conditions
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    #[inline]
    pub fn has_text_range(&self) -> bool {
        self.conditions.iter().any(FilterCondition::is_text_range)
    }

    #[inline]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|c| c.matches(metadata))
    }

    /// Canonical ordering so logically equal filter sets compare and hash equal
    #[inline]
    pub fn normalized(&self) -> Self {
        let mut conditions = self.conditions.clone();
        conditions.sort_by_cached_key(FilterCondition::sort_key);
        conditions.dedup();
        Self { conditions }
    }
}
