use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Post-hoc predicates applied to ranked chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct QueryFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

/// Inclusive date range; either bound may be open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub from: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    #[must_use]
    pub const fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }

    /// A range whose lower bound lies after its upper bound matches nothing.
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }
}

impl QueryFilters {
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_range = Some(DateRange::new(from, to));
        self
    }

    /// True when at least one predicate would reject something.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.category
            .as_deref()
            .is_some_and(|c| !normalize_category(c).is_empty())
            || self
                .date_range
                .as_ref()
                .is_some_and(|r| r.from.is_some() || r.to.is_some())
    }

    /// Category compares case-insensitively after trimming; a chunk without a date never
    /// passes an active date range.
    #[must_use]
    pub fn allows(&self, category: Option<&str>, date: Option<NaiveDate>) -> bool {
        if let Some(wanted) = self.category.as_deref() {
            let wanted = normalize_category(wanted);
            if !wanted.is_empty() {
                let Some(actual) = category else {
                    return false;
                };
                if normalize_category(actual) != wanted {
                    return false;
                }
            }
        }

        if let Some(range) = &self.date_range {
            if range.from.is_none() && range.to.is_none() {
                return true;
            }
            let Some(date) = date else {
                return false;
            };
            if !range.contains(date) {
                return false;
            }
        }

        true
    }

    /// Stable textual form used when hashing cache keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        let category = self
            .category
            .as_deref()
            .map(normalize_category)
            .unwrap_or_default();
        let (from, to) = self
            .date_range
            .as_ref()
            .map(|r| (r.from, r.to))
            .unwrap_or_default();
        format!(
            "category={category};from={};to={}",
            from.map(|d| d.to_string()).unwrap_or_default(),
            to.map(|d| d.to_string()).unwrap_or_default()
        )
    }
}

#[must_use]
pub fn normalize_category(raw: &str) -> String {
    raw.trim().to_lowercase()
}
