use serde::{Deserialize, Serialize};

/// Limits and paging defaults applied to every search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_count: usize,
    pub max_count: usize,
    /// Upper bound on predicates accumulated by one query root
    pub max_conditions: usize,
    /// Upper bound on index joins registered by one query root
    pub max_joins: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_count: 20,
            max_count: 500,
            max_conditions: 100,
            max_joins: 16,
        }
    }
}

impl SearchConfig {
    /// Resolve the page size from a requested `_count`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_count).min(self.max_count)
    }

    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            max_conditions: self.max_conditions,
            max_joins: self.max_joins,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub max_conditions: usize,
    pub max_joins: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        SearchConfig::default().limits()
    }
}
