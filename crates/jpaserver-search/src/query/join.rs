use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::plan::{IndexJoin, Table};
use crate::parameters::SearchParamType;

/// Kind of index table a join targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    String,
    Date,
    Token,
    Number,
    Quantity,
    Uri,
    Reference,
    Tag,
}

impl JoinType {
    pub fn table(&self) -> Table {
        match self {
            Self::String => Table::StringIndex,
            Self::Date => Table::DateIndex,
            Self::Token => Table::TokenIndex,
            Self::Number => Table::NumberIndex,
            Self::Quantity => Table::QuantityIndex,
            Self::Uri => Table::UriIndex,
            Self::Reference => Table::ResourceLink,
            Self::Tag => Table::Tag,
        }
    }

    /// Index table used by a parameter type; composite and special have none.
    pub fn for_param_type(param_type: SearchParamType) -> Option<Self> {
        match param_type {
            SearchParamType::String => Some(Self::String),
            SearchParamType::Date => Some(Self::Date),
            SearchParamType::Token => Some(Self::Token),
            SearchParamType::Number => Some(Self::Number),
            SearchParamType::Quantity => Some(Self::Quantity),
            SearchParamType::Uri => Some(Self::Uri),
            SearchParamType::Reference => Some(Self::Reference),
            SearchParamType::Composite | SearchParamType::Special => None,
        }
    }

    /// Range-valued index rows: AND-ed occurrences constrain the same row.
    pub fn is_range_valued(&self) -> bool {
        matches!(self, Self::Date | Self::Number | Self::Quantity)
    }
}

/// Identity of a join within one query root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinKey {
    pub join_type: JoinType,
    pub param_name: String,
}

impl JoinKey {
    pub fn new(join_type: JoinType, param_name: impl Into<String>) -> Self {
        Self {
            join_type,
            param_name: param_name.into(),
        }
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.join_type, self.param_name)
    }
}

/// Joins registered by one query root. At most one join per key.
#[derive(Debug, Default)]
pub struct JoinRegistry {
    joins: HashMap<JoinKey, Arc<IndexJoin>>,
}

impl JoinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &JoinKey) -> Option<Arc<IndexJoin>> {
        self.joins.get(key).cloned()
    }

    /// Register a join. If the key is already taken the registered join
    /// is kept and returned.
    pub fn put(&mut self, key: JoinKey, join: Arc<IndexJoin>) -> Arc<IndexJoin> {
        self.joins.entry(key).or_insert(join).clone()
    }

    pub fn contains(&self, key: &JoinKey) -> bool {
        self.joins.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }
}
