//! Indexed parameter store.
//!
//! Mirrors the relational schema a JPA server keeps next to the resource
//! table: one table per parameter type mapping a resource pid to the values
//! extracted for a parameter. Rows are written per resource version and
//! replaced wholesale when the resource is reindexed.

mod extract;
mod store;

pub use extract::extract_index_rows;
pub use store::{IndexStore, IndexTables, ResourceRow, StoredResource, TableRow};

use time::OffsetDateTime;

use crate::query::plan::{SqlValue, Table, columns};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagType {
    Tag,
    Profile,
    SecurityLabel,
}

impl TagType {
    /// Tag type searched by a special parameter name.
    pub fn for_param(name: &str) -> Option<Self> {
        match name {
            "_tag" => Some(Self::Tag),
            "_profile" => Some(Self::Profile),
            "_security" => Some(Self::SecurityLabel),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Tag => 0,
            Self::Profile => 1,
            Self::SecurityLabel => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringIndex {
    pub param_name: String,
    pub value_normalized: String,
    pub value_exact: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateIndex {
    pub param_name: String,
    pub low: OffsetDateTime,
    pub high: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenIndex {
    pub param_name: String,
    pub system: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberIndex {
    pub param_name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantityIndex {
    pub param_name: String,
    pub value: f64,
    pub system: Option<String>,
    pub code: Option<String>,
    pub units: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UriIndex {
    pub param_name: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLink {
    pub src_path: String,
    pub target_resource_type: String,
    pub target_fhir_id: String,
    /// Pid of the target once it exists locally
    pub target_pid: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagRow {
    pub tag_type: TagType,
    pub system: Option<String>,
    pub code: String,
}

/// One row of an index table. The owning resource pid is the key it is stored under.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexRow {
    String(StringIndex),
    Date(DateIndex),
    Token(TokenIndex),
    Number(NumberIndex),
    Quantity(QuantityIndex),
    Uri(UriIndex),
    Link(ResourceLink),
    Tag(TagRow),
}

impl IndexRow {
    pub fn table(&self) -> Table {
        match self {
            Self::String(_) => Table::StringIndex,
            Self::Date(_) => Table::DateIndex,
            Self::Token(_) => Table::TokenIndex,
            Self::Number(_) => Table::NumberIndex,
            Self::Quantity(_) => Table::QuantityIndex,
            Self::Uri(_) => Table::UriIndex,
            Self::Link(_) => Table::ResourceLink,
            Self::Tag(_) => Table::Tag,
        }
    }

    /// Column value as the relational layer sees it; unknown columns are NULL.
    pub fn value(&self, pid: i64, column: &str) -> SqlValue {
        use columns::*;

        if column == RES_ID || column == SRC_RESOURCE_ID {
            return SqlValue::Integer(pid);
        }
        match self {
            Self::String(row) => match column {
                SP_NAME => SqlValue::text(&row.param_name),
                SP_VALUE_NORMALIZED => SqlValue::text(&row.value_normalized),
                SP_VALUE_EXACT => SqlValue::text(&row.value_exact),
                _ => SqlValue::Null,
            },
            Self::Date(row) => match column {
                SP_NAME => SqlValue::text(&row.param_name),
                SP_VALUE_LOW => SqlValue::Timestamp(row.low),
                SP_VALUE_HIGH => SqlValue::Timestamp(row.high),
                _ => SqlValue::Null,
            },
            Self::Token(row) => match column {
                SP_NAME => SqlValue::text(&row.param_name),
                SP_SYSTEM => SqlValue::opt_text(row.system.as_deref()),
                SP_VALUE => SqlValue::text(&row.value),
                _ => SqlValue::Null,
            },
            Self::Number(row) => match column {
                SP_NAME => SqlValue::text(&row.param_name),
                SP_VALUE => SqlValue::Float(row.value),
                _ => SqlValue::Null,
            },
            Self::Quantity(row) => match column {
                SP_NAME => SqlValue::text(&row.param_name),
                SP_VALUE => SqlValue::Float(row.value),
                SP_SYSTEM => SqlValue::opt_text(row.system.as_deref()),
                SP_CODE => SqlValue::opt_text(row.code.as_deref()),
                SP_UNITS => SqlValue::opt_text(row.units.as_deref()),
                _ => SqlValue::Null,
            },
            Self::Uri(row) => match column {
                SP_NAME => SqlValue::text(&row.param_name),
                SP_URI => SqlValue::text(&row.uri),
                _ => SqlValue::Null,
            },
            Self::Link(row) => match column {
                SRC_PATH => SqlValue::text(&row.src_path),
                TARGET_RESOURCE_TYPE => SqlValue::text(&row.target_resource_type),
                TARGET_FHIR_ID => SqlValue::text(&row.target_fhir_id),
                TARGET_RESOURCE_ID => row.target_pid.map_or(SqlValue::Null, SqlValue::Integer),
                _ => SqlValue::Null,
            },
            Self::Tag(row) => match column {
                TAG_TYPE => SqlValue::Integer(row.tag_type.code()),
                TAG_SYSTEM => SqlValue::opt_text(row.system.as_deref()),
                TAG_CODE => SqlValue::text(&row.code),
                _ => SqlValue::Null,
            },
        }
    }
}
