//! Relational query plan.
//!
//! The criteria-builder vocabulary the predicate builders speak: tables,
//! column references, predicates, joins and the finalized [`Query`]. A plan
//! can be rendered to SQL ([`crate::sql`]) or evaluated in memory
//! ([`crate::executor`]).

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use time::OffsetDateTime;

use super::join::JoinKey;

/// Column names of the index schema.
pub mod columns {
    // hfj_resource
    pub const RES_ID: &str = "res_id";
    pub const RES_TYPE: &str = "res_type";
    pub const FHIR_ID: &str = "fhir_id";
    pub const RES_VER: &str = "res_ver";
    pub const RES_UPDATED: &str = "res_updated";
    pub const RES_DELETED_AT: &str = "res_deleted_at";

    // hfj_spidx_*
    pub const SP_NAME: &str = "sp_name";
    pub const SP_VALUE_NORMALIZED: &str = "sp_value_normalized";
    pub const SP_VALUE_EXACT: &str = "sp_value_exact";
    pub const SP_VALUE_LOW: &str = "sp_value_low";
    pub const SP_VALUE_HIGH: &str = "sp_value_high";
    pub const SP_SYSTEM: &str = "sp_system";
    pub const SP_VALUE: &str = "sp_value";
    pub const SP_CODE: &str = "sp_code";
    pub const SP_UNITS: &str = "sp_units";
    pub const SP_URI: &str = "sp_uri";

    // hfj_res_link
    pub const SRC_RESOURCE_ID: &str = "src_resource_id";
    pub const SRC_PATH: &str = "src_path";
    pub const TARGET_RESOURCE_TYPE: &str = "target_resource_type";
    pub const TARGET_RESOURCE_ID: &str = "target_resource_id";
    pub const TARGET_FHIR_ID: &str = "target_fhir_id";

    // hfj_res_tag
    pub const TAG_TYPE: &str = "tag_type";
    pub const TAG_SYSTEM: &str = "tag_system";
    pub const TAG_CODE: &str = "tag_code";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Resource,
    StringIndex,
    DateIndex,
    TokenIndex,
    NumberIndex,
    QuantityIndex,
    UriIndex,
    ResourceLink,
    Tag,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resource => "hfj_resource",
            Self::StringIndex => "hfj_spidx_string",
            Self::DateIndex => "hfj_spidx_date",
            Self::TokenIndex => "hfj_spidx_token",
            Self::NumberIndex => "hfj_spidx_number",
            Self::QuantityIndex => "hfj_spidx_quantity",
            Self::UriIndex => "hfj_spidx_uri",
            Self::ResourceLink => "hfj_res_link",
            Self::Tag => "hfj_res_tag",
        }
    }

    /// Column holding the owning resource pid.
    pub fn pid_column(&self) -> &'static str {
        match self {
            Self::ResourceLink => columns::SRC_RESOURCE_ID,
            _ => columns::RES_ID,
        }
    }

    /// Column holding the parameter name, for tables shared by many parameters.
    pub fn param_column(&self) -> Option<&'static str> {
        match self {
            Self::Resource | Self::Tag => None,
            Self::ResourceLink => Some(columns::SRC_PATH),
            _ => Some(columns::SP_NAME),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub alias: String,
    pub column: &'static str,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.column)
    }
}

/// An aliased table in a FROM or JOIN clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub table: Table,
    pub alias: String,
}

impl TableRef {
    pub fn new(table: Table, alias: impl Into<String>) -> Self {
        Self {
            table,
            alias: alias.into(),
        }
    }

    pub fn column(&self, column: &'static str) -> ColumnRef {
        ColumnRef {
            alias: self.alias.clone(),
            column,
        }
    }

    pub fn pid(&self) -> ColumnRef {
        self.column(self.table.pid_column())
    }
}

/// Bind value of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(OffsetDateTime),
    Null,
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn opt_text(value: Option<&str>) -> Self {
        value.map_or(Self::Null, Self::text)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// SQL comparison; `None` when either side is NULL or the types differ.
    pub fn compare(&self, other: &SqlValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Timestamp(t) => write!(f, "'{t}'"),
            Self::Null => f.write_str("NULL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// A boolean expression over the columns of a query's tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        op: Operator,
        value: SqlValue,
    },
    /// Column-to-column equality, used for join conditions and correlation.
    ColumnEq { left: ColumnRef, right: ColumnRef },
    /// `LIKE` with `%` wildcards.
    Like { column: ColumnRef, pattern: String },
    InList {
        column: ColumnRef,
        values: Vec<SqlValue>,
    },
    InSubquery {
        column: ColumnRef,
        subquery: Box<Query>,
        negated: bool,
    },
    Exists { subquery: Box<Query>, negated: bool },
    IsNull { column: ColumnRef, negated: bool },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    True,
    False,
}

impl Predicate {
    pub fn compare(column: ColumnRef, op: Operator, value: SqlValue) -> Self {
        Self::Compare { column, op, value }
    }

    pub fn eq(column: ColumnRef, value: SqlValue) -> Self {
        Self::compare(column, Operator::Eq, value)
    }

    pub fn column_eq(left: ColumnRef, right: ColumnRef) -> Self {
        Self::ColumnEq { left, right }
    }

    pub fn like(column: ColumnRef, pattern: impl Into<String>) -> Self {
        Self::Like {
            column,
            pattern: pattern.into(),
        }
    }

    pub fn in_list(column: ColumnRef, values: Vec<SqlValue>) -> Self {
        Self::InList { column, values }
    }

    pub fn is_null(column: ColumnRef) -> Self {
        Self::IsNull {
            column,
            negated: false,
        }
    }

    pub fn exists(subquery: Query) -> Self {
        Self::Exists {
            subquery: Box::new(subquery),
            negated: false,
        }
    }

    pub fn not_exists(subquery: Query) -> Self {
        Self::Exists {
            subquery: Box::new(subquery),
            negated: true,
        }
    }

    pub fn in_subquery(column: ColumnRef, subquery: Query) -> Self {
        Self::InSubquery {
            column,
            subquery: Box::new(subquery),
            negated: false,
        }
    }

    pub fn not_in_subquery(column: ColumnRef, subquery: Query) -> Self {
        Self::InSubquery {
            column,
            subquery: Box::new(subquery),
            negated: true,
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Conjunction that flattens nested ANDs and collapses trivial lists.
    pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for p in predicates {
            match p {
                Self::And(inner) => flat.extend(inner),
                Self::True => {}
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::True,
            1 => flat.remove(0),
            _ => Self::And(flat),
        }
    }

    /// Disjunction that flattens nested ORs and collapses trivial lists.
    pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for p in predicates {
            match p {
                Self::Or(inner) => flat.extend(inner),
                Self::False => {}
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::False,
            1 => flat.remove(0),
            _ => Self::Or(flat),
        }
    }
}

/// A join from the query root to an index table, keyed in the join registry.
#[derive(Debug, PartialEq)]
pub struct IndexJoin {
    pub key: JoinKey,
    pub target: TableRef,
    pub kind: JoinKind,
    pub on: Predicate,
}

impl IndexJoin {
    pub fn column(&self, column: &'static str) -> ColumnRef {
        self.target.column(column)
    }

    pub fn alias(&self) -> &str {
        &self.target.alias
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

impl OrderSpec {
    pub fn asc(column: ColumnRef) -> Self {
        Self {
            column,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: ColumnRef) -> Self {
        Self {
            column,
            direction: SortDirection::Desc,
        }
    }
}

/// A (sub)query. Produced by a query root's `pop()` or built directly for
/// correlated subqueries.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub select: ColumnRef,
    pub distinct: bool,
    pub from: TableRef,
    pub joins: Vec<Arc<IndexJoin>>,
    pub where_clause: Option<Predicate>,
    pub order: Vec<OrderSpec>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    /// `SELECT <alias>.<pid> FROM <table> <alias>`
    pub fn select_pid(from: TableRef) -> Self {
        Self {
            select: from.pid(),
            distinct: false,
            from,
            joins: Vec::new(),
            where_clause: None,
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// AND a predicate into the WHERE clause.
    pub fn and_where(&mut self, predicate: Predicate) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => Predicate::and([existing, predicate]),
            None => predicate,
        });
    }

    pub fn join_count(&self, key: &JoinKey) -> usize {
        self.joins.iter().filter(|j| &j.key == key).count()
    }
}

/// Hands out unique table aliases across a query and all its subqueries.
#[derive(Debug, Clone, Default)]
pub struct AliasGenerator(Arc<AtomicUsize>);

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, prefix: &str) -> String {
        let n = self.0.fetch_add(1, AtomicOrdering::Relaxed);
        format!("{prefix}{n}")
    }
}
