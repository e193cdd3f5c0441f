//! Query construction: the relational plan vocabulary, the join registry
//! and the query roots that accumulate predicates into a finalized query.

pub mod join;
pub mod plan;
pub mod root;

pub use join::{JoinKey, JoinRegistry, JoinType};
pub use plan::{
    AliasGenerator, ColumnRef, IndexJoin, JoinKind, Operator, OrderSpec, Predicate, Query,
    SortDirection, SqlValue, Table, TableRef, columns,
};
pub use root::{QueryRoot, QueryShape, ResourceTableQuery, ResourceTableSubquery};
