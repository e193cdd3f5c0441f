//! Query roots.
//!
//! A [`QueryRoot`] accumulates the predicates and joins of one search and is
//! finalized exactly once by [`QueryRoot::pop`]. What it accumulates into is
//! decided by its [`QueryShape`]: the full resource query that a search
//! returns, or an id-only subquery used when a chained parameter recurses into
//! the target resource type.

use std::fmt;
use std::sync::Arc;

use super::join::{JoinKey, JoinRegistry};
use super::plan::{
    AliasGenerator, ColumnRef, IndexJoin, JoinKind, OrderSpec, Predicate, Query, SqlValue,
    Table, TableRef, columns,
};
use crate::config::QueryLimits;
use crate::error::{Result, SearchError};

/// Capabilities that differ between query shapes.
pub trait QueryShape: fmt::Debug + Send {
    /// The root table of the query.
    fn root(&self) -> &TableRef;

    /// The query being assembled.
    fn query_root(&self) -> &Query;

    /// A column of the root table.
    fn get(&self, attribute: &'static str) -> ColumnRef {
        self.root().column(attribute)
    }

    fn resource_pid_column(&self) -> ColumnRef;

    fn last_updated_column(&self) -> ColumnRef;

    /// Overwrites any previous ordering.
    fn order_by(&mut self, order: Vec<OrderSpec>);

    /// Create and attach a join to the index table behind `key`.
    fn create_join(&mut self, key: &JoinKey) -> Arc<IndexJoin>;

    /// Subquery selecting the pids of resources holding a tag; the caller
    /// adds the tag filter and negates membership.
    fn subquery_for_tag_negation(&self) -> Query;

    /// Apply the final WHERE clause and hand over the query.
    fn finish(self: Box<Self>, where_clause: Option<Predicate>) -> Query;
}

fn index_join(
    aliases: &AliasGenerator,
    root: &TableRef,
    key: &JoinKey,
    kind: JoinKind,
) -> Arc<IndexJoin> {
    let table = key.join_type.table();
    let target = TableRef::new(table, aliases.next("j"));
    let mut on = vec![Predicate::column_eq(target.pid(), root.pid())];
    if let Some(param_column) = table.param_column() {
        on.push(Predicate::eq(
            target.column(param_column),
            SqlValue::text(&key.param_name),
        ));
    }
    Arc::new(IndexJoin {
        key: key.clone(),
        target,
        kind,
        on: Predicate::and(on),
    })
}

fn tag_subquery(aliases: &AliasGenerator) -> Query {
    Query::select_pid(TableRef::new(Table::Tag, aliases.next("t")))
}

/// Full search over `hfj_resource`: distinct pids, ordered and paged.
#[derive(Debug)]
pub struct ResourceTableQuery {
    aliases: AliasGenerator,
    query: Query,
}

impl ResourceTableQuery {
    pub fn new(aliases: AliasGenerator) -> Self {
        let root = TableRef::new(Table::Resource, aliases.next("r"));
        let mut query = Query::select_pid(root);
        query.distinct = true;
        Self { aliases, query }
    }
}

impl QueryShape for ResourceTableQuery {
    fn root(&self) -> &TableRef {
        &self.query.from
    }

    fn query_root(&self) -> &Query {
        &self.query
    }

    fn resource_pid_column(&self) -> ColumnRef {
        self.get(columns::RES_ID)
    }

    fn last_updated_column(&self) -> ColumnRef {
        self.get(columns::RES_UPDATED)
    }

    fn order_by(&mut self, order: Vec<OrderSpec>) {
        self.query.order = order;
    }

    fn create_join(&mut self, key: &JoinKey) -> Arc<IndexJoin> {
        // Outer so that sorting on a parameter keeps resources without a value
        let join = index_join(&self.aliases, &self.query.from, key, JoinKind::LeftOuter);
        self.query.joins.push(join.clone());
        join
    }

    fn subquery_for_tag_negation(&self) -> Query {
        tag_subquery(&self.aliases)
    }

    fn finish(self: Box<Self>, where_clause: Option<Predicate>) -> Query {
        let mut query = self.query;
        query.where_clause = where_clause;
        query
    }
}

/// Id-only subquery over `hfj_resource`, nested inside another query.
#[derive(Debug)]
pub struct ResourceTableSubquery {
    aliases: AliasGenerator,
    query: Query,
}

impl ResourceTableSubquery {
    pub fn new(aliases: AliasGenerator) -> Self {
        let root = TableRef::new(Table::Resource, aliases.next("s"));
        Self {
            query: Query::select_pid(root),
            aliases,
        }
    }
}

impl QueryShape for ResourceTableSubquery {
    fn root(&self) -> &TableRef {
        &self.query.from
    }

    fn query_root(&self) -> &Query {
        &self.query
    }

    fn resource_pid_column(&self) -> ColumnRef {
        self.get(columns::RES_ID)
    }

    fn last_updated_column(&self) -> ColumnRef {
        self.get(columns::RES_UPDATED)
    }

    fn order_by(&mut self, order: Vec<OrderSpec>) {
        // Membership tests do not observe row order
        if !order.is_empty() {
            tracing::trace!(columns = order.len(), "Ignoring ordering on id-only subquery");
        }
        self.query.order.clear();
    }

    fn create_join(&mut self, key: &JoinKey) -> Arc<IndexJoin> {
        let join = index_join(&self.aliases, &self.query.from, key, JoinKind::Inner);
        self.query.joins.push(join.clone());
        join
    }

    fn subquery_for_tag_negation(&self) -> Query {
        tag_subquery(&self.aliases)
    }

    fn finish(self: Box<Self>, where_clause: Option<Predicate>) -> Query {
        let mut query = self.query;
        query.where_clause = where_clause;
        // Inner joins can repeat pids; IN (...) does not care
        query.distinct = false;
        query
    }
}

/// Single-use accumulator of predicates and joins for one query.
#[derive(Debug)]
pub struct QueryRoot {
    shape: Option<Box<dyn QueryShape>>,
    joins: JoinRegistry,
    predicates: Vec<Predicate>,
    aliases: AliasGenerator,
    limits: QueryLimits,
}

impl QueryRoot {
    pub fn new(shape: Box<dyn QueryShape>, aliases: AliasGenerator, limits: QueryLimits) -> Self {
        Self {
            shape: Some(shape),
            joins: JoinRegistry::new(),
            predicates: Vec::new(),
            aliases,
            limits,
        }
    }

    /// Root for a full resource search.
    pub fn resource_table(limits: QueryLimits) -> Self {
        let aliases = AliasGenerator::new();
        Self::new(
            Box::new(ResourceTableQuery::new(aliases.clone())),
            aliases,
            limits,
        )
    }

    /// Root for an id-only subquery sharing this root's alias space.
    pub fn subquery(&self) -> Self {
        Self::new(
            Box::new(ResourceTableSubquery::new(self.aliases.clone())),
            self.aliases.clone(),
            self.limits,
        )
    }

    fn shape(&self) -> Result<&dyn QueryShape> {
        self.shape
            .as_deref()
            .ok_or_else(|| SearchError::InvalidState("query root already finalized".into()))
    }

    fn shape_mut(&mut self) -> Result<&mut Box<dyn QueryShape>> {
        self.shape
            .as_mut()
            .ok_or_else(|| SearchError::InvalidState("query root already finalized".into()))
    }

    pub fn is_finalized(&self) -> bool {
        self.shape.is_none()
    }

    pub fn aliases(&self) -> &AliasGenerator {
        &self.aliases
    }

    pub fn add_predicate(&mut self, predicate: Predicate) -> Result<()> {
        self.shape()?;
        if self.predicates.len() >= self.limits.max_conditions {
            return Err(SearchError::QueryTooComplex(format!(
                "more than {} conditions",
                self.limits.max_conditions
            )));
        }
        self.predicates.push(predicate);
        Ok(())
    }

    pub fn add_predicates(&mut self, predicates: impl IntoIterator<Item = Predicate>) -> Result<()> {
        for predicate in predicates {
            self.add_predicate(predicate)?;
        }
        Ok(())
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// The join registered for `key`, if any.
    pub fn existing_join(&self, key: &JoinKey) -> Option<Arc<IndexJoin>> {
        self.joins.get(key)
    }

    /// The join for `key`, created through the shape on first use.
    pub fn join(&mut self, key: JoinKey) -> Result<Arc<IndexJoin>> {
        self.shape()?;
        if let Some(join) = self.joins.get(&key) {
            return Ok(join);
        }
        if self.joins.len() >= self.limits.max_joins {
            return Err(SearchError::QueryTooComplex(format!(
                "more than {} joins",
                self.limits.max_joins
            )));
        }
        let join = self.shape_mut()?.create_join(&key);
        Ok(self.joins.put(key, join))
    }

    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    pub fn order_by(&mut self, order: Vec<OrderSpec>) -> Result<()> {
        self.shape_mut()?.order_by(order);
        Ok(())
    }

    pub fn get(&self, attribute: &'static str) -> Result<ColumnRef> {
        Ok(self.shape()?.get(attribute))
    }

    pub fn root(&self) -> Result<TableRef> {
        Ok(self.shape()?.root().clone())
    }

    pub fn query_root(&self) -> Result<&Query> {
        Ok(self.shape()?.query_root())
    }

    pub fn resource_pid_column(&self) -> Result<ColumnRef> {
        Ok(self.shape()?.resource_pid_column())
    }

    pub fn last_updated_column(&self) -> Result<ColumnRef> {
        Ok(self.shape()?.last_updated_column())
    }

    pub fn subquery_for_tag_negation(&self) -> Result<Query> {
        Ok(self.shape()?.subquery_for_tag_negation())
    }

    /// Finalize: a single predicate becomes the WHERE clause as is, several
    /// are combined under one AND. Fails on a second call.
    pub fn pop(&mut self) -> Result<Query> {
        let shape = self
            .shape
            .take()
            .ok_or_else(|| SearchError::InvalidState("query root popped twice".into()))?;
        let predicates = std::mem::take(&mut self.predicates);
        let where_clause = match predicates.len() {
            0 => None,
            1 => predicates.into_iter().next(),
            _ => Some(Predicate::And(predicates)),
        };
        Ok(shape.finish(where_clause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::join::JoinType;

    fn type_predicate(root: &QueryRoot, resource_type: &str) -> Predicate {
        Predicate::eq(
            root.get(columns::RES_TYPE).unwrap(),
            SqlValue::text(resource_type),
        )
    }

    #[test]
    fn test_pop_single_predicate_applied_directly() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let predicate = type_predicate(&root, "Patient");
        root.add_predicate(predicate.clone()).unwrap();
        let query = root.pop().unwrap();
        assert_eq!(query.where_clause, Some(predicate));
        assert!(query.distinct);
    }

    #[test]
    fn test_pop_conjunction_of_all_predicates() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let a = type_predicate(&root, "Patient");
        let b = Predicate::is_null(root.get(columns::RES_DELETED_AT).unwrap());
        let c = Predicate::eq(root.get(columns::FHIR_ID).unwrap(), SqlValue::text("1"));
        root.add_predicates([a.clone(), b.clone(), c.clone()]).unwrap();
        let query = root.pop().unwrap();
        assert_eq!(query.where_clause, Some(Predicate::And(vec![a, b, c])));
    }

    #[test]
    fn test_pop_without_predicates() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        assert_eq!(root.pop().unwrap().where_clause, None);
    }

    #[test]
    fn test_pop_twice_fails() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        root.pop().unwrap();
        assert!(root.is_finalized());
        assert!(matches!(root.pop(), Err(SearchError::InvalidState(_))));
    }

    #[test]
    fn test_mutation_after_pop_fails() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let predicate = type_predicate(&root, "Patient");
        root.pop().unwrap();
        assert!(matches!(
            root.add_predicate(predicate),
            Err(SearchError::InvalidState(_))
        ));
        assert!(root.join(JoinKey::new(JoinType::Date, "birthdate")).is_err());
        assert!(root.order_by(Vec::new()).is_err());
        assert!(root.last_updated_column().is_err());
    }

    #[test]
    fn test_join_reused_per_key() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let key = JoinKey::new(JoinType::Date, "birthdate");
        let first = root.join(key.clone()).unwrap();
        let second = root.join(key.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(root.join_count(), 1);

        let query = root.pop().unwrap();
        assert_eq!(query.join_count(&key), 1);
        assert_eq!(query.joins[0].kind, JoinKind::LeftOuter);
    }

    #[test]
    fn test_join_condition_correlates_pid_and_param() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let join = root.join(JoinKey::new(JoinType::String, "name")).unwrap();
        let pid = root.resource_pid_column().unwrap();
        assert_eq!(
            join.on,
            Predicate::And(vec![
                Predicate::column_eq(join.column(columns::RES_ID), pid),
                Predicate::eq(join.column(columns::SP_NAME), SqlValue::text("name")),
            ])
        );
    }

    #[test]
    fn test_order_by_overwrites() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let updated = root.last_updated_column().unwrap();
        let id = root.get(columns::FHIR_ID).unwrap();
        root.order_by(vec![OrderSpec::asc(updated)]).unwrap();
        root.order_by(vec![OrderSpec::desc(id.clone())]).unwrap();
        let query = root.pop().unwrap();
        assert_eq!(query.order, vec![OrderSpec::desc(id)]);
    }

    #[test]
    fn test_subquery_shape() {
        let root = QueryRoot::resource_table(QueryLimits::default());
        let mut sub = root.subquery();
        sub.join(JoinKey::new(JoinType::String, "name")).unwrap();
        sub.order_by(vec![OrderSpec::asc(sub.last_updated_column().unwrap())])
            .unwrap();
        let query = sub.pop().unwrap();
        assert!(!query.distinct);
        assert!(query.order.is_empty());
        assert_eq!(query.joins[0].kind, JoinKind::Inner);
        // aliases are shared with the parent root
        assert_ne!(query.from.alias, root.root().unwrap().alias);
    }

    #[test]
    fn test_tag_negation_subquery_selects_tag_pids() {
        let root = QueryRoot::resource_table(QueryLimits::default());
        let sub = root.subquery_for_tag_negation().unwrap();
        assert_eq!(sub.from.table, Table::Tag);
        assert_eq!(sub.select.column, columns::RES_ID);
    }

    #[test]
    fn test_limits_enforced() {
        let limits = QueryLimits {
            max_conditions: 1,
            max_joins: 1,
        };
        let mut root = QueryRoot::resource_table(limits);
        root.add_predicate(Predicate::True).unwrap();
        assert!(matches!(
            root.add_predicate(Predicate::True),
            Err(SearchError::QueryTooComplex(_))
        ));
        root.join(JoinKey::new(JoinType::Token, "code")).unwrap();
        assert!(root.join(JoinKey::new(JoinType::Token, "code")).is_ok());
        assert!(matches!(
            root.join(JoinKey::new(JoinType::Token, "status")),
            Err(SearchError::QueryTooComplex(_))
        ));
    }
}
