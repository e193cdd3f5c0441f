//! Predicate builder.
//!
//! Translates one search parameter occurrence into a predicate over the
//! index table for its type. Joins come from the query root's join registry,
//! so every occurrence of a parameter reuses the same join:
//!
//! - Range-valued parameters (date, number, quantity) constrain the joined
//!   row, so `date=ge2020&date=lt2021` is one range on one row.
//! - Multi-valued parameters (string, token, uri, reference, tag) bind their
//!   first occurrence to the join. Later AND-ed occurrences become correlated
//!   EXISTS subqueries since each may be satisfied by a different row.
//! - Negation and `:missing` never negate a join predicate directly; they
//!   test for the absence of matching index rows with NOT EXISTS.

mod composite;
mod date;
mod number;
mod reference;
mod string;
mod tag;
mod token;
mod uri;

use crate::error::{Result, SearchError};
use crate::index::TagType;
use crate::parameters::{SearchModifier, SearchParamDefinition, SearchParamType};
use crate::parser::ParsedParam;
use crate::query::{JoinKey, JoinType, Predicate, Query, QueryRoot, SqlValue, TableRef, columns};
use crate::registry::SearchParamRegistry;

/// Builds predicates for search parameters of any registered type.
#[derive(Debug, Clone, Copy)]
pub struct PredicateBuilder<'a> {
    registry: &'a SearchParamRegistry,
}

impl<'a> PredicateBuilder<'a> {
    pub fn new(registry: &'a SearchParamRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'a SearchParamRegistry {
        self.registry
    }

    /// Build the predicate for `param` and add it to `root`.
    pub fn add_param(
        &self,
        root: &mut QueryRoot,
        resource_type: &str,
        param: &ParsedParam,
    ) -> Result<()> {
        let predicate = self.build(root, resource_type, param)?;
        root.add_predicate(predicate)
    }

    /// Build the predicate for one parameter occurrence, registering any
    /// joins it needs with `root`.
    pub fn build(
        &self,
        root: &mut QueryRoot,
        resource_type: &str,
        param: &ParsedParam,
    ) -> Result<Predicate> {
        if param.values.is_empty() {
            return Err(SearchError::invalid_value(format!(
                "parameter '{}' has no value",
                param.name
            )));
        }

        match param.name.as_str() {
            "_id" => return id_predicate(root, param),
            "_lastUpdated" => return date::last_updated(root, param),
            name => {
                if let Some(tag_type) = TagType::for_param(name) {
                    return tag::build(root, tag_type, param);
                }
            }
        }

        let definition = self
            .registry
            .get(resource_type, &param.name)
            .ok_or_else(|| SearchError::unknown_parameter(resource_type, &param.name))?;

        if let Some(modifier) = &param.modifier
            && !modifier.applicable_to(definition.param_type)
        {
            return Err(SearchError::unsupported(format!(
                "modifier ':{modifier}' is not valid for {} parameter '{}'",
                definition.param_type, definition.code
            )));
        }
        if param.chain.is_some() && definition.param_type != SearchParamType::Reference {
            return Err(SearchError::unsupported(format!(
                "'{}' is not a reference parameter and cannot be chained",
                definition.code
            )));
        }

        if param.modifier == Some(SearchModifier::Missing) {
            return missing(root, &definition, param);
        }

        tracing::trace!(
            param = %definition.code,
            param_type = %definition.param_type,
            values = param.values.len(),
            "Building search predicate"
        );

        match definition.param_type {
            SearchParamType::String => string::build(root, &definition, param),
            SearchParamType::Token => token::build(root, &definition, param),
            SearchParamType::Date => date::build(root, &definition, param),
            SearchParamType::Number => number::build(root, &definition, param),
            SearchParamType::Quantity => number::build_quantity(root, &definition, param),
            SearchParamType::Uri => uri::build(root, &definition, param),
            SearchParamType::Reference => self.build_reference(root, &definition, param),
            SearchParamType::Composite => self.build_composite(root, resource_type, &definition, param),
            SearchParamType::Special => Err(SearchError::unsupported(format!(
                "special parameter '{}' is not supported",
                definition.code
            ))),
        }
    }
}

/// `res_type = ? AND res_deleted_at IS NULL`: every search and chain target
/// starts from these.
pub fn base_predicates(root: &QueryRoot, resource_type: &str) -> Result<Vec<Predicate>> {
    Ok(vec![
        Predicate::eq(root.get(columns::RES_TYPE)?, SqlValue::text(resource_type)),
        Predicate::is_null(root.get(columns::RES_DELETED_AT)?),
    ])
}

/// Where the predicates of one parameter occurrence are evaluated.
#[derive(Debug, Clone)]
pub(crate) enum IndexTarget {
    /// Directly on the registered join.
    Joined(TableRef),
    /// Inside an EXISTS subquery correlated to the root resource.
    Correlated(Query),
}

impl IndexTarget {
    pub(crate) fn bind(root: &mut QueryRoot, key: JoinKey) -> Result<Self> {
        if key.join_type.is_range_valued() || root.existing_join(&key).is_none() {
            let join = root.join(key)?;
            return Ok(Self::Joined(join.target.clone()));
        }
        Ok(Self::Correlated(correlated_subquery(root, &key)?))
    }

    pub(crate) fn table(&self) -> &TableRef {
        match self {
            Self::Joined(table) => table,
            Self::Correlated(query) => &query.from,
        }
    }

    pub(crate) fn apply(&self, predicate: Predicate) -> Predicate {
        match self {
            Self::Joined(_) => predicate,
            Self::Correlated(query) => {
                let mut query = query.clone();
                query.and_where(predicate);
                Predicate::exists(query)
            }
        }
    }
}

/// `SELECT x.pid FROM <index table> x WHERE x.pid = root.pid [AND x.param = ?]`
pub(crate) fn correlated_subquery(root: &QueryRoot, key: &JoinKey) -> Result<Query> {
    let table = key.join_type.table();
    let target = TableRef::new(table, root.aliases().next("x"));
    let mut query = Query::select_pid(target.clone());
    query.and_where(Predicate::column_eq(
        target.pid(),
        root.resource_pid_column()?,
    ));
    if let Some(param_column) = table.param_column() {
        query.and_where(Predicate::eq(
            target.column(param_column),
            SqlValue::text(&key.param_name),
        ));
    }
    Ok(query)
}

/// NOT EXISTS a row of the parameter's table matching `predicate`.
pub(crate) fn not_exists_matching(
    root: &QueryRoot,
    key: &JoinKey,
    predicate: impl FnOnce(&TableRef) -> Result<Predicate>,
) -> Result<Predicate> {
    let mut query = correlated_subquery(root, key)?;
    let matching = predicate(&query.from)?;
    query.and_where(matching);
    Ok(Predicate::not_exists(query))
}

/// OR of one predicate per value.
pub(crate) fn any_value(
    values: &[String],
    mut per_value: impl FnMut(&str) -> Result<Predicate>,
) -> Result<Predicate> {
    let predicates = values
        .iter()
        .map(|v| per_value(v))
        .collect::<Result<Vec<_>>>()?;
    Ok(Predicate::or(predicates))
}

/// Escape `%`, `_` and `\` for a LIKE pattern.
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_missing(param: &ParsedParam) -> Result<bool> {
    match param.values.first().map(String::as_str) {
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        other => Err(SearchError::invalid_value(format!(
            ":missing on '{}' takes true or false, got '{}'",
            param.name,
            other.unwrap_or_default()
        ))),
    }
}

/// `:missing=true` is NOT EXISTS any index row for the parameter,
/// `:missing=false` is EXISTS.
fn missing(
    root: &mut QueryRoot,
    definition: &SearchParamDefinition,
    param: &ParsedParam,
) -> Result<Predicate> {
    let is_missing = parse_missing(param)?;
    let join_type = JoinType::for_param_type(definition.param_type).ok_or_else(|| {
        SearchError::unsupported(format!(
            ":missing is not supported on {} parameter '{}'",
            definition.param_type, definition.code
        ))
    })?;
    let query = correlated_subquery(root, &JoinKey::new(join_type, &definition.code))?;
    Ok(if is_missing {
        Predicate::not_exists(query)
    } else {
        Predicate::exists(query)
    })
}

/// `_id` compares the root's logical id column.
fn id_predicate(root: &mut QueryRoot, param: &ParsedParam) -> Result<Predicate> {
    let values = param.values.iter().map(SqlValue::text).collect();
    let predicate = Predicate::in_list(root.get(columns::FHIR_ID)?, values);
    match &param.modifier {
        None => Ok(predicate),
        Some(SearchModifier::Not) => Ok(predicate.negate()),
        Some(other) => Err(SearchError::unsupported(format!(
            "modifier ':{other}' is not valid for '_id'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryLimits;
    use crate::query::SqlValue;

    fn build(query: &str) -> Result<(QueryRoot, Predicate)> {
        let registry = SearchParamRegistry::with_defaults();
        let builder = PredicateBuilder::new(&registry);
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let (key, value) = query.split_once('=').unwrap();
        let param = ParsedParam::from_pair(key, value)?;
        let predicate = builder.build(&mut root, "Patient", &param)?;
        Ok((root, predicate))
    }

    #[test]
    fn test_unknown_parameter() {
        let err = build("shoe-size=42").unwrap_err();
        assert!(matches!(err, SearchError::UnknownParameter { .. }));
    }

    #[test]
    fn test_modifier_not_applicable() {
        let err = build("birthdate:exact=2020").unwrap_err();
        assert!(matches!(err, SearchError::UnsupportedParameter(_)));
        let err = build("gender.name=x").unwrap_err();
        assert!(matches!(err, SearchError::UnsupportedParameter(_)));
    }

    #[test]
    fn test_missing_uses_exists() {
        let (root, predicate) = build("birthdate:missing=true").unwrap();
        assert_eq!(root.join_count(), 0);
        assert!(matches!(predicate, Predicate::Exists { negated: true, .. }));

        let (_, predicate) = build("gender:missing=false").unwrap();
        assert!(matches!(predicate, Predicate::Exists { negated: false, .. }));

        assert!(matches!(
            build("gender:missing=maybe"),
            Err(SearchError::InvalidSearchValue(_))
        ));
    }

    #[test]
    fn test_id_predicate() {
        let (root, predicate) = build("_id=a,b").unwrap();
        assert_eq!(
            predicate,
            Predicate::in_list(
                root.get(columns::FHIR_ID).unwrap(),
                vec![SqlValue::text("a"), SqlValue::text("b")]
            )
        );
        let (_, predicate) = build("_id:not=a").unwrap();
        assert!(matches!(predicate, Predicate::Not(_)));
        assert!(build("_id:exact=a").is_err());
    }

    #[test]
    fn test_repeated_multi_valued_param_uses_exists() {
        let registry = SearchParamRegistry::with_defaults();
        let builder = PredicateBuilder::new(&registry);
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let first = builder
            .build(&mut root, "Patient", &ParsedParam::from_pair("given", "anna").unwrap())
            .unwrap();
        let second = builder
            .build(&mut root, "Patient", &ParsedParam::from_pair("given", "maria").unwrap())
            .unwrap();
        assert!(matches!(first, Predicate::Like { .. }));
        assert!(matches!(second, Predicate::Exists { negated: false, .. }));
        assert_eq!(root.join_count(), 1);
    }

    #[test]
    fn test_repeated_range_param_shares_join() {
        let registry = SearchParamRegistry::with_defaults();
        let builder = PredicateBuilder::new(&registry);
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        for value in ["ge1970", "lt1980"] {
            let predicate = builder
                .build(&mut root, "Patient", &ParsedParam::from_pair("birthdate", value).unwrap())
                .unwrap();
            assert!(!matches!(predicate, Predicate::Exists { .. }));
        }
        assert_eq!(root.join_count(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
