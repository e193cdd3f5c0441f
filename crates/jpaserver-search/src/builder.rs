//! Search builder: from a parsed request to a finalized, paged query.

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::index::TagType;
use crate::parameters::SearchParamType;
use crate::parser::{SearchRequest, SortSpec};
use crate::predicate::{PredicateBuilder, base_predicates};
use crate::query::{ColumnRef, JoinKey, JoinType, OrderSpec, Query, QueryRoot, columns};
use crate::registry::SearchParamRegistry;
use crate::sql::{BuiltQuery, render};

/// A finalized search for one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub resource_type: String,
    pub query: Query,
    pub count: usize,
    pub offset: usize,
}

impl SearchPlan {
    pub fn to_sql(&self) -> BuiltQuery {
        render(&self.query)
    }
}

pub struct SearchBuilder<'a> {
    registry: &'a SearchParamRegistry,
    config: &'a SearchConfig,
}

impl<'a> SearchBuilder<'a> {
    pub fn new(registry: &'a SearchParamRegistry, config: &'a SearchConfig) -> Self {
        Self { registry, config }
    }

    pub fn build(&self, resource_type: &str, request: &SearchRequest) -> Result<SearchPlan> {
        if !self.registry.is_known_type(resource_type) {
            return Err(SearchError::UnknownResourceType(resource_type.to_string()));
        }

        let mut root = QueryRoot::resource_table(self.config.limits());
        root.add_predicates(base_predicates(&root, resource_type)?)?;

        let predicates = PredicateBuilder::new(self.registry);
        for param in &request.params {
            predicates.add_param(&mut root, resource_type, param)?;
        }

        let order = request
            .sort
            .iter()
            .map(|sort| self.sort_column(&mut root, resource_type, sort))
            .collect::<Result<Vec<_>>>()?;
        if !order.is_empty() {
            root.order_by(order)?;
        }

        let joins = root.join_count();
        let mut query = root.pop()?;
        let count = self.config.page_size(request.count);
        let offset = request.offset.unwrap_or(0);
        query.limit = Some(count);
        query.offset = Some(offset);

        tracing::debug!(
            resource_type,
            params = request.params.len(),
            joins,
            count,
            offset,
            "Built search query"
        );

        Ok(SearchPlan {
            resource_type: resource_type.to_string(),
            query,
            count,
            offset,
        })
    }

    fn sort_column(
        &self,
        root: &mut QueryRoot,
        resource_type: &str,
        sort: &SortSpec,
    ) -> Result<OrderSpec> {
        let column = match sort.param.as_str() {
            "_id" => root.get(columns::FHIR_ID)?,
            "_lastUpdated" => root.last_updated_column()?,
            name if TagType::for_param(name).is_some() => {
                return Err(SearchError::unsupported(format!("cannot sort by '{name}'")));
            }
            name => {
                let definition = self
                    .registry
                    .get(resource_type, name)
                    .ok_or_else(|| SearchError::unknown_parameter(resource_type, name))?;
                let (join_type, column) = sort_target(definition.param_type).ok_or_else(|| {
                    SearchError::unsupported(format!(
                        "cannot sort by {} parameter '{name}'",
                        definition.param_type
                    ))
                })?;
                // Reuses the join of a filter on the same parameter
                let join = root.join(JoinKey::new(join_type, &definition.code))?;
                join.column(column)
            }
        };
        Ok(sort_spec(column, sort.descending))
    }
}

fn sort_spec(column: ColumnRef, descending: bool) -> OrderSpec {
    if descending {
        OrderSpec::desc(column)
    } else {
        OrderSpec::asc(column)
    }
}

fn sort_target(param_type: SearchParamType) -> Option<(JoinType, &'static str)> {
    Some(match param_type {
        SearchParamType::String => (JoinType::String, columns::SP_VALUE_NORMALIZED),
        SearchParamType::Date => (JoinType::Date, columns::SP_VALUE_LOW),
        SearchParamType::Token => (JoinType::Token, columns::SP_VALUE),
        SearchParamType::Number => (JoinType::Number, columns::SP_VALUE),
        SearchParamType::Quantity => (JoinType::Quantity, columns::SP_VALUE),
        SearchParamType::Uri => (JoinType::Uri, columns::SP_URI),
        SearchParamType::Reference => (JoinType::Reference, columns::TARGET_FHIR_ID),
        SearchParamType::Composite | SearchParamType::Special => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{JoinKind, SortDirection};

    fn plan(resource_type: &str, query: &str) -> Result<SearchPlan> {
        let registry = SearchParamRegistry::with_defaults();
        let config = SearchConfig::default();
        let request = SearchRequest::parse(query)?;
        SearchBuilder::new(&registry, &config).build(resource_type, &request)
    }

    #[test]
    fn test_base_predicates_only() {
        let plan = plan("Patient", "").unwrap();
        assert!(plan.query.joins.is_empty());
        assert_eq!(
            plan.to_sql().sql,
            "SELECT DISTINCT r0.res_id FROM hfj_resource r0 \
             WHERE r0.res_type = $1 AND r0.res_deleted_at IS NULL LIMIT 20"
        );
    }

    #[test]
    fn test_unknown_resource_type() {
        assert!(matches!(
            plan("Spaceship", "name=x"),
            Err(SearchError::UnknownResourceType(_))
        ));
    }

    #[test]
    fn test_sort_reuses_filter_join() {
        let plan = plan("Patient", "birthdate=ge1970&_sort=-birthdate,_id").unwrap();
        assert_eq!(plan.query.joins.len(), 1);
        let join = &plan.query.joins[0];
        assert_eq!(join.kind, JoinKind::LeftOuter);
        assert_eq!(plan.query.order.len(), 2);
        assert_eq!(plan.query.order[0].column, join.column(columns::SP_VALUE_LOW));
        assert_eq!(plan.query.order[0].direction, SortDirection::Desc);
        assert_eq!(plan.query.order[1].column.column, columns::FHIR_ID);
    }

    #[test]
    fn test_paging_bounds() {
        let plan = plan("Patient", "_count=1000&_offset=40").unwrap();
        assert_eq!(plan.count, 500);
        assert_eq!(plan.offset, 40);
        assert_eq!(plan.query.limit, Some(500));
    }

    #[test]
    fn test_sort_rejections() {
        assert!(matches!(
            plan("Patient", "_sort=_tag"),
            Err(SearchError::UnsupportedParameter(_))
        ));
        assert!(matches!(
            plan("Patient", "_sort=shoe-size"),
            Err(SearchError::UnknownParameter { .. })
        ));
    }
}
