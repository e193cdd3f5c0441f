//! Composite search: `code-value-quantity=http://loinc.org|8480-6$gt100`.
//!
//! Each `$`-separated component is matched on the join of its own component
//! parameter. Components are AND-ed, values OR-ed.

use super::{IndexTarget, PredicateBuilder, date, number, string, token, uri};
use crate::error::{Result, SearchError};
use crate::parameters::{SearchParamDefinition, SearchParamType};
use crate::parser::{ParsedParam, split_unescaped};
use crate::query::{JoinKey, JoinType, Predicate, QueryRoot};

impl PredicateBuilder<'_> {
    pub(super) fn build_composite(
        &self,
        root: &mut QueryRoot,
        resource_type: &str,
        definition: &SearchParamDefinition,
        param: &ParsedParam,
    ) -> Result<Predicate> {
        if definition.components.is_empty() {
            return Err(SearchError::unsupported(format!(
                "composite parameter '{}' has no components",
                definition.code
            )));
        }

        let mut components = Vec::with_capacity(definition.components.len());
        for code in &definition.components {
            let component = self
                .registry
                .get(resource_type, code)
                .ok_or_else(|| SearchError::unknown_parameter(resource_type, code))?;
            let join_type = JoinType::for_param_type(component.param_type)
                .filter(|t| *t != JoinType::Reference)
                .ok_or_else(|| {
                    SearchError::unsupported(format!(
                        "{} component '{}' of '{}'",
                        component.param_type, code, definition.code
                    ))
                })?;
            let target = IndexTarget::bind(root, JoinKey::new(join_type, &component.code))?;
            components.push((component.param_type, target));
        }

        let mut alternatives = Vec::with_capacity(param.values.len());
        for value in &param.values {
            let parts = split_unescaped(value, '$');
            if parts.len() != components.len() {
                return Err(SearchError::invalid_value(format!(
                    "'{}' expects {} components, got '{value}'",
                    definition.code,
                    components.len()
                )));
            }
            let mut conjunction = Vec::with_capacity(parts.len());
            for ((param_type, target), part) in components.iter().zip(&parts) {
                let predicate = component_predicate(*param_type, target, part)?;
                conjunction.push(target.apply(predicate));
            }
            alternatives.push(Predicate::and(conjunction));
        }
        Ok(Predicate::or(alternatives))
    }
}

fn component_predicate(
    param_type: SearchParamType,
    target: &IndexTarget,
    value: &str,
) -> Result<Predicate> {
    let table = target.table();
    match param_type {
        SearchParamType::String => string::value_predicate(table, None, value),
        SearchParamType::Token => Ok(token::value_predicate(table, value)),
        SearchParamType::Date => date::value_predicate(table, value),
        SearchParamType::Number => number::number_predicate(
            &table.column(crate::query::columns::SP_VALUE),
            value,
        ),
        SearchParamType::Quantity => number::quantity_predicate(table, value),
        SearchParamType::Uri => uri::value_predicate(table, None, value),
        other => Err(SearchError::unsupported(format!(
            "{other} components are not supported"
        ))),
    }
}
