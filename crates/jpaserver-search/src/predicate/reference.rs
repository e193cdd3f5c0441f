//! Reference search and chaining.
//!
//! Values can be `Type/id`, a bare `id` or an absolute URL ending in
//! `Type/id`. A bare id takes its type from a `:Type` modifier or from the
//! parameter's only target type; otherwise it matches any type.
//!
//! A chained parameter such as `subject:Patient.name=Jo` recurses into an
//! id-only subquery over each candidate target type:
//!
//! ```text
//! link.target_resource_type = 'Patient'
//!   AND link.target_resource_id IN (SELECT s.res_id FROM hfj_resource s ... name ...)
//! ```

use jpaserver_core::IdType;

use super::{IndexTarget, PredicateBuilder, any_value, base_predicates};
use crate::error::{Result, SearchError};
use crate::parameters::{SearchModifier, SearchParamDefinition};
use crate::parser::{ParsedParam, split_param_key};
use crate::query::{JoinKey, JoinType, Predicate, QueryRoot, SqlValue, TableRef, columns};

impl PredicateBuilder<'_> {
    pub(super) fn build_reference(
        &self,
        root: &mut QueryRoot,
        definition: &SearchParamDefinition,
        param: &ParsedParam,
    ) -> Result<Predicate> {
        if param.modifier == Some(SearchModifier::Identifier) {
            return Err(SearchError::unsupported(format!(
                "':identifier' is not supported on '{}'",
                definition.code
            )));
        }
        let type_restriction = match &param.modifier {
            Some(SearchModifier::Type(t)) => Some(t.as_str()),
            _ => None,
        };

        let target = IndexTarget::bind(root, JoinKey::new(JoinType::Reference, &definition.code))?;
        let predicate = match &param.chain {
            Some(chain) => {
                let table = target.table().clone();
                self.chain_predicate(root, &table, definition, type_restriction, chain, &param.values)?
            }
            None => any_value(&param.values, |value| {
                value_predicate(target.table(), definition, type_restriction, value)
            })?,
        };
        Ok(target.apply(predicate))
    }

    fn chain_predicate(
        &self,
        root: &QueryRoot,
        link: &TableRef,
        definition: &SearchParamDefinition,
        type_restriction: Option<&str>,
        chain: &str,
        values: &[String],
    ) -> Result<Predicate> {
        let (name, modifier, rest) = split_param_key(chain)?;
        let chained = ParsedParam {
            name,
            modifier,
            chain: rest,
            values: values.to_vec(),
        };

        let candidates: Vec<&str> = match type_restriction {
            Some(t) => vec![t],
            None => definition.targets.iter().map(String::as_str).collect(),
        };
        let candidates: Vec<&str> = candidates
            .into_iter()
            .filter(|t| self.registry.get(t, &chained.name).is_some() || is_root_param(&chained.name))
            .collect();
        if candidates.is_empty() {
            return Err(SearchError::unsupported(format!(
                "no target of '{}' supports chained parameter '{}'",
                definition.code, chained.name
            )));
        }

        let mut alternatives = Vec::with_capacity(candidates.len());
        for target_type in candidates {
            let mut subquery = root.subquery();
            subquery.add_predicates(base_predicates(&subquery, target_type)?)?;
            self.add_param(&mut subquery, target_type, &chained)?;
            let ids = subquery.pop()?;

            alternatives.push(Predicate::and([
                Predicate::eq(
                    link.column(columns::TARGET_RESOURCE_TYPE),
                    SqlValue::text(target_type),
                ),
                Predicate::in_subquery(link.column(columns::TARGET_RESOURCE_ID), ids),
            ]));
        }
        Ok(Predicate::or(alternatives))
    }
}

fn is_root_param(name: &str) -> bool {
    matches!(name, "_id" | "_lastUpdated" | "_tag" | "_security" | "_profile")
}

fn value_predicate(
    table: &TableRef,
    definition: &SearchParamDefinition,
    type_restriction: Option<&str>,
    value: &str,
) -> Result<Predicate> {
    let parsed = IdType::parse(value);
    let id = parsed
        .id_part()
        .ok_or_else(|| SearchError::invalid_value(format!("invalid reference '{value}'")))?;

    let resource_type = parsed
        .resource_type()
        .or(type_restriction)
        .or(match definition.targets.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        });

    let id_predicate = Predicate::eq(table.column(columns::TARGET_FHIR_ID), SqlValue::text(id));
    Ok(match resource_type {
        Some(t) => Predicate::and([
            Predicate::eq(table.column(columns::TARGET_RESOURCE_TYPE), SqlValue::text(t)),
            id_predicate,
        ]),
        None => id_predicate,
    })
}
