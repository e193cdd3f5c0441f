//! `_tag`, `_security` and `_profile`.
//!
//! Tags are multi-valued, so `:not` cannot negate a join row: a resource
//! tagged {A, B} has a row that is not A. Instead the resource pid must not
//! be among the pids holding a matching tag.

use super::{IndexTarget, any_value, correlated_subquery, parse_missing};
use crate::error::{Result, SearchError};
use crate::index::TagType;
use crate::parameters::SearchModifier;
use crate::parser::ParsedParam;
use crate::query::{JoinKey, JoinType, Predicate, QueryRoot, SqlValue, TableRef, columns};

pub(super) fn build(root: &mut QueryRoot, tag_type: TagType, param: &ParsedParam) -> Result<Predicate> {
    let key = JoinKey::new(JoinType::Tag, &param.name);
    match &param.modifier {
        None => {
            let target = IndexTarget::bind(root, key)?;
            let predicate = tag_filter(target.table(), tag_type, &param.values)?;
            Ok(target.apply(predicate))
        }
        Some(SearchModifier::Not) => {
            let mut subquery = root.subquery_for_tag_negation()?;
            let filter = tag_filter(&subquery.from, tag_type, &param.values)?;
            subquery.and_where(filter);
            Ok(Predicate::not_in_subquery(root.resource_pid_column()?, subquery))
        }
        Some(SearchModifier::Missing) => {
            let is_missing = parse_missing(param)?;
            let mut subquery = correlated_subquery(root, &key)?;
            subquery.and_where(type_predicate(&subquery.from, tag_type));
            Ok(if is_missing {
                Predicate::not_exists(subquery)
            } else {
                Predicate::exists(subquery)
            })
        }
        Some(other) => Err(SearchError::unsupported(format!(
            "modifier ':{other}' is not valid for '{}'",
            param.name
        ))),
    }
}

fn type_predicate(table: &TableRef, tag_type: TagType) -> Predicate {
    Predicate::eq(
        table.column(columns::TAG_TYPE),
        SqlValue::Integer(tag_type.code()),
    )
}

/// Tag type plus any of the values. Profiles are canonical URLs compared
/// whole; tags and security labels take token `system|code` syntax.
fn tag_filter(table: &TableRef, tag_type: TagType, values: &[String]) -> Result<Predicate> {
    let values = any_value(values, |value| {
        Ok(match tag_type {
            TagType::Profile => {
                Predicate::eq(table.column(columns::TAG_CODE), SqlValue::text(value))
            }
            TagType::Tag | TagType::SecurityLabel => super::token::system_code_predicate(
                table.column(columns::TAG_SYSTEM),
                table.column(columns::TAG_CODE),
                value,
            ),
        })
    })?;
    Ok(Predicate::and([type_predicate(table, tag_type), values]))
}
