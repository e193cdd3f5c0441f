//! String search.
//!
//! - (default): starts-with on the normalized value
//! - `:exact`: equality on the value as written
//! - `:contains`: substring of the normalized value

use super::{IndexTarget, any_value, escape_like};
use crate::error::{Result, SearchError};
use crate::normalize::normalize_string;
use crate::parameters::{SearchModifier, SearchParamDefinition};
use crate::parser::ParsedParam;
use crate::query::{JoinKey, JoinType, Predicate, QueryRoot, SqlValue, TableRef, columns};

pub(super) fn build(
    root: &mut QueryRoot,
    definition: &SearchParamDefinition,
    param: &ParsedParam,
) -> Result<Predicate> {
    let target = IndexTarget::bind(root, JoinKey::new(JoinType::String, &definition.code))?;
    let predicate = any_value(&param.values, |value| {
        value_predicate(target.table(), param.modifier.as_ref(), value)
    })?;
    Ok(target.apply(predicate))
}

pub(super) fn value_predicate(
    table: &TableRef,
    modifier: Option<&SearchModifier>,
    value: &str,
) -> Result<Predicate> {
    match modifier {
        None => Ok(Predicate::like(
            table.column(columns::SP_VALUE_NORMALIZED),
            format!("{}%", escape_like(&normalize_string(value))),
        )),
        Some(SearchModifier::Exact) => Ok(Predicate::eq(
            table.column(columns::SP_VALUE_EXACT),
            SqlValue::text(value),
        )),
        Some(SearchModifier::Contains) => Ok(Predicate::like(
            table.column(columns::SP_VALUE_NORMALIZED),
            format!("%{}%", escape_like(&normalize_string(value))),
        )),
        Some(other) => Err(SearchError::unsupported(format!(
            "modifier ':{other}' is not supported on string parameters"
        ))),
    }
}
