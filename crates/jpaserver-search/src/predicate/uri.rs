use super::{IndexTarget, any_value, escape_like};
use crate::error::{Result, SearchError};
use crate::parameters::{SearchModifier, SearchParamDefinition};
use crate::parser::ParsedParam;
use crate::query::{JoinKey, JoinType, Predicate, QueryRoot, SqlValue, TableRef, columns};

pub(super) fn build(
    root: &mut QueryRoot,
    definition: &SearchParamDefinition,
    param: &ParsedParam,
) -> Result<Predicate> {
    let target = IndexTarget::bind(root, JoinKey::new(JoinType::Uri, &definition.code))?;
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
    let column = table.column(columns::SP_URI);
    match modifier {
        None => Ok(Predicate::eq(column, SqlValue::text(value))),
        Some(SearchModifier::Below) => {
            Ok(Predicate::like(column, format!("{}%", escape_like(value))))
        }
        Some(SearchModifier::Above) => Ok(Predicate::in_list(
            column,
            ancestors(value).into_iter().map(SqlValue::text).collect(),
        )),
        Some(other) => Err(SearchError::unsupported(format!(
            "modifier ':{other}' is not supported on uri parameters"
        ))),
    }
}

/// The value and each of its parent paths, longest first. The scheme and
/// authority are never cut.
fn ancestors(value: &str) -> Vec<&str> {
    let floor = value.find("://").map_or(0, |i| i + 3);
    let mut result = vec![value];
    let mut current = value.trim_end_matches('/');
    while let Some(slash) = current.rfind('/') {
        if slash < floor || current[floor..slash].is_empty() {
            break;
        }
        current = &current[..slash];
        result.push(current);
    }
    result
}
