//! Token search.
//!
//! Value forms:
//! - `code`: any system
//! - `system|code`: that system and code
//! - `|code`: code without a system
//! - `system|`: any code in that system
//!
//! `:not` matches resources without any row matching the value, including
//! resources with no value at all.

use super::{IndexTarget, any_value, not_exists_matching};
use crate::error::{Result, SearchError};
use crate::parameters::{SearchModifier, SearchParamDefinition};
use crate::parser::ParsedParam;
use crate::query::{ColumnRef, JoinKey, JoinType, Predicate, QueryRoot, SqlValue, TableRef, columns};

pub(super) fn build(
    root: &mut QueryRoot,
    definition: &SearchParamDefinition,
    param: &ParsedParam,
) -> Result<Predicate> {
    let key = JoinKey::new(JoinType::Token, &definition.code);
    match &param.modifier {
        None => {
            let target = IndexTarget::bind(root, key)?;
            let predicate = any_value(&param.values, |value| Ok(value_predicate(target.table(), value)))?;
            Ok(target.apply(predicate))
        }
        Some(SearchModifier::Not) => not_exists_matching(root, &key, |table| {
            any_value(&param.values, |value| Ok(value_predicate(table, value)))
        }),
        Some(other) => Err(SearchError::unsupported(format!(
            "modifier ':{other}' is not supported on token parameter '{}'",
            definition.code
        ))),
    }
}

pub(super) fn value_predicate(table: &TableRef, value: &str) -> Predicate {
    system_code_predicate(
        table.column(columns::SP_SYSTEM),
        table.column(columns::SP_VALUE),
        value,
    )
}

/// Match a `system|code` value against a pair of columns.
pub(super) fn system_code_predicate(system: ColumnRef, code: ColumnRef, value: &str) -> Predicate {
    match split_system(value) {
        (None, code_value) => Predicate::eq(code, SqlValue::text(code_value)),
        (Some(""), code_value) => Predicate::and([
            Predicate::is_null(system),
            Predicate::eq(code, SqlValue::text(code_value)),
        ]),
        (Some(system_value), "") => Predicate::eq(system, SqlValue::text(system_value)),
        (Some(system_value), code_value) => Predicate::and([
            Predicate::eq(system, SqlValue::text(system_value)),
            Predicate::eq(code, SqlValue::text(code_value)),
        ]),
    }
}

/// Split at the first `|` not preceded by a backslash.
fn split_system(value: &str) -> (Option<&str>, &str) {
    let bytes = value.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'|' && (i == 0 || bytes[i - 1] != b'\\') {
            return (Some(&value[..i]), &value[i + 1..]);
        }
    }
    (None, value)
}
