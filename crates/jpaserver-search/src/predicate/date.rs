//! Date search.
//!
//! Both the indexed value and the search value are half-open ranges
//! `[low, high)` given by their precision. With the row range `[rl, rh)` and
//! the search range `[vl, vh)`:
//!
//! | prefix | predicate                 |
//! |--------|---------------------------|
//! | eq     | `rl >= vl AND rh <= vh`   |
//! | ne     | `NOT (eq)`                |
//! | gt     | `rh > vh`                 |
//! | lt     | `rl < vl`                 |
//! | ge     | `rh > vl`                 |
//! | le     | `rl < vh`                 |
//! | sa     | `rl >= vh`                |
//! | eb     | `rh <= vl`                |
//! | ap     | overlap with the widened search range |
//!
//! `ap` widens the search range by 10% of its width on each side, at least
//! one second.

use jpaserver_core::DateRange;
use time::Duration;

use super::{IndexTarget, any_value};
use crate::error::{Result, SearchError};
use crate::parameters::{SearchParamDefinition, SearchPrefix};
use crate::parser::ParsedParam;
use crate::query::{
    ColumnRef, JoinKey, JoinType, Operator, Predicate, QueryRoot, SqlValue, TableRef, columns,
};

const APPROXIMATE_FRACTION: f64 = 0.1;
const APPROXIMATE_MINIMUM: Duration = Duration::SECOND;

pub(super) fn build(
    root: &mut QueryRoot,
    definition: &SearchParamDefinition,
    param: &ParsedParam,
) -> Result<Predicate> {
    let target = IndexTarget::bind(root, JoinKey::new(JoinType::Date, &definition.code))?;
    let predicate = any_value(&param.values, |value| value_predicate(target.table(), value))?;
    Ok(target.apply(predicate))
}

fn parse(value: &str) -> Result<(SearchPrefix, DateRange)> {
    let (prefix, raw) = SearchPrefix::split(value);
    let range = DateRange::parse(raw)
        .map_err(|_| SearchError::invalid_value(format!("invalid date '{value}'")))?;
    Ok((prefix, range))
}

fn ts(value: time::OffsetDateTime) -> SqlValue {
    SqlValue::Timestamp(value)
}

pub(super) fn value_predicate(table: &TableRef, value: &str) -> Result<Predicate> {
    let (prefix, range) = parse(value)?;
    let low = table.column(columns::SP_VALUE_LOW);
    let high = table.column(columns::SP_VALUE_HIGH);
    let cmp = |column: &ColumnRef, op, v| Predicate::compare(column.clone(), op, ts(v));

    Ok(match prefix {
        SearchPrefix::Eq => Predicate::and([
            cmp(&low, Operator::Ge, range.low),
            cmp(&high, Operator::Le, range.high),
        ]),
        SearchPrefix::Ne => Predicate::and([
            cmp(&low, Operator::Ge, range.low),
            cmp(&high, Operator::Le, range.high),
        ])
        .negate(),
        SearchPrefix::Gt => cmp(&high, Operator::Gt, range.high),
        SearchPrefix::Lt => cmp(&low, Operator::Lt, range.low),
        SearchPrefix::Ge => cmp(&high, Operator::Gt, range.low),
        SearchPrefix::Le => cmp(&low, Operator::Lt, range.high),
        SearchPrefix::Sa => cmp(&low, Operator::Ge, range.high),
        SearchPrefix::Eb => cmp(&high, Operator::Le, range.low),
        SearchPrefix::Ap => {
            let widened = range.widen(APPROXIMATE_FRACTION, APPROXIMATE_MINIMUM);
            Predicate::and([
                cmp(&low, Operator::Lt, widened.high),
                cmp(&high, Operator::Gt, widened.low),
            ])
        }
    })
}

/// `_lastUpdated` compares the root's update instant against the value's range.
pub(super) fn last_updated(root: &mut QueryRoot, param: &ParsedParam) -> Result<Predicate> {
    if let Some(modifier) = &param.modifier {
        return Err(SearchError::unsupported(format!(
            "modifier ':{modifier}' is not valid for '_lastUpdated'"
        )));
    }
    let column = root.last_updated_column()?;
    any_value(&param.values, |value| point_predicate(&column, value))
}

/// Prefix semantics for a single instant column.
fn point_predicate(column: &ColumnRef, value: &str) -> Result<Predicate> {
    let (prefix, range) = parse(value)?;
    let cmp = |op, v| Predicate::compare(column.clone(), op, ts(v));
    let within = |range: DateRange| {
        Predicate::and([cmp(Operator::Ge, range.low), cmp(Operator::Lt, range.high)])
    };

    Ok(match prefix {
        SearchPrefix::Eq => within(range),
        SearchPrefix::Ne => within(range).negate(),
        SearchPrefix::Gt | SearchPrefix::Sa => cmp(Operator::Ge, range.high),
        SearchPrefix::Lt | SearchPrefix::Eb => cmp(Operator::Lt, range.low),
        SearchPrefix::Ge => cmp(Operator::Ge, range.low),
        SearchPrefix::Le => cmp(Operator::Lt, range.high),
        SearchPrefix::Ap => within(range.widen(APPROXIMATE_FRACTION, APPROXIMATE_MINIMUM)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Table;
    use time::macros::datetime;

    fn table() -> TableRef {
        TableRef::new(Table::DateIndex, "j1")
    }

    #[test]
    fn test_eq_is_containment() {
        let predicate = value_predicate(&table(), "2024-03").unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::compare(
                    table().column(columns::SP_VALUE_LOW),
                    Operator::Ge,
                    ts(datetime!(2024-03-01 00:00 UTC))
                ),
                Predicate::compare(
                    table().column(columns::SP_VALUE_HIGH),
                    Operator::Le,
                    ts(datetime!(2024-04-01 00:00 UTC))
                ),
            ])
        );
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(
            value_predicate(&table(), "gt2024").unwrap(),
            Predicate::compare(
                table().column(columns::SP_VALUE_HIGH),
                Operator::Gt,
                ts(datetime!(2025-01-01 00:00 UTC))
            )
        );
        assert_eq!(
            value_predicate(&table(), "sa2024").unwrap(),
            Predicate::compare(
                table().column(columns::SP_VALUE_LOW),
                Operator::Ge,
                ts(datetime!(2025-01-01 00:00 UTC))
            )
        );
        assert!(matches!(value_predicate(&table(), "ne2024").unwrap(), Predicate::Not(_)));
    }

    #[test]
    fn test_approximate_widens_by_tenth() {
        // one day wide, widened by 2.4 hours either side
        let predicate = value_predicate(&table(), "ap2024-03-15").unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::compare(
                    table().column(columns::SP_VALUE_LOW),
                    Operator::Lt,
                    ts(datetime!(2024-03-16 02:24 UTC))
                ),
                Predicate::compare(
                    table().column(columns::SP_VALUE_HIGH),
                    Operator::Gt,
                    ts(datetime!(2024-03-14 21:36 UTC))
                ),
            ])
        );
    }

    #[test]
    fn test_invalid_date() {
        assert!(matches!(
            value_predicate(&table(), "ge-yesterday"),
            Err(SearchError::InvalidSearchValue(_))
        ));
    }

    #[test]
    fn test_point_semantics() {
        let column = TableRef::new(Table::Resource, "r0").column(columns::RES_UPDATED);
        assert_eq!(
            point_predicate(&column, "gt2024").unwrap(),
            Predicate::compare(column.clone(), Operator::Ge, ts(datetime!(2025-01-01 00:00 UTC)))
        );
        assert_eq!(
            point_predicate(&column, "le2024").unwrap(),
            Predicate::compare(column.clone(), Operator::Lt, ts(datetime!(2025-01-01 00:00 UTC)))
        );
    }
}
