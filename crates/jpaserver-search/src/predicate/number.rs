//! Number and quantity search.
//!
//! `eq` and `ne` honour the implicit precision of the value (`5.4` means
//! `[5.35, 5.45)`). `sa` and `eb` behave as `gt` and `lt`; `ap` accepts
//! values within 10% of the searched value.

use super::{IndexTarget, any_value};
use crate::error::{Result, SearchError};
use crate::parameters::{SearchParamDefinition, SearchPrefix};
use crate::parser::ParsedParam;
use crate::query::{ColumnRef, JoinKey, JoinType, Operator, Predicate, QueryRoot, SqlValue, TableRef, columns};

const APPROXIMATE_FRACTION: f64 = 0.1;

pub(super) fn build(
    root: &mut QueryRoot,
    definition: &SearchParamDefinition,
    param: &ParsedParam,
) -> Result<Predicate> {
    let target = IndexTarget::bind(root, JoinKey::new(JoinType::Number, &definition.code))?;
    let predicate = any_value(&param.values, |value| {
        number_predicate(&target.table().column(columns::SP_VALUE), value)
    })?;
    Ok(target.apply(predicate))
}

pub(super) fn build_quantity(
    root: &mut QueryRoot,
    definition: &SearchParamDefinition,
    param: &ParsedParam,
) -> Result<Predicate> {
    let target = IndexTarget::bind(root, JoinKey::new(JoinType::Quantity, &definition.code))?;
    let predicate = any_value(&param.values, |value| quantity_predicate(target.table(), value))?;
    Ok(target.apply(predicate))
}

/// Half-width of the range a decimal literal stands for.
fn calculate_precision(num_str: &str) -> f64 {
    let cleaned = num_str.trim().trim_start_matches(['+', '-']);
    let mantissa = cleaned.split(['e', 'E']).next().unwrap_or(cleaned);
    match mantissa.find('.') {
        Some(dot) => 0.5 * 10f64.powi(-((mantissa.len() - dot - 1) as i32)),
        None => 0.5,
    }
}

pub(super) fn number_predicate(column: &ColumnRef, value: &str) -> Result<Predicate> {
    let (prefix, raw) = SearchPrefix::split(value);
    let number: f64 = raw
        .trim()
        .parse()
        .map_err(|_| SearchError::invalid_value(format!("invalid number '{value}'")))?;
    let cmp = |op, v: f64| Predicate::compare(column.clone(), op, SqlValue::Float(v));
    let precision = calculate_precision(raw);
    let within = || {
        Predicate::and([
            cmp(Operator::Ge, number - precision),
            cmp(Operator::Lt, number + precision),
        ])
    };

    Ok(match prefix {
        SearchPrefix::Eq => within(),
        SearchPrefix::Ne => within().negate(),
        SearchPrefix::Gt | SearchPrefix::Sa => cmp(Operator::Gt, number),
        SearchPrefix::Lt | SearchPrefix::Eb => cmp(Operator::Lt, number),
        SearchPrefix::Ge => cmp(Operator::Ge, number),
        SearchPrefix::Le => cmp(Operator::Le, number),
        SearchPrefix::Ap => {
            let delta = (number * APPROXIMATE_FRACTION).abs();
            Predicate::and([
                cmp(Operator::Ge, number - delta),
                cmp(Operator::Le, number + delta),
            ])
        }
    })
}

/// `[prefix]number|system|code`. An empty system matches the code against
/// both the coded unit and the human readable unit.
pub(super) fn quantity_predicate(table: &TableRef, value: &str) -> Result<Predicate> {
    let mut parts = value.splitn(3, '|');
    let number = parts.next().unwrap_or_default();
    let system = parts.next().filter(|s| !s.is_empty());
    let code = parts.next().filter(|s| !s.is_empty());

    let mut predicates = vec![number_predicate(&table.column(columns::SP_VALUE), number)?];
    match (system, code) {
        (Some(system), Some(code)) => {
            predicates.push(Predicate::eq(table.column(columns::SP_SYSTEM), SqlValue::text(system)));
            predicates.push(Predicate::eq(table.column(columns::SP_CODE), SqlValue::text(code)));
        }
        (Some(system), None) => {
            predicates.push(Predicate::eq(table.column(columns::SP_SYSTEM), SqlValue::text(system)));
        }
        (None, Some(code)) => predicates.push(Predicate::or([
            Predicate::eq(table.column(columns::SP_CODE), SqlValue::text(code)),
            Predicate::eq(table.column(columns::SP_UNITS), SqlValue::text(code)),
        ])),
        (None, None) => {}
    }
    Ok(Predicate::and(predicates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Table;

    fn column() -> ColumnRef {
        TableRef::new(Table::NumberIndex, "j1").column(columns::SP_VALUE)
    }

    #[test]
    fn test_calculate_precision() {
        assert_eq!(calculate_precision("100"), 0.5);
        assert!((calculate_precision("5.4") - 0.05).abs() < 1e-12);
        assert!((calculate_precision("-1.25") - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_eq_uses_precision_range() {
        let predicate = number_predicate(&column(), "100").unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::compare(column(), Operator::Ge, SqlValue::Float(99.5)),
                Predicate::compare(column(), Operator::Lt, SqlValue::Float(100.5)),
            ])
        );
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(
            number_predicate(&column(), "sa5").unwrap(),
            Predicate::compare(column(), Operator::Gt, SqlValue::Float(5.0))
        );
        assert_eq!(
            number_predicate(&column(), "le5").unwrap(),
            Predicate::compare(column(), Operator::Le, SqlValue::Float(5.0))
        );
        assert_eq!(
            number_predicate(&column(), "ap-10").unwrap(),
            Predicate::And(vec![
                Predicate::compare(column(), Operator::Ge, SqlValue::Float(-11.0)),
                Predicate::compare(column(), Operator::Le, SqlValue::Float(-9.0)),
            ])
        );
        assert!(number_predicate(&column(), "gtabc").is_err());
    }

    #[test]
    fn test_quantity_forms() {
        let table = TableRef::new(Table::QuantityIndex, "j2");
        let with_units = quantity_predicate(&table, "gt100||mm[Hg]").unwrap();
        let Predicate::And(parts) = with_units else {
            panic!("expected conjunction");
        };
        assert!(matches!(parts[1], Predicate::Or(_)));

        let full = quantity_predicate(&table, "100|http://unitsofmeasure.org|mm[Hg]").unwrap();
        let Predicate::And(parts) = full else {
            panic!("expected conjunction");
        };
        assert_eq!(parts.len(), 4);

        assert_eq!(
            quantity_predicate(&table, "lt5").unwrap(),
            Predicate::compare(table.column(columns::SP_VALUE), Operator::Lt, SqlValue::Float(5.0))
        );
    }
}
