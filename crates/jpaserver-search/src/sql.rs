//! PostgreSQL rendering of a finalized query.
//!
//! Values are never inlined; they are collected as `$n` bind parameters.

use std::fmt;

use crate::query::{Predicate, Query, SortDirection, SqlValue};

/// Rendered SQL text with its bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl fmt::Display for BuiltQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

pub fn render(query: &Query) -> BuiltQuery {
    let mut writer = SqlWriter::default();
    let sql = writer.query(query);
    BuiltQuery {
        sql,
        params: writer.params,
    }
}

#[derive(Default)]
struct SqlWriter {
    params: Vec<SqlValue>,
}

impl SqlWriter {
    fn bind(&mut self, value: &SqlValue) -> String {
        self.params.push(value.clone());
        format!("${}", self.params.len())
    }

    fn query(&mut self, query: &Query) -> String {
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&query.select.to_string());
        // DISTINCT requires ordered expressions in the select list
        if query.distinct {
            for order in &query.order {
                if order.column != query.select {
                    sql.push_str(&format!(", {}", order.column));
                }
            }
        }
        sql.push_str(&format!(" FROM {} {}", query.from.table.name(), query.from.alias));

        for join in &query.joins {
            let on = self.predicate(&join.on);
            sql.push_str(&format!(
                " {} {} {} ON {}",
                join.kind.as_sql(),
                join.target.table.name(),
                join.target.alias,
                on
            ));
        }

        if let Some(where_clause) = &query.where_clause {
            let condition = self.predicate(where_clause);
            sql.push_str(&format!(" WHERE {condition}"));
        }

        if !query.order.is_empty() {
            let order: Vec<String> = query
                .order
                .iter()
                .map(|o| {
                    let direction = match o.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {direction} NULLS LAST", o.column)
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset
            && offset > 0
        {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    fn nested(&mut self, predicate: &Predicate) -> String {
        let sql = self.predicate(predicate);
        match predicate {
            Predicate::And(_) | Predicate::Or(_) => format!("({sql})"),
            _ => sql,
        }
    }

    fn predicate(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Compare { column, op, value } => {
                format!("{column} {} {}", op.as_sql(), self.bind(value))
            }
            Predicate::ColumnEq { left, right } => format!("{left} = {right}"),
            Predicate::Like { column, pattern } => {
                format!("{column} LIKE {}", self.bind(&SqlValue::text(pattern)))
            }
            Predicate::InList { column, values } => {
                if values.is_empty() {
                    return "FALSE".to_string();
                }
                let binds: Vec<String> = values.iter().map(|v| self.bind(v)).collect();
                format!("{column} IN ({})", binds.join(", "))
            }
            Predicate::InSubquery {
                column,
                subquery,
                negated,
            } => {
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{column} {keyword} ({})", self.query(subquery))
            }
            Predicate::Exists { subquery, negated } => {
                let keyword = if *negated { "NOT EXISTS" } else { "EXISTS" };
                format!("{keyword} ({})", self.query(subquery))
            }
            Predicate::IsNull { column, negated } => {
                if *negated {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
            Predicate::And(parts) => self.list(parts, " AND ", "TRUE"),
            Predicate::Or(parts) => self.list(parts, " OR ", "FALSE"),
            Predicate::Not(inner) => format!("NOT ({})", self.predicate(inner)),
            Predicate::True => "TRUE".to_string(),
            Predicate::False => "FALSE".to_string(),
        }
    }

    fn list(&mut self, parts: &[Predicate], separator: &str, empty: &str) -> String {
        if parts.is_empty() {
            return empty.to_string();
        }
        parts
            .iter()
            .map(|p| self.nested(p))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryLimits;
    use crate::query::{JoinKey, JoinType, OrderSpec, QueryRoot, columns};

    #[test]
    fn test_render_join_and_where() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let join = root.join(JoinKey::new(JoinType::String, "name")).unwrap();
        root.add_predicate(Predicate::eq(
            root.get(columns::RES_TYPE).unwrap(),
            SqlValue::text("Patient"),
        ))
        .unwrap();
        root.add_predicate(Predicate::like(join.column(columns::SP_VALUE_NORMALIZED), "smi%"))
            .unwrap();
        let mut query = root.pop().unwrap();
        query.limit = Some(20);

        let built = render(&query);
        assert_eq!(
            built.sql,
            "SELECT DISTINCT r0.res_id FROM hfj_resource r0 \
             LEFT OUTER JOIN hfj_spidx_string j1 ON j1.res_id = r0.res_id AND j1.sp_name = $1 \
             WHERE r0.res_type = $2 AND j1.sp_value_normalized LIKE $3 LIMIT 20"
        );
        assert_eq!(
            built.params,
            vec![
                SqlValue::text("name"),
                SqlValue::text("Patient"),
                SqlValue::text("smi%")
            ]
        );
    }

    #[test]
    fn test_render_subqueries_and_order() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let mut tags = root.subquery_for_tag_negation().unwrap();
        tags.and_where(Predicate::eq(
            tags.from.column(columns::TAG_CODE),
            SqlValue::text("A"),
        ));
        root.add_predicate(Predicate::not_in_subquery(
            root.resource_pid_column().unwrap(),
            tags,
        ))
        .unwrap();
        root.order_by(vec![OrderSpec::desc(root.last_updated_column().unwrap())])
            .unwrap();
        let query = root.pop().unwrap();

        assert_eq!(
            render(&query).to_string(),
            "SELECT DISTINCT r0.res_id, r0.res_updated FROM hfj_resource r0 \
             WHERE r0.res_id NOT IN (SELECT t1.res_id FROM hfj_res_tag t1 WHERE t1.tag_code = $1) \
             ORDER BY r0.res_updated DESC NULLS LAST"
        );
    }

    #[test]
    fn test_render_nested_boolean() {
        let mut root = QueryRoot::resource_table(QueryLimits::default());
        let id = root.get(columns::FHIR_ID).unwrap();
        root.add_predicate(Predicate::or([
            Predicate::eq(id.clone(), SqlValue::text("a")),
            Predicate::eq(id.clone(), SqlValue::text("b")),
        ]))
        .unwrap();
        root.add_predicate(Predicate::in_list(id, Vec::new())).unwrap();
        let query = root.pop().unwrap();
        assert!(render(&query)
            .sql
            .ends_with("WHERE (r0.fhir_id = $1 OR r0.fhir_id = $2) AND FALSE"));
    }
}
