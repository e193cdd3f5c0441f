//! In-memory evaluation of a finalized query against the index tables.
//!
//! Follows SQL semantics closely enough for the plans the builders produce:
//! three-valued logic, INNER and LEFT OUTER joins, correlated subqueries,
//! DISTINCT pids and ORDER BY with NULLs last. The total is counted before
//! OFFSET and LIMIT are applied.

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::index::{IndexTables, TableRow};
use crate::query::{ColumnRef, JoinKind, Predicate, Query, SortDirection, SqlValue, TableRef};

/// Pids of one result page plus the number of matches overall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub pids: Vec<i64>,
    pub total: usize,
}

/// Row bindings by table alias. `None` is a null-extended outer join row.
type Env<'a> = Vec<(&'a str, Option<TableRow<'a>>)>;

pub fn execute(tables: &IndexTables, query: &Query) -> QueryResult {
    Executor { tables }.run(query)
}

struct Executor<'a> {
    tables: &'a IndexTables,
}

impl<'a> Executor<'a> {
    fn run(&self, query: &'a Query) -> QueryResult {
        let rows = self.matching_rows(query, &Vec::new());

        // pid -> sort keys, aggregated over the pid's joined rows
        let mut pids: IndexMap<i64, Vec<SqlValue>> = IndexMap::new();
        for env in &rows {
            let SqlValue::Integer(pid) = lookup(env, &query.select) else {
                continue;
            };
            let keys: Vec<SqlValue> = query.order.iter().map(|o| lookup(env, &o.column)).collect();
            match pids.get_mut(&pid) {
                Some(existing) => {
                    for ((current, candidate), order) in
                        existing.iter_mut().zip(keys).zip(&query.order)
                    {
                        if prefer(&candidate, current, order.direction) {
                            *current = candidate;
                        }
                    }
                }
                None => {
                    pids.insert(pid, keys);
                }
            }
        }

        let mut ordered: Vec<(i64, Vec<SqlValue>)> = pids.into_iter().collect();
        ordered.sort_by(|(a_pid, a_keys), (b_pid, b_keys)| {
            for ((a, b), order) in a_keys.iter().zip(b_keys).zip(&query.order) {
                let ordering = compare_nulls_last(a, b, order.direction);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a_pid.cmp(b_pid)
        });

        let total = ordered.len();
        let pids = ordered
            .into_iter()
            .map(|(pid, _)| pid)
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        QueryResult { pids, total }
    }

    /// All joined row combinations of `query` satisfying its WHERE clause,
    /// with `outer` visible for correlation.
    fn matching_rows(&self, query: &'a Query, outer: &Env<'a>) -> Vec<Env<'a>> {
        let roots = self.candidates(&query.from, query.where_clause.as_ref(), outer);

        let mut result = Vec::new();
        for root in roots {
            let mut envs = vec![extend(outer, &query.from.alias, Some(root))];
            for join in &query.joins {
                let mut next = Vec::new();
                for env in envs {
                    let mut matched = false;
                    for row in self.candidates(&join.target, Some(&join.on), &env) {
                        let joined = extend(&env, &join.target.alias, Some(row));
                        if self.eval(&join.on, &joined) == Some(true) {
                            next.push(joined);
                            matched = true;
                        }
                    }
                    if !matched && join.kind == JoinKind::LeftOuter {
                        next.push(extend(&env, &join.target.alias, None));
                    }
                }
                envs = next;
            }
            result.extend(envs.into_iter().filter(|env| match &query.where_clause {
                Some(predicate) => self.eval(predicate, env) == Some(true),
                None => true,
            }));
        }
        result
    }

    /// Rows of `table` worth testing. A top-level `table.pid = <bound column>`
    /// conjunct narrows them to one resource.
    fn candidates(
        &self,
        table: &TableRef,
        predicate: Option<&Predicate>,
        env: &Env<'a>,
    ) -> Vec<TableRow<'a>> {
        match predicate.and_then(|p| pid_hint(p, table, env)) {
            Some(SqlValue::Integer(pid)) => self.tables.rows_for(table.table, pid),
            Some(_) => Vec::new(),
            None => self.tables.scan(table.table),
        }
    }

    fn eval(&self, predicate: &'a Predicate, env: &Env<'a>) -> Option<bool> {
        match predicate {
            Predicate::Compare { column, op, value } => {
                lookup(env, column).compare(value).map(|o| op.holds(o))
            }
            Predicate::ColumnEq { left, right } => lookup(env, left)
                .compare(&lookup(env, right))
                .map(|o| o == Ordering::Equal),
            Predicate::Like { column, pattern } => match lookup(env, column) {
                SqlValue::Text(text) => Some(like_match(&text, pattern)),
                _ => None,
            },
            Predicate::InList { column, values } => {
                member(&lookup(env, column), values.iter().cloned())
            }
            Predicate::InSubquery {
                column,
                subquery,
                negated,
            } => {
                let selected = self
                    .matching_rows(subquery, env)
                    .into_iter()
                    .map(|row| lookup(&row, &subquery.select));
                member(&lookup(env, column), selected).map(|found| found != *negated)
            }
            Predicate::Exists { subquery, negated } => {
                let exists = !self.matching_rows(subquery, env).is_empty();
                Some(exists != *negated)
            }
            Predicate::IsNull { column, negated } => Some(lookup(env, column).is_null() != *negated),
            Predicate::And(parts) => {
                let mut result = Some(true);
                for part in parts {
                    match self.eval(part, env) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or(parts) => {
                let mut result = Some(false);
                for part in parts {
                    match self.eval(part, env) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Predicate::Not(inner) => self.eval(inner, env).map(|b| !b),
            Predicate::True => Some(true),
            Predicate::False => Some(false),
        }
    }
}

fn extend<'a>(env: &Env<'a>, alias: &'a str, row: Option<TableRow<'a>>) -> Env<'a> {
    let mut extended = env.clone();
    extended.push((alias, row));
    extended
}

/// Innermost binding wins, so a subquery alias shadows nothing it should not.
fn lookup(env: &Env<'_>, column: &ColumnRef) -> SqlValue {
    env.iter()
        .rev()
        .find(|(alias, _)| *alias == column.alias)
        .and_then(|(_, row)| row.as_ref())
        .map_or(SqlValue::Null, |row| row.value(column.column))
}

fn is_bound(env: &Env<'_>, column: &ColumnRef) -> bool {
    env.iter().any(|(alias, _)| *alias == column.alias)
}

fn pid_hint(predicate: &Predicate, table: &TableRef, env: &Env<'_>) -> Option<SqlValue> {
    let pid = table.pid();
    let conjuncts: &[Predicate] = match predicate {
        Predicate::And(parts) => parts,
        other => std::slice::from_ref(other),
    };
    conjuncts.iter().find_map(|conjunct| match conjunct {
        Predicate::ColumnEq { left, right } if *left == pid && is_bound(env, right) => {
            Some(lookup(env, right))
        }
        Predicate::ColumnEq { left, right } if *right == pid && is_bound(env, left) => {
            Some(lookup(env, left))
        }
        _ => None,
    })
}

/// SQL `IN`: true on a match, unknown if no match but a NULL was seen.
fn member(value: &SqlValue, candidates: impl Iterator<Item = SqlValue>) -> Option<bool> {
    if value.is_null() {
        return None;
    }
    let mut saw_null = false;
    for candidate in candidates {
        match value.compare(&candidate) {
            Some(Ordering::Equal) => return Some(true),
            None if candidate.is_null() => saw_null = true,
            _ => {}
        }
    }
    if saw_null { None } else { Some(false) }
}

/// Whether `candidate` should replace `current` as a pid's sort key:
/// ascending sorts by the smallest value, descending by the largest.
fn prefer(candidate: &SqlValue, current: &SqlValue, direction: SortDirection) -> bool {
    if candidate.is_null() {
        return false;
    }
    if current.is_null() {
        return true;
    }
    match (candidate.compare(current), direction) {
        (Some(Ordering::Less), SortDirection::Asc) => true,
        (Some(Ordering::Greater), SortDirection::Desc) => true,
        _ => false,
    }
}

fn compare_nulls_last(a: &SqlValue, b: &SqlValue, direction: SortDirection) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = a.compare(b).unwrap_or(Ordering::Equal);
            match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        }
    }
}

/// `LIKE` with `%`, `_` and backslash escapes.
fn like_match(text: &str, pattern: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Char(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Char(chars.next().unwrap_or('\\')),
            c => Token::Char(c),
        });
    }

    let text: Vec<char> = text.chars().collect();
    // matches[j]: the first i text chars match the first j tokens
    let mut matches = vec![false; tokens.len() + 1];
    matches[0] = true;
    for (j, token) in tokens.iter().enumerate() {
        matches[j + 1] = matches[j] && *token == Token::Any;
    }
    for c in &text {
        let mut next = vec![false; tokens.len() + 1];
        for (j, token) in tokens.iter().enumerate() {
            next[j + 1] = match token {
                Token::Any => next[j] || matches[j + 1],
                Token::One => matches[j],
                Token::Char(expected) => matches[j] && expected == c,
            };
        }
        matches = next;
    }
    matches[tokens.len()]
}
