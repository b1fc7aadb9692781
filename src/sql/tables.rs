//! Referenced-table detection
//!
//! Finds which known tables an executed statement reads from. The parsed AST
//! gives the order tables appear in `FROM`/`JOIN` clauses; a substring scan of
//! the statement text catches anything the walk does not reach (subqueries in
//! predicates) and is the only source when the statement does not parse.

use sqlparser::ast::{Query, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// Table names (last identifier, lower-cased) in the order the AST lists them.
pub fn tables_in_statement(sql: &str) -> Option<Vec<String>> {
    let dialect = GenericDialect {};
    match Parser::parse_sql(&dialect, sql) {
        Ok(ast) => {
            let mut names = Vec::new();
            for stmt in &ast {
                if let Statement::Query(query) = stmt {
                    collect_query(query, &mut names);
                }
            }
            Some(names)
        }
        Err(e) => {
            debug!("SQL parsing failed: {}, using substring detection", e);
            None
        }
    }
}

/// Which of `candidates` the statement references, in order of first reference.
///
/// A candidate matches a table when the table's name contains it, so codebook
/// keys like `accident` match `accident_master`.
pub fn referenced_tables(sql: &str, candidates: &[&str]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    if let Some(tables) = tables_in_statement(sql) {
        for table in &tables {
            for candidate in candidates {
                let key = candidate.to_lowercase();
                if table.contains(&key) && !found.contains(&key) {
                    found.push(key);
                }
            }
        }
    }

    let lowered = sql.to_lowercase();
    let mut by_position: Vec<(usize, String)> = candidates
        .iter()
        .map(|c| c.to_lowercase())
        .filter(|key| !key.is_empty() && !found.contains(key))
        .filter_map(|key| lowered.find(&key).map(|pos| (pos, key)))
        .collect();
    by_position.sort();
    found.extend(by_position.into_iter().map(|(_, key)| key));

    found
}

fn collect_query(query: &Query, names: &mut Vec<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_query(&cte.query, names);
        }
    }
    collect_set_expr(&query.body, names);
}

fn collect_set_expr(body: &SetExpr, names: &mut Vec<String>) {
    match body {
        SetExpr::Select(select) => {
            for table_with_joins in &select.from {
                collect_table_with_joins(table_with_joins, names);
            }
        }
        SetExpr::Query(query) => collect_query(query, names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr(left, names);
            collect_set_expr(right, names);
        }
        _ => {}
    }
}

fn collect_table_with_joins(table_with_joins: &TableWithJoins, names: &mut Vec<String>) {
    collect_table_factor(&table_with_joins.relation, names);
    for join in &table_with_joins.joins {
        collect_table_factor(&join.relation, names);
    }
}

fn collect_table_factor(factor: &TableFactor, names: &mut Vec<String>) {
    match factor {
        TableFactor::Table { name, .. } => {
            if let Some(last) = name.0.last() {
                let table = last.value.to_lowercase();
                if !names.contains(&table) {
                    names.push(table);
                }
            }
        }
        TableFactor::Derived { subquery, .. } => collect_query(subquery, names),
        TableFactor::NestedJoin { table_with_joins, .. } => {
            collect_table_with_joins(table_with_joins, names)
        }
        _ => {}
    }
}
