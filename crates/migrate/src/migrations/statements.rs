//! Splitting raw SQL into single statements

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Split a SQL script into individual statements.
///
/// The script is parsed with the PostgreSQL dialect. Scripts the parser
/// rejects (dollar-quoted function bodies and the like) fall back to
/// splitting on `;`.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let dialect = PostgreSqlDialect {};

    match Parser::parse_sql(&dialect, sql) {
        Ok(parsed) => parsed.iter().map(|stmt| stmt.to_string()).collect(),
        Err(e) => {
            tracing::warn!("SQL parsing failed, using naive semicolon splitting: {}", e);
            naive_split(sql)
        }
    }
}

fn naive_split(sql: &str) -> Vec<String> {
    let without_comments = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
