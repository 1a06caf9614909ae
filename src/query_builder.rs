//! SQL building for the insert/update/delete helpers: identifier quoting and
//! rewriting of named `:placeholder` parameters into the positional `$N`
//! parameters the driver expects.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    client::PostgresError,
    value::{SqlParam, SqlValue},
};

// Also matches `::` so postgres casts can be recognized and skipped, since
// the regex engine has no lookbehind.
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":{1,2}[A-Za-z_][A-Za-z0-9_]*").unwrap());

/// Quotes an identifier, doubling any embedded quote characters.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub fn quote_identifiers(identifiers: &[String]) -> String {
    identifiers
        .iter()
        .map(|identifier| quote_identifier(identifier))
        .collect::<Vec<String>>()
        .join(", ")
}

/// A SET-clause entry for `update`: either a bare column whose name doubles
/// as its placeholder name, or a column paired with a custom placeholder.
#[derive(Debug, Clone, Copy)]
pub enum Assignment<'a> {
    Column(&'a str),
    Placeholder { column: &'a str, placeholder: &'a str },
}

impl<'a> From<&'a str> for Assignment<'a> {
    fn from(column: &'a str) -> Self {
        Assignment::Column(column)
    }
}

impl<'a> From<(&'a str, &'a str)> for Assignment<'a> {
    fn from((column, placeholder): (&'a str, &'a str)) -> Self {
        Assignment::Placeholder { column, placeholder }
    }
}

/// Rewrites `:name` placeholders to positional `$N` parameters.
///
/// Parameters are numbered in order of first occurrence and a name used more
/// than once shares a single `$N`. Raw expressions are spliced into the text
/// and never bound. `::` casts pass through untouched.
pub fn bind_named(
    sql: &str,
    values: &[(&str, SqlParam)],
) -> Result<(String, Vec<SqlValue>), PostgresError> {
    let mut bound: Vec<SqlValue> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut rewritten = String::with_capacity(sql.len());
    let mut last_end = 0;

    for matched in PLACEHOLDER_RE.find_iter(sql) {
        rewritten.push_str(&sql[last_end..matched.start()]);
        last_end = matched.end();

        let token = matched.as_str();
        if token.starts_with("::") {
            // a cast, not a placeholder
            rewritten.push_str(token);
            continue;
        }

        let name = &token[1..];
        match lookup(values, name) {
            Some(SqlParam::Raw(expression)) => rewritten.push_str(expression),
            Some(SqlParam::Bound(value)) => {
                let position = match positions.get(name) {
                    Some(position) => *position,
                    None => {
                        bound.push(value.clone());
                        positions.insert(name, bound.len());
                        bound.len()
                    }
                };
                rewritten.push_str(&format!("${}", position));
            }
            None => return Err(PostgresError::MissingParameter(name.to_string())),
        }
    }
    rewritten.push_str(&sql[last_end..]);

    Ok((rewritten, bound))
}

fn lookup<'a>(values: &'a [(&str, SqlParam)], name: &str) -> Option<&'a SqlParam> {
    values.iter().find(|(key, _)| *key == name).map(|(_, value)| value)
}

pub fn build_insert(
    table: &str,
    values: &[(&str, SqlParam)],
) -> Result<(String, Vec<SqlValue>), PostgresError> {
    let columns: Vec<&str> = values.iter().map(|(column, _)| *column).collect();
    let placeholders: Vec<String> =
        columns.iter().map(|column| format!(":{}", column)).collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", "),
    );

    bind_named(&sql, values)
}

pub fn build_update(
    table: &str,
    assignments: &[Assignment<'_>],
    where_sql: &str,
    values: &[(&str, SqlParam)],
) -> Result<(String, Vec<SqlValue>), PostgresError> {
    let sets: Vec<String> = assignments
        .iter()
        .map(|assignment| {
            let (column, placeholder) = match assignment {
                Assignment::Column(column) => (*column, *column),
                Assignment::Placeholder { column, placeholder } => (*column, *placeholder),
            };
            format!("{} = :{}", column, placeholder)
        })
        .collect();

    let sql = format!("UPDATE {} SET {} WHERE {}", table, sets.join(", "), where_sql);

    bind_named(&sql, values)
}

pub fn build_delete(
    table: &str,
    where_sql: &str,
    values: &[(&str, SqlParam)],
) -> Result<(String, Vec<SqlValue>), PostgresError> {
    let sql = format!("DELETE FROM {} WHERE {}", table, where_sql);

    bind_named(&sql, values)
}
