//! SQL text generation.
//!
//! Every identifier that reaches a statement goes through
//! [`escape_identifier`], which refuses names outside the accepted grammar, so
//! an invalid name aborts statement construction instead of being spliced in.
//! Values are always bound as positional parameters.

use core::fmt::Write as _;

use crate::{
    CategoryDefinition, Error, ID_FIELD, Param, Query, Record, Result, Statement,
    cursor::{Operation, Projection},
    query::Op,
    schema::link_table_name,
};

/// Longest identifier the engine accepts, in bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Whether `name` can be used as a quoted SQL identifier.
///
/// The name must be non-empty, at most [`MAX_IDENTIFIER_BYTES`] bytes of UTF-8,
/// and must not start with an ASCII digit or `$`. ASCII characters are limited
/// to letters, digits, `_` and `$`; other characters are accepted unless they
/// are whitespace or control characters.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if name.len() > MAX_IDENTIFIER_BYTES || first.is_ascii_digit() || first == '$' {
        return false;
    }
    name.chars().all(|c| {
        if c.is_ascii() {
            c.is_ascii_alphanumeric() || c == '_' || c == '$'
        } else {
            !c.is_whitespace() && !c.is_control()
        }
    })
}

/// Quotes `name`, failing with [`Error::InvalidIdentifier`] when it is not a
/// valid identifier.
pub fn escape_identifier(name: &str) -> Result<String> {
    if is_valid_identifier(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(Error::InvalidIdentifier(name.to_owned()))
    }
}

/// Quotes each dotted component of `key`; a `*` component stays bare.
pub fn escape_key(key: &str) -> Result<String> {
    let parts = key
        .split('.')
        .map(|part| {
            if part == "*" {
                Ok(part.to_owned())
            } else {
                escape_identifier(part)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("."))
}

/// `$start, $start+1, ...` for `count` placeholders.
pub fn query_params(count: usize, start: usize) -> String {
    (start..start + count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `($start, $start+1), ($start, $start+2), ...` pairing the first placeholder
/// with each of the following `count` ones.
pub fn link_query_params(count: usize, start: usize) -> String {
    (1..=count)
        .map(|i| format!("(${start}, ${})", start + i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// ` WHERE k1 op $start AND ...` and its parameters. Empty for an empty query.
pub fn build_where(query: &Query, start: usize) -> Result<(String, Vec<Param>)> {
    if query.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut clauses = Vec::with_capacity(query.conditions().len());
    let mut params = Vec::new();
    for condition in query.conditions() {
        let key = escape_key(&condition.field)?;
        if condition.op == Op::IsNull {
            clauses.push(format!("{key} IS NULL"));
        } else {
            params.push(Param::from_value(&condition.value));
            clauses.push(format!("{key} {} ${}", condition.op, start + params.len() - 1));
        }
    }
    Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
}

/// One statement deleting the rows of `category` matching `query` along with
/// their rows in every `includes` category.
///
/// The matching ids are collected once in a `ToDelete` CTE, each include
/// table is cleared by a data-modifying CTE, then the root rows are deleted.
/// Include rows are optional, so they are left-joined.
pub fn delete_statement(category: &str, includes: &[&str], query: &Query) -> Result<Statement> {
    let root = escape_identifier(category)?;
    let (where_clause, params) = build_where(query, 1)?;

    let mut sql = format!("WITH ToDelete AS (SELECT {root}.\"Id\" FROM {root}");
    let escaped = includes
        .iter()
        .map(|c| escape_identifier(c))
        .collect::<Result<Vec<_>>>()?;
    for include in &escaped {
        let _ = write!(sql, " LEFT JOIN {include} ON {root}.\"Id\" = {include}.\"Id\"");
    }
    sql.push_str(&where_clause);
    sql.push(')');
    for include in &escaped {
        let _ = write!(
            sql,
            ", {include} AS (DELETE FROM {include} WHERE \"Id\" IN (SELECT \"Id\" FROM ToDelete))"
        );
    }
    let _ = write!(
        sql,
        " DELETE FROM {root} WHERE \"Id\" IN (SELECT \"Id\" FROM ToDelete)"
    );
    Ok(Statement::new(sql, params))
}

/// Column names and values of `record` stored in the category's own table.
fn column_values<'r>(definition: &CategoryDefinition, record: &'r Record) -> Vec<(&'r str, Param)> {
    record
        .iter()
        .filter(|(key, _)| key.as_str() != ID_FIELD && definition.is_column(key))
        .map(|(key, value)| (key.as_str(), Param::from_value(value)))
        .collect()
}

fn column_list(names: &[&str]) -> Result<String> {
    Ok(names
        .iter()
        .map(|name| escape_identifier(name))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// `INSERT` of the column fields of `record`, returning the row's `Id`.
///
/// An explicit `id` is bound last; without one the engine assigns it.
pub fn insert_statement(
    category: &str,
    definition: &CategoryDefinition,
    record: &Record,
    id: Option<u64>,
) -> Result<Statement> {
    let table = escape_identifier(category)?;
    let (mut names, mut params): (Vec<&str>, Vec<Param>) =
        column_values(definition, record).into_iter().unzip();
    if let Some(id) = id {
        names.push(ID_FIELD);
        params.push(Param::id(id));
    }
    let sql = if names.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES RETURNING \"Id\"")
    } else {
        format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING \"Id\"",
            column_list(&names)?,
            query_params(names.len(), 1)
        )
    };
    Ok(Statement::new(sql, params))
}

/// `UPDATE` of the row `id` with the column fields of `record`. `None` when
/// the record carries no column to write.
pub fn update_by_id_statement(
    category: &str,
    definition: &CategoryDefinition,
    record: &Record,
    id: u64,
) -> Result<Option<Statement>> {
    let table = escape_identifier(category)?;
    let (names, values): (Vec<&str>, Vec<Param>) =
        column_values(definition, record).into_iter().unzip();
    if names.is_empty() {
        return Ok(None);
    }
    let sql = format!(
        "UPDATE {table} SET ({}) = ROW ({}) WHERE \"Id\" = $1",
        column_list(&names)?,
        query_params(names.len(), 2)
    );
    let mut params = Vec::with_capacity(values.len() + 1);
    params.push(Param::id(id));
    params.extend(values);
    Ok(Some(Statement::new(sql, params)))
}

/// `UPDATE` of every row matching `query`. The `WHERE` parameters come
/// first, the patched values follow them.
///
/// Only columns of the category's own table can be patched; an `Include` or
/// `Many` field fails with [`Error::InvalidArgument`].
pub fn update_statement(
    category: &str,
    definition: &CategoryDefinition,
    query: &Query,
    patch: &Record,
) -> Result<Statement> {
    if patch.is_empty() {
        return Err(Error::InvalidArgument("empty patch".to_owned()));
    }
    if let Some(field) = patch.keys().find(|key| !definition.is_column(key)) {
        return Err(Error::InvalidArgument(format!(
            "field {field} of {category} is a relation and cannot be patched"
        )));
    }
    let table = escape_identifier(category)?;
    let names: Vec<&str> = patch.keys().map(String::as_str).collect();
    let (where_clause, mut params) = build_where(query, 1)?;
    let sql = format!(
        "UPDATE {table} SET ({}) = ROW ({}){where_clause}",
        column_list(&names)?,
        query_params(names.len(), params.len() + 1)
    );
    params.extend(patch.values().map(Param::from_value));
    Ok(Statement::new(sql, params))
}

/// Rows of `right` linked to `$1` through the `field` relation of `left`.
pub fn details_statement(left: &str, right: &str, field: &str, id: u64) -> Result<Statement> {
    let target = escape_identifier(right)?;
    let link = escape_identifier(&link_table_name(left, right, field))?;
    let sql = format!(
        "SELECT {target}.* FROM {target} INNER JOIN {link} ON {target}.\"Id\" = {link}.{} \
         WHERE {link}.{} = $1",
        escape_identifier(field)?,
        escape_identifier(left)?
    );
    Ok(Statement::new(sql, vec![Param::id(id)]))
}

/// Inserts one link row `(from, to)` per target id.
pub fn link_statement(left: &str, right: &str, field: &str, from: u64, to: &[u64]) -> Result<Statement> {
    if to.is_empty() {
        return Err(Error::InvalidArgument("no identifiers to link".to_owned()));
    }
    let link = escape_identifier(&link_table_name(left, right, field))?;
    let sql = format!("INSERT INTO {link} VALUES {}", link_query_params(to.len(), 1));
    let params = core::iter::once(from).chain(to.iter().copied()).map(Param::id).collect();
    Ok(Statement::new(sql, params))
}

/// Deletes the link rows from `from` to any of `to`.
pub fn unlink_statement(left: &str, right: &str, field: &str, from: u64, to: &[u64]) -> Result<Statement> {
    if to.is_empty() {
        return Err(Error::InvalidArgument("no identifiers to unlink".to_owned()));
    }
    let link = escape_identifier(&link_table_name(left, right, field))?;
    let sql = format!(
        "DELETE FROM {link} WHERE {} = $1 AND {} IN ({})",
        escape_identifier(left)?,
        escape_identifier(field)?,
        query_params(to.len(), 2)
    );
    let params = core::iter::once(from).chain(to.iter().copied()).map(Param::id).collect();
    Ok(Statement::new(sql, params))
}

/// Splits `program` into one `SELECT` over `category` and the operations that
/// must still run in memory over its rows.
///
/// The longest prefix whose meaning SQL preserves is compiled:
/// - `select`/`find` join the `WHERE` clause while no limit is set;
/// - `order`/`desc` take precedence over earlier keys while no limit is set,
///   with missing values first in ascending order as in memory;
/// - `limit`/`one` keep the smallest limit;
/// - `distinct` is satisfied by the `Id` primary key;
/// - a field-list projection sets the columns and ends the prefix.
pub fn compile_select(category: &str, program: Vec<Operation>) -> Result<(Statement, Vec<Operation>)> {
    let table = escape_identifier(category)?;
    let mut query = Query::new();
    let mut order: Vec<(String, bool)> = Vec::new();
    let mut limit: Option<usize> = None;
    let mut columns: Option<Vec<String>> = None;

    let mut ops = program.into_iter();
    let mut remainder = Vec::new();
    for op in ops.by_ref() {
        match op {
            Operation::Select(q) | Operation::Find(q) if limit.is_none() => query.and(&q),
            Operation::Order(keys) if limit.is_none() => prepend_keys(&mut order, keys, false),
            Operation::Desc(keys) if limit.is_none() => prepend_keys(&mut order, keys, true),
            Operation::Limit(n) => limit = Some(limit.map_or(n, |l| l.min(n))),
            Operation::One => limit = Some(limit.map_or(1, |l| l.min(1))),
            Operation::Distinct => {}
            Operation::Projection(Projection::Fields(fields)) => {
                columns = Some(fields);
                break;
            }
            other => {
                remainder.push(other);
                break;
            }
        }
    }
    remainder.extend(ops);

    let columns = match columns {
        None => "*".to_owned(),
        Some(fields) if fields.is_empty() => "*".to_owned(),
        Some(fields) => fields
            .iter()
            .map(|f| escape_key(f))
            .collect::<Result<Vec<_>>>()?
            .join(", "),
    };
    let (where_clause, params) = build_where(&query, 1)?;
    let mut sql = format!("SELECT {columns} FROM {table}{where_clause}");
    if !order.is_empty() {
        let keys = order
            .iter()
            .map(|(key, desc)| {
                let direction = if *desc { "DESC NULLS LAST" } else { "ASC NULLS FIRST" };
                Ok(format!("{} {direction}", escape_key(key)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let _ = write!(sql, " ORDER BY {}", keys.join(", "));
    }
    if let Some(n) = limit {
        let _ = write!(sql, " LIMIT {n}");
    }
    Ok((Statement::new(sql, params), remainder))
}

/// A later stable sort dominates, so its keys go first and shadow earlier ones.
fn prepend_keys(order: &mut Vec<(String, bool)>, keys: Vec<String>, desc: bool) {
    order.retain(|(key, _)| !keys.contains(key));
    let mut merged: Vec<(String, bool)> = keys.into_iter().map(|k| (k, desc)).collect();
    merged.append(order);
    *order = merged;
}
