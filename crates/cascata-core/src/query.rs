//! The PostgREST-compatible query translator (§4.4).
//!
//! Parses the declarative URL/body filter dialect into a single parameterised SQL statement.
//! Every user-controlled value flows through a `$N` placeholder; every user-controlled
//! identifier (table, column, alias) is hard-sanitised and then quoted by doubling inner quotes:
//! an explicit allow-path that rejects (or strips) everything outside it, never trusting string
//! concatenation to be safe by omission.

use serde_json::Value;
use std::fmt::Write as _;

use crate::{Error, Result};

pub const RESERVED_PARAMS: &[&str] = &["select", "order", "limit", "offset", "on_conflict", "columns"];

/// Quotes a SQL identifier by wrapping it in double quotes and doubling any inner quote, per
/// §4.4 "Safety". This is the only place raw identifier text is allowed anywhere near a SQL
/// string.
pub fn quote_ident(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for ch in raw.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Hard-sanitises a column name used in `order`: allowed characters are letters, digits,
/// underscore, space, dash, and `>` (JSON traversal), everything else stripped silently rather
/// than rejected outright (see DESIGN.md for the reasoning).
pub fn sanitize_order_column(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ' ' || *c == '-' || *c == '>')
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    Default,
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub direction: SortDirection,
    pub nulls: NullsOrder,
}

/// Parses the `order` grammar: comma-separated `col[.{asc|desc}][.{nullsfirst|nullslast}]`.
pub fn parse_order(raw: &str) -> Vec<OrderTerm> {
    raw.split(',')
        .filter(|term| !term.trim().is_empty())
        .map(|term| {
            let mut parts = term.split('.');
            let column = sanitize_order_column(parts.next().unwrap_or_default().trim());
            let mut direction = SortDirection::Asc;
            let mut nulls = NullsOrder::Default;
            for part in parts {
                match part {
                    "asc" => direction = SortDirection::Asc,
                    "desc" => direction = SortDirection::Desc,
                    "nullsfirst" => nulls = NullsOrder::First,
                    "nullslast" => nulls = NullsOrder::Last,
                    _ => {}
                }
            }
            OrderTerm {
                column,
                direction,
                nulls,
            }
        })
        .collect()
}

pub fn render_order_clause(terms: &[OrderTerm]) -> String {
    if terms.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = terms
        .iter()
        .map(|term| {
            let dir = match term.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            let nulls = match term.nulls {
                NullsOrder::Default => "",
                NullsOrder::First => " NULLS FIRST",
                NullsOrder::Last => " NULLS LAST",
            };
            format!("{} {dir}{nulls}", quote_ident(&term.column))
        })
        .collect();
    format!(" ORDER BY {}", rendered.join(", "))
}

/// Parses the `select` grammar: `*`, a comma-separated column list, `col:alias`, and passthrough
/// expressions containing `(`, `->`, or `.` (accepts JSON traversal and function calls).
pub fn render_select_clause(raw: Option<&str>) -> String {
    let raw = match raw {
        None | Some("*") => return "*".to_string(),
        Some(raw) => raw,
    };
    let parts: Vec<String> = raw
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|part| {
            let part = part.trim();
            if part.contains('(') || part.contains("->") || part.contains('.') {
                return part.to_string();
            }
            if let Some((col, alias)) = part.split_once(':') {
                format!("{} AS {}", quote_ident(col), quote_ident(alias))
            } else {
                quote_ident(part)
            }
        })
        .collect();
    if parts.is_empty() {
        "*".to_string()
    } else {
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    Is,
    In,
    Cs,
    Cd,
    /// Unknown operator: falls back to literal equality on the raw value, per §4.4.
    Unknown,
}

impl FilterOp {
    fn parse(raw: &str) -> Self {
        match raw {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "like" => Self::Like,
            "ilike" => Self::ILike,
            "is" => Self::Is,
            "in" => Self::In,
            "cs" => Self::Cs,
            "cd" => Self::Cd,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub raw_value: String,
}

/// Splits a raw query value of the shape `op.value` into its operator and value. A value with
/// no recognised `op.` prefix is treated as `Unknown`, falling back to literal equality on the
/// whole raw value (§4.4).
fn parse_filter_value(raw: &str) -> (FilterOp, String) {
    if let Some((op, rest)) = raw.split_once('.') {
        let parsed = FilterOp::parse(op);
        if !matches!(parsed, FilterOp::Unknown) {
            return (parsed, rest.to_string());
        }
    }
    (FilterOp::Unknown, raw.to_string())
}

/// Builds `(sql_fragment, bound_params)` for a single filter, starting parameter numbering at
/// `next_param`. Returns the fragment and how many placeholders it consumed.
fn render_filter(filter: &Filter, next_param: usize, params: &mut Vec<Value>) -> Result<String> {
    let ident = quote_ident(&filter.column);
    Ok(match filter.op {
        FilterOp::Eq | FilterOp::Unknown => {
            params.push(Value::String(filter.raw_value.clone()));
            format!("{ident} = ${next_param}")
        }
        FilterOp::Neq => {
            params.push(Value::String(filter.raw_value.clone()));
            format!("{ident} != ${next_param}")
        }
        FilterOp::Gt => {
            params.push(Value::String(filter.raw_value.clone()));
            format!("{ident} > ${next_param}")
        }
        FilterOp::Gte => {
            params.push(Value::String(filter.raw_value.clone()));
            format!("{ident} >= ${next_param}")
        }
        FilterOp::Lt => {
            params.push(Value::String(filter.raw_value.clone()));
            format!("{ident} < ${next_param}")
        }
        FilterOp::Lte => {
            params.push(Value::String(filter.raw_value.clone()));
            format!("{ident} <= ${next_param}")
        }
        FilterOp::Like => {
            params.push(Value::String(filter.raw_value.replace('*', "%")));
            format!("{ident} LIKE ${next_param}")
        }
        FilterOp::ILike => {
            params.push(Value::String(filter.raw_value.replace('*', "%")));
            format!("{ident} ILIKE ${next_param}")
        }
        FilterOp::Is => match filter.raw_value.as_str() {
            "null" => format!("{ident} IS NULL"),
            "true" => format!("{ident} IS TRUE"),
            "false" => format!("{ident} IS FALSE"),
            other => return Err(Error::msg(format!("unsupported `is` value: {other}"))),
        },
        FilterOp::In => {
            let inner = filter
                .raw_value
                .trim_start_matches('(')
                .trim_end_matches(')');
            let values: Vec<&str> = inner.split(',').filter(|v| !v.is_empty()).collect();
            if values.is_empty() {
                // Empty list becomes `1=0`: no SQL error, zero rows (§8 boundary behaviour).
                return Ok("1=0".to_string());
            }
            let mut placeholders = Vec::with_capacity(values.len());
            let mut n = next_param;
            for value in values {
                params.push(Value::String(value.to_string()));
                placeholders.push(format!("${n}"));
                n += 1;
            }
            format!("{ident} IN ({})", placeholders.join(", "))
        }
        FilterOp::Cs => {
            params.push(Value::String(filter.raw_value.clone()));
            format!("{ident} @> ${next_param}")
        }
        FilterOp::Cd => {
            params.push(Value::String(filter.raw_value.clone()));
            format!("{ident} <@ ${next_param}")
        }
    })
}

/// Parses the reserved-parameter-free remainder of a query string into filters (in insertion
/// order, preserving caller ordering for deterministic SQL).
pub fn parse_filters(params: &[(String, String)]) -> Vec<Filter> {
    params
        .iter()
        .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
        .map(|(key, value)| {
            let (op, raw_value) = parse_filter_value(value);
            Filter {
                column: key.clone(),
                op,
                raw_value,
            }
        })
        .collect()
}

fn render_where_clause(filters: &[Filter], params: &mut Vec<Value>) -> Result<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let mut clauses = Vec::with_capacity(filters.len());
    for filter in filters {
        let next_param = params.len() + 1;
        clauses.push(render_filter(filter, next_param, params)?);
    }
    Ok(format!(" WHERE {}", clauses.join(" AND ")))
}

/// `start-end` maps to `OFFSET start LIMIT end-start+1` (§4.4 "Pagination").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    pub offset: i64,
    pub limit: i64,
}

pub fn parse_range_header(raw: &str) -> Result<RangeWindow> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| Error::msg("malformed Range header"))?;
    let start: i64 = start
        .trim()
        .parse()
        .map_err(|_| Error::msg("malformed Range start"))?;
    let end: i64 = end
        .trim()
        .parse()
        .map_err(|_| Error::msg("malformed Range end"))?;
    if end < start {
        return Err(Error::msg("Range end precedes start"));
    }
    Ok(RangeWindow {
        offset: start,
        limit: end - start + 1,
    })
}

/// A fully built statement: SQL text with `$N` placeholders and the parameter values in order.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

pub struct SelectOptions<'a> {
    pub select: Option<&'a str>,
    pub order: Option<&'a str>,
    pub range: Option<RangeWindow>,
    pub explicit_limit: Option<i64>,
    pub explicit_offset: Option<i64>,
}

/// Builds a `SELECT` statement. Table name arrives pre-validated by the caller (it is resolved
/// against `information_schema`, not taken verbatim from the URL) but is still quoted here as
/// defence in depth.
pub fn translate_select(
    table: &str,
    filters: &[Filter],
    options: &SelectOptions<'_>,
) -> Result<Statement> {
    let mut params = Vec::new();
    let select_clause = render_select_clause(options.select);
    let where_clause = render_where_clause(filters, &mut params)?;
    let order_clause = options
        .order
        .map(|raw| render_order_clause(&parse_order(raw)))
        .unwrap_or_default();

    let mut sql = format!(
        "SELECT {select_clause} FROM {}{where_clause}{order_clause}",
        quote_ident(table)
    );

    let limit = options.explicit_limit.or(options.range.map(|r| r.limit));
    let offset = options.explicit_offset.or(options.range.map(|r| r.offset));
    if let Some(limit) = limit {
        let _ = write!(sql, " LIMIT {limit}");
    }
    if let Some(offset) = offset {
        let _ = write!(sql, " OFFSET {offset}");
    }

    Ok(Statement { sql, params })
}

/// The matching `SELECT COUNT(*)` query for `Prefer: count=exact` (§4.4), sharing the same
/// filters but none of the pagination/order clauses.
pub fn translate_count(table: &str, filters: &[Filter]) -> Result<Statement> {
    let mut params = Vec::new();
    let where_clause = render_where_clause(filters, &mut params)?;
    Ok(Statement {
        sql: format!("SELECT COUNT(*) FROM {}{where_clause}", quote_ident(table)),
        params,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// `ON CONFLICT (...) DO UPDATE SET ...`
    MergeDuplicates,
    /// `ON CONFLICT DO NOTHING`
    IgnoreDuplicates,
    None,
}

/// Builds an `INSERT` statement for one or more JSON row objects. All rows must share the same
/// key set; the caller is expected to have validated that upstream (a mismatched row set is a
/// `Validation` error, not something the translator silently papers over).
pub fn translate_insert(
    table: &str,
    rows: &[serde_json::Map<String, Value>],
    on_conflict_column: Option<&str>,
    resolution: ConflictResolution,
    return_minimal: bool,
) -> Result<Statement> {
    let first = rows
        .first()
        .ok_or_else(|| Error::msg("insert requires at least one row"))?;
    let columns: Vec<String> = first.keys().cloned().collect();
    if columns.is_empty() {
        return Err(Error::msg("insert row has no columns"));
    }

    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut row_groups = Vec::with_capacity(rows.len());
    for row in rows {
        let mut placeholders = Vec::with_capacity(columns.len());
        for column in &columns {
            let value = row
                .get(column)
                .ok_or_else(|| Error::msg(format!("row missing column `{column}`")))?;
            params.push(value.clone());
            placeholders.push(format!("${}", params.len()));
        }
        row_groups.push(format!("({})", placeholders.join(", ")));
    }

    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        quoted_columns.join(", "),
        row_groups.join(", ")
    );

    match resolution {
        ConflictResolution::MergeDuplicates => {
            let conflict_col = on_conflict_column.unwrap_or("id");
            let updates: Vec<String> = columns
                .iter()
                .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
                .collect();
            let _ = write!(
                sql,
                " ON CONFLICT ({}) DO UPDATE SET {}",
                quote_ident(conflict_col),
                updates.join(", ")
            );
        }
        ConflictResolution::IgnoreDuplicates => {
            sql.push_str(" ON CONFLICT DO NOTHING");
        }
        ConflictResolution::None => {}
    }

    if !return_minimal {
        sql.push_str(" RETURNING *");
    }

    Ok(Statement { sql, params })
}

/// Builds an `UPDATE` statement. Filterless mutations are rejected (§4.4 "UPDATE and DELETE").
pub fn translate_update(
    table: &str,
    patch: &serde_json::Map<String, Value>,
    filters: &[Filter],
    return_minimal: bool,
) -> Result<Statement> {
    if filters.is_empty() {
        return Err(Error::msg("UPDATE requires at least one filter"));
    }
    if patch.is_empty() {
        return Err(Error::msg("UPDATE requires at least one column in the body"));
    }

    let mut params = Vec::new();
    let mut assignments = Vec::with_capacity(patch.len());
    for (column, value) in patch {
        params.push(value.clone());
        assignments.push(format!("{} = ${}", quote_ident(column), params.len()));
    }

    let where_clause = render_where_clause(filters, &mut params)?;
    let mut sql = format!(
        "UPDATE {} SET {}{where_clause}",
        quote_ident(table),
        assignments.join(", ")
    );
    if !return_minimal {
        sql.push_str(" RETURNING *");
    }
    Ok(Statement { sql, params })
}

/// Builds a `DELETE` statement. Filterless mutations are rejected (§4.4 "UPDATE and DELETE").
pub fn translate_delete(table: &str, filters: &[Filter], return_minimal: bool) -> Result<Statement> {
    if filters.is_empty() {
        return Err(Error::msg("DELETE requires at least one filter"));
    }
    let mut params = Vec::new();
    let where_clause = render_where_clause(filters, &mut params)?;
    let mut sql = format!("DELETE FROM {}{where_clause}", quote_ident(table));
    if !return_minimal {
        sql.push_str(" RETURNING *");
    }
    Ok(Statement { sql, params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(pairs: &[(&str, &str)]) -> Vec<Filter> {
        let owned: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        parse_filters(&owned)
    }

    #[test]
    fn select_star_with_no_filters() {
        let stmt = translate_select(
            "customers",
            &[],
            &SelectOptions {
                select: None,
                order: None,
                range: None,
                explicit_limit: None,
                explicit_offset: None,
            },
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"customers\"");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn eq_filter_uses_a_placeholder_not_the_raw_value() {
        let f = filters(&[("name", "eq.A")]);
        let stmt = translate_select(
            "customers",
            &f,
            &SelectOptions {
                select: None,
                order: Some("name.asc"),
                range: None,
                explicit_limit: None,
                explicit_offset: None,
            },
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"customers\" WHERE \"name\" = $1 ORDER BY \"name\" ASC"
        );
        assert_eq!(stmt.params, vec![json!("A")]);
    }

    #[test]
    fn in_filter_with_empty_list_becomes_always_false() {
        let f = filters(&[("id", "in.()")]);
        let stmt = translate_select(
            "customers",
            &f,
            &SelectOptions {
                select: None,
                order: None,
                range: None,
                explicit_limit: None,
                explicit_offset: None,
            },
        )
        .unwrap();
        assert!(stmt.sql.contains("1=0"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn in_filter_binds_every_value_as_a_placeholder() {
        let f = filters(&[("id", "in.(1,2,3)")]);
        let stmt = translate_select(
            "customers",
            &f,
            &SelectOptions {
                select: None,
                order: None,
                range: None,
                explicit_limit: None,
                explicit_offset: None,
            },
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"customers\" WHERE \"id\" IN ($1, $2, $3)");
        assert_eq!(stmt.params, vec![json!("1"), json!("2"), json!("3")]);
    }

    #[test]
    fn order_column_strips_dangerous_characters() {
        let terms = parse_order("name;--.desc");
        assert_eq!(terms[0].column, "name--");
        assert_eq!(terms[0].direction, SortDirection::Desc);
    }

    #[test]
    fn update_without_filters_is_rejected() {
        let mut patch = serde_json::Map::new();
        patch.insert("name".into(), json!("AA"));
        let err = translate_update("customers", &patch, &[], false).unwrap_err();
        assert!(err.to_string().contains("at least one filter"));
    }

    #[test]
    fn delete_without_filters_is_rejected() {
        assert!(translate_delete("customers", &[], false).is_err());
    }

    #[test]
    fn insert_merge_duplicates_builds_on_conflict_update() {
        let mut row = serde_json::Map::new();
        row.insert("id".into(), json!(1));
        row.insert("name".into(), json!("A"));
        let stmt = translate_insert(
            "customers",
            &[row],
            None,
            ConflictResolution::MergeDuplicates,
            false,
        )
        .unwrap();
        assert!(stmt.sql.contains("ON CONFLICT (\"id\") DO UPDATE SET"));
        assert!(stmt.sql.contains("RETURNING *"));
    }

    #[test]
    fn insert_return_minimal_omits_returning() {
        let mut row = serde_json::Map::new();
        row.insert("name".into(), json!("A"));
        let stmt =
            translate_insert("customers", &[row], None, ConflictResolution::None, true).unwrap();
        assert!(!stmt.sql.contains("RETURNING"));
    }

    #[test]
    fn range_header_maps_to_offset_and_limit() {
        let window = parse_range_header("0-0").unwrap();
        assert_eq!(window, RangeWindow { offset: 0, limit: 1 });
    }

    #[test]
    fn range_header_rejects_end_before_start() {
        assert!(parse_range_header("100-50").is_err());
    }

    #[test]
    fn select_alias_and_passthrough_expressions() {
        assert_eq!(render_select_clause(Some("id:row_id")), "\"id\" AS \"row_id\"");
        assert_eq!(render_select_clause(Some("count(*)")), "count(*)");
        assert_eq!(render_select_clause(Some("data->field")), "data->field");
    }

    #[test]
    fn identifier_quoting_doubles_inner_quotes() {
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }
}
