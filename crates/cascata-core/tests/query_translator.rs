//! Exercises the PostgREST-dialect translator end to end through its public API: parsing a
//! request's filters/order/pagination and turning them into a single parameterised statement,
//! the way a data-plane handler would, without touching any database.

use cascata_core::query::{
    parse_filters, parse_order, parse_range_header, render_order_clause, translate_count,
    translate_delete, translate_insert, translate_select, translate_update, ConflictResolution,
    SelectOptions,
};
use serde_json::{json, Map, Value};

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn select_with_filters_order_and_range_is_fully_parameterised() {
    let filters = parse_filters(&[
        ("status".to_string(), "eq.active".to_string()),
        ("age".to_string(), "gte.21".to_string()),
    ]);
    let range = parse_range_header("0-9").unwrap();
    let order_terms = parse_order("name.desc,created_at");
    assert_eq!(render_order_clause(&order_terms), " ORDER BY \"name\" DESC, \"created_at\" ASC");

    let options = SelectOptions {
        select: Some("id,name:display_name"),
        order: Some("name.desc,created_at"),
        range: Some(range),
        explicit_limit: None,
        explicit_offset: None,
    };
    let statement = translate_select("customers", &filters, &options).unwrap();

    assert!(statement.sql.starts_with("SELECT \"id\", \"name\" AS \"display_name\" FROM \"customers\""));
    assert!(statement.sql.contains("\"status\" = $1"));
    assert!(statement.sql.contains("\"age\" >= $2"));
    assert!(statement.sql.contains("LIMIT 10 OFFSET 0"));
    assert_eq!(statement.params, vec![json!("active"), json!("21")]);
}

#[test]
fn in_filter_with_empty_list_short_circuits_to_no_rows() {
    let filters = parse_filters(&[("id".to_string(), "in.()".to_string())]);
    let statement = translate_count("customers", &filters).unwrap();
    assert!(statement.sql.contains("1=0"));
    assert!(statement.params.is_empty());
}

#[test]
fn insert_merge_duplicates_builds_on_conflict_update() {
    let rows = vec![obj(json!({"id": 1, "name": "A"})), obj(json!({"id": 2, "name": "B"}))];
    let statement = translate_insert(
        "customers",
        &rows,
        Some("id"),
        ConflictResolution::MergeDuplicates,
        false,
    )
    .unwrap();

    assert!(statement.sql.contains("ON CONFLICT (\"id\") DO UPDATE SET"));
    assert!(statement.sql.contains("RETURNING *"));
    assert_eq!(statement.params.len(), 4);
}

#[test]
fn update_and_delete_reject_filterless_mutation() {
    let patch = obj(json!({"name": "AA"}));
    assert!(translate_update("customers", &patch, &[], false).is_err());
    assert!(translate_delete("customers", &[], false).is_err());
}

#[test]
fn update_with_filter_produces_single_statement_with_where_after_set() {
    let patch = obj(json!({"name": "AA"}));
    let filters = parse_filters(&[("name".to_string(), "eq.A".to_string())]);
    let statement = translate_update("customers", &patch, &filters, true).unwrap();
    assert!(statement.sql.contains("SET \"name\" = $1"));
    assert!(statement.sql.contains("WHERE \"name\" = $2"));
    assert!(!statement.sql.contains("RETURNING"));
}

#[test]
fn bad_range_header_is_rejected() {
    assert!(parse_range_header("100-50").is_err());
}
