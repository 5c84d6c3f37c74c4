use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use coldef::{
    db::{
        memory::{ColumnSeed, MemoryCatalog},
        types::ColumnType,
    },
    models::schema::Table,
    router, AppState, ColumnService, Pagination,
};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn setup() -> (Router, MemoryCatalog, Table) {
    let catalog = MemoryCatalog::new();
    let table = catalog
        .create_table(
            "public",
            "patents",
            vec![
                ColumnSeed::new("id", ColumnType::Integer).primary_key(),
                ColumnSeed::new("title", ColumnType::Text).not_null(),
                ColumnSeed::new("filed", ColumnType::TimestampTz).default_expr("CURRENT_TIMESTAMP"),
                ColumnSeed::new("claims", ColumnType::Integer).default_expr("'1'::integer"),
            ],
        )
        .await;
    let state = AppState::new(
        ColumnService::new(Arc::new(catalog.clone())),
        Pagination::default(),
    );
    (router(state), catalog, table)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn columns_uri(table: &Table) -> String {
    format!("/api/v0/tables/{}/columns/", table.id)
}

fn column_uri(table: &Table, id: i64) -> String {
    format!("/api/v0/tables/{}/columns/{}/", table.id, id)
}

fn attnums(body: &Value) -> Vec<i64> {
    body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["attnum"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let (app, _, _) = setup().await;
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_list_columns() {
    let (app, _, table) = setup().await;
    let (status, body) = send(&app, Method::GET, &columns_uri(&table), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 4);
    assert_eq!(attnums(&body), vec![1, 2, 3, 4]);

    let first = &body["results"][0];
    assert_eq!(first["table"], table.id);
    assert_eq!(first["index"], 0);
    assert_eq!(first["name"], "id");
    assert_eq!(first["type"], "integer");
    assert_eq!(first["primary_key"], true);
    assert_eq!(first["nullable"], false);

    let filed = &body["results"][2];
    assert_eq!(filed["default"]["is_dynamic"], true);
}

#[tokio::test]
async fn test_list_pagination() {
    let (app, _, table) = setup().await;
    let uri = format!("{}?limit=2&offset=1", columns_uri(&table));
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 4);
    assert_eq!(attnums(&body), vec![2, 3]);

    let uri = format!("{}?limit=many", columns_uri(&table));
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "ValidationError");
}

#[tokio::test]
async fn test_list_skips_columns_dropped_elsewhere() {
    let (app, catalog, table) = setup().await;
    catalog.drop_physical_column(table.id, "title").await.unwrap();
    let (status, body) = send(&app, Method::GET, &columns_uri(&table), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    assert_eq!(attnums(&body), vec![1, 3, 4]);
}

#[tokio::test]
async fn test_unknown_table() {
    let (app, _, _) = setup().await;
    let (status, body) = send(&app, Method::GET, "/api/v0/tables/42/columns/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body[0]["code"], "NotFoundError");
}

#[tokio::test]
async fn test_create_then_repeat_is_duplicate() {
    let (app, _, table) = setup().await;
    let payload = json!({"name": "age", "type": "integer"});

    let (status, body) = send(&app, Method::POST, &columns_uri(&table), Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "age");
    assert_eq!(body["attnum"], 5);
    assert_eq!(body["type"], "integer");
    assert_eq!(body["display_options"], Value::Null);

    let (status, body) = send(&app, Method::POST, &columns_uri(&table), Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "DuplicateTableError");
    assert_eq!(body[0]["field"], "name");
    assert!(body[0]["message"].as_str().unwrap().contains("age"));
}

#[tokio::test]
async fn test_create_with_type_options_and_display_options() {
    let (app, _, table) = setup().await;
    let payload = json!({
        "name": "price",
        "type": "numeric",
        "type_options": {"precision": 10, "scale": 2},
        "default": 5,
        "display_options": {"currency": "EUR"},
    });
    let (status, body) = send(&app, Method::POST, &columns_uri(&table), Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["type_options"], json!({"precision": 10, "scale": 2}));
    assert_eq!(body["default"]["value"], "5");
    assert_eq!(body["default"]["is_dynamic"], false);
    assert_eq!(body["display_options"], json!({"currency": "EUR"}));
}

#[tokio::test]
async fn test_create_errors() {
    let (app, _, table) = setup().await;
    let uri = columns_uri(&table);

    let (status, body) = send(&app, Method::POST, &uri, Some(json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "ValidationError");
    assert_eq!(body[0]["field"], "type");

    let payload = json!({"name": "born", "type": "date", "default": "yesterday-ish"});
    let (status, body) = send(&app, Method::POST, &uri, Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "InvalidDefaultError");
    let message = body[0]["message"].as_str().unwrap();
    assert!(message.contains("yesterday-ish"));
    assert!(message.contains("date"));

    let payload = json!({"type": "integer", "type_options": {"length": 3}});
    let (status, body) = send(&app, Method::POST, &uri, Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "TypeMismatchError");

    let payload = json!({"type": "varchar", "type_options": {"length": -1}});
    let (status, body) = send(&app, Method::POST, &uri, Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "InvalidTypeOptionError");
    assert_eq!(body[0]["field"], "type_options");

    let payload = json!({"type": "hyperloglog"});
    let (status, body) = send(&app, Method::POST, &uri, Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "InvalidTypeCastError");
}

#[tokio::test]
async fn test_create_rejects_malformed_json() {
    let (app, _, table) = setup().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri(columns_uri(&table))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"name\": "))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_column() {
    let (app, _, table) = setup().await;
    let uri = columns_uri(&table);

    let payload = json!({"source_column": 1, "name": "headline"});
    let (status, body) = send(&app, Method::POST, &uri, Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "headline");
    assert_eq!(body["type"], "text");
    assert_eq!(body["nullable"], false);

    let payload = json!({"source_column": 3, "copy_source_data": false});
    let (status, body) = send(&app, Method::POST, &uri, Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "claims 1");
    assert_eq!(body["default"], Value::Null);
    assert_eq!(body["nullable"], true);
}

#[tokio::test]
async fn test_duplicate_out_of_range_index() {
    let (app, _, table) = setup().await;
    let payload = json!({"source_column": 40});
    let (status, body) = send(&app, Method::POST, &columns_uri(&table), Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "NotFoundError");
    assert_eq!(body[0]["field"], "source_column");
    assert_eq!(body[0]["detail"], json!({"source_column": 40}));
}

#[tokio::test]
async fn test_retrieve_column() {
    let (app, _, table) = setup().await;
    let (status, body) = send(&app, Method::GET, &column_uri(&table, 2), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 2);
    assert_eq!(body["name"], "title");

    let (status, _) = send(&app, Method::GET, &column_uri(&table, 99), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_column() {
    let (app, _, table) = setup().await;
    let payload = json!({"name": "claim_count", "type": "bigint", "nullable": false});
    let (status, body) = send(&app, Method::PATCH, &column_uri(&table, 4), Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "claim_count");
    assert_eq!(body["type"], "bigint");
    assert_eq!(body["nullable"], false);
    assert_eq!(body["attnum"], 4);
    assert_eq!(body["default"]["value"], "1");

    let payload = json!({"default": null});
    let (status, body) = send(&app, Method::PATCH, &column_uri(&table, 4), Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default"], Value::Null);
}

#[tokio::test]
async fn test_update_dynamic_default_type_change() {
    let (app, _, table) = setup().await;
    let uri = column_uri(&table, 3);
    let (status, body) = send(&app, Method::PATCH, &uri, Some(json!({"type": "integer"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "DynamicDefaultError");

    let (_, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(body["type"], "timestamp with time zone");
    assert_eq!(body["default"]["is_dynamic"], true);
}

#[tokio::test]
async fn test_update_precision_keeps_dynamic_default() {
    let (app, _, table) = setup().await;
    let uri = column_uri(&table, 3);
    let payload = json!({"type_options": {"precision": 3}});
    let (status, body) = send(&app, Method::PATCH, &uri, Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type_options"]["precision"], 3);
    assert_eq!(body["default"]["is_dynamic"], true);
    assert_eq!(body["default"]["value"], "CURRENT_TIMESTAMP");
}

#[tokio::test]
async fn test_update_errors() {
    let (app, _, table) = setup().await;

    let payload = json!({"default": "many"});
    let (status, body) = send(&app, Method::PATCH, &column_uri(&table, 4), Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "InvalidDefaultError");
    let message = body[0]["message"].as_str().unwrap();
    assert!(message.contains("many"));
    assert!(message.contains("integer"));

    let payload = json!({"type": "uuid"});
    let (status, body) = send(&app, Method::PATCH, &column_uri(&table, 4), Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "UndefinedFunctionError");

    let payload = json!({"name": "title"});
    let (status, body) = send(&app, Method::PATCH, &column_uri(&table, 4), Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "ProgrammingError");

    let payload = json!({"type_options": {"scale": 2}});
    let (status, body) = send(&app, Method::PATCH, &column_uri(&table, 4), Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["code"], "InvalidTypeOptionError");
}

#[tokio::test]
async fn test_delete_column() {
    let (app, _, table) = setup().await;
    let (status, body) = send(&app, Method::DELETE, &column_uri(&table, 2), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (_, body) = send(&app, Method::GET, &columns_uri(&table), None).await;
    assert_eq!(attnums(&body), vec![1, 3, 4]);

    let payload = json!({"name": "again"});
    let (status, body) = send(&app, Method::PATCH, &column_uri(&table, 2), Some(payload)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body[0]["code"], "NotFoundError");

    let (status, _) = send(&app, Method::DELETE, &column_uri(&table, 2), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
