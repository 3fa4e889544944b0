//! Definition stores against real collaborators: a fake blob service over HTTP
//! and an on-disk SQLite database feeding server startup.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use restwright::{
    automation::HttpMethod,
    config::{AuthConfig, Config, DatabaseConfig, DefinitionsConfig, RuntimeConfig, ServerConfig},
    definitions::{self, BlobDefinitionStore, DefinitionStore},
    server::build_state,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const TOKEN: &str = "blob-token";
const PAGE_SIZE: usize = 2;

type Blobs = Arc<Mutex<BTreeMap<String, Value>>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn list_blobs(
    State(blobs): State<Blobs>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let start: usize = query.get("cursor").and_then(|c| c.parse().ok()).unwrap_or(0);

    let matching: Vec<String> = blobs
        .lock()
        .unwrap()
        .keys()
        .filter(|k| k.starts_with(&prefix))
        .cloned()
        .collect();
    let page: Vec<Value> = matching
        .iter()
        .skip(start)
        .take(PAGE_SIZE)
        .map(|pathname| json!({ "pathname": pathname }))
        .collect();
    let next = start + PAGE_SIZE;
    let has_more = next < matching.len();

    Json(json!({
        "blobs": page,
        "cursor": has_more.then(|| next.to_string()),
        "hasMore": has_more,
    }))
    .into_response()
}

async fn get_blob(State(blobs): State<Blobs>, headers: HeaderMap, Path(file): Path<String>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match blobs.lock().unwrap().get(&format!("automations/{file}")) {
        Some(document) => Json(document.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_blob(
    State(blobs): State<Blobs>,
    headers: HeaderMap,
    Path(file): Path<String>,
    body: Bytes,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Ok(document) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    blobs.lock().unwrap().insert(format!("automations/{file}"), document);
    StatusCode::OK.into_response()
}

async fn delete_blob(State(blobs): State<Blobs>, headers: HeaderMap, Path(file): Path<String>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match blobs.lock().unwrap().remove(&format!("automations/{file}")) {
        Some(_) => StatusCode::OK.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serve a fake blob service on an ephemeral port, returning its base URL
async fn spawn_blob_service(blobs: Blobs) -> String {
    let app = Router::new()
        .route("/", get(list_blobs))
        .route("/automations/{file}", get(get_blob).put(put_blob).delete(delete_blob))
        .with_state(blobs);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn notes(id: &str) -> Value {
    json!({
        "id": id,
        "name": id,
        "base_path": format!("/{id}"),
        "status": "active",
        "endpoints": [{"path": "/", "method": "GET"}],
        "db_config": {"type": "memory", "collection_name": id}
    })
}

#[tokio::test]
async fn blob_store_round_trips_and_pages() {
    let blobs = Blobs::default();
    blobs
        .lock()
        .unwrap()
        .insert("unrelated/readme.json".to_string(), json!({}));
    let base = spawn_blob_service(blobs.clone()).await;
    let store = BlobDefinitionStore::new(&base, TOKEN).unwrap();

    assert!(store.list().await.unwrap().is_empty());
    assert!(store.get("a").await.unwrap().is_none());

    for id in ["c", "a", "b", "d", "e"] {
        store.put(id, &notes(id)).await.unwrap();
    }
    assert_eq!(store.list().await.unwrap(), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(store.get("b").await.unwrap(), Some(notes("b")));

    assert!(store.delete("b").await.unwrap());
    assert!(!store.delete("b").await.unwrap());
    assert_eq!(store.list().await.unwrap().len(), 4);
    assert!(blobs.lock().unwrap().contains_key("automations/a.json"));
}

#[tokio::test]
async fn blob_store_surfaces_auth_failures() {
    let base = spawn_blob_service(Blobs::default()).await;
    let store = BlobDefinitionStore::new(&base, "wrong-token").unwrap();
    assert!(store.list().await.is_err());
    assert!(store.put("a", &notes("a")).await.is_err());
}

fn config(dir: &tempfile::TempDir, definitions: DefinitionsConfig) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: None,
            name: "council_db".to_string(),
            data_dir: dir.path().join("data").to_string_lossy().into_owned(),
        },
        definitions,
        auth: AuthConfig {
            enabled: false,
            jwt_secret: None,
            jwt_algorithm: "HS256".to_string(),
        },
        runtime: RuntimeConfig {
            backend_timeout_ms: 2000,
            log_level: "warn".to_string(),
        },
    }
}

#[tokio::test]
async fn startup_loads_from_the_blob_store() {
    let blobs = Blobs::default();
    let base = spawn_blob_service(blobs.clone()).await;
    let seed = BlobDefinitionStore::new(&base, TOKEN).unwrap();
    seed.put("notes", &notes("notes")).await.unwrap();
    seed.put("broken", &json!({"id": "broken"})).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir,
        DefinitionsConfig {
            directory: dir.path().join("unused").to_string_lossy().into_owned(),
            blob_url: Some(base),
            blob_token: Some(TOKEN.to_string()),
            database_url: None,
        },
    );

    let state = build_state(&config).await.unwrap();
    assert_eq!(state.registry.ids(), vec!["notes"]);
    assert!(state.registry.resolve(HttpMethod::Get, "/notes").is_some());
}

#[tokio::test]
async fn sqlite_store_survives_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("definitions.db").display());
    let definitions_config = DefinitionsConfig {
        directory: dir.path().join("unused").to_string_lossy().into_owned(),
        blob_url: None,
        blob_token: None,
        database_url: Some(url),
    };
    let config = config(&dir, definitions_config);

    {
        let state = build_state(&config).await.unwrap();
        assert!(state.registry.is_empty());
        state.service.create(notes("notes")).await.unwrap();
        state.databases.close_all().await;
    }

    let state = build_state(&config).await.unwrap();
    assert_eq!(state.registry.ids(), vec!["notes"]);

    let databases = restwright::backend::DatabaseManager::new(dir.path().to_string_lossy().into_owned());
    let store = definitions::open(&config.definitions, &databases).await.unwrap();
    assert_eq!(store.list().await.unwrap(), vec!["notes"]);
}
