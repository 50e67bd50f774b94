//! HTTP transport against a fake remote served by axum.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use todu_fit_store::db::WriteOptions;
use todu_fit_store::models::{Meal, MealType};
use todu_fit_store::sync::{PushOutcome, SyncError, TransportError};
use todu_fit_store::{Config, FitStore};

#[derive(Clone, Default)]
struct FakeRemote {
    authorization: Arc<Mutex<Vec<Option<String>>>>,
    pushed: Arc<Mutex<Vec<Value>>>,
    reject: bool,
}

impl FakeRemote {
    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.authorization.lock().unwrap().push(value);
    }
}

async fn pull_handler(
    State(remote): State<FakeRemote>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    remote.record_auth(&headers);
    if remote.reject {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(json!({
        "meals": [
            {
                "id": "m1",
                "name": "Remote oats",
                "meal_type": "breakfast",
                "eaten_at": "2024-03-01T08:00:00Z",
                "calories": "350",
                "macros": "{\"protein\":12.0,\"carbs\":60.0,\"fat\":6.0}"
            }
        ],
        "profile": {"id": "p1", "user_id": "user-1", "display_name": "Sam"}
    })))
}

async fn push_handler(
    State(remote): State<FakeRemote>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    remote.record_auth(&headers);
    if remote.reject {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let processed = body["logs"].as_array().map(Vec::len).unwrap_or(0);
    remote.pushed.lock().unwrap().push(body);
    Ok(Json(json!({ "processed": processed })))
}

async fn serve(remote: FakeRemote) -> String {
    let app = Router::new()
        .route("/sync/pull", get(pull_handler))
        .route("/sync/push", post(push_handler))
        .with_state(remote);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn open_store(temp_dir: &TempDir, server_url: &str) -> FitStore {
    let config_path = temp_dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            "database_path: store.db\nsync:\n  server_url: {}\n  api_key: secret\n  user_id: user-1\n",
            server_url
        ),
    )
    .unwrap();
    FitStore::open(Config::load(Some(config_path)).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_pull_over_http() {
    let remote = FakeRemote::default();
    let url = serve(remote.clone()).await;
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, &url).await;

    let summary = store.sync().unwrap().pull().await.unwrap();
    assert_eq!(summary.records, 2);

    let meals: Vec<Meal> = store.engine().all().await.unwrap();
    assert_eq!(meals.len(), 1);
    assert_eq!(meals[0].calories, Some(350.0));
    assert_eq!(meals[0].macros.as_ref().unwrap().carbs, 60.0);
    assert_eq!(store.engine().count("profile").await.unwrap(), 1);

    assert_eq!(
        *remote.authorization.lock().unwrap(),
        vec![Some("Bearer secret".to_string())]
    );
}

#[tokio::test]
async fn test_push_over_http() {
    let remote = FakeRemote::default();
    let url = serve(remote.clone()).await;
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, &url).await;

    let meal = Meal::new("Oats", MealType::Breakfast);
    store
        .repository()
        .create(&meal, WriteOptions::default())
        .await
        .unwrap();

    let sync = store.sync().unwrap();
    assert_eq!(sync.push_now().await, PushOutcome::Pushed { count: 1 });
    assert_eq!(sync.action_log().count().await.unwrap(), 0);

    let pushed = remote.pushed.lock().unwrap().clone();
    assert_eq!(pushed.len(), 1);
    let log = &pushed[0]["logs"][0];
    assert_eq!(log["table_name"], "meals");
    assert_eq!(log["action"], "CREATE");
    assert_eq!(log["record_id"], meal.id.to_string());
    assert_eq!(log["payload"]["user_id"], "user-1");
    assert!(log["payload"].get("last_synced_at").is_none());
}

#[tokio::test]
async fn test_rejected_credentials() {
    let remote = FakeRemote {
        reject: true,
        ..Default::default()
    };
    let url = serve(remote.clone()).await;
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, &url).await;
    let sync = store.sync().unwrap();

    let err = sync.pull().await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Transport(TransportError::Unauthorized(_))
    ));

    store
        .repository()
        .create(&Meal::new("Oats", MealType::Breakfast), WriteOptions::default())
        .await
        .unwrap();
    assert!(matches!(sync.push_now().await, PushOutcome::Failed { .. }));
    assert_eq!(sync.action_log().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unreachable_remote_is_network_error() {
    // Bind and drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, &url).await;

    let err = store.sync().unwrap().pull().await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Transport(TransportError::Network(_))
    ));
}
