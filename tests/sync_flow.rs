//! End-to-end flows through the composed store with an in-memory remote.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use todu_fit_store::db::{ActionKind, SyncKind, SyncStatus, WriteOptions};
use todu_fit_store::models::{Exercise, Goal, Meal, MealType, Workout};
use todu_fit_store::sync::{MockTransport, PushOutcome, RemoteVerb, Snapshot, StaticCredentials};
use todu_fit_store::{Config, FitStore};

struct TestContext {
    store: FitStore,
    remote: Arc<MockTransport>,
    _temp_dir: TempDir,
}

async fn setup() -> TestContext {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    std::fs::write(&config_path, "database_path: store.db\n").unwrap();
    let config = Config::load(Some(config_path)).unwrap();

    let remote = Arc::new(MockTransport::new());
    let store = FitStore::with_transport(
        config,
        remote.clone(),
        Arc::new(StaticCredentials::new(
            Some("secret".to_string()),
            Some("user-1".to_string()),
        )),
    )
    .await
    .unwrap();

    TestContext {
        store,
        remote,
        _temp_dir: temp_dir,
    }
}

#[tokio::test]
async fn test_create_push_acknowledge() {
    let ctx = setup().await;
    let sync = ctx.store.sync().unwrap();

    let workout = Workout::new("Leg day")
        .with_exercises(vec![Exercise::new("squat").with_set(5, Some(100.0))]);
    let workout_id = workout.id.to_string();
    ctx.store
        .repository()
        .create(&workout, WriteOptions::default())
        .await
        .unwrap();

    let pending = sync.action_log().load_pending().await.unwrap();
    assert_eq!(pending.entries.len(), 1);
    assert_eq!(pending.entries[0].table_name, "workouts");
    assert_eq!(pending.entries[0].action, ActionKind::Insert);
    assert_eq!(pending.entries[0].record_id.as_deref(), Some(workout_id.as_str()));

    assert_eq!(sync.push_now().await, PushOutcome::Pushed { count: 1 });
    assert_eq!(sync.action_log().count().await.unwrap(), 0);

    let pushes = ctx.remote.pushes();
    let log = &pushes[0].logs[0];
    assert_eq!(log.action, RemoteVerb::Create);
    let payload = log.payload.as_ref().unwrap();
    assert_eq!(payload["user_id"], "user-1");
    assert_eq!(payload["exercises"][0]["sets"][0]["reps"], 5);
    assert!(payload.get("synced").is_none());
    assert_eq!(ctx.remote.tokens(), vec![Some("secret".to_string())]);

    let runs = sync.sync_runs().list().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].kind, SyncKind::Push);
    assert_eq!(runs[0].status, SyncStatus::Success);
    assert_eq!(runs[0].items_count, 1);
}

#[tokio::test]
async fn test_tracked_mutations_produce_one_entry_each() {
    let ctx = setup().await;
    let repo = ctx.store.repository();

    let meal = Meal::new("Oats", MealType::Breakfast);
    let goal = Goal::new("Squat 150", "squat_kg", 150.0);
    repo.create(&meal, WriteOptions::default()).await.unwrap();
    repo.create(&goal, WriteOptions::default()).await.unwrap();
    repo.update(
        "goals",
        &goal.id.to_string(),
        json!({"current_value": 120.0}).as_object().cloned().unwrap(),
        WriteOptions::default(),
    )
    .await
    .unwrap();
    repo.delete("meals", &meal.id.to_string(), WriteOptions::default())
        .await
        .unwrap();
    // Suppressed write.
    repo.create(&Meal::new("Snack", MealType::Snack), WriteOptions::untracked())
        .await
        .unwrap();

    let pending = ctx
        .store
        .sync()
        .unwrap()
        .action_log()
        .load_pending()
        .await
        .unwrap();
    assert_eq!(pending.entries.len(), 4);
    assert!(pending
        .entries
        .iter()
        .all(|entry| entry.table_name != "action_log"));
}

#[tokio::test]
async fn test_offline_push_retries_whole_batch_later() {
    let ctx = setup().await;
    let sync = ctx.store.sync().unwrap();

    for name in ["a", "b", "c"] {
        ctx.store
            .repository()
            .create(&Meal::new(name, MealType::Lunch), WriteOptions::default())
            .await
            .unwrap();
    }

    ctx.remote.set_failure(Some("network unreachable"));
    assert!(matches!(sync.push_now().await, PushOutcome::Failed { .. }));
    assert_eq!(sync.action_log().count().await.unwrap(), 3);

    ctx.remote.set_failure(None);
    assert_eq!(sync.push_now().await, PushOutcome::Pushed { count: 3 });
    assert_eq!(sync.action_log().count().await.unwrap(), 0);

    let statuses: Vec<SyncStatus> = sync
        .sync_runs()
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|run| run.status)
        .collect();
    assert_eq!(statuses, vec![SyncStatus::Error, SyncStatus::Success]);
}

#[tokio::test]
async fn test_pull_overwrites_local_collection() {
    let ctx = setup().await;
    for name in ["one", "two", "three"] {
        ctx.store
            .repository()
            .create(&Workout::new(name), WriteOptions::untracked())
            .await
            .unwrap();
    }

    let remote_a = Workout::new("Remote A").completed();
    let remote_b = Workout::new("Remote B").with_duration(30);
    ctx.remote.set_snapshot(Snapshot::default().with(
        "workouts",
        serde_json::to_value(vec![&remote_a, &remote_b]).unwrap(),
    ));

    ctx.store.sync().unwrap().pull().await.unwrap();

    let workouts: Vec<Workout> = ctx.store.engine().all().await.unwrap();
    assert_eq!(workouts, vec![remote_a, remote_b]);

    let rows = ctx.store.engine().get_all("workouts").await.unwrap();
    assert!(rows.iter().all(|row| row["synced"] == json!(true)));
}

#[tokio::test]
async fn test_pending_actions_survive_pull() {
    let ctx = setup().await;
    let meal = Meal::new("Local only", MealType::Dinner);
    ctx.store
        .repository()
        .create(&meal, WriteOptions::default())
        .await
        .unwrap();

    ctx.remote
        .set_snapshot(Snapshot::default().with("meals", json!([])));
    ctx.store.sync().unwrap().pull().await.unwrap();

    assert_eq!(ctx.store.engine().count("meals").await.unwrap(), 0);
    // The overwritten insert is still queued and goes out on the next push.
    assert_eq!(
        ctx.store.sync().unwrap().push_now().await,
        PushOutcome::Pushed { count: 1 }
    );
}

#[tokio::test]
async fn test_resume_after_close_reopens() {
    let ctx = setup().await;
    ctx.store
        .repository()
        .create(&Meal::new("Oats", MealType::Breakfast), WriteOptions::default())
        .await
        .unwrap();

    ctx.store.close().await.unwrap();
    ctx.store.resume().await.unwrap();

    assert_eq!(ctx.store.engine().count("meals").await.unwrap(), 1);
}
