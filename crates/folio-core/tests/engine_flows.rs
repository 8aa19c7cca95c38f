//! End-to-end flows across the engine components

use std::fs::File;
use std::time::{Duration, SystemTime};

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use folio_core::query::filter;
use folio_core::{
    BackupManager, BusHandles, ConfigLoader, Engine, EngineConfig, EngineError, Filter,
    LoadOptions, Op,
};

async fn engine(temp_dir: &TempDir) -> Engine {
    let config = EngineConfig::with_root(temp_dir.path());
    Engine::init(config, BusHandles::local()).await.unwrap()
}

fn post_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "title"],
        "properties": {
            "id": {"type": "string"},
            "title": {"type": "string"}
        }
    })
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn age_days(path: &std::path::Path, days: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60))
        .unwrap();
}

#[tokio::test]
async fn test_save_then_load_preserves_created_at() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    engine
        .schemas()
        .register_schema("post", post_schema())
        .await
        .unwrap();

    let saved = engine
        .schemas()
        .save("post", json!({"id": "p1", "title": "x"}))
        .await
        .unwrap();
    let loaded = engine.schemas().load("post", "p1").await.unwrap();
    assert_eq!(loaded.get("title"), Some(json!("x")));
    assert_eq!(loaded.created_at, saved.created_at);

    let mut resaved = loaded.to_value();
    resaved["title"] = json!("y");
    engine.schemas().save("post", resaved).await.unwrap();

    let reloaded = engine.schemas().load("post", "p1").await.unwrap();
    assert_eq!(reloaded.get("title"), Some(json!("y")));
    assert_eq!(reloaded.created_at, saved.created_at);
    assert!(reloaded.updated_at >= saved.updated_at);

    engine.close().await;
}

#[tokio::test]
async fn test_invalid_save_names_field_and_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    engine
        .schemas()
        .register_schema("post", post_schema())
        .await
        .unwrap();

    let err = engine
        .schemas()
        .save("post", json!({"id": "p1"}))
        .await
        .unwrap_err();
    match err {
        EngineError::Validation { entity, errors } => {
            assert_eq!(entity, "post");
            assert!(errors.iter().any(|e| e.field == "title"), "{errors:?}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let collection = engine.store().collection_path("posts").unwrap();
    assert!(!collection.join("p1.json").exists());

    engine.close().await;
}

#[tokio::test]
async fn test_gte_filter_keeps_subset_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    let store = engine.store();

    for (id, views) in [("a", 5), ("b", 20), ("c", 10), ("d", 1), ("e", 10)] {
        store
            .create("posts", object(json!({"id": id, "views": views})))
            .await
            .unwrap();
    }

    let docs = store.read_collection("posts").await.unwrap().into_documents();
    let kept = filter(docs, &Filter::new().op("views", Op::Gte(json!(10))));
    let ids: Vec<&str> = kept.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c", "e"]);

    engine.close().await;
}

#[tokio::test]
async fn test_created_backup_verifies() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    engine
        .store()
        .create("posts", object(json!({"title": "Hello"})))
        .await
        .unwrap();

    let info = engine.backups().create_backup().await.unwrap();
    let report = engine.backups().verify_backup(&info.name).await.unwrap();
    assert!(report.valid, "{:?}", report.error);
    assert!(report.entries >= 1);

    engine.close().await;
}

#[tokio::test]
async fn test_cleanup_deletes_only_expired_archives() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    let backups = engine.backups();

    let expired = backups.create_backup().await.unwrap();
    age_days(&expired.path, 120);
    let recent = backups.create_backup().await.unwrap();
    age_days(&recent.path, 30);

    let report = backups.clean_old_backups().await.unwrap();
    assert_eq!(report.deleted, vec![expired.name.clone()]);
    assert_eq!(report.deleted_count(), 1);

    let again = backups.clean_old_backups().await.unwrap();
    assert_eq!(again.deleted_count(), 0);

    let names: Vec<String> = backups
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec![recent.name]);

    engine.close().await;
}

#[tokio::test]
async fn test_restore_skips_subtrees_the_archive_excludes() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let config = EngineConfig::with_root(root);
    let configs = ConfigLoader::new(config.config_docs_path(), Duration::from_secs(300));
    let manager = BackupManager::from_config(&config, configs.clone());

    let posts = root.join("data").join("posts");
    std::fs::create_dir_all(&posts).unwrap();
    std::fs::write(posts.join("p1.json"), r#"{"id":"p1","title":"original"}"#).unwrap();
    configs.save("site", &json!({"name": "before"})).await.unwrap();

    // No schema tree yet, so the archive marks it as excluded
    let info = manager.create_backup().await.unwrap();
    assert_eq!(info.metadata.as_ref().unwrap().includes.schemas, Some(false));

    let schema = root.join("schemas").join("core").join("post.json");
    std::fs::create_dir_all(schema.parent().unwrap()).unwrap();
    std::fs::write(&schema, post_schema().to_string()).unwrap();
    std::fs::write(posts.join("p1.json"), r#"{"id":"p1","title":"changed"}"#).unwrap();
    std::fs::write(posts.join("p2.json"), r#"{"id":"p2","title":"new"}"#).unwrap();
    configs.save("site", &json!({"name": "after"})).await.unwrap();

    let report = manager.restore_backup(&info.name).await.unwrap();
    assert!(report.restored.iter().all(|r| r.subtree != "schemas"));

    let restored: Value =
        serde_json::from_str(&std::fs::read_to_string(posts.join("p1.json")).unwrap()).unwrap();
    assert_eq!(restored["title"], "original");
    assert!(!posts.join("p2.json").exists());
    assert_eq!(
        configs.get("site", "name", Value::Null).await.unwrap(),
        json!("before")
    );
    assert_eq!(
        std::fs::read_to_string(&schema).unwrap(),
        post_schema().to_string()
    );
}

#[tokio::test]
async fn test_config_ttl_serves_cache_then_rereads() {
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::new(temp_dir.path(), Duration::from_millis(300));
    let path = temp_dir.path().join("siteConfig.json");
    std::fs::write(&path, r#"{"title": "first"}"#).unwrap();

    let first = loader.load("siteConfig", LoadOptions::default()).await.unwrap();
    std::fs::write(&path, r#"{"title": "second"}"#).unwrap();
    let second = loader.load("siteConfig", LoadOptions::default()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(loader.disk_reads(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let third = loader.load("siteConfig", LoadOptions::default()).await.unwrap();
    assert_eq!(third["title"], "second");
    assert_eq!(loader.disk_reads(), 2);
}

#[tokio::test]
async fn test_sync_summary_reports_each_package() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    let settings = engine.config().plugins.clone();

    let core = engine.config().core_path();
    std::fs::create_dir_all(&core).unwrap();
    for module in &settings.modules {
        std::fs::write(core.join(format!("{module}.json")), r#"{"exports": []}"#).unwrap();
    }
    let packages = engine.config().packages_path();
    std::fs::create_dir_all(packages.join("plugin-gallery")).unwrap();
    std::fs::create_dir_all(packages.join("plugin-forms")).unwrap();
    std::fs::create_dir_all(packages.join("unrelated")).unwrap();

    let summary = engine.plugins().sync_functions_to_plugins().await.unwrap();
    let mut synced: Vec<&str> = summary.synced.iter().map(|r| r.plugin.as_str()).collect();
    synced.sort();
    assert_eq!(synced, vec!["plugin-forms", "plugin-gallery"]);
    assert!(summary.failed.is_empty());

    let statuses = engine.plugins().version_report().await.unwrap();
    assert!(statuses.iter().all(|s| s.current));

    engine.close().await;
}
