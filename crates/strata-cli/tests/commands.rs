//! Commands run through the registry against a roadmap directory.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use strata_cli::commands::register_builtin_commands;
use strata_cli::{CommandContext, CommandRegistry};
use strata_core::{ModuleSettings, Settings};
use strata_db::{Row, Value};
use strata_test::{assert_not_executed, MemoryResources, PhaseBuilder, RecordingContext};
use tokio_util::sync::CancellationToken;

fn write_roadmap(dir: &Path, resources: MemoryResources) {
    for (name, content) in resources.into_entries() {
        std::fs::write(dir.join(name), content).unwrap();
    }
}

fn setup(db: &Arc<RecordingContext>) -> (tempfile::TempDir, CommandContext) {
    let root = tempfile::tempdir().unwrap();
    let core = root.path().join("core");
    let billing = root.path().join("billing");
    std::fs::create_dir_all(&core).unwrap();
    std::fs::create_dir_all(&billing).unwrap();
    write_roadmap(
        &core,
        MemoryResources::new()
            .phase(PhaseBuilder::new("1.0", "Users").create(
                "Users",
                json!({ "Id": { "type": "bigint", "is_sequence": true } }),
            ))
            .phase(PhaseBuilder::new("2.0", "Orders").create(
                "Orders",
                json!({ "Id": { "type": "bigint" } }),
            ))
            .script("1.0_users.sql", "CREATE TABLE \"Users\" (\"Id\" bigserial);"),
    );
    write_roadmap(
        &billing,
        MemoryResources::new().phase(PhaseBuilder::new("0.1", "Invoices").create(
            "Invoices",
            json!({ "Id": { "type": "bigint" } }),
        )),
    );

    let mut settings = Settings::default();
    settings.database.name = "shop".to_string();
    settings.migrations.roadmap_dir = core;
    settings.migrations.modules.push(ModuleSettings {
        name: "billing".to_string(),
        roadmap_dir: billing,
    });
    let ctx = CommandContext {
        settings,
        db: Arc::clone(db) as Arc<dyn strata_db::DatabaseContext>,
        cancel: CancellationToken::new(),
    };
    (root, ctx)
}

async fn run(ctx: &CommandContext, args: &[&str]) -> String {
    let mut registry = CommandRegistry::new();
    register_builtin_commands(&mut registry);
    let matches = registry
        .build_cli()
        .try_get_matches_from(std::iter::once("strata").chain(args.iter().copied()))
        .unwrap();
    registry.execute(&matches, ctx).await.unwrap()
}

fn at_core_version(db: &RecordingContext, version: &str) {
    db.with_table("shop", "schema_phases");
    db.on_query(
        "SELECT \"Version\", \"Package\" FROM \"schema_phases\"",
        vec![Row::new(
            vec!["Version".into(), "Package".into()],
            vec![Value::from(version), Value::Null],
        )],
    );
}

#[tokio::test]
async fn test_showroadmap_marks_reached_phases() {
    let db = Arc::new(RecordingContext::new("shop"));
    at_core_version(&db, "1.0");
    let (_root, ctx) = setup(&db);
    let out = run(&ctx, &["showroadmap"]).await;
    assert_eq!(
        out,
        "core\n [X] 1.0 Users\n [ ] 2.0 Orders\nbilling\n [ ] 0.1 Invoices\n"
    );
}

#[tokio::test]
async fn test_migrate_plan_does_not_touch_database() {
    let db = Arc::new(RecordingContext::new("shop"));
    at_core_version(&db, "1.0");
    let (_root, ctx) = setup(&db);
    let out = run(&ctx, &["migrate", "--plan"]).await;
    assert!(out.starts_with("core 1.0 -> 2.0: Orders\nmodule billing (new) -> 0.1: Invoices\n"));
    assert!(out.contains("  Orders\n    Id: bigint [new]\n"));
    assert_not_executed(&db, "ALTER DATABASE");
    assert_not_executed(&db, "BEGIN");
}

#[tokio::test]
async fn test_migrate_fresh_database() {
    let db = Arc::new(RecordingContext::new("shop"));
    db.on_query(
        "RETURNING \"Id\"",
        vec![Row::new(vec!["Id".into()], vec![Value::Int(1)])],
    );
    let (_root, ctx) = setup(&db);
    let out = run(&ctx, &["migrate", "--target", "1.0"]).await;
    assert!(out.ends_with("Migrated to 1.0.\n"), "{out}");
    assert!(db.executed("CREATE TABLE \"Users\""));
    assert!(db.executed("CREATE TABLE \"schema_phases\""));
}
