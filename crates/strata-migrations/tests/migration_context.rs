//! End-to-end migrations against a recording database.

use std::sync::Arc;

use serde_json::json;
use strata_db::{PostgresSchemaBuilder, PostgresTypeMapper, Row, Value};
use strata_migrations::{
    MigrationContext, MigrationError, MigrationOptions, MigrationState, PhaseVersion,
    RoadmapProvider, StaticResourceLoader,
};
use strata_test::{
    assert_executed, assert_not_executed, assert_statements_in_order, MemoryResources,
    PhaseBuilder, RecordingContext,
};
use tokio_util::sync::CancellationToken;

fn provider(resources: MemoryResources) -> RoadmapProvider {
    RoadmapProvider::new(Arc::new(StaticResourceLoader::new(resources.into_entries())))
}

fn users_roadmap() -> MemoryResources {
    MemoryResources::new()
        .phase(PhaseBuilder::new("1.0", "Users").create(
            "Users",
            json!({
                "Id": { "type": "bigint", "is_sequence": true },
                "Name": { "type": "text" }
            }),
        ))
        .phase(
            PhaseBuilder::new("2.0", "Orders")
                .description("Rename the user name and add orders")
                .update(
                    "Users",
                    json!({ "Name": { "column_name": "FullName", "value": "upper({column})" } }),
                )
                .create("Orders", json!({ "Id": { "type": "bigint" } })),
        )
        .script(
            "1.0_users.sql",
            "CREATE TABLE \"Users\" (\"Id\" bigserial PRIMARY KEY, \"Name\" text);",
        )
        .script(
            "2.0_orders.sql",
            "CREATE TABLE \"Orders\" (\"Id\" bigint PRIMARY KEY);",
        )
}

fn context(db: &Arc<RecordingContext>, core: RoadmapProvider) -> MigrationContext {
    MigrationContext::new(
        Arc::clone(db) as Arc<dyn strata_db::DatabaseContext>,
        Arc::new(PostgresSchemaBuilder),
        Arc::new(PostgresTypeMapper),
        core,
        MigrationOptions::default(),
    )
}

/// A database whose history holds `(version, package)` rows.
fn database_with(history: &[(&str, Option<&str>)]) -> Arc<RecordingContext> {
    let db = RecordingContext::new("shop");
    db.with_table("shop", "schema_phases");
    db.on_query(
        "SELECT \"Version\", \"Package\" FROM \"schema_phases\"",
        history
            .iter()
            .map(|(version, package)| {
                Row::new(
                    vec!["Version".into(), "Package".into()],
                    vec![Value::from(*version), Value::from(*package)],
                )
            })
            .collect(),
    );
    db.on_query(
        "RETURNING \"Id\"",
        vec![Row::new(vec!["Id".into()], vec![Value::Int(7)])],
    );
    Arc::new(db)
}

/// A database whose history says the core roadmap is at `version`.
fn database_at(version: &str) -> Arc<RecordingContext> {
    database_with(&[(version, None)])
}

fn billing_roadmap() -> MemoryResources {
    MemoryResources::new()
        .phase(PhaseBuilder::new("0.1", "Invoices").create(
            "Invoices",
            json!({ "Id": { "type": "bigint" } }),
        ))
        .phase(PhaseBuilder::new("0.2", "Totals").create(
            "Invoices",
            json!({ "Total": { "type": "numeric(10,2)", "value": "0" } }),
        ))
        .script("0.1_invoices.sql", "CREATE TABLE \"Invoices\" (\"Id\" bigint);")
        .script(
            "0.2_totals.sql",
            "ALTER TABLE \"Invoices\" ADD COLUMN \"Total\" numeric(10,2);",
        )
}

/// Parameters of each history row inserted, in order.
fn history_inserts(db: &RecordingContext) -> Vec<Vec<Value>> {
    db.params_of("RETURNING \"Id\"")
}

fn empty_database() -> Arc<RecordingContext> {
    let db = RecordingContext::new("shop");
    db.on_query(
        "RETURNING \"Id\"",
        vec![Row::new(vec!["Id".into()], vec![Value::Int(1)])],
    );
    Arc::new(db)
}

#[tokio::test]
async fn test_swap_migration_copies_renamed_columns() {
    let db = database_at("1.0");
    db.on_copy_out(
        "FROM \"Users\"",
        vec![vec![Value::Int(1), Value::from("ann")]],
    );
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()));

    let info = ctx.initialize(None, &cancel).await.unwrap();
    assert_eq!(info.core.to_string(), "1.0 -> 2.0: Orders");
    assert!(info.schema_changes.contains("Name: text as FullName = upper({column})"));
    assert_eq!(ctx.state(), MigrationState::Initialized);

    let report = ctx.migrate(&cancel).await.unwrap();
    assert_eq!(ctx.state(), MigrationState::Completed);
    assert!(!report.up_to_date);
    assert_eq!(report.transfer.rows, 1);
    assert_eq!(report.history_ids, vec![7]);
    let backup = report.backup_database.unwrap();
    assert!(backup.starts_with("shop_backup_1_0_"));

    assert_statements_in_order(
        &db,
        &[
            "SELECT \"Version\", \"Package\" FROM \"schema_phases\"",
            "CONNECT postgres",
            "TERMINATE shop",
            &format!("ALTER DATABASE \"shop\" RENAME TO \"{backup}\""),
            "CREATE DATABASE \"shop\"",
            "CONNECT shop",
            "BEGIN",
            "CREATE TABLE \"Users\"",
            "CREATE TABLE \"Orders\"",
            "COMMIT",
            &format!("OPEN {backup}"),
            "COPY OUT SELECT CAST(\"Id\" AS bigint), CAST(\"Name\" AS text) FROM \"Users\"",
            "INSERT INTO \"Users\" (\"Id\", \"FullName\") SELECT \"Id\", upper(\"Name\") FROM \"_staging_Users\"",
            "SELECT setval(pg_get_serial_sequence('\"Users\"', 'Id')",
            "INSERT INTO \"schema_phases\" (\"Id\", \"Version\"",
            "INSERT INTO \"schema_phases\" (\"Version\", \"Package\", \"Parent\"",
        ],
    );
    assert_eq!(db.copied_rows("_staging_Users"), vec![vec![Value::Int(1), Value::from("ann")]]);
    // Orders is new in 2.0, there is nothing to copy.
    assert_not_executed(&db, "_staging_Orders");
}

#[tokio::test]
async fn test_fresh_database_runs_scripts_and_records_modules() {
    let db = empty_database();
    let billing = MemoryResources::new()
        .phase(PhaseBuilder::new("0.3", "Invoices").create(
            "Invoices",
            json!({ "Id": { "type": "bigint" } }),
        ))
        .script("0.3_invoices.sql", "CREATE TABLE \"Invoices\" (\"Id\" bigint);");
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap())).with_module("billing", provider(billing));

    let info = ctx.initialize(None, &cancel).await.unwrap();
    assert_eq!(info.core.current_version, None);
    assert_eq!(info.modules["billing"].to_string(), "(new) -> 0.3: Invoices");

    let report = ctx.migrate(&cancel).await.unwrap();
    assert_eq!(report.backup_database, None);
    assert_eq!(report.history_ids, vec![1, 1]);
    assert_statements_in_order(
        &db,
        &[
            "BEGIN",
            "CREATE TABLE \"Users\"",
            "CREATE TABLE \"Orders\"",
            "CREATE TABLE \"Invoices\"",
            "CREATE TABLE \"schema_phases\"",
            "INSERT INTO \"schema_phases\"",
            "INSERT INTO \"schema_phases\"",
            "COMMIT",
        ],
    );
    assert_not_executed(&db, "ALTER DATABASE");
    assert_not_executed(&db, "COPY");
}

#[tokio::test]
async fn test_copy_failure_rolls_back_to_backup() {
    let db = database_at("1.0");
    db.fail_on("COPY OUT");
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()));
    ctx.initialize(None, &cancel).await.unwrap();

    let err = ctx.migrate(&cancel).await.unwrap_err();
    assert!(matches!(err, MigrationError::Aborted { .. }), "{err}");
    assert_eq!(ctx.state(), MigrationState::RolledBack);
    assert_statements_in_order(
        &db,
        &[
            "CREATE DATABASE \"shop\"",
            "COPY OUT",
            "CONNECT postgres",
            "DROP DATABASE IF EXISTS \"shop\"",
            "RENAME TO \"shop\"",
        ],
    );
    assert_not_executed(&db, "RETURNING");
}

#[tokio::test]
async fn test_bad_value_reports_row_and_column() {
    let db = database_at("1.0");
    db.on_copy_out(
        "FROM \"Users\"",
        vec![
            vec![Value::Int(1), Value::from("ann")],
            vec![Value::from("two"), Value::from("bob")],
        ],
    );
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()));
    ctx.initialize(None, &cancel).await.unwrap();

    let err = ctx.migrate(&cancel).await.unwrap_err();
    match err {
        MigrationError::CopyFailed { table, column, row, .. } => {
            assert_eq!(table, "Users");
            assert_eq!(column, "Id");
            assert_eq!(row, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.state(), MigrationState::RolledBack);
    assert_executed(&db, "DROP DATABASE IF EXISTS \"shop\"");
}

#[tokio::test]
async fn test_script_failure_on_fresh_database_rolls_back_transaction() {
    let db = empty_database();
    db.fail_on("CREATE TABLE \"Orders\"");
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()));
    ctx.initialize(None, &cancel).await.unwrap();

    let err = ctx.migrate(&cancel).await.unwrap_err();
    match err {
        MigrationError::Script { script, .. } => assert_eq!(script, "2.0_orders.sql"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.state(), MigrationState::Failed);
    assert_statements_in_order(&db, &["BEGIN", "CREATE TABLE \"Orders\"", "ROLLBACK"]);
    assert_not_executed(&db, "INSERT INTO");
}

#[tokio::test]
async fn test_up_to_date_database_is_left_alone() {
    let db = database_at("2.0");
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()));
    assert!(ctx.initialize(None, &cancel).await.unwrap().is_up_to_date());

    db.reset();
    let report = ctx.migrate(&cancel).await.unwrap();
    assert!(report.up_to_date);
    assert_eq!(ctx.state(), MigrationState::Completed);
    assert!(db.sql().is_empty());
}

#[tokio::test]
async fn test_explicit_target_stops_early() {
    let db = empty_database();
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()));
    let target: PhaseVersion = "1.0".parse().unwrap();
    let info = ctx.initialize(Some(target), &cancel).await.unwrap();
    assert_eq!(info.core.to_string(), "(new) -> 1.0 (latest 2.0): Users");

    ctx.migrate(&cancel).await.unwrap();
    assert_executed(&db, "CREATE TABLE \"Users\"");
    assert_not_executed(&db, "CREATE TABLE \"Orders\"");
}

#[tokio::test]
async fn test_target_behind_current_keeps_no_plan() {
    let db = database_at("2.0");
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()));
    let err = ctx
        .initialize(Some("1.0".parse().unwrap()), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::TargetBehindCurrent { .. }));
    assert!(ctx.info().is_none());
    assert_eq!(ctx.state(), MigrationState::Uninitialized);
}

#[tokio::test]
async fn test_requires_admin_database() {
    let db = Arc::new(RecordingContext::new("shop").without_admin());
    let mut ctx = context(&db, provider(users_roadmap()));
    let err = ctx
        .initialize(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::NoAdminDatabase { .. }));
    assert!(db.sql().is_empty());
}

#[tokio::test]
async fn test_migrate_before_initialize() {
    let db = empty_database();
    let mut ctx = context(&db, provider(users_roadmap()));
    let err = ctx.migrate(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::InvalidState { operation: "migrate", .. }
    ));
}

#[tokio::test]
async fn test_cancelled_before_migrate_keeps_plan() {
    let db = database_at("1.0");
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()));
    ctx.initialize(None, &cancel).await.unwrap();
    db.reset();

    cancel.cancel();
    assert!(matches!(
        ctx.migrate(&cancel).await,
        Err(MigrationError::Cancelled)
    ));
    assert_eq!(ctx.state(), MigrationState::Initialized);
    assert!(ctx.info().is_some());
    assert!(db.sql().is_empty());
}

#[tokio::test]
async fn test_transfer_runs_only_inside_the_window() {
    let roadmap = || {
        MemoryResources::new()
            .phase(PhaseBuilder::new("1.0", "Orders").create(
                "Orders",
                json!({ "Id": { "type": "bigint" }, "Amount": { "type": "bigint" } }),
            ))
            .phase(
                PhaseBuilder::new("2.0", "Totals")
                    .create("Totals", json!({ "Sum": { "type": "bigint" } }))
                    .transfer(
                        "Totals",
                        "SELECT sum(\"Amount\") AS \"Sum\" FROM \"Orders\";",
                        json!({ "Sum": "bigint" }),
                    ),
            )
            .phase(PhaseBuilder::new("3.0", "Audit").create(
                "Audit",
                json!({ "Id": { "type": "bigint" } }),
            ))
    };
    let cancel = CancellationToken::new();

    let db = database_at("1.0");
    let mut ctx = context(&db, provider(roadmap()));
    ctx.initialize(Some("2.0".parse().unwrap()), &cancel).await.unwrap();
    assert!(ctx.map().unwrap().transfers().is_empty());

    let mut ctx = context(&db, provider(roadmap()));
    ctx.initialize(None, &cancel).await.unwrap();
    assert!(ctx.map().unwrap().transfer("Totals").is_some());
    ctx.migrate(&cancel).await.unwrap();
    assert_executed(
        &db,
        "COPY OUT SELECT CAST(\"Sum\" AS bigint) FROM (SELECT sum(\"Amount\") AS \"Sum\" FROM \"Orders\") AS \"transfer_source\"",
    );
    assert_executed(&db, "COPY IN Totals (Sum)");
    assert_not_executed(&db, "_staging_Totals");
}

#[tokio::test]
async fn test_swap_with_unchanged_module_records_only_the_core() {
    let db = database_with(&[("1.0", None), ("0.3", Some("billing"))]);
    let billing = MemoryResources::new()
        .phase(PhaseBuilder::new("0.3", "Invoices").create(
            "Invoices",
            json!({ "Id": { "type": "bigint" } }),
        ))
        .script("0.3_invoices.sql", "CREATE TABLE \"Invoices\" (\"Id\" bigint);");
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap())).with_module("billing", provider(billing));

    let info = ctx.initialize(None, &cancel).await.unwrap();
    assert!(info.modules["billing"].is_up_to_date());
    assert!(!info.is_up_to_date());

    let report = ctx.migrate(&cancel).await.unwrap();
    assert_eq!(ctx.state(), MigrationState::Completed);
    assert_eq!(report.history_ids, vec![7]);
    let inserts = history_inserts(&db);
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0][0], Value::from("2.0"));
    assert_eq!(inserts[0][1], Value::Null);

    // The rebuilt database still gets the module schema and its rows.
    assert_statements_in_order(
        &db,
        &[
            "CREATE TABLE \"Invoices\"",
            "COMMIT",
            "COPY OUT SELECT CAST(\"Id\" AS bigint) FROM \"Invoices\"",
            "INSERT INTO \"schema_phases\" (\"Id\", \"Version\"",
            "RETURNING \"Id\"",
        ],
    );
}

#[tokio::test]
async fn test_swap_advances_module_from_its_own_version() {
    let db = database_with(&[("1.0", None), ("0.1", Some("billing"))]);
    let cancel = CancellationToken::new();
    let mut ctx =
        context(&db, provider(users_roadmap())).with_module("billing", provider(billing_roadmap()));

    let info = ctx.initialize(None, &cancel).await.unwrap();
    assert_eq!(info.modules["billing"].to_string(), "0.1 -> 0.2: Totals");

    let report = ctx.migrate(&cancel).await.unwrap();
    assert_eq!(report.history_ids, vec![7, 7]);
    assert_executed(
        &db,
        "INSERT INTO \"Invoices\" (\"Id\", \"Total\") SELECT \"Id\", 0 FROM \"_staging_Invoices\"",
    );

    let inserts = history_inserts(&db);
    assert_eq!(inserts.len(), 2);
    assert_eq!(inserts[0][..3], [Value::from("2.0"), Value::Null, Value::Null]);
    assert_eq!(
        inserts[1][..3],
        [Value::from("0.2"), Value::from("billing"), Value::Int(7)]
    );
}

#[tokio::test]
async fn test_module_only_migration_links_existing_core_row() {
    let db = database_with(&[("2.0", None), ("0.1", Some("billing"))]);
    db.on_query(
        "\"Package\" IS NULL",
        vec![Row::new(vec!["Id".into()], vec![Value::Int(5)])],
    );
    let cancel = CancellationToken::new();
    let mut ctx =
        context(&db, provider(users_roadmap())).with_module("billing", provider(billing_roadmap()));

    let info = ctx.initialize(None, &cancel).await.unwrap();
    assert!(info.core.is_up_to_date());

    let report = ctx.migrate(&cancel).await.unwrap();
    assert!(report.backup_database.unwrap().starts_with("shop_backup_2_0_"));
    assert_eq!(report.history_ids, vec![7]);
    let inserts = history_inserts(&db);
    assert_eq!(inserts.len(), 1);
    assert_eq!(
        inserts[0][..3],
        [Value::from("0.2"), Value::from("billing"), Value::Int(5)]
    );
}

#[tokio::test]
async fn test_modules_keep_configuration_order() {
    let db = empty_database();
    let module = |version: &str, table: &str| {
        provider(
            MemoryResources::new()
                .phase(PhaseBuilder::new(version, table).create(
                    table,
                    json!({ "Id": { "type": "bigint" } }),
                ))
                .script(
                    &format!("{version}_{}.sql", table.to_lowercase()),
                    &format!("CREATE TABLE \"{table}\" (\"Id\" bigint);"),
                ),
        )
    };
    let cancel = CancellationToken::new();
    let mut ctx = context(&db, provider(users_roadmap()))
        .with_module("crm", module("1.4", "Contacts"))
        .with_module("billing", module("0.3", "Invoices"))
        .with_module("audit", module("2.1", "Events"));

    let info = ctx.initialize(None, &cancel).await.unwrap();
    let names: Vec<&str> = info.modules.keys().map(String::as_str).collect();
    assert_eq!(names, ["crm", "billing", "audit"]);

    ctx.migrate(&cancel).await.unwrap();
    assert_statements_in_order(
        &db,
        &[
            "CREATE TABLE \"Orders\"",
            "CREATE TABLE \"Contacts\"",
            "CREATE TABLE \"Invoices\"",
            "CREATE TABLE \"Events\"",
        ],
    );
    let packages: Vec<Value> = history_inserts(&db).iter().map(|p| p[1].clone()).collect();
    assert_eq!(
        packages,
        [
            Value::Null,
            Value::from("crm"),
            Value::from("billing"),
            Value::from("audit")
        ]
    );
}

#[tokio::test]
async fn test_core_rules_win_over_module_rules() {
    let db = empty_database();
    let profiles = MemoryResources::new().phase(PhaseBuilder::new("0.1", "Profiles").create(
        "Users",
        json!({ "Name": { "type": "varchar(40)" }, "Bio": { "type": "text" } }),
    ));
    let cancel = CancellationToken::new();
    let mut ctx =
        context(&db, provider(users_roadmap())).with_module("profiles", provider(profiles));

    ctx.initialize(None, &cancel).await.unwrap();
    let users = ctx.map().unwrap().table("Users").unwrap();
    assert_eq!(users.columns["Name"].type_name, "text");
    assert_eq!(users.columns["Name"].column_name.as_deref(), Some("FullName"));
    assert_eq!(users.columns["Bio"].type_name, "text");

    ctx.migrate(&cancel).await.unwrap();
    let inserts = history_inserts(&db);
    let Value::String(core_summary) = &inserts[0][5] else {
        panic!("core summary is not text: {:?}", inserts[0][5]);
    };
    assert!(core_summary.contains("Name: text as FullName"), "{core_summary}");
    assert!(!core_summary.contains("varchar(40)"), "{core_summary}");
}
