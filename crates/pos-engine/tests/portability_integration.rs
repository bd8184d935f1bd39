use chrono::{Duration, NaiveDate};
use pos_core::{EntryType, ManualClock};
use pos_engine::{Engine, EngineConfig, ExportPayload};
use pos_storage::schema::{VAULT_SNAPSHOTS, VAULT_SNAPSHOTS_FALLBACK};
use pos_storage::{CollectionDef, DocumentStore, TxMode};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::at("2024-03-14T08:00:00+00:00").expect("clock"))
}

/// Records of one store with auto-assigned keys removed, for set comparison.
fn without_auto_ids(records: &[Value]) -> BTreeSet<String> {
    records
        .iter()
        .map(|record| {
            let mut record = record.clone();
            if let Some(doc) = record.as_object_mut() {
                if doc.get("id").is_some_and(Value::is_i64) {
                    doc.remove("id");
                }
            }
            record.to_string()
        })
        .collect()
}

fn seed(engine: &mut Engine) {
    let day = engine.get_settings().current_day_key;
    engine.add_todo("read").expect("todo");
    engine.add_todo("write").expect("todo");
    engine.add_block(day, "09:00", "10:30", "writing").expect("block");
    engine.add_template("Workday", Vec::new()).expect("template");
    let salary = engine.add_category(EntryType::Income, "Salary").expect("category");
    let food = engine.add_category(EntryType::Expense, "Food").expect("category");
    engine
        .add_transaction(day, EntryType::Income, salary.id.expect("id"), 1000.0, "march")
        .expect("income");
    engine
        .add_transaction(day, EntryType::Expense, food.id.expect("id"), 250.0, "")
        .expect("expense");
    engine
        .add_gatekeeper_item("Keyboard", 120.0, food.id.expect("id"))
        .expect("gatekeeper item");
    engine.complete_morning().expect("morning");
    engine.toggle_todo_done(1).expect("toggle");
    engine.start_evening().expect("evening");
    engine.close_day().expect("close");
}

#[test]
fn export_then_import_into_a_fresh_store_reproduces_every_collection() {
    let clock = clock();
    let mut source =
        Engine::open_with_clock(EngineConfig::in_memory(), clock.clone()).expect("source");
    seed(&mut source);
    let exported = source.export_all().expect("export");
    let raw = exported.to_json_pretty().expect("serialize");

    let mut target =
        Engine::open_with_clock(EngineConfig::in_memory(), clock.clone()).expect("target");
    let report = target
        .import_all(&ExportPayload::from_json(&raw).expect("parse"))
        .expect("import");
    assert!(report.skipped_stores.is_empty());
    assert_eq!(report.skipped_records, 0);
    assert_eq!(report.total_written(), exported.record_count());

    let reimported = target.export_all().expect("export again");
    assert_eq!(
        reimported.stores.keys().collect::<Vec<_>>(),
        exported.stores.keys().collect::<Vec<_>>()
    );
    for (name, records) in &exported.stores {
        assert_eq!(
            without_auto_ids(&reimported.stores[name]),
            without_auto_ids(records),
            "{name}"
        );
    }
    assert_eq!(target.get_day_status(), source.get_day_status());
    let summary = target.get_monthly_summary("2024-03").expect("summary");
    assert_eq!((summary.remaining, summary.remaining_pct, summary.spent_pct), (750.0, 75, 25));
}

#[test]
fn import_is_additive() {
    let clock = clock();
    let mut engine =
        Engine::open_with_clock(EngineConfig::in_memory(), clock.clone()).expect("engine");
    let rent = engine.add_category(EntryType::Expense, "Rent").expect("category");
    let exported = engine.export_all().expect("export");

    engine.add_category(EntryType::Expense, "Fun").expect("category");
    engine
        .rename_category(rent.id.expect("id"), "Housing")
        .expect("rename");
    engine.import_all(&exported).expect("import");

    let names: Vec<_> = engine
        .list_categories(None)
        .expect("categories")
        .into_iter()
        .map(|category| category.name)
        .collect();
    assert_eq!(names, ["Rent", "Fun"]);
}

#[test]
fn reset_removes_the_database_files() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("personal-os.db");
    let clock = clock();
    let mut engine =
        Engine::open_with_clock(EngineConfig::at(&path), clock.clone()).expect("engine");
    engine.add_todo("gone soon").expect("todo");
    assert!(path.exists());

    engine.reset_db().expect("reset");
    assert!(!path.exists());
    assert!(!dir.path().join("personal-os.db-wal").exists());

    clock.advance(Duration::days(1));
    let mut fresh = Engine::open_with_clock(EngineConfig::at(&path), clock).expect("fresh");
    assert!(fresh.list_journal_days().expect("days").is_empty());
    assert_eq!(
        fresh.get_settings().current_day_key,
        NaiveDate::from_ymd_opt(2024, 3, 15).expect("date")
    );
}

#[test]
fn bad_settings_in_an_import_leave_the_store_openable() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("personal-os.db");
    let clock = clock();
    let mut engine =
        Engine::open_with_clock(EngineConfig::at(&path), clock.clone()).expect("engine");
    engine.complete_morning().expect("morning");

    let mut payload = engine.export_all().expect("export");
    payload.stores.insert(
        "settings".to_string(),
        vec![json!({"id": "main", "currentDayKey": "2024-03-14", "dayStatus": "bogus"})],
    );
    let report = engine.import_all(&payload).expect("import");
    assert_eq!(report.skipped_records, 1);
    drop(engine);

    let engine = Engine::open_with_clock(EngineConfig::at(&path), clock).expect("reopen");
    assert_eq!(engine.get_day_status(), pos_core::DayStatus::Execution);
}

/// A store laid out before the vault was keyed by day, with one old record.
fn legacy_store(path: &Path, snapshot: Option<Value>) {
    let mut store = DocumentStore::open(Some(path), 2, |up| {
        up.ensure_collection(&CollectionDef::auto(VAULT_SNAPSHOTS))?;
        Ok(())
    })
    .expect("legacy store");
    if let Some(snapshot) = snapshot {
        store
            .run_transaction(&[VAULT_SNAPSHOTS], TxMode::ReadWrite, |tx| {
                tx.put(VAULT_SNAPSHOTS, &snapshot)
            })
            .expect("seed legacy snapshot");
    }
}

#[test]
fn legacy_vault_records_survive_a_round_trip_between_legacy_stores() {
    let dir = TempDir::new().expect("temp dir");
    let source_path = dir.path().join("source.db");
    let target_path = dir.path().join("target.db");
    legacy_store(&source_path, Some(json!({"date": "2023-12-31", "pct": 80})));
    legacy_store(&target_path, None);

    let clock = clock();
    let mut source =
        Engine::open_with_clock(EngineConfig::at(&source_path), clock.clone()).expect("source");
    assert_eq!(source.vault_collection(), VAULT_SNAPSHOTS_FALLBACK);
    let exported = source.export_all().expect("export");
    assert_eq!(exported.stores[VAULT_SNAPSHOTS].len(), 1);

    let mut target =
        Engine::open_with_clock(EngineConfig::at(&target_path), clock).expect("target");
    let report = target.import_all(&exported).expect("import");
    assert_eq!(report.skipped_records, 0);
    assert_eq!(report.written.get(VAULT_SNAPSHOTS), Some(&1));

    let legacy = &target.export_all().expect("export again").stores[VAULT_SNAPSHOTS];
    assert_eq!(legacy.len(), 1);
    assert_eq!(legacy[0]["pct"], 80);
}
