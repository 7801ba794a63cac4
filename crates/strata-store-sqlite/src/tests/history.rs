//! History tables, change capture and synchronisation.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use strata_core::{
  Error as CoreError,
  catalog::{ChangeContext, ChangeType},
  period::{HistoryRow, IntervalViolation, RowKey},
  store::{CreateOptions, SyncReport, TemporalStore},
};

use super::{admin, count, exec, store_at, t};
use crate::{SqliteStore, encode_dt};

async fn tracked_table(store: &SqliteStore) {
  exec(store, "CREATE TABLE t (id INTEGER PRIMARY KEY, value TEXT)")
    .await
    .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("t"))
    .await
    .unwrap();
}

fn core_error(err: crate::Error) -> CoreError {
  match err {
    crate::Error::Core(e) => e,
    other => panic!("expected a domain error, got {other:?}"),
  }
}

// ─── Change capture ──────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_update_delete_scenario() {
  let (store, clock) = store_at(100).await;
  tracked_table(&store).await;

  exec(&store, "INSERT INTO t (id, value) VALUES (1, 'a')").await.unwrap();
  let rows = store.history("t", RowKey::from(1)).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].value("value"), Some(&json!("a")));
  assert_eq!(rows[0].period.from, t(100));
  assert!(rows[0].period.is_open());

  clock.set_secs(200);
  exec(&store, "UPDATE t SET value = 'b' WHERE id = 1").await.unwrap();
  let rows = store.history("t", RowKey::from(1)).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].value("value"), Some(&json!("a")));
  assert_eq!((rows[0].period.from, rows[0].period.to), (t(100), Some(t(200))));
  assert_eq!(rows[1].value("value"), Some(&json!("b")));
  assert_eq!((rows[1].period.from, rows[1].period.to), (t(200), None));

  clock.set_secs(300);
  exec(&store, "DELETE FROM t WHERE id = 1").await.unwrap();
  let rows = store.history("t", RowKey::from(1)).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!((rows[1].period.from, rows[1].period.to), (t(200), Some(t(300))));
  assert_eq!(count(&store, "SELECT COUNT(*) FROM t WHERE id = 1").await, 0);
  assert!(store.verify_history("t").await.unwrap().is_empty());

  let at = |secs| store.as_of("t", RowKey::from(1), t(secs));
  assert!(at(99).await.unwrap().is_none());
  assert_eq!(at(100).await.unwrap().unwrap().value("value"), Some(&json!("a")));
  assert_eq!(at(199).await.unwrap().unwrap().value("value"), Some(&json!("a")));
  assert_eq!(at(200).await.unwrap().unwrap().value("value"), Some(&json!("b")));
  assert!(at(300).await.unwrap().is_none());
}

#[tokio::test]
async fn history_rows_carry_the_writing_transaction() {
  let (store, _clock) = store_at(100).await;
  tracked_table(&store).await;

  exec(&store, "INSERT INTO t (id, value) VALUES (1, 'a')").await.unwrap();
  let latest = store.transactions(1).await.unwrap();
  let rows = store.history("t", RowKey::from(1)).await.unwrap();
  assert_eq!(rows[0].transaction_id, Some(latest[0].transaction_id));
  assert_eq!(latest[0].user_id, Some(7));
  assert_eq!(latest[0].change_type, ChangeType::Backend);
}

#[tokio::test]
async fn unchanged_update_is_not_versioned() {
  let (store, clock) = store_at(100).await;
  tracked_table(&store).await;
  exec(&store, "INSERT INTO t (id, value) VALUES (1, 'a')").await.unwrap();

  clock.set_secs(200);
  exec(&store, "UPDATE t SET value = value").await.unwrap();
  assert_eq!(store.history("t", RowKey::from(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn changes_within_one_transaction_leave_no_empty_intervals() {
  let (store, clock) = store_at(100).await;
  tracked_table(&store).await;

  exec(
    &store,
    "INSERT INTO t (id, value) VALUES (1, 'a');
     UPDATE t SET value = 'b' WHERE id = 1;
     UPDATE t SET value = 'c' WHERE id = 1;
     INSERT INTO t (id, value) VALUES (2, 'x');
     DELETE FROM t WHERE id = 2;",
  )
  .await
  .unwrap();

  let rows = store.history("t", RowKey::from(1)).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].value("value"), Some(&json!("c")));
  assert_eq!(rows[0].period.from, t(100));
  assert!(store.history("t", RowKey::from(2)).await.unwrap().is_empty());

  clock.set_secs(200);
  exec(&store, "UPDATE t SET value = 'd'; UPDATE t SET value = 'e';")
    .await
    .unwrap();
  let rows = store.history("t", RowKey::from(1)).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[1].value("value"), Some(&json!("e")));
  assert!(store.verify_history("t").await.unwrap().is_empty());
}

#[tokio::test]
async fn native_time_column_decides_when_versions_start() {
  let (store, clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE node (id INTEGER PRIMARY KEY, value TEXT, edition_time TEXT)",
  )
  .await
  .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("node").time_column("edition_time"))
    .await
    .unwrap();

  exec(
    &store,
    &format!(
      "INSERT INTO node VALUES (1, 'a', '{}')",
      encode_dt(t(50))
    ),
  )
  .await
  .unwrap();

  clock.set_secs(200);
  exec(
    &store,
    &format!(
      "UPDATE node SET value = 'b', edition_time = '{}' WHERE id = 1",
      encode_dt(t(80))
    ),
  )
  .await
  .unwrap();

  // A change that leaves the time column alone still versions the row, at
  // transaction time.
  clock.set_secs(300);
  exec(&store, "UPDATE node SET value = 'c' WHERE id = 1").await.unwrap();

  let rows = store.history("node", RowKey::from(1)).await.unwrap();
  let periods: Vec<_> = rows.iter().map(|r| (r.period.from, r.period.to)).collect();
  assert_eq!(periods, vec![
    (t(50), Some(t(80))),
    (t(80), Some(t(300))),
    (t(300), None),
  ]);
}

async fn timed_table(store: &SqliteStore) {
  exec(
    store,
    "CREATE TABLE node (id INTEGER PRIMARY KEY, value TEXT,
                        edition_time TEXT DEFAULT CURRENT_TIMESTAMP)",
  )
  .await
  .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("node").time_column("edition_time"))
    .await
    .unwrap();
}

fn periods(rows: &[HistoryRow]) -> Vec<(DateTime<Utc>, Option<DateTime<Utc>>)> {
  rows.iter().map(|r| (r.period.from, r.period.to)).collect()
}

#[tokio::test]
async fn native_time_moving_backwards_keeps_committed_versions() {
  let (store, clock) = store_at(100).await;
  timed_table(&store).await;
  exec(&store, &format!("INSERT INTO node VALUES (1, 'a', '{}')", encode_dt(t(200))))
    .await
    .unwrap();

  clock.set_secs(300);
  exec(
    &store,
    &format!("UPDATE node SET value = 'b', edition_time = '{}' WHERE id = 1", encode_dt(t(150))),
  )
  .await
  .unwrap();

  let rows = store.history("node", RowKey::from(1)).await.unwrap();
  assert_eq!(periods(&rows), vec![(t(200), Some(t(300))), (t(300), None)]);
  assert_eq!(rows[0].value("value"), Some(&json!("a")));
  assert_eq!(rows[1].value("value"), Some(&json!("b")));
  assert!(store.verify_history("node").await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_a_future_dated_version_closes_it_after_its_start() {
  let (store, clock) = store_at(100).await;
  timed_table(&store).await;
  exec(&store, &format!("INSERT INTO node VALUES (1, 'a', '{}')", encode_dt(t(500))))
    .await
    .unwrap();

  clock.set_secs(200);
  exec(&store, "DELETE FROM node WHERE id = 1").await.unwrap();
  let closed_at = t(500) + TimeDelta::microseconds(1);
  let rows = store.history("node", RowKey::from(1)).await.unwrap();
  assert_eq!(periods(&rows), vec![(t(500), Some(closed_at))]);

  // A reinsertion starts where the closed version ended.
  clock.set_secs(250);
  exec(&store, "INSERT INTO node VALUES (1, 'c', NULL)").await.unwrap();
  let rows = store.history("node", RowKey::from(1)).await.unwrap();
  assert_eq!(periods(&rows), vec![(t(500), Some(closed_at)), (closed_at, None)]);
  assert!(store.verify_history("node").await.unwrap().is_empty());
}

#[tokio::test]
async fn native_times_are_normalised() {
  let (store, clock) = store_at(100).await;
  timed_table(&store).await;
  exec(
    &store,
    "INSERT INTO node VALUES (1, 'a', '1970-01-01 00:02:30');
     INSERT INTO node VALUES (2, 'x', '1970-01-01T00:01:40Z');
     INSERT INTO node (id, value) VALUES (3, 'defaulted');",
  )
  .await
  .unwrap();
  let rows = store.history("node", RowKey::from(1)).await.unwrap();
  assert_eq!(periods(&rows), vec![(t(150), None)]);
  assert_eq!(store.history("node", RowKey::from(3)).await.unwrap().len(), 1);

  // Half a second later sorts after the whole second.
  clock.set_secs(300);
  exec(
    &store,
    "UPDATE node SET value = 'y', edition_time = '1970-01-01T00:01:40.500000Z' WHERE id = 2",
  )
  .await
  .unwrap();
  let half = t(100) + TimeDelta::milliseconds(500);
  let rows = store.history("node", RowKey::from(2)).await.unwrap();
  assert_eq!(periods(&rows), vec![(t(100), Some(half)), (half, None)]);
  assert!(store.verify_history("node").await.unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_native_time_aborts() {
  let (store, _clock) = store_at(100).await;
  timed_table(&store).await;

  let err = exec(&store, "INSERT INTO node VALUES (1, 'a', 'yesterday')")
    .await
    .unwrap_err();
  assert!(matches!(core_error(err), CoreError::InvalidTimestamp(ref v) if v == "yesterday"));
  assert_eq!(count(&store, "SELECT COUNT(*) FROM node").await, 0);
  assert_eq!(count(&store, "SELECT COUNT(*) FROM node_history").await, 0);
}

// ─── Trigger aborts ──────────────────────────────────────────────────────────

#[tokio::test]
async fn update_without_open_interval_aborts_until_synced() {
  let (store, clock) = store_at(100).await;
  tracked_table(&store).await;
  exec(&store, "INSERT INTO t (id, value) VALUES (1, 'a')").await.unwrap();
  exec(&store, "DELETE FROM t_history").await.unwrap();

  clock.set_secs(200);
  let err = exec(&store, "UPDATE t SET value = 'b'").await.unwrap_err();
  assert!(matches!(
    core_error(err),
    CoreError::MissingOpenInterval(ref h) if h == "t_history"
  ));
  assert_eq!(count(&store, "SELECT COUNT(*) FROM t WHERE value = 'a'").await, 1);

  let report = store.sync_history_table(admin(), "t").await.unwrap();
  assert_eq!(report, SyncReport { updated: 0, inserted: 1, closed: 0 });

  clock.set_secs(300);
  exec(&store, "UPDATE t SET value = 'b'").await.unwrap();
  assert_eq!(store.history("t", RowKey::from(1)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn insert_over_open_interval_aborts() {
  let (store, _clock) = store_at(100).await;
  tracked_table(&store).await;
  exec(
    &store,
    "INSERT INTO t_history (id, value, sys_period_from) VALUES (5, 'ghost', '2000-01-01T00:00:00.000000Z')",
  )
  .await
  .unwrap();

  let err = exec(&store, "INSERT INTO t (id, value) VALUES (5, 'x')")
    .await
    .unwrap_err();
  assert!(matches!(core_error(err), CoreError::DuplicateOpenInterval(_)));
}

// ─── Registration ────────────────────────────────────────────────────────────

#[tokio::test]
async fn registration_rejects_unsupported_tables() {
  let (store, _clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE no_key (value TEXT);
     CREATE TABLE pair (a INTEGER, b INTEGER, PRIMARY KEY (a, b));
     CREATE TABLE reserved (id INTEGER PRIMARY KEY, sys_period_to TEXT);
     CREATE TABLE plain (id INTEGER PRIMARY KEY, value TEXT);",
  )
  .await
  .unwrap();
  let long = "x".repeat(60);
  exec(&store, &format!("CREATE TABLE {long} (id INTEGER PRIMARY KEY)"))
    .await
    .unwrap();

  let register = |table: String, time: Option<&'static str>| {
    let store = store.clone();
    async move { store.register_table(admin(), &table, time).await }
  };

  let err = register("no_key".into(), None).await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::NoPrimaryKey(_)));

  let err = register("pair".into(), None).await.unwrap_err();
  match core_error(err) {
    CoreError::CompositePrimaryKey { columns, .. } => {
      assert_eq!(columns, vec!["a".to_string(), "b".to_string()]);
    }
    other => panic!("unexpected: {other:?}"),
  }

  let err = register("reserved".into(), None).await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::ReservedColumn { .. }));

  let err = register(long, None).await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::IdentifierTooLong(_)));

  let err = register("plain".into(), Some("edited")).await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::UnknownColumn { .. }));

  let err = register("missing".into(), None).await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::UnknownTable(_)));

  assert!(store.list_catalog().await.unwrap().is_empty());
  assert_eq!(register("plain".into(), None).await.unwrap(), "plain_history");
  assert_eq!(register("plain".into(), None).await.unwrap(), "plain_history");
  assert_eq!(store.list_catalog().await.unwrap().len(), 1);
}

// ─── Synchronisation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn sync_is_idempotent() {
  let (store, clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE t (id INTEGER PRIMARY KEY, value TEXT);
     INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, NULL);",
  )
  .await
  .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("t").without_triggers().without_sync())
    .await
    .unwrap();

  clock.set_secs(150);
  let first = store.sync_history_table(admin(), "t").await.unwrap();
  assert_eq!(first, SyncReport { updated: 0, inserted: 3, closed: 0 });

  clock.set_secs(200);
  let second = store.sync_history_table(admin(), "t").await.unwrap();
  assert_eq!(second, SyncReport::default());
  assert_eq!(count(&store, "SELECT COUNT(*) FROM t_history").await, 3);

  // Untracked edits are picked up, NULLs compare as values.
  exec(&store, "UPDATE t SET value = 'z' WHERE id = 3").await.unwrap();
  clock.set_secs(250);
  let third = store.sync_history_table(admin(), "t").await.unwrap();
  assert_eq!(third, SyncReport { updated: 1, inserted: 0, closed: 0 });
  let rows = store.history("t", RowKey::from(3)).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].period.to, Some(t(250)));
  assert_eq!(rows[1].value("value"), Some(&json!("z")));
}

#[tokio::test]
async fn populate_requires_an_empty_history_table() {
  let (store, _clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE t (id INTEGER PRIMARY KEY, value TEXT);
     INSERT INTO t VALUES (1, 'a'), (2, 'b');",
  )
  .await
  .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("t").without_triggers().without_sync())
    .await
    .unwrap();

  assert_eq!(store.populate_history_table(admin(), "t").await.unwrap(), 2);
  let err = store.populate_history_table(admin(), "t").await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::HistoryNotEmpty(_)));
}

// ─── Inheritance and schema changes ──────────────────────────────────────────

#[tokio::test]
async fn inherited_tables_are_created_and_dropped_together() {
  let (store, _clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE concept (id INTEGER PRIMARY KEY, user_id INTEGER);
     CREATE TABLE class (id INTEGER PRIMARY KEY, user_id INTEGER, name TEXT);
     CREATE TABLE class_instance (id INTEGER PRIMARY KEY, user_id INTEGER, name TEXT, class_id INTEGER);",
  )
  .await
  .unwrap();
  store.declare_inheritance(admin(), "class", "concept").await.unwrap();
  store
    .declare_inheritance(admin(), "class_instance", "class")
    .await
    .unwrap();

  let entry = store
    .create_history_table(admin(), CreateOptions::new("class_instance"))
    .await
    .unwrap();
  assert_eq!(entry.parent_history_table.as_deref(), Some("class_history"));
  let class = store.lookup("class").await.unwrap().unwrap();
  assert_eq!(class.parent_history_table.as_deref(), Some("concept_history"));
  assert_eq!(store.list_catalog().await.unwrap().len(), 3);

  store.drop_history_table(admin(), "concept").await.unwrap();
  assert!(store.list_catalog().await.unwrap().is_empty());
  assert_eq!(
    count(&store, "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE '%_history'").await,
    0
  );
  // Live tables keep working without their triggers.
  exec(&store, "INSERT INTO class (id, user_id, name) VALUES (1, 1, 'x')")
    .await
    .unwrap();
}

#[tokio::test]
async fn inheritance_declarations_are_validated() {
  let (store, _clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE a (id INTEGER PRIMARY KEY, v TEXT);
     CREATE TABLE b (id INTEGER PRIMARY KEY, v TEXT);
     CREATE TABLE c (id INTEGER PRIMARY KEY, v TEXT);
     CREATE TABLE narrow (id INTEGER PRIMARY KEY);",
  )
  .await
  .unwrap();

  store.declare_inheritance(admin(), "b", "a").await.unwrap();
  store.declare_inheritance(admin(), "b", "a").await.unwrap();

  let err = store.declare_inheritance(admin(), "a", "b").await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::InheritanceCycle(_)));

  let err = store.declare_inheritance(admin(), "b", "c").await.unwrap_err();
  assert!(matches!(
    core_error(err),
    CoreError::UnsupportedMultipleInheritance { .. }
  ));

  let err = store.declare_inheritance(admin(), "narrow", "a").await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::InheritanceMismatch { .. }));
}

#[tokio::test]
async fn refreshed_schema_versions_new_columns() {
  let (store, clock) = store_at(100).await;
  tracked_table(&store).await;
  exec(&store, "INSERT INTO t (id, value) VALUES (1, 'a')").await.unwrap();

  exec(&store, "ALTER TABLE t ADD COLUMN note TEXT").await.unwrap();
  let added = store.refresh_history_schema(admin(), "t").await.unwrap();
  assert_eq!(added, vec!["note".to_string()]);
  assert!(store.refresh_history_schema(admin(), "t").await.unwrap().is_empty());

  clock.set_secs(200);
  exec(&store, "UPDATE t SET note = 'hi' WHERE id = 1").await.unwrap();
  let rows = store.history("t", RowKey::from(1)).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].value("note"), Some(&json!(null)));
  assert_eq!(rows[1].value("note"), Some(&json!("hi")));
}

// ─── Bookkeeping ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn transactions_record_attribution() {
  let (store, clock) = store_at(100).await;
  tracked_table(&store).await;
  clock.set_secs(150);
  store
    .write(ChangeContext::backend(42).with_label("import"), |tx| {
      tx.execute("INSERT INTO t (id, value) VALUES (1, 'a')", [])
    })
    .await
    .unwrap();

  let log = store.transactions(10).await.unwrap();
  assert!(log.len() >= 3);
  assert_eq!(log[0].user_id, Some(42));
  assert_eq!(log[0].label.as_deref(), Some("import"));
  assert_eq!(log[0].execution_time, t(150));
  assert_eq!(log[1].change_type, ChangeType::Migration);
  assert!(log.windows(2).all(|w| w[0].transaction_id > w[1].transaction_id));
}

#[tokio::test]
async fn tampering_is_reported_by_verification() {
  let (store, clock) = store_at(100).await;
  tracked_table(&store).await;
  exec(&store, "INSERT INTO t (id, value) VALUES (1, 'a'), (2, 'b')")
    .await
    .unwrap();
  clock.set_secs(200);
  exec(&store, "UPDATE t SET value = 'c' WHERE id = 1").await.unwrap();
  assert!(store.verify_history("t").await.unwrap().is_empty());

  exec(
    &store,
    &format!(
      "UPDATE t_history SET sys_period_to = '{}' WHERE id = 1 AND sys_period_to IS NOT NULL;
       DELETE FROM t_history WHERE id = 2;",
      encode_dt(t(150))
    ),
  )
  .await
  .unwrap();

  let violations = store.verify_history("t").await.unwrap();
  assert!(violations.contains(&IntervalViolation::Gap {
    key:    RowKey::from(1),
    after:  t(150),
    before: t(200),
  }));
  assert!(violations.contains(&IntervalViolation::MissingOpen { key: RowKey::from(2) }));
}

#[tokio::test]
async fn drop_all_removes_every_history_table() {
  let (store, _clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE a (id INTEGER PRIMARY KEY);
     CREATE TABLE b (id INTEGER PRIMARY KEY);",
  )
  .await
  .unwrap();
  for table in ["a", "b"] {
    store
      .create_history_table(admin(), CreateOptions::new(table))
      .await
      .unwrap();
  }

  assert_eq!(store.drop_all_history_tables(admin()).await.unwrap(), 2);
  assert!(store.list_catalog().await.unwrap().is_empty());
  let err = store.drop_history_table(admin(), "a").await.unwrap_err();
  assert!(matches!(core_error(err), CoreError::NotTracked(_)));
}
