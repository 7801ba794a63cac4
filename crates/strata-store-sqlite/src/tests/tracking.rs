//! Switching change capture off and on again.

use serde_json::json;
use strata_core::{
  period::RowKey,
  store::{CreateOptions, SyncReport, TemporalStore},
};

use super::{admin, count, exec, store_at, t};
use crate::encode_dt;

#[tokio::test]
async fn untracked_edits_are_caught_up_on_enable() {
  let (store, clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE t (id INTEGER PRIMARY KEY, value TEXT);
     INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c');",
  )
  .await
  .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("t"))
    .await
    .unwrap();

  clock.set_secs(150);
  assert!(store.disable_tracking(admin(), "t").await.unwrap());
  assert!(!store.disable_tracking(admin(), "t").await.unwrap());
  assert!(!store.lookup("t").await.unwrap().unwrap().triggers_installed);

  clock.set_secs(200);
  exec(
    &store,
    "UPDATE t SET value = 'a2' WHERE id = 1;
     UPDATE t SET value = 'a3' WHERE id = 1;
     DELETE FROM t WHERE id = 2;
     INSERT INTO t VALUES (4, 'd');",
  )
  .await
  .unwrap();
  assert_eq!(count(&store, "SELECT COUNT(*) FROM t_history").await, 3);

  clock.set_secs(300);
  let report = store.enable_tracking(admin(), "t").await.unwrap();
  assert_eq!(report, Some(SyncReport { updated: 1, inserted: 1, closed: 1 }));
  assert!(store.enable_tracking(admin(), "t").await.unwrap().is_none());

  // Both edits made while untracked collapse into one transition, dated at
  // the moment tracking resumed.
  let rows = store.history("t", RowKey::from(1)).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].period.to, Some(t(300)));
  assert_eq!(rows[1].value("value"), Some(&json!("a3")));

  let rows = store.history("t", RowKey::from(2)).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].period.to, Some(t(300)));

  let rows = store.history("t", RowKey::from(4)).await.unwrap();
  assert_eq!((rows[0].period.from, rows[0].period.to), (t(300), None));

  assert!(store.verify_history("t").await.unwrap().is_empty());

  // Tracking is live again.
  clock.set_secs(400);
  exec(&store, "DELETE FROM t WHERE id = 4").await.unwrap();
  let rows = store.history("t", RowKey::from(4)).await.unwrap();
  assert_eq!(rows[0].period.to, Some(t(400)));
}

#[tokio::test]
async fn create_leaves_an_existing_history_table_alone() {
  let (store, clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE t (id INTEGER PRIMARY KEY, value TEXT);
     INSERT INTO t VALUES (1, 'a'), (2, 'b');",
  )
  .await
  .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("t"))
    .await
    .unwrap();
  store.disable_tracking(admin(), "t").await.unwrap();

  clock.set_secs(200);
  exec(&store, "DELETE FROM t WHERE id = 2").await.unwrap();

  let entry = store
    .create_history_table(admin(), CreateOptions::new("t"))
    .await
    .unwrap();
  assert!(!entry.triggers_installed);
  assert_eq!(count(&store, "SELECT COUNT(*) FROM t_history WHERE sys_period_to IS NULL").await, 2);

  clock.set_secs(300);
  let report = store.enable_tracking(admin(), "t").await.unwrap();
  assert_eq!(report, Some(SyncReport { updated: 0, inserted: 0, closed: 1 }));
  let rows = store.history("t", RowKey::from(2)).await.unwrap();
  assert_eq!(rows[0].period.to, Some(t(300)));
  assert!(store.verify_history("t").await.unwrap().is_empty());
}

#[tokio::test]
async fn native_time_survives_untracked_edits() {
  let (store, clock) = store_at(100).await;
  exec(
    &store,
    &format!(
      "CREATE TABLE node (id INTEGER PRIMARY KEY, value TEXT, edition_time TEXT);
       INSERT INTO node VALUES (1, 'a', '{}');",
      encode_dt(t(90))
    ),
  )
  .await
  .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("node").time_column("edition_time"))
    .await
    .unwrap();
  store.disable_tracking(admin(), "node").await.unwrap();

  clock.set_secs(200);
  exec(
    &store,
    &format!(
      "UPDATE node SET value = 'b', edition_time = '{}'",
      encode_dt(t(180))
    ),
  )
  .await
  .unwrap();

  clock.set_secs(300);
  store.enable_tracking(admin(), "node").await.unwrap();
  let rows = store.history("node", RowKey::from(1)).await.unwrap();
  let periods: Vec<_> = rows.iter().map(|r| (r.period.from, r.period.to)).collect();
  assert_eq!(periods, vec![(t(90), Some(t(180))), (t(180), None)]);
}

#[tokio::test]
async fn batch_enable_reports_failing_tables() {
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

  assert_eq!(store.disable_all(admin()).await.unwrap(), 2);
  exec(&store, "DROP TABLE b_history").await.unwrap();

  let err = store.enable_all(admin(), false).await;
  assert!(err.is_err());
  assert!(!store.lookup("a").await.unwrap().unwrap().triggers_installed);

  let report = store.enable_all(admin(), true).await.unwrap();
  assert_eq!(report.enabled, vec!["a".to_string()]);
  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.failed[0].live_table, "b");
  assert!(store.lookup("a").await.unwrap().unwrap().triggers_installed);
  assert!(!store.lookup("b").await.unwrap().unwrap().triggers_installed);

  // Nothing left to do for the healthy table.
  let report = store.enable_all(admin(), true).await.unwrap();
  assert!(report.enabled.is_empty());
  assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn audit_lists_untracked_tables() {
  let (store, _clock) = store_at(100).await;
  exec(
    &store,
    "CREATE TABLE tracked (id INTEGER PRIMARY KEY);
     CREATE TABLE forgotten (id INTEGER PRIMARY KEY);
     CREATE TABLE scratch (id INTEGER PRIMARY KEY);",
  )
  .await
  .unwrap();
  store
    .create_history_table(admin(), CreateOptions::new("tracked"))
    .await
    .unwrap();

  let untracked = store.audit_untracked(&["scratch".to_string()]).await.unwrap();
  assert_eq!(untracked, vec!["forgotten".to_string()]);
}
