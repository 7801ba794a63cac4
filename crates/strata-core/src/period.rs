//! Validity intervals and history rows.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Half-open validity interval `[from, to)`; `to == None` means the row is
/// the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysPeriod {
  pub from: DateTime<Utc>,
  pub to:   Option<DateTime<Utc>>,
}

impl SysPeriod {
  pub fn open(from: DateTime<Utc>) -> Self { Self { from, to: None } }

  pub fn is_open(&self) -> bool { self.to.is_none() }

  pub fn contains(&self, at: DateTime<Utc>) -> bool {
    self.from <= at && self.to.is_none_or(|to| at < to)
  }
}

/// A primary-key value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
  Integer(i64),
  Text(String),
}

impl From<i64> for RowKey {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<&str> for RowKey {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<String> for RowKey {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl fmt::Display for RowKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Integer(v) => write!(f, "{v}"),
      Self::Text(v) => write!(f, "{v:?}"),
    }
  }
}

/// One version of a live row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
  /// Live-table column values of this version, keyed by column name.
  pub values:         BTreeMap<String, serde_json::Value>,
  pub period:         SysPeriod,
  pub transaction_id: Option<i64>,
}

impl HistoryRow {
  pub fn value(&self, column: &str) -> Option<&serde_json::Value> {
    self.values.get(column)
  }
}

// ─── Contiguity ──────────────────────────────────────────────────────────────

/// A way in which the versions of one key break the interval invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntervalViolation {
  /// Consecutive versions leave uncovered time between them.
  Gap { key: RowKey, after: DateTime<Utc>, before: DateTime<Utc> },
  /// Consecutive versions cover the same time.
  Overlap { key: RowKey, at: DateTime<Utc> },
  /// An interval whose end does not lie after its start.
  Empty { key: RowKey, at: DateTime<Utc> },
  /// More than one version is open, or a closed version follows an open one.
  MultipleOpen { key: RowKey },
  /// The live row exists but has no open version.
  MissingOpen { key: RowKey },
  /// The live row is gone but a version is still open.
  DanglingOpen { key: RowKey },
}

/// Check the versions of one key against the interval invariants.
///
/// `periods` may be in any order; `live` says whether the key currently
/// exists in the live table.
pub fn check_contiguity(
  key: &RowKey,
  periods: &[SysPeriod],
  live: bool,
) -> Vec<IntervalViolation> {
  let mut sorted = periods.to_vec();
  sorted.sort_by_key(|p| p.from);

  let mut violations = Vec::new();
  for p in &sorted {
    if let Some(to) = p.to
      && to <= p.from
    {
      violations.push(IntervalViolation::Empty { key: key.clone(), at: p.from });
    }
  }

  for pair in sorted.windows(2) {
    let (prev, next) = (&pair[0], &pair[1]);
    match prev.to {
      None => {
        violations.push(IntervalViolation::MultipleOpen { key: key.clone() });
      }
      Some(to) if to < next.from => violations.push(IntervalViolation::Gap {
        key:    key.clone(),
        after:  to,
        before: next.from,
      }),
      Some(to) if to > next.from => violations
        .push(IntervalViolation::Overlap { key: key.clone(), at: next.from }),
      Some(_) => {}
    }
  }

  let open = sorted.last().is_some_and(SysPeriod::is_open);
  if live && !open {
    violations.push(IntervalViolation::MissingOpen { key: key.clone() });
  }
  if !live && open {
    violations.push(IntervalViolation::DanglingOpen { key: key.clone() });
  }
  violations
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn t(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

  fn closed(a: i64, b: i64) -> SysPeriod { SysPeriod { from: t(a), to: Some(t(b)) } }

  #[test]
  fn contains_is_half_open() {
    let p = closed(100, 200);
    assert!(p.contains(t(100)));
    assert!(p.contains(t(199)));
    assert!(!p.contains(t(200)));
    assert!(!p.contains(t(99)));
    assert!(SysPeriod::open(t(100)).contains(t(10_000)));
  }

  #[test]
  fn contiguous_history_passes() {
    let key = RowKey::from(1);
    let periods = [SysPeriod::open(t(200)), closed(100, 200)];
    assert!(check_contiguity(&key, &periods, true).is_empty());
    assert!(check_contiguity(&key, &[closed(100, 200), closed(200, 300)], false)
      .is_empty());
  }

  #[test]
  fn gaps_overlaps_and_open_state_are_reported() {
    let key = RowKey::from("k");
    let v = check_contiguity(&key, &[closed(100, 150), SysPeriod::open(t(200))], false);
    assert!(v.iter().any(|x| matches!(x, IntervalViolation::Gap { .. })));
    assert!(v.iter().any(|x| matches!(x, IntervalViolation::DanglingOpen { .. })));

    let v = check_contiguity(&key, &[closed(100, 250), closed(200, 300)], true);
    assert!(v.iter().any(|x| matches!(x, IntervalViolation::Overlap { .. })));
    assert!(v.iter().any(|x| matches!(x, IntervalViolation::MissingOpen { .. })));

    let v = check_contiguity(
      &key,
      &[SysPeriod::open(t(100)), SysPeriod::open(t(200))],
      true,
    );
    assert_eq!(v, vec![IntervalViolation::MultipleOpen { key: key.clone() }]);
  }
}
