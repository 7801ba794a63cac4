//! Per-group aggregates over a tree-structured node table.
//!
//! Every node belongs to a group (a skeleton) and optionally points at a
//! structural parent. The summary of a group is its node count, the sum of
//! the 3-D lengths of all parent edges, the creation/edition time bounds and
//! the editor of the most recently edited node.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column mapping between a node table and its summary table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySpec {
  pub node_table:           String,
  pub summary_table:        String,
  pub id_column:            String,
  pub parent_column:        String,
  /// Also used as the key column of the summary table.
  pub group_column:         String,
  pub x_column:             String,
  pub y_column:             String,
  pub z_column:             String,
  pub editor_column:        String,
  pub creation_time_column: String,
  pub edition_time_column:  String,
}

impl SummarySpec {
  /// The conventional treenode layout.
  pub fn treenode(node_table: impl Into<String>) -> Self {
    let node_table = node_table.into();
    Self {
      summary_table: format!("{node_table}_summary"),
      node_table,
      id_column: "id".into(),
      parent_column: "parent_id".into(),
      group_column: "skeleton_id".into(),
      x_column: "location_x".into(),
      y_column: "location_y".into(),
      z_column: "location_z".into(),
      editor_column: "editor_id".into(),
      creation_time_column: "creation_time".into(),
      edition_time_column: "edition_time".into(),
    }
  }
}

/// A maintained summary row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonSummary {
  pub group_id:               i64,
  pub num_nodes:              i64,
  pub cable_length:           f64,
  pub original_creation_time: Option<DateTime<Utc>>,
  pub last_edition_time:      Option<DateTime<Utc>>,
  pub last_editor_id:         Option<i64>,
  pub last_summary_update:    DateTime<Utc>,
}

/// The fields of a node that matter to the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSample {
  pub id:            i64,
  pub parent_id:     Option<i64>,
  /// Nodes without a group still anchor their children's edges.
  pub group_id:      Option<i64>,
  pub position:      [f64; 3],
  pub editor_id:     Option<i64>,
  pub creation_time: Option<DateTime<Utc>>,
  pub edition_time:  Option<DateTime<Utc>>,
}

/// Aggregate values computed from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
  pub num_nodes:              i64,
  pub cable_length:           f64,
  pub original_creation_time: Option<DateTime<Utc>>,
  pub last_edition_time:      Option<DateTime<Utc>>,
}

/// Euclidean distance between two points.
pub fn edge_length(a: [f64; 3], b: [f64; 3]) -> f64 {
  let dx = a[0] - b[0];
  let dy = a[1] - b[1];
  let dz = a[2] - b[2];
  (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Recompute every group's aggregate by a full scan of `nodes`.
///
/// A node without a parent, pointing at itself, or pointing at a node that
/// does not exist contributes no length. Nodes without a group are not
/// aggregated but may still be parents.
pub fn recompute(nodes: &[NodeSample]) -> BTreeMap<i64, Aggregate> {
  let positions: HashMap<i64, [f64; 3]> =
    nodes.iter().map(|n| (n.id, n.position)).collect();

  let mut out: BTreeMap<i64, Aggregate> = BTreeMap::new();
  for node in nodes {
    let Some(group_id) = node.group_id else { continue };
    let length = node
      .parent_id
      .filter(|&p| p != node.id)
      .and_then(|p| positions.get(&p))
      .map_or(0.0, |&parent| edge_length(node.position, parent));

    let agg = out.entry(group_id).or_insert(Aggregate {
      num_nodes:              0,
      cable_length:           0.0,
      original_creation_time: None,
      last_edition_time:      None,
    });
    agg.num_nodes += 1;
    agg.cable_length += length;
    agg.original_creation_time =
      min_opt(agg.original_creation_time, node.creation_time);
    agg.last_edition_time = max_opt(agg.last_edition_time, node.edition_time);
  }
  out
}

fn min_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
  match (a, b) {
    (Some(a), Some(b)) => Some(a.min(b)),
    (a, b) => a.or(b),
  }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
  match (a, b) {
    (Some(a), Some(b)) => Some(a.max(b)),
    (a, b) => a.or(b),
  }
}

/// Difference between a maintained summary and a full recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMismatch {
  pub group_id:   i64,
  pub maintained: Option<Aggregate>,
  pub expected:   Option<Aggregate>,
}

/// Compare maintained aggregates against `expected`.
///
/// Groups whose maintained row counts zero nodes and zero length are treated
/// as equal to an absent group, since emptied groups keep their row.
pub fn diff(
  maintained: &BTreeMap<i64, Aggregate>,
  expected: &BTreeMap<i64, Aggregate>,
  tolerance: f64,
) -> Vec<SummaryMismatch> {
  let mut groups: Vec<i64> =
    maintained.keys().chain(expected.keys()).copied().collect();
  groups.sort_unstable();
  groups.dedup();

  groups
    .into_iter()
    .filter_map(|group_id| {
      let m = maintained.get(&group_id);
      let e = expected.get(&group_id);
      let consistent = match (m, e) {
        (Some(m), Some(e)) => {
          m.num_nodes == e.num_nodes
            && (m.cable_length - e.cable_length).abs() <= tolerance
        }
        (Some(m), None) => {
          m.num_nodes == 0 && m.cable_length.abs() <= tolerance
        }
        (None, Some(_)) => false,
        (None, None) => true,
      };
      (!consistent).then(|| SummaryMismatch {
        group_id,
        maintained: m.cloned(),
        expected: e.cloned(),
      })
    })
    .collect()
}
