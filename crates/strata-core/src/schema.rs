//! Table descriptors and the inheritance arena.
//!
//! A [`TableSchema`] is captured once when a table is registered and every
//! generated statement is derived from it, so a history plan never has to
//! rediscover columns at write time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  catalog::RESERVED_COLUMNS,
};

/// One column of a live table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
  pub name:        String,
  /// Declared type, copied verbatim into the history table.
  pub decl_type:   String,
  /// 1-based position within the primary key, 0 if not part of it.
  pub pk_position: u32,
}

/// The columns of a live table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
  pub name:    String,
  pub columns: Vec<ColumnDef>,
}

impl TableSchema {
  /// The single primary-key column.
  pub fn primary_key(&self) -> Result<&ColumnDef> {
    let mut keys: Vec<&ColumnDef> =
      self.columns.iter().filter(|c| c.pk_position > 0).collect();
    keys.sort_by_key(|c| c.pk_position);
    match keys.as_slice() {
      [] => Err(Error::NoPrimaryKey(self.name.clone())),
      [key] => Ok(key),
      many => Err(Error::CompositePrimaryKey {
        table:   self.name.clone(),
        columns: many.iter().map(|c| c.name.clone()).collect(),
      }),
    }
  }

  pub fn column(&self, name: &str) -> Option<&ColumnDef> {
    self.columns.iter().find(|c| c.name == name)
  }

  pub fn require_column(&self, name: &str) -> Result<&ColumnDef> {
    self.column(name).ok_or_else(|| Error::UnknownColumn {
      table:  self.name.clone(),
      column: name.to_owned(),
    })
  }

  /// Reject live columns that collide with the history bookkeeping columns.
  pub fn check_reserved(&self) -> Result<()> {
    match self
      .columns
      .iter()
      .find(|c| RESERVED_COLUMNS.contains(&c.name.as_str()))
    {
      Some(c) => Err(Error::ReservedColumn {
        table:  self.name.clone(),
        column: c.name.clone(),
      }),
      None => Ok(()),
    }
  }

  /// A structural child must carry every column of its parent.
  pub fn check_extends(&self, parent: &TableSchema) -> Result<()> {
    for column in &parent.columns {
      if self.column(&column.name).is_none() {
        return Err(Error::InheritanceMismatch {
          child:  self.name.clone(),
          parent: parent.name.clone(),
          column: column.name.clone(),
        });
      }
    }
    Ok(())
  }

  pub fn column_names(&self) -> impl Iterator<Item = &str> {
    self.columns.iter().map(|c| c.name.as_str())
  }
}

// ─── Inheritance arena ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TableNode {
  name:   String,
  parent: Option<usize>,
}

/// Single-parent table inheritance, stored as an index-linked arena.
///
/// All walks are iterative; insertion refuses links that would form a cycle.
#[derive(Debug, Clone, Default)]
pub struct TableTree {
  nodes: Vec<TableNode>,
  index: HashMap<String, usize>,
}

impl TableTree {
  pub fn new() -> Self { Self::default() }

  /// Build a tree from `(child, parent)` pairs.
  pub fn from_links<I, S>(links: I) -> Result<Self>
  where
    I: IntoIterator<Item = (S, S)>,
    S: AsRef<str>,
  {
    let mut tree = Self::new();
    for (child, parent) in links {
      tree.link(child.as_ref(), parent.as_ref())?;
    }
    Ok(tree)
  }

  fn slot(&mut self, name: &str) -> usize {
    if let Some(&idx) = self.index.get(name) {
      return idx;
    }
    let idx = self.nodes.len();
    self.nodes.push(TableNode { name: name.to_owned(), parent: None });
    self.index.insert(name.to_owned(), idx);
    idx
  }

  /// Record that `child` structurally extends `parent`.
  ///
  /// Re-declaring the same link is a no-op.
  pub fn link(&mut self, child: &str, parent: &str) -> Result<()> {
    if child == parent {
      return Err(Error::InheritanceCycle(child.to_owned()));
    }
    let c = self.slot(child);
    let p = self.slot(parent);

    if let Some(existing) = self.nodes[c].parent {
      if existing == p {
        return Ok(());
      }
      return Err(Error::UnsupportedMultipleInheritance {
        child:     child.to_owned(),
        existing:  self.nodes[existing].name.clone(),
        requested: parent.to_owned(),
      });
    }

    let mut cursor = Some(p);
    while let Some(idx) = cursor {
      if idx == c {
        return Err(Error::InheritanceCycle(child.to_owned()));
      }
      cursor = self.nodes[idx].parent;
    }

    self.nodes[c].parent = Some(p);
    Ok(())
  }

  pub fn parent(&self, name: &str) -> Option<&str> {
    let idx = *self.index.get(name)?;
    self.nodes[idx].parent.map(|p| self.nodes[p].name.as_str())
  }

  /// Ancestors of `name`, root first, excluding `name` itself.
  pub fn ancestors(&self, name: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut cursor = self.index.get(name).and_then(|&i| self.nodes[i].parent);
    while let Some(idx) = cursor {
      out.push(self.nodes[idx].name.as_str());
      cursor = self.nodes[idx].parent;
    }
    out.reverse();
    out
  }

  /// Descendants of `name`, deepest first, excluding `name` itself.
  ///
  /// Every table appears after all of its own descendants, which is the
  /// order in which dependent objects have to be dropped.
  pub fn descendants(&self, name: &str) -> Vec<&str> {
    let Some(&root) = self.index.get(name) else {
      return Vec::new();
    };

    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, node) in self.nodes.iter().enumerate() {
      if let Some(p) = node.parent {
        children.entry(p).or_default().push(idx);
      }
    }

    // Pre-order walk, then reverse: parents end up after their children.
    let mut order = Vec::new();
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
      if idx != root {
        order.push(idx);
      }
      if let Some(kids) = children.get(&idx) {
        stack.extend(kids.iter().rev());
      }
    }
    order.reverse();
    order.into_iter().map(|i| self.nodes[i].name.as_str()).collect()
  }
}
