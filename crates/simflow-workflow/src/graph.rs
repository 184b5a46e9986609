use std::collections::{HashMap, HashSet};

use crate::connection::Connection;

/// Graph structure for traversal and analysis.
///
/// Connections are kept whole (not just endpoints) because activation rules
/// depend on the source handle of each edge.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  /// block_id -> outgoing connections, in workflow order.
  adjacency: HashMap<String, Vec<Connection>>,
  /// block_id -> incoming connections, in workflow order.
  reverse_adjacency: HashMap<String, Vec<Connection>>,
}

impl Graph {
  /// Build a graph from the workflow's connections.
  pub fn new(connections: &[Connection]) -> Self {
    let mut adjacency: HashMap<String, Vec<Connection>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<Connection>> = HashMap::new();

    for conn in connections {
      adjacency
        .entry(conn.source.clone())
        .or_default()
        .push(conn.clone());
      reverse_adjacency
        .entry(conn.target.clone())
        .or_default()
        .push(conn.clone());
    }

    Self {
      adjacency,
      reverse_adjacency,
    }
  }

  /// Outgoing connections of a block.
  pub fn outgoing(&self, block_id: &str) -> &[Connection] {
    self
      .adjacency
      .get(block_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Incoming connections of a block.
  pub fn incoming(&self, block_id: &str) -> &[Connection] {
    self
      .reverse_adjacency
      .get(block_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get downstream block ids for a given block.
  pub fn downstream<'a>(&'a self, block_id: &str) -> impl Iterator<Item = &'a str> {
    self.outgoing(block_id).iter().map(|c| c.target.as_str())
  }

  /// Get upstream block ids for a given block.
  pub fn upstream<'a>(&'a self, block_id: &str) -> impl Iterator<Item = &'a str> {
    self.incoming(block_id).iter().map(|c| c.source.as_str())
  }

  /// All blocks with a path into `block_id`. Terminates on cyclic graphs.
  pub fn ancestors(&self, block_id: &str) -> HashSet<String> {
    let mut visited = HashSet::new();
    let mut stack: Vec<&str> = self.upstream(block_id).collect();

    while let Some(id) = stack.pop() {
      if visited.insert(id.to_string()) {
        stack.extend(self.upstream(id));
      }
    }

    visited
  }

  /// All blocks reachable from `block_id`. Terminates on cyclic graphs.
  pub fn descendants(&self, block_id: &str) -> HashSet<String> {
    let mut visited = HashSet::new();
    let mut stack: Vec<&str> = self.downstream(block_id).collect();

    while let Some(id) = stack.pop() {
      if visited.insert(id.to_string()) {
        stack.extend(self.downstream(id));
      }
    }

    visited
  }
}
