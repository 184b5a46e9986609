use serde::{Deserialize, Serialize};

/// A directed data-flow edge between two blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
  pub source: String,
  pub target: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_handle: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_handle: Option<String>,
}

impl Connection {
  pub fn handle(&self) -> ConnectionHandle<'_> {
    ConnectionHandle::parse(self.source_handle.as_deref())
  }
}

/// Typed view of a connection's `sourceHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHandle<'a> {
  /// `"source"` or no handle at all: the regular success path.
  Source,
  Error,
  /// `"condition-<id>"`.
  Condition(&'a str),
  LoopStart,
  LoopEnd,
  ParallelStart,
  ParallelEnd,
  Other(&'a str),
}

impl<'a> ConnectionHandle<'a> {
  pub fn parse(handle: Option<&'a str>) -> Self {
    match handle {
      None | Some("source") => ConnectionHandle::Source,
      Some("error") => ConnectionHandle::Error,
      Some("loop-start-source") => ConnectionHandle::LoopStart,
      Some("loop-end-source") => ConnectionHandle::LoopEnd,
      Some("parallel-start-source") => ConnectionHandle::ParallelStart,
      Some("parallel-end-source") => ConnectionHandle::ParallelEnd,
      Some(other) => match other.strip_prefix("condition-") {
        Some(id) => ConnectionHandle::Condition(id),
        None => ConnectionHandle::Other(other),
      },
    }
  }
}
