//! Input resolution errors.

use thiserror::Error;

/// Errors raised while resolving a block's inputs.
///
/// A reference to a block that is simply not on the active path is not an
/// error: it resolves to an empty string.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
  /// The referenced block exists but is disabled.
  #[error("block '{block_id}' references disabled block '{referenced}'")]
  DisabledBlockReference { block_id: String, referenced: String },

  /// The referenced block is not reachable from the block being resolved.
  #[error(
    "block '{referenced}' is not connected to this block ('{block_id}'); accessible blocks: {}",
    format_accessible(.accessible)
  )]
  UnconnectedBlockReference {
    block_id: String,
    referenced: String,
    /// (name, id) of every block that may be referenced.
    accessible: Vec<(String, String)>,
  },

  /// A block, variable or field could not be found.
  #[error("unresolved reference '{reference}' in block '{block_id}': {reason}")]
  UnresolvedReference {
    block_id: String,
    reference: String,
    reason: String,
  },

  /// A variable's stored value does not match its declared type.
  #[error("variable '{name}' in block '{block_id}' has a malformed {expected} value: {message}")]
  MalformedVariableValue {
    block_id: String,
    name: String,
    expected: &'static str,
    message: String,
  },

  /// A loop or parallel collection could not be read as a list of items.
  #[error("collection of '{group_id}' referenced by block '{block_id}' is malformed: {message}")]
  MalformedCollection {
    block_id: String,
    group_id: String,
    message: String,
  },
}

fn format_accessible(accessible: &[(String, String)]) -> String {
  if accessible.is_empty() {
    return "none".to_string();
  }
  accessible
    .iter()
    .map(|(name, id)| format!("{} ({})", name, id))
    .collect::<Vec<_>>()
    .join(", ")
}

impl ResolveError {
  pub(crate) fn unresolved(
    block_id: &str,
    reference: impl Into<String>,
    reason: impl Into<String>,
  ) -> Self {
    ResolveError::UnresolvedReference {
      block_id: block_id.to_string(),
      reference: reference.into(),
      reason: reason.into(),
    }
  }
}
