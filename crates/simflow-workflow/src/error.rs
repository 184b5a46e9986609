use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("duplicate block id: {0}")]
  DuplicateBlockId(String),

  #[error("connection references unknown block: source={source_id}, target={target}")]
  InvalidConnection { source_id: String, target: String },

  #[error("{group} '{group_id}' references unknown block '{block_id}'")]
  InvalidGroupMember {
    group: &'static str,
    group_id: String,
    block_id: String,
  },

  #[error("workflow has more than one starter block: {0:?}")]
  MultipleStarters(Vec<String>),
}
