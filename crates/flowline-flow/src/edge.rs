use serde::{Deserialize, Serialize};

/// A directed connection between two nodes.
///
/// Branching nodes tag their outgoing edges with a `sourceHandle`
/// (`"true"`/`"false"` for conditions, `"response"`/`"timeout"` for waits,
/// case values for switches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
  pub source: String,
  pub target: String,
  #[serde(
    rename = "sourceHandle",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub source_handle: Option<String>,
}

impl Edge {
  pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      target: target.into(),
      source_handle: None,
    }
  }

  pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
    self.source_handle = Some(handle.into());
    self
  }

  /// The source handle, treating an empty string as no handle.
  pub fn handle(&self) -> Option<&str> {
    self.source_handle.as_deref().filter(|h| !h.is_empty())
  }
}
