//! Flowline Flow
//!
//! This crate contains the automation flow definition types for flowline.
//! A flow is a visual graph authored in the admin UI: one start node, a set
//! of typed action nodes, and edges that may carry a source handle used for
//! branching (`"true"`, `"false"`, `"response"`, `"timeout"`, switch cases).
//!
//! Definitions are stored as JSON blobs. Parsing turns the loosely typed
//! node payloads into the closed [`NodeKind`] enum, so every consumer matches
//! exhaustively on node variants.

mod definition;
mod edge;
mod error;
mod graph;
mod node;
mod trigger;

pub use definition::{FlowDefinition, FlowStatus};
pub use edge::Edge;
pub use error::FlowError;
pub use graph::Graph;
pub use node::{
  AiAction, AiActionData, Button, ChangeStatusData, ConditionData, ConditionType,
  ExternalNotifyData, ListRow, ListSection, MediaType, MessageData, MoveStageData, Node,
  NodeKind, NotifyTarget, StartData, SwitchData, TagData, WaitData, WaitForResponseData,
};
pub use trigger::{TriggerConfig, TriggerKind, TriggerType};
