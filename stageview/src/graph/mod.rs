//! Execution graph model.
//!
//! This module provides:
//! - Execution nodes and the identifiers that address them
//! - The arena snapshot the extractor walks
//! - The graph source interface and an in-memory source

mod arena;
mod node;
mod source;

pub use arena::{FlowGraph, GraphAnomaly};
pub use node::{ExecutionId, ExecutionNode, NodeError, NodeId, NodeKind, RunId};
pub use source::{ExecutionGraphSource, InMemoryGraphSource, RunTerminalState};

#[cfg(test)]
pub use source::MockExecutionGraphSource;
