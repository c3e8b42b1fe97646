use thiserror::Error;

use crate::Op;

/// Everything that can go wrong while building, differentiating or releasing a graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
  #[error("Unknown node: no slot at index {index}")]
  UnknownNode { index: u32 },

  #[error("Stale node handle: slot {index} (generation {generation}) has already been released")]
  StaleNode { index: u32, generation: u32 },

  #[error("Release of node {index}, which has no outstanding external handle")]
  NotHeld { index: u32 },

  #[error("Allocation failed while reserving room for {requested} nodes")]
  AllocationFailed { requested: usize },

  #[error("Operation {op} cannot be applied to {children} children")]
  ArityMismatch { op: Op, children: usize },
}

pub type Result<T> = std::result::Result<T, GraphError>;
