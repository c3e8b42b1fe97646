use lib_dagrad_core::{Graph, NodeId, Result};

use crate::{keep, scoped};

/// Per-output loss between a prediction and a target node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
  Mse,
  BinaryCrossEntropy,
}

impl Loss {
  pub fn apply(&self, graph: &mut Graph, pred: NodeId, target: NodeId) -> Result<NodeId> {
    match self {
      Loss::Mse => mse(graph, pred, target),
      Loss::BinaryCrossEntropy => binary_cross_entropy(graph, pred, target),
    }
  }
}

/// `(target - pred)^2`
pub fn mse(graph: &mut Graph, pred: NodeId, target: NodeId) -> Result<NodeId> {
  scoped(graph, |graph, scratch| {
    let diff = keep(scratch, graph.subtract(target, pred)?);
    graph.power(diff, 2.0)
  })
}

/// `-(t ln p + (1 - t) ln(1 - p))`; `pred` must lie strictly inside (0, 1)
pub fn binary_cross_entropy(graph: &mut Graph, pred: NodeId, target: NodeId) -> Result<NodeId> {
  scoped(graph, |graph, scratch| {
    let ln_p = keep(scratch, graph.natural_log(pred)?);
    let hit = keep(scratch, graph.multiply(target, ln_p)?);
    let not_t = keep(scratch, complement(graph, target)?);
    let not_p = keep(scratch, complement(graph, pred)?);
    let ln_not_p = keep(scratch, graph.natural_log(not_p)?);
    let miss = keep(scratch, graph.multiply(not_t, ln_not_p)?);
    let sum = keep(scratch, graph.add(hit, miss)?);
    graph.multiply_by_scalar(sum, -1.0)
  })
}

/// `1 - x`
fn complement(graph: &mut Graph, x: NodeId) -> Result<NodeId> {
  scoped(graph, |graph, scratch| {
    let negated = keep(scratch, graph.multiply_by_scalar(x, -1.0)?);
    graph.add_scalar(negated, 1.0)
  })
}
