//!
//! # dagrad-nn
//!
//! Small fully-connected networks trained on a [`Graph`].
//!
//! Parameters are leaves held by the model for its whole life; everything a
//! forward pass builds is released again once the caller is done with it, so
//! a graph used only for training holds exactly [`Mlp::parameters`] between
//! steps.
//!

mod error;
mod loss;
mod mlp;
mod optim;

use lib_dagrad_core::{Graph, NodeId};

pub use error::{NnError, Result};
pub use loss::Loss;
pub use mlp::{Activation, Layer, Mlp, Neuron};
pub use optim::{Optimizer, Sgd};

/// Run `f`, then release every handle it parked in the scratch list
pub(crate) fn scoped<F>(graph: &mut Graph, f: F) -> lib_dagrad_core::Result<NodeId>
where
  F: FnOnce(&mut Graph, &mut Vec<NodeId>) -> lib_dagrad_core::Result<NodeId>,
{
  let mut scratch = Vec::new();
  let out = f(graph, &mut scratch);
  release_all(graph, &scratch)?;
  out
}

#[inline]
pub(crate) fn keep(scratch: &mut Vec<NodeId>, id: NodeId) -> NodeId {
  scratch.push(id);
  id
}

pub(crate) fn release_all(graph: &mut Graph, ids: &[NodeId]) -> lib_dagrad_core::Result<()> {
  for &id in ids {
    graph.release(id)?;
  }
  Ok(())
}
