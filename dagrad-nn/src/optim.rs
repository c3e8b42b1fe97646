use lib_dagrad_core::{Graph, NodeId};

use crate::{Mlp, Result};

/// Updates parameter values in place from their accumulated gradients
pub trait Optimizer {
  fn step(&mut self, graph: &mut Graph, model: &Mlp) -> Result<()>;

  fn zero_grad(&self, graph: &mut Graph, params: &[NodeId]) -> Result<()> {
    for &id in params {
      graph.zero_grad(id)?;
    }
    Ok(())
  }
}

/// Plain stochastic gradient descent: `p -= learning_rate * grad(p)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
  pub learning_rate: f64,
  /// Biases stay fixed when false
  pub update_bias: bool,
}

impl Sgd {
  pub fn new(learning_rate: f64) -> Self {
    Self {
      learning_rate,
      update_bias: true,
    }
  }

  pub fn update_bias(mut self, update_bias: bool) -> Self {
    self.update_bias = update_bias;
    self
  }

  fn descend(&self, graph: &mut Graph, id: NodeId) -> Result<()> {
    let node = graph.node(id)?;
    let value = node.value() - self.learning_rate * node.grad();
    graph.set_value(id, value)?;
    Ok(())
  }
}

impl Optimizer for Sgd {
  fn step(&mut self, graph: &mut Graph, model: &Mlp) -> Result<()> {
    for neuron in model.neurons() {
      for &w in neuron.weights() {
        self.descend(graph, w)?;
      }
      if self.update_bias {
        self.descend(graph, neuron.bias())?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use approx::assert_relative_eq;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  use crate::{Activation, Loss};

  /// A single identity neuron with mse gradients already accumulated
  fn primed() -> (Graph, Mlp, Vec<(f64, f64)>) {
    let mut graph = Graph::new();
    let mlp = Mlp::new(
      &mut graph,
      2,
      &[1],
      &[Activation::Identity],
      &mut StdRng::seed_from_u64(3),
    )
    .unwrap();
    let x = graph.leaf(1.0).unwrap();
    let y = graph.leaf(2.0).unwrap();
    let out = mlp.forward(&mut graph, &[x, y]).unwrap()[0];
    let target = graph.leaf(5.0).unwrap();
    let loss = Loss::Mse.apply(&mut graph, out, target).unwrap();
    graph.backward(loss).unwrap();

    let before = mlp
      .parameters()
      .iter()
      .map(|&p| (graph.value(p).unwrap(), graph.grad(p).unwrap()))
      .collect();
    (graph, mlp, before)
  }

  #[test]
  fn step_descends_every_parameter() {
    let (mut graph, mlp, before) = primed();
    Sgd::new(0.1).step(&mut graph, &mlp).unwrap();
    for (&p, (value, grad)) in mlp.parameters().iter().zip(before) {
      assert!(grad != 0.0);
      assert_relative_eq!(graph.value(p).unwrap(), value - 0.1 * grad, epsilon = 1e-12);
    }
  }

  #[test]
  fn frozen_bias() {
    let (mut graph, mlp, before) = primed();
    let bias = mlp.neurons().next().unwrap().bias();
    Sgd::new(0.1).update_bias(false).step(&mut graph, &mlp).unwrap();
    assert_eq!(graph.value(bias).unwrap(), 0.0);
    let (w0, g0) = before[0];
    let w = mlp.parameters()[0];
    assert_relative_eq!(graph.value(w).unwrap(), w0 - 0.1 * g0, epsilon = 1e-12);
  }

  #[test]
  fn zero_grad_resets_parameters() {
    let (mut graph, mlp, _) = primed();
    let sgd = Sgd::new(0.1);
    sgd.zero_grad(&mut graph, &mlp.parameters()).unwrap();
    assert!(mlp.parameters().iter().all(|&p| graph.grad(p).unwrap() == 0.0));
  }
}
