use lib_dagrad_core::{Graph, NodeId};
use rand::Rng;

use crate::{keep, release_all, scoped, Loss, NnError, Optimizer, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
  Identity,
  Sigmoid,
  /// Built by [`Graph::tanh`]; on a graph without `fused`, pre-activations
  /// above about 354 come out NaN
  Tanh,
}

impl Activation {
  /// A fresh handle on `act(x)`; `Identity` hands back `x` with one more handle
  pub fn apply(&self, graph: &mut Graph, x: NodeId) -> lib_dagrad_core::Result<NodeId> {
    match self {
      Activation::Identity => {
        graph.retain(x)?;
        Ok(x)
      }
      Activation::Sigmoid => graph.sigmoid(x),
      Activation::Tanh => graph.tanh(x),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Neuron {
  weights: Vec<NodeId>,
  bias: NodeId,
  activation: Activation,
}

impl Neuron {
  /// Weights drawn uniformly from `[-s, s]` with `s = sqrt(2 / fan_in)`, bias 0
  pub fn new<R: Rng + ?Sized>(
    graph: &mut Graph,
    fan_in: usize,
    activation: Activation,
    rng: &mut R,
  ) -> Result<Self> {
    if fan_in == 0 {
      return Err(NnError::InvalidShape("a neuron needs at least one input".into()));
    }
    let scale = (2.0 / fan_in as f64).sqrt();
    let weights = (0..fan_in)
      .map(|_| graph.leaf(rng.gen_range(-scale..=scale)))
      .collect::<lib_dagrad_core::Result<Vec<_>>>()?;
    let bias = graph.leaf(0.0)?;
    Ok(Self {
      weights,
      bias,
      activation,
    })
  }

  #[inline]
  pub fn weights(&self) -> &[NodeId] {
    &self.weights
  }

  #[inline]
  pub fn bias(&self) -> NodeId {
    self.bias
  }

  #[inline]
  pub fn activation(&self) -> Activation {
    self.activation
  }

  /// `act(sum(w_i * x_i) + b)`
  pub fn forward(&self, graph: &mut Graph, inputs: &[NodeId]) -> Result<NodeId> {
    if inputs.len() != self.weights.len() {
      return Err(NnError::InputMismatch {
        expected: self.weights.len(),
        actual: inputs.len(),
      });
    }
    let out = scoped(graph, |graph, scratch| {
      let mut logit = self.bias;
      for (&w, &x) in self.weights.iter().zip(inputs) {
        let product = keep(scratch, graph.multiply(w, x)?);
        logit = keep(scratch, graph.add(logit, product)?);
      }
      self.activation.apply(graph, logit)
    })?;
    Ok(out)
  }
}

#[derive(Debug, Clone)]
pub struct Layer {
  neurons: Vec<Neuron>,
}

impl Layer {
  pub fn new<R: Rng + ?Sized>(
    graph: &mut Graph,
    fan_in: usize,
    width: usize,
    activation: Activation,
    rng: &mut R,
  ) -> Result<Self> {
    if width == 0 {
      return Err(NnError::InvalidShape("a layer needs at least one neuron".into()));
    }
    let neurons = (0..width)
      .map(|_| Neuron::new(graph, fan_in, activation, rng))
      .collect::<Result<Vec<_>>>()?;
    Ok(Self { neurons })
  }

  #[inline]
  pub fn neurons(&self) -> &[Neuron] {
    &self.neurons
  }

  /// One fresh handle per neuron
  pub fn forward(&self, graph: &mut Graph, inputs: &[NodeId]) -> Result<Vec<NodeId>> {
    let mut outputs = Vec::with_capacity(self.neurons.len());
    for neuron in &self.neurons {
      match neuron.forward(graph, inputs) {
        Ok(out) => outputs.push(out),
        Err(e) => {
          release_all(graph, &outputs)?;
          return Err(e);
        }
      }
    }
    Ok(outputs)
  }
}

/// A stack of fully-connected layers
#[derive(Debug, Clone)]
pub struct Mlp {
  inputs: usize,
  layers: Vec<Layer>,
}

impl Mlp {
  /// `sizes[i]` neurons with `activations[i]` in layer `i`
  pub fn new<R: Rng + ?Sized>(
    graph: &mut Graph,
    inputs: usize,
    sizes: &[usize],
    activations: &[Activation],
    rng: &mut R,
  ) -> Result<Self> {
    if sizes.len() != activations.len() {
      return Err(NnError::InvalidShape(format!(
        "{} layer sizes but {} activations",
        sizes.len(),
        activations.len()
      )));
    }
    if sizes.is_empty() {
      return Err(NnError::InvalidShape("a network needs at least one layer".into()));
    }

    let mut layers = Vec::with_capacity(sizes.len());
    let mut fan_in = inputs;
    for (&width, &activation) in sizes.iter().zip(activations) {
      layers.push(Layer::new(graph, fan_in, width, activation, rng)?);
      fan_in = width;
    }
    log::debug!("built mlp {inputs} -> {sizes:?}");
    Ok(Self { inputs, layers })
  }

  #[inline]
  pub fn inputs(&self) -> usize {
    self.inputs
  }

  pub fn outputs(&self) -> usize {
    self.layers.last().map_or(0, |layer| layer.neurons.len())
  }

  #[inline]
  pub fn layers(&self) -> &[Layer] {
    &self.layers
  }

  pub fn neurons(&self) -> impl Iterator<Item = &Neuron> {
    self.layers.iter().flat_map(|layer| layer.neurons.iter())
  }

  /// Every weight and bias handle, layer by layer
  pub fn parameters(&self) -> Vec<NodeId> {
    self
      .neurons()
      .flat_map(|neuron| neuron.weights.iter().copied().chain(Some(neuron.bias)))
      .collect()
  }

  /// Output handles owned by the caller; intermediate activations are released
  pub fn forward(&self, graph: &mut Graph, inputs: &[NodeId]) -> Result<Vec<NodeId>> {
    if inputs.len() != self.inputs {
      return Err(NnError::InputMismatch {
        expected: self.inputs,
        actual: inputs.len(),
      });
    }
    for &x in inputs {
      graph.retain(x)?;
    }
    let mut current = inputs.to_vec();
    for layer in &self.layers {
      let next = layer.forward(graph, &current);
      release_all(graph, &current)?;
      current = next?;
    }
    Ok(current)
  }

  /// Forward, summed loss, backward and one optimizer step on a single sample.
  ///
  /// Everything the step builds is released before returning, leaving only
  /// the parameters in `graph`. Returns the loss before the update.
  pub fn train_step<O: Optimizer + ?Sized>(
    &self,
    graph: &mut Graph,
    inputs: &[f64],
    targets: &[f64],
    loss: Loss,
    optimizer: &mut O,
  ) -> Result<f64> {
    if targets.len() != self.outputs() {
      return Err(NnError::TargetMismatch {
        expected: self.outputs(),
        actual: targets.len(),
      });
    }

    let xs = leaves(graph, inputs)?;
    let outputs = match self.forward(graph, &xs) {
      Ok(outputs) => outputs,
      Err(e) => {
        release_all(graph, &xs)?;
        return Err(e);
      }
    };

    let outcome = self.descend(graph, &outputs, targets, loss, optimizer);
    release_all(graph, &outputs)?;
    release_all(graph, &xs)?;
    outcome
  }

  /// Summed loss over `outputs`, backward and the optimizer update; the loss
  /// node is released whether or not the update succeeds
  fn descend<O: Optimizer + ?Sized>(
    &self,
    graph: &mut Graph,
    outputs: &[NodeId],
    targets: &[f64],
    loss: Loss,
    optimizer: &mut O,
  ) -> Result<f64> {
    let total = scoped(graph, |graph, scratch| {
      let mut total = None;
      for (&pred, &target) in outputs.iter().zip(targets) {
        let target = keep(scratch, graph.leaf(target)?);
        let term = keep(scratch, loss.apply(graph, pred, target)?);
        total = Some(match total {
          None => term,
          Some(acc) => keep(scratch, graph.add(acc, term)?),
        });
      }
      match total {
        Some(total) => {
          graph.retain(total)?;
          Ok(total)
        }
        None => graph.leaf(0.0),
      }
    })?;

    let outcome = self.update(graph, total, optimizer);
    graph.release(total)?;
    outcome
  }

  fn update<O: Optimizer + ?Sized>(
    &self,
    graph: &mut Graph,
    total: NodeId,
    optimizer: &mut O,
  ) -> Result<f64> {
    let value = graph.value(total)?;
    graph.backward(total)?;
    optimizer.step(graph, self)?;
    optimizer.zero_grad(graph, &self.parameters())?;
    Ok(value)
  }

  /// Plain output values; nothing is left behind in `graph`
  pub fn predict(&self, graph: &mut Graph, inputs: &[f64]) -> Result<Vec<f64>> {
    let xs = leaves(graph, inputs)?;
    let outputs = self.forward(graph, &xs);
    release_all(graph, &xs)?;
    let outputs = outputs?;
    let values = outputs
      .iter()
      .map(|&id| graph.value(id))
      .collect::<lib_dagrad_core::Result<Vec<_>>>();
    release_all(graph, &outputs)?;
    Ok(values?)
  }

  /// Drop the model's handles on its parameters
  pub fn release(self, graph: &mut Graph) -> Result<()> {
    release_all(graph, &self.parameters())?;
    Ok(())
  }
}

fn leaves(graph: &mut Graph, values: &[f64]) -> Result<Vec<NodeId>> {
  let ids = values
    .iter()
    .map(|&v| graph.leaf(v))
    .collect::<lib_dagrad_core::Result<Vec<_>>>()?;
  Ok(ids)
}
