//!
//! # dagrad-core
//!
//! Reverse-mode automatic differentiation over scalar computation graphs.
//!
//! Every builder on [`Graph`] evaluates its result eagerly and records the
//! operation as a new node whose children are the operands; [`Graph::backward`]
//! then walks the graph in reverse topological order and deposits
//! `d root / d node` into every reachable node's gradient.
//!
//! ## Ownership
//!
//! Nodes live in an arena and are addressed by [`NodeId`] handles. A node is
//! kept alive by its holders: the parents that store it as a child, and the
//! external handles counted by [`Graph::retain`] / [`Graph::release`]. It is
//! reclaimed exactly when the last holder goes away, and releasing a parent
//! only ever decrements its children. Reclaimed slots bump their generation,
//! so an outstanding handle to a reclaimed node is rejected instead of
//! aliasing whatever reuses the slot.
//!
//! ```
//! use lib_dagrad_core::Graph;
//!
//! let mut graph = Graph::new();
//! let x = graph.leaf(3.0).unwrap();
//! let y = graph.leaf(4.0).unwrap();
//! let z = graph.multiply(x, y).unwrap();
//! assert_eq!(graph.value(z).unwrap(), 12.0);
//!
//! graph.backward(z).unwrap();
//! assert_eq!(graph.grad(x).unwrap(), 4.0);
//! assert_eq!(graph.grad(y).unwrap(), 3.0);
//! ```
//!

mod error;
mod op;
mod options;

use std::collections::HashSet;
use std::fmt;
use std::hash::{BuildHasher, Hash};

use rustc_hash::FxHashSet;

use smallvec::{smallvec, SmallVec};

pub use error::{GraphError, Result};
pub use op::Op;
pub use options::GraphOptions;

use op::{pullback, Contributions, Operand};

/// Handle to a node: slot index in the high half, slot generation in the low
/// half...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
  #[inline(always)]
  pub(crate) fn new(index: u32, generation: u32) -> Self {
    Self((index as u64) << 32 | generation as u64)
  }

  #[inline(always)]
  pub fn index(&self) -> u32 {
    (self.0 >> 32) as u32
  }

  #[inline(always)]
  pub fn generation(&self) -> u32 {
    self.0 as u32
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}.{}", self.index(), self.generation())
  }
}

/// A single scalar vertex of the computation graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
  value: f64,
  grad: f64,
  /// Only meaningful for `Op::Power`
  exponent: f64,
  children: SmallVec<[NodeId; 2]>,
  op: Op,
  /// Parents storing this node as a child
  edges: u32,
  /// External owners
  handles: u32,
}

impl Node {
  fn leaf(value: f64) -> Self {
    Self {
      value,
      grad: 0.0,
      exponent: 0.0,
      children: SmallVec::new(),
      op: Op::None,
      edges: 0,
      handles: 1,
    }
  }

  #[inline]
  pub fn value(&self) -> f64 {
    self.value
  }

  #[inline]
  pub fn grad(&self) -> f64 {
    self.grad
  }

  #[inline]
  pub fn exponent(&self) -> f64 {
    self.exponent
  }

  #[inline]
  pub fn children(&self) -> &[NodeId] {
    &self.children
  }

  #[inline]
  pub fn op(&self) -> Op {
    self.op
  }

  #[inline]
  pub fn is_leaf(&self) -> bool {
    self.op.is_leaf()
  }

  /// Parent edges plus external handles keeping this node alive
  #[inline]
  pub fn holders(&self) -> u32 {
    self.edges + self.handles
  }
}

#[derive(Debug, Default)]
struct Slot {
  generation: u32,
  node: Option<Node>,
}

/// Extension so identity sets can be preallocated without naming the hasher
trait HashSetExt {
  fn with_capacity(x: usize) -> Self;
}

impl<K, S> HashSetExt for HashSet<K, S>
where
  K: Hash + Eq,
  S: BuildHasher + Default,
{
  fn with_capacity(capacity: usize) -> Self {
    HashSet::with_capacity_and_hasher(capacity, S::default())
  }
}

/// Arena holding every node of one or more computation graphs
#[derive(Debug, Default)]
pub struct Graph {
  slots: Vec<Slot>,
  /// Reclaimed slot indices, reused before the arena grows
  vacant: Vec<u32>,
  live: usize,
  options: GraphOptions,
}

impl Graph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_options(options: GraphOptions) -> Result<Self> {
    let mut slots = Vec::new();
    slots
      .try_reserve(options.capacity)
      .map_err(|_| GraphError::AllocationFailed {
        requested: options.capacity,
      })?;
    Ok(Self {
      slots,
      vacant: Vec::new(),
      live: 0,
      options,
    })
  }

  #[inline]
  pub fn options(&self) -> &GraphOptions {
    &self.options
  }

  /// Number of live nodes
  #[inline]
  pub fn len(&self) -> usize {
    self.live
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.live == 0
  }

  pub fn contains(&self, id: NodeId) -> bool {
    self.node(id).is_ok()
  }

  pub fn node(&self, id: NodeId) -> Result<&Node> {
    let slot = self
      .slots
      .get(id.index() as usize)
      .ok_or(GraphError::UnknownNode { index: id.index() })?;
    match &slot.node {
      Some(node) if slot.generation == id.generation() => Ok(node),
      _ => Err(GraphError::StaleNode {
        index: id.index(),
        generation: id.generation(),
      }),
    }
  }

  fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
    let slot = self
      .slots
      .get_mut(id.index() as usize)
      .ok_or(GraphError::UnknownNode { index: id.index() })?;
    match &mut slot.node {
      Some(node) if slot.generation == id.generation() => Ok(node),
      _ => Err(GraphError::StaleNode {
        index: id.index(),
        generation: id.generation(),
      }),
    }
  }

  #[inline]
  pub fn value(&self, id: NodeId) -> Result<f64> {
    self.node(id).map(Node::value)
  }

  #[inline]
  pub fn grad(&self, id: NodeId) -> Result<f64> {
    self.node(id).map(Node::grad)
  }

  /// Overwrite a node's value, e.g. for a parameter update. Nodes computed
  /// from it keep their old forward values
  pub fn set_value(&mut self, id: NodeId, value: f64) -> Result<()> {
    self.node_mut(id)?.value = value;
    Ok(())
  }

  pub fn zero_grad(&mut self, id: NodeId) -> Result<()> {
    self.node_mut(id)?.grad = 0.0;
    Ok(())
  }

  /// Reset the gradient of every node reachable from `root`
  pub fn zero_grads(&mut self, root: NodeId) -> Result<()> {
    for id in self.topological_order(root)? {
      self.node_mut(id)?.grad = 0.0;
    }
    Ok(())
  }

  /// Place a fully built node into the arena; nothing is written on failure
  fn alloc(&mut self, node: Node) -> Result<NodeId> {
    let id = match self.vacant.pop() {
      Some(index) => {
        let slot = &mut self.slots[index as usize];
        slot.node = Some(node);
        NodeId::new(index, slot.generation)
      }
      None => {
        let requested = self.slots.len() + 1;
        let index =
          u32::try_from(self.slots.len()).map_err(|_| GraphError::AllocationFailed { requested })?;
        self
          .slots
          .try_reserve(1)
          .map_err(|_| GraphError::AllocationFailed { requested })?;
        self.slots.push(Slot {
          generation: 0,
          node: Some(node),
        });
        NodeId::new(index, 0)
      }
    };
    self.live += 1;
    log::trace!("alloc node {id}");
    Ok(id)
  }

  /// Take a node out of the arena, invalidating every handle to it
  fn reclaim(&mut self, id: NodeId) -> Result<Node> {
    let stale = GraphError::StaleNode {
      index: id.index(),
      generation: id.generation(),
    };
    let slot = self
      .slots
      .get_mut(id.index() as usize)
      .ok_or(GraphError::UnknownNode { index: id.index() })?;
    if slot.generation != id.generation() {
      return Err(stale);
    }
    let node = slot.node.take().ok_or(stale)?;
    slot.generation = slot.generation.wrapping_add(1);
    self.vacant.push(id.index());
    self.live -= 1;
    log::trace!("reclaim node {id} ({} = {})", node.op, node.value);
    Ok(node)
  }

  /// Allocate an operation node and wire it to its (already validated) children
  fn push_op(
    &mut self,
    op: Op,
    value: f64,
    exponent: f64,
    children: SmallVec<[NodeId; 2]>,
  ) -> Result<NodeId> {
    let id = self.alloc(Node {
      value,
      grad: 0.0,
      exponent,
      children: children.clone(),
      op,
      edges: 0,
      handles: 1,
    })?;
    for child in children {
      self.node_mut(child)?.edges += 1;
    }
    Ok(id)
  }

  #[inline]
  fn unary(&mut self, op: Op, a: NodeId, exponent: f64, f: impl FnOnce(f64) -> f64) -> Result<NodeId> {
    let value = f(self.value(a)?);
    self.push_op(op, value, exponent, smallvec![a])
  }

  /// The same node on both sides collapses to a single stored child
  #[inline]
  fn binary(&mut self, op: Op, a: NodeId, b: NodeId, f: impl FnOnce(f64, f64) -> f64) -> Result<NodeId> {
    let value = f(self.value(a)?, self.value(b)?);
    let children = if a == b { smallvec![a] } else { smallvec![a, b] };
    self.push_op(op, value, 0.0, children)
  }

  /// Hand `temp` to `f`, then drop the builder's handle on it whether or not
  /// `f` succeeded; a temporary that got wired in survives through its parents
  fn with_temporary<G>(&mut self, temp: NodeId, f: G) -> Result<NodeId>
  where
    G: FnOnce(&mut Self, NodeId) -> Result<NodeId>,
  {
    let out = f(self, temp);
    self.release(temp)?;
    out
  }

  /// An input or constant: no children, no gradient rule
  pub fn leaf(&mut self, value: f64) -> Result<NodeId> {
    self.alloc(Node::leaf(value))
  }

  pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
    self.binary(Op::Add, a, b, |a, b| a + b)
  }

  pub fn multiply(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
    self.binary(Op::Multiply, a, b, |a, b| a * b)
  }

  /// `a + (-1 * b)`, or a single `Op::Subtract` node when fused
  pub fn subtract(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
    if self.options.fused {
      return self.binary(Op::Subtract, a, b, |a, b| a - b);
    }
    self.node(a)?;
    let negated = self.multiply_by_scalar(b, -1.0)?;
    self.with_temporary(negated, |graph, negated| graph.add(a, negated))
  }

  /// `a * b^-1`, or a single `Op::Divide` node when fused
  pub fn divide(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
    if self.options.fused {
      return self.binary(Op::Divide, a, b, |a, b| a / b);
    }
    self.node(a)?;
    let inverse = self.power(b, -1.0)?;
    self.with_temporary(inverse, |graph, inverse| graph.multiply(a, inverse))
  }

  pub fn power(&mut self, a: NodeId, exponent: f64) -> Result<NodeId> {
    self.unary(Op::Power, a, exponent, |a| a.powf(exponent))
  }

  pub fn exponential(&mut self, a: NodeId) -> Result<NodeId> {
    self.unary(Op::Exponential, a, 0.0, f64::exp)
  }

  pub fn natural_log(&mut self, a: NodeId) -> Result<NodeId> {
    self.unary(Op::Log, a, 0.0, f64::ln)
  }

  /// `(exp(-a) + 1)^-1`, or a single `Op::Sigmoid` node when fused
  pub fn sigmoid(&mut self, a: NodeId) -> Result<NodeId> {
    if self.options.fused {
      return self.unary(Op::Sigmoid, a, 0.0, |a| 1.0 / (1.0 + (-a).exp()));
    }
    let negated = self.multiply_by_scalar(a, -1.0)?;
    let exp = self.with_temporary(negated, |graph, negated| graph.exponential(negated))?;
    let shifted = self.with_temporary(exp, |graph, exp| graph.add_scalar(exp, 1.0))?;
    self.with_temporary(shifted, |graph, shifted| graph.power(shifted, -1.0))
  }

  /// `(e2x - 1) / (e2x + 1)` with `e2x = exp(2a)` shared by both sides, or a
  /// single `Op::Tanh` node when fused.
  ///
  /// The composed form needs `exp(2a)` to be finite: above `a` of about 354
  /// its value is NaN, and its gradient already drifts from `1 - tanh²` once
  /// `(e2x + 1)^-2` underflows (about 177). Use `fused` for larger inputs.
  pub fn tanh(&mut self, a: NodeId) -> Result<NodeId> {
    if self.options.fused {
      return self.unary(Op::Tanh, a, 0.0, f64::tanh);
    }
    let doubled = self.multiply_by_scalar(a, 2.0)?;
    let e2x = self.with_temporary(doubled, |graph, doubled| graph.exponential(doubled))?;
    self.with_temporary(e2x, |graph, e2x| {
      let numerator = graph.subtract_scalar(e2x, 1.0)?;
      graph.with_temporary(numerator, |graph, numerator| {
        let denominator = graph.add_scalar(e2x, 1.0)?;
        graph.with_temporary(denominator, |graph, denominator| {
          graph.divide(numerator, denominator)
        })
      })
    })
  }

  /// The constant becomes a leaf owned solely by the result
  pub fn add_scalar(&mut self, a: NodeId, constant: f64) -> Result<NodeId> {
    self.node(a)?;
    let constant = self.leaf(constant)?;
    self.with_temporary(constant, |graph, constant| graph.add(a, constant))
  }

  pub fn subtract_scalar(&mut self, a: NodeId, constant: f64) -> Result<NodeId> {
    self.add_scalar(a, -constant)
  }

  pub fn multiply_by_scalar(&mut self, a: NodeId, constant: f64) -> Result<NodeId> {
    self.node(a)?;
    let constant = self.leaf(constant)?;
    self.with_temporary(constant, |graph, constant| graph.multiply(a, constant))
  }

  /// Every node reachable from `root`, each one after all of its children
  pub fn topological_order(&self, root: NodeId) -> Result<Vec<NodeId>> {
    self.node(root)?;

    let mut stack = Vec::with_capacity(64);
    let mut order = Vec::with_capacity(64);
    let mut visited = FxHashSet::with_capacity(64);

    stack.push((root, false));

    // linear dfs, so long chains cannot blow the call stack...
    while let Some((id, children_done)) = stack.pop() {
      if children_done {
        // postorder
        order.push(id);
      } else if visited.insert(id) {
        // marker to emit the node once its children are out
        stack.push((id, true));
        // reversed so the first child is visited first
        for &child in self.node(id)?.children.iter().rev() {
          if !visited.contains(&child) {
            stack.push((child, false));
          }
        }
      }
    }

    Ok(order)
  }

  /// Seed `root` with gradient 1 and propagate to everything it depends on.
  ///
  /// Gradients accumulate: call [`Graph::zero_grads`] (or zero the leaves you
  /// care about) between passes over the same graph. Returns the number of
  /// nodes visited.
  pub fn backward(&mut self, root: NodeId) -> Result<usize> {
    let order = self.topological_order(root)?;
    self.node_mut(root)?.grad = 1.0;

    // every parent of a node comes after it in `order`, so by the time we
    // reach a node walking backwards its gradient is complete
    for &id in order.iter().rev() {
      // read phase
      let node = self.node(id)?;
      if node.is_leaf() {
        continue;
      }
      let mut operands: SmallVec<[Operand; 2]> = SmallVec::new();
      for &child in &node.children {
        operands.push(Operand {
          id: child,
          value: self.node(child)?.value,
        });
      }

      // compute phase
      let contributions: Contributions =
        pullback(node.op, node.value, node.exponent, node.grad, &operands)?;

      // write phase
      for (child, delta) in contributions {
        self.node_mut(child)?.grad += delta;
      }
    }

    log::debug!("backward from {root} visited {} nodes", order.len());
    Ok(order.len())
  }

  /// Add an external handle to `id`
  pub fn retain(&mut self, id: NodeId) -> Result<()> {
    self.node_mut(id)?.handles += 1;
    Ok(())
  }

  /// Drop an external handle to `id`.
  ///
  /// When that was the last holder the node is reclaimed, and each of its
  /// children loses one edge, cascading to any child left without holders.
  /// Returns how many nodes were reclaimed.
  pub fn release(&mut self, id: NodeId) -> Result<usize> {
    let node = self.node_mut(id)?;
    if node.handles == 0 {
      return Err(GraphError::NotHeld { index: id.index() });
    }
    node.handles -= 1;
    if node.holders() > 0 {
      return Ok(0);
    }

    let mut reclaimed = 0;
    let mut pending = vec![id];
    while let Some(id) = pending.pop() {
      let node = self.reclaim(id)?;
      reclaimed += 1;
      for child in node.children {
        let child_node = self.node_mut(child)?;
        child_node.edges -= 1;
        // only the transition to zero queues a child, so nothing is reclaimed twice
        if child_node.holders() == 0 {
          pending.push(child);
        }
      }
    }

    log::debug!("release of {id} reclaimed {reclaimed} nodes");
    Ok(reclaimed)
  }

  /// Reclaim every node at once; all outstanding handles become stale
  pub fn clear(&mut self) {
    for (index, slot) in self.slots.iter_mut().enumerate() {
      if slot.node.take().is_some() {
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(index as u32);
      }
    }
    log::debug!("cleared {} nodes", self.live);
    self.live = 0;
  }
}
