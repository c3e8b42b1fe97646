use std::fmt;

use smallvec::{smallvec, SmallVec};

use crate::{GraphError, NodeId, Result};

/// Operation tag of a node; `None` marks a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  None,
  Add,
  Subtract,
  Multiply,
  Divide,
  Exponential,
  Power,
  Log,
  Sigmoid,
  Tanh,
}

impl Op {
  #[inline]
  pub fn is_leaf(&self) -> bool {
    matches!(self, Op::None)
  }

  pub fn name(&self) -> &'static str {
    match self {
      Op::None => "leaf",
      Op::Add => "add",
      Op::Subtract => "sub",
      Op::Multiply => "mul",
      Op::Divide => "div",
      Op::Exponential => "exp",
      Op::Power => "pow",
      Op::Log => "log",
      Op::Sigmoid => "sigmoid",
      Op::Tanh => "tanh",
    }
  }
}

impl fmt::Display for Op {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A child as seen by its parent's gradient rule
#[derive(Debug, Clone, Copy)]
pub(crate) struct Operand {
  pub(crate) id: NodeId,
  pub(crate) value: f64,
}

/// Gradient contributions a single node deposits into its children
pub(crate) type Contributions = SmallVec<[(NodeId, f64); 2]>;

/// Local gradient rule of one node.
///
/// `value` and `exponent` are the node's own fields, `upstream` its finalized
/// gradient. A binary op applied to the same node twice stores a single child,
/// so the one-operand arms of the binary ops apply the two-edge derivative.
pub(crate) fn pullback(
  op: Op,
  value: f64,
  exponent: f64,
  upstream: f64,
  operands: &[Operand],
) -> Result<Contributions> {
  let g = upstream;
  let contributions = match (op, operands) {
    (Op::None, []) => SmallVec::new(),

    // d(x + x)/dx = 2
    (Op::Add, [a]) => smallvec![(a.id, 2.0 * g)],
    (Op::Add, [a, b]) => smallvec![(a.id, g), (b.id, g)],

    // x - x is constant
    (Op::Subtract, [_]) => SmallVec::new(),
    (Op::Subtract, [a, b]) => smallvec![(a.id, g), (b.id, -g)],

    // d(x * x)/dx = 2x
    (Op::Multiply, [a]) => smallvec![(a.id, 2.0 * a.value * g)],
    (Op::Multiply, [a, b]) => smallvec![(a.id, b.value * g), (b.id, a.value * g)],

    // x / x is constant
    (Op::Divide, [_]) => SmallVec::new(),
    (Op::Divide, [a, b]) => smallvec![
      (a.id, g / b.value),
      (b.id, -g * a.value / (b.value * b.value))
    ],

    (Op::Power, [a]) => smallvec![(a.id, exponent * a.value.powf(exponent - 1.0) * g)],
    (Op::Exponential, [a]) => smallvec![(a.id, value * g)],
    (Op::Log, [a]) => smallvec![(a.id, g / a.value)],
    (Op::Sigmoid, [a]) => smallvec![(a.id, g * value * (1.0 - value))],
    // value is already tanh(a)
    (Op::Tanh, [a]) => smallvec![(a.id, g * (1.0 - value * value))],

    (op, operands) => {
      return Err(GraphError::ArityMismatch {
        op,
        children: operands.len(),
      })
    }
  };
  Ok(contributions)
}
