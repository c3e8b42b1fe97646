/// Construction options for a [`crate::Graph`]
///
/// By default `subtract`, `divide`, `sigmoid` and `tanh` are expressed through
/// the primitive builders (extra intermediate nodes, shared subexpressions and
/// all). With `fused` set they emit a single node carrying its own gradient
/// rule instead; both forms agree on values and gradients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphOptions {
  pub fused: bool,
  /// Node slots to reserve up front
  pub capacity: usize,
}

impl GraphOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fused(mut self, fused: bool) -> Self {
    self.fused = fused;
    self
  }

  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }
}
