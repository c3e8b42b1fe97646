//!
//! # dagrad-viz
//!
//! Graphviz rendering of the subgraph reachable from a root node.
//!
//! ```
//! use lib_dagrad_core::Graph;
//! use lib_dagrad_viz::DotExt;
//!
//! let mut graph = Graph::new();
//! let x = graph.leaf(2.0).unwrap();
//! let y = graph.exponential(x).unwrap();
//!
//! let mut out = Vec::new();
//! graph.dot_builder(y).show_values(true).dot(&mut out).unwrap();
//! assert!(String::from_utf8(out).unwrap().starts_with("digraph"));
//! ```
//!

use std::io::{self, Write};

use lib_dagrad_core::{Graph, GraphError, NodeId, Op};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VizError {
  #[error("Failed to write dot output: {0}")]
  Io(#[from] io::Error),

  #[error(transparent)]
  Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, VizError>;

pub trait DotExt {
  fn dot_builder(&self, root: NodeId) -> DotBuilder<'_>;
}

impl DotExt for Graph {
  fn dot_builder(&self, root: NodeId) -> DotBuilder<'_> {
    DotBuilder::new(self, root)
  }
}

/// Renders one record per reachable node and one edge per stored child,
/// pointing from child to parent
#[derive(Debug, Clone)]
pub struct DotBuilder<'g> {
  graph: &'g Graph,
  root: NodeId,
  show_values: bool,
  show_grads: bool,
  rankdir: String,
}

impl<'g> DotBuilder<'g> {
  pub fn new(graph: &'g Graph, root: NodeId) -> Self {
    Self {
      graph,
      root,
      show_values: false,
      show_grads: false,
      rankdir: "LR".to_string(),
    }
  }

  pub fn show_values(mut self, show: bool) -> Self {
    self.show_values = show;
    self
  }

  pub fn show_grads(mut self, show: bool) -> Self {
    self.show_grads = show;
    self
  }

  /// Graphviz `rankdir`, e.g. `"LR"` or `"TB"`
  pub fn rankdir(mut self, rankdir: &str) -> Self {
    self.rankdir = rankdir.to_string();
    self
  }

  pub fn dot(&self, out: &mut impl Write) -> Result<()> {
    let order = self.graph.topological_order(self.root)?;

    writeln!(out, "digraph dagrad {{")?;
    writeln!(out, "  rankdir={};", self.rankdir)?;
    writeln!(out, "  node [shape=record];")?;

    for &id in &order {
      writeln!(out, "  {} [label=\"{}\"];", key(id), self.label(id)?)?;
    }

    for &id in &order {
      let node = self.graph.node(id)?;
      // a binary op applied to one node stores it once but still has two inputs
      let repeat = if node.children().len() == 1 && is_binary(node.op()) {
        2
      } else {
        1
      };
      for &child in node.children() {
        for _ in 0..repeat {
          writeln!(out, "  {} -> {};", key(child), key(id))?;
        }
      }
    }

    writeln!(out, "}}")?;
    Ok(())
  }

  fn label(&self, id: NodeId) -> Result<String> {
    let node = self.graph.node(id)?;
    let mut fields = vec![node.op().name().to_string()];
    if self.show_values {
      fields.push(format!("value={:.4}", node.value()));
    }
    if self.show_grads {
      fields.push(format!("grad={:.4}", node.grad()));
    }
    Ok(fields.join("|"))
  }
}

fn is_binary(op: Op) -> bool {
  matches!(op, Op::Add | Op::Subtract | Op::Multiply | Op::Divide)
}

#[inline]
fn key(id: NodeId) -> String {
  format!("n{}_{}", id.index(), id.generation())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn render(builder: DotBuilder<'_>) -> String {
    let mut out = Vec::new();
    builder.dot(&mut out).unwrap();
    String::from_utf8(out).unwrap()
  }

  fn edges(dot: &str) -> usize {
    dot.lines().filter(|line| line.contains("->")).count()
  }

  #[test]
  fn renders_reachable_nodes_and_edges() {
    let mut graph = Graph::new();
    let x = graph.leaf(2.0).unwrap();
    let y = graph.leaf(3.0).unwrap();
    let z = graph.multiply(x, y).unwrap();
    let unrelated = graph.leaf(9.0).unwrap();

    let dot = render(graph.dot_builder(z));
    assert!(dot.starts_with("digraph dagrad {"));
    assert!(dot.trim_end().ends_with('}'));
    assert_eq!(dot.matches("[label=").count(), 3);
    assert_eq!(edges(&dot), 2);
    assert!(dot.contains(&format!("{} -> {};", key(x), key(z))));
    assert!(!dot.contains(&key(unrelated)));
  }

  #[test]
  fn self_applied_edge_is_doubled() {
    let mut graph = Graph::new();
    let x = graph.leaf(2.0).unwrap();
    let sq = graph.multiply(x, x).unwrap();
    let dot = render(graph.dot_builder(sq));
    assert_eq!(edges(&dot), 2);

    let e = graph.exponential(x).unwrap();
    assert_eq!(edges(&render(graph.dot_builder(e))), 1);
  }

  #[test]
  fn labels_follow_flags() {
    let mut graph = Graph::new();
    let x = graph.leaf(0.5).unwrap();
    let e = graph.exponential(x).unwrap();
    graph.backward(e).unwrap();

    let bare = render(graph.dot_builder(e));
    assert!(bare.contains("[label=\"exp\"]"));
    assert!(!bare.contains("value="));

    let full = render(graph.dot_builder(e).show_values(true).show_grads(true).rankdir("TB"));
    assert!(full.contains("rankdir=TB;"));
    assert!(full.contains("[label=\"leaf|value=0.5000|grad=1.6487\"]"));
  }

  #[test]
  fn stale_root_is_an_error() {
    let mut graph = Graph::new();
    let x = graph.leaf(1.0).unwrap();
    graph.release(x).unwrap();
    let err = graph.dot_builder(x).dot(&mut Vec::new()).unwrap_err();
    assert!(matches!(err, VizError::Graph(GraphError::StaleNode { .. })));
  }
}
