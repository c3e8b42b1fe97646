//!
//! # dagrad
//!
//! ## Core API
//!
//! Reverse-mode automatic differentiation over scalar computation graphs.
//! Build nodes through a [`Graph`], call [`Graph::backward`] on a root and read
//! every reachable node's gradient back out. Node lifetimes are tracked by
//! holder counts, so a graph can be built, differentiated and released step
//! after step without leaking.
//!
//! Optional features add small neural networks (`nn`) and Graphviz export
//! (`viz`) on top of the core.
//!

pub use lib_dagrad_core::*;

#[cfg(feature = "nn")]
pub use lib_dagrad_nn as nn;

#[cfg(feature = "viz")]
pub use lib_dagrad_viz as viz;
