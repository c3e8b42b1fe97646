use lib_dagrad_core::GraphError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NnError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("Expected {expected} inputs, got {actual}")]
  InputMismatch { expected: usize, actual: usize },

  #[error("Expected {expected} targets, got {actual}")]
  TargetMismatch { expected: usize, actual: usize },

  #[error("Invalid network shape: {0}")]
  InvalidShape(String),
}

pub type Result<T> = std::result::Result<T, NnError>;
