#[cfg(feature = "clap")]
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Fixed input shapes of the scoring graph.
///
/// These come from the static configuration and never change during a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub query_length: usize,
    pub document_length: usize,
    /// Number of negative documents per example (`J`)
    pub num_negatives: usize,
}

impl InputShape {
    /// Number of graph inputs: query, positive document and `J` negative documents
    pub fn num_inputs(&self) -> usize {
        2 + self.num_negatives
    }
}

/// One batch of training examples.
///
/// Every sequence is flattened row-major: `query` holds `len() * query_length` token indices,
/// `positive` and each entry of `negatives` hold `len() * document_length` token indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub query: Vec<u32>,
    pub positive: Vec<u32>,
    pub negatives: Vec<Vec<u32>>,
    pub targets: Vec<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that the batch lines up with the declared graph inputs
    pub fn validate(&self, shape: &InputShape) -> Result<(), BackendError> {
        let n = self.len();
        if n == 0 {
            return Err(BackendError::Batch("batch is empty".to_string()));
        }
        if self.query.len() != n * shape.query_length {
            return Err(BackendError::Batch(format!(
                "query input has {} token indices, expected {} ({n} x {})",
                self.query.len(),
                n * shape.query_length,
                shape.query_length
            )));
        }
        if self.positive.len() != n * shape.document_length {
            return Err(BackendError::Batch(format!(
                "positive document input has {} token indices, expected {} ({n} x {})",
                self.positive.len(),
                n * shape.document_length,
                shape.document_length
            )));
        }
        if self.negatives.len() != shape.num_negatives {
            return Err(BackendError::Batch(format!(
                "batch has {} negative document inputs, expected {}",
                self.negatives.len(),
                shape.num_negatives
            )));
        }
        for (i, negative) in self.negatives.iter().enumerate() {
            if negative.len() != n * shape.document_length {
                return Err(BackendError::Batch(format!(
                    "negative document input {} has {} token indices, expected {}",
                    i + 1,
                    negative.len(),
                    n * shape.document_length
                )));
            }
        }
        Ok(())
    }
}

/// Which split a data generator is serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Training,
    Validation,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Training => write!(f, "training"),
            Mode::Validation => write!(f, "validation"),
        }
    }
}

/// Pull-based source of batches.
///
/// Each call blocks until the next batch is ready. An exhausted generator returns a
/// [`BackendError::Batch`].
pub trait DataGenerator {
    fn mode(&self) -> Mode;

    fn next_batch(&mut self) -> Result<Batch, BackendError>;
}

impl<G: DataGenerator + ?Sized> DataGenerator for Box<G> {
    fn mode(&self) -> Mode {
        (**self).mode()
    }

    fn next_batch(&mut self) -> Result<Batch, BackendError> {
        (**self).next_batch()
    }
}

/// A trainable relevance model
pub trait Backend {
    fn input_shape(&self) -> InputShape;

    /// Forward + backward pass and one optimizer update. Returns the mean batch loss.
    fn train_step(&mut self, batch: &Batch) -> Result<f32, BackendError>;

    /// Mean batch loss without dropout and without updating parameters
    fn evaluate(&self, batch: &Batch) -> Result<f32, BackendError>;

    /// Probability of the positive document for every example in the batch
    fn predict(&self, batch: &Batch) -> Result<Vec<f32>, BackendError>;

    /// Persist the current weights only
    fn save_checkpoint(&self, path: &Path) -> Result<(), BackendError>;

    /// Persist the combined, architecture-only and weights-only artifacts into `dir`
    fn save(&self, dir: &Path) -> Result<(), BackendError>;
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(ValueEnum))]
pub enum DType {
    #[default]
    Float32,
    Float64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DType::Float32 => write!(f, "float32"),
            DType::Float64 => write!(f, "float64"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("Could not construct model: {0}")]
    Construction(String),
    #[error("Invalid batch: {0}")]
    Batch(String),
    #[error("Optimization step failed: {0}")]
    Step(String),
    #[error("Could not persist model: {0}")]
    Persist(String),
    #[error("Could not load model: {0}")]
    Load(String),
}

impl BackendError {
    /// Short name of the failing stage, used as a metric label
    pub fn stage(&self) -> &'static str {
        match self {
            BackendError::Construction(_) => "construction",
            BackendError::Batch(_) => "batch",
            BackendError::Step(_) => "step",
            BackendError::Persist(_) => "persistence",
            BackendError::Load(_) => "load",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> InputShape {
        InputShape {
            query_length: 2,
            document_length: 3,
            num_negatives: 2,
        }
    }

    fn batch() -> Batch {
        Batch {
            query: vec![1, 2, 3, 4],
            positive: vec![1, 2, 3, 4, 5, 6],
            negatives: vec![vec![7; 6], vec![8; 6]],
            targets: vec![1.0, 1.0],
        }
    }

    #[test]
    fn test_valid_batch() {
        let batch = batch();
        assert_eq!(batch.len(), 2);
        assert!(batch.validate(&shape()).is_ok());
        assert_eq!(shape().num_inputs(), 4);
    }

    #[test]
    fn test_wrong_negative_count() {
        let mut batch = batch();
        batch.negatives.pop();
        let err = batch.validate(&shape()).unwrap_err();
        assert_eq!(err.stage(), "batch");
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn test_wrong_document_length() {
        let mut batch = batch();
        batch.negatives[1].push(0);
        assert!(batch.validate(&shape()).is_err());

        let mut batch = self::batch();
        batch.positive.pop();
        assert!(batch.validate(&shape()).is_err());
    }

    #[test]
    fn test_empty_batch() {
        let batch = Batch {
            query: vec![],
            positive: vec![],
            negatives: vec![vec![], vec![]],
            targets: vec![],
        };
        assert!(batch.is_empty());
        assert!(batch.validate(&shape()).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Mode::Training.to_string(), "training");
        assert_eq!(Mode::Validation.to_string(), "validation");
        assert_eq!(DType::Float32.to_string(), "float32");
        assert_eq!(DType::default(), DType::Float32);
    }
}
