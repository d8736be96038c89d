pub mod checkpoint;
pub mod generator;
pub mod train;

use cnn_dssm_backend_core::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Invalid training configuration: {0}")]
    Config(String),
    #[error("Epoch {epoch}: {source}")]
    Epoch {
        epoch: usize,
        #[source]
        source: BackendError,
    },
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Could not read training data: {0}")]
    Data(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not serialize training history: {0}")]
    History(#[from] serde_json::Error),
}

impl TrainError {
    /// Short name of the failing stage, used as a metric label
    pub fn stage(&self) -> &'static str {
        match self {
            TrainError::Config(_) => "construction",
            TrainError::Epoch { source, .. } | TrainError::Backend(source) => source.stage(),
            TrainError::Data(_) => "batch",
            TrainError::Io(_) | TrainError::History(_) => "persistence",
        }
    }
}
