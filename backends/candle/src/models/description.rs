use crate::models::CnnDssmConfig;
use crate::OptimizerConfig;
use serde::{Deserialize, Serialize};

/// Human-readable description of the scoring graph.
///
/// This is the content of the architecture artifact. It carries everything needed to rebuild
/// the model topology; the weights are stored separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub class_name: String,
    pub format_version: u32,
    pub config: CnnDssmConfig,
    pub optimizer: OptimizerConfig,
    pub inputs: Vec<InputDescription>,
    pub layers: Vec<LayerDescription>,
    pub parameters: Vec<ParameterDescription>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDescription {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

impl InputDescription {
    pub(crate) fn tokens(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            shape: vec![length],
            dtype: "u32".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescription {
    pub name: String,
    #[serde(flatten)]
    pub kind: LayerKind,
    /// Per-example output shape, batch dimension excluded
    pub output_shape: Vec<usize>,
}

impl LayerDescription {
    pub(crate) fn new(name: impl Into<String>, kind: LayerKind, output_shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            kind,
            output_shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    Embedding {
        vocab_size: usize,
        embedding_dim: usize,
        trainable: bool,
    },
    Dropout {
        rate: f32,
    },
    Conv1d {
        filter_size: usize,
        num_filters: usize,
        activation: String,
    },
    MaxPool1d {
        pool_width: usize,
    },
    Flatten,
    Concatenate {
        inputs: Vec<String>,
    },
    Dense {
        units: usize,
    },
    Activation {
        function: String,
    },
    CosineSimilarity {
        query: String,
        document: String,
    },
    Scale {
        factor: f64,
    },
    PositiveSoftmax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescription {
    pub name: String,
    pub shape: Vec<usize>,
    pub trainable: bool,
}
