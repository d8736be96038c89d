use crate::layers::{pool_width, EmbeddingMatrix};
use candle::Result;
use cnn_dssm_backend_core::{DType, InputShape};
use serde::{Deserialize, Serialize};

fn default_trainable_embeddings() -> bool {
    true
}

/// Hyper-parameters of a CNN-DSSM model.
///
/// Serialized verbatim into the architecture artifact so a model can be rebuilt from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CnnDssmConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub query_length: usize,
    pub document_length: usize,
    /// Negative documents per example (`J`)
    pub num_negatives: usize,
    pub filter_sizes: Vec<usize>,
    pub num_filters: usize,
    pub hidden_dims: usize,
    /// Dropout after the embedding lookup and after the dense projection
    pub dropout_prob: (f32, f32),
    /// Softmax temperature applied to the similarity vector
    pub gamma: f64,
    #[serde(default = "default_trainable_embeddings")]
    pub trainable_embeddings: bool,
    #[serde(default)]
    pub dtype: DType,
}

impl CnnDssmConfig {
    /// Design defaults: filter widths {3, 4}, 150 filters, 150 hidden units,
    /// dropout (0.25, 0.5) and a temperature of 10
    pub fn new(embeddings: &EmbeddingMatrix, shape: InputShape) -> Self {
        Self {
            vocab_size: embeddings.vocab_size(),
            embedding_dim: embeddings.embedding_dim(),
            query_length: shape.query_length,
            document_length: shape.document_length,
            num_negatives: shape.num_negatives,
            filter_sizes: vec![3, 4],
            num_filters: 150,
            hidden_dims: 150,
            dropout_prob: (0.25, 0.5),
            gamma: 10.0,
            trainable_embeddings: true,
            dtype: DType::Float32,
        }
    }

    pub fn input_shape(&self) -> InputShape {
        InputShape {
            query_length: self.query_length,
            document_length: self.document_length,
            num_negatives: self.num_negatives,
        }
    }

    /// Width of the concatenated branch features fed to the dense projection
    pub fn feature_dim(&self) -> usize {
        self.num_filters * self.filter_sizes.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 || self.embedding_dim == 0 {
            candle::bail!("embedding matrix must be non-empty");
        }
        if self.filter_sizes.is_empty() {
            candle::bail!("at least one filter size is required");
        }
        if self.num_filters == 0 || self.hidden_dims == 0 {
            candle::bail!("`num_filters` and `hidden_dims` must be positive");
        }
        if self.num_negatives == 0 {
            candle::bail!("at least one negative document is required");
        }
        let (p0, p1) = self.dropout_prob;
        if !(0.0..1.0).contains(&p0) || !(0.0..1.0).contains(&p1) {
            candle::bail!("dropout probabilities must be in [0, 1), got ({p0}, {p1})");
        }
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            candle::bail!("gamma must be a positive finite number, got {}", self.gamma);
        }
        for &filter_size in &self.filter_sizes {
            pool_width(self.query_length, filter_size)?;
            pool_width(self.document_length, filter_size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::Device;

    fn config() -> CnnDssmConfig {
        let embeddings = EmbeddingMatrix::from_vec(vec![0.0; 20], 10, 2, &Device::Cpu).unwrap();
        CnnDssmConfig::new(
            &embeddings,
            InputShape {
                query_length: 5,
                document_length: 8,
                num_negatives: 3,
            },
        )
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.vocab_size, 10);
        assert_eq!(config.feature_dim(), 300);
        assert_eq!(config.input_shape().num_inputs(), 5);
    }

    #[test]
    fn test_filter_wider_than_sequence() {
        let mut config = config();
        config.query_length = 3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("non-positive"));
    }

    #[test]
    fn test_invalid_hyper_parameters() {
        let mut config = config();
        config.dropout_prob = (1.0, 0.5);
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.filter_sizes.clear();
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.num_negatives = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let json = serde_json::json!({
            "vocab_size": 10,
            "embedding_dim": 2,
            "query_length": 5,
            "document_length": 8,
            "num_negatives": 3,
            "filter_sizes": [3],
            "num_filters": 4,
            "hidden_dims": 6,
            "dropout_prob": [0.25, 0.5],
            "gamma": 10.0
        });
        let config: CnnDssmConfig = serde_json::from_value(json).unwrap();
        assert!(config.trainable_embeddings);
        assert_eq!(config.dtype, DType::Float32);
    }
}
