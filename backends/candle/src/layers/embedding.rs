use candle::{DType, Device, Result, Tensor};
use std::path::Path;

/// Pre-trained word vectors shared by both towers, `[vocab_size, embedding_dim]`.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    weight: Tensor,
}

impl EmbeddingMatrix {
    pub fn new(weight: Tensor) -> Result<Self> {
        let (vocab_size, embedding_dim) = match weight.dims() {
            &[v, e] => (v, e),
            dims => candle::bail!("embedding matrix must be 2-D, got shape {dims:?}"),
        };
        if vocab_size == 0 || embedding_dim == 0 {
            candle::bail!("embedding matrix is empty: [{vocab_size}, {embedding_dim}]");
        }
        Ok(Self { weight })
    }

    pub fn from_vec(
        values: Vec<f32>,
        vocab_size: usize,
        embedding_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        Self::new(Tensor::from_vec(values, (vocab_size, embedding_dim), device)?)
    }

    /// Load the `embeddings` tensor (or `weight`) from a safetensors file
    pub fn from_safetensors(path: &Path, dtype: DType, device: &Device) -> Result<Self> {
        let mut tensors = candle::safetensors::load(path, device)?;
        let weight = match tensors.remove("embeddings") {
            Some(weight) => weight,
            None => match tensors.remove("weight") {
                Some(weight) => weight,
                None => candle::bail!(
                    "{} contains neither an `embeddings` nor a `weight` tensor",
                    path.display()
                ),
            },
        };
        Self::new(weight.to_dtype(dtype)?)
    }

    pub fn zeros(vocab_size: usize, embedding_dim: usize, dtype: DType, device: &Device) -> Result<Self> {
        Self::new(Tensor::zeros((vocab_size, embedding_dim), dtype, device)?)
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_checks() -> Result<()> {
        let device = Device::Cpu;
        let matrix = EmbeddingMatrix::from_vec(vec![0.0; 12], 4, 3, &device)?;
        assert_eq!(matrix.vocab_size(), 4);
        assert_eq!(matrix.embedding_dim(), 3);

        assert!(EmbeddingMatrix::new(Tensor::zeros(12, DType::F32, &device)?).is_err());
        assert!(EmbeddingMatrix::new(Tensor::zeros((0, 3), DType::F32, &device)?).is_err());
        Ok(())
    }
}
