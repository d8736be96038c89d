#![allow(dead_code)]

use candle::Device;
use cnn_dssm_backend_candle::{CnnDssmConfig, EmbeddingMatrix};
use cnn_dssm_backend_core::{Batch, InputShape};

pub const VOCAB_SIZE: usize = 50;
pub const EMBEDDING_DIM: usize = 8;

pub fn shape() -> InputShape {
    InputShape {
        query_length: 6,
        document_length: 10,
        num_negatives: 3,
    }
}

/// Deterministic, non-degenerate word vectors
pub fn embeddings() -> EmbeddingMatrix {
    let values = (0..VOCAB_SIZE * EMBEDDING_DIM)
        .map(|i| ((i as f32) * 0.37).sin())
        .collect();
    EmbeddingMatrix::from_vec(values, VOCAB_SIZE, EMBEDDING_DIM, &Device::Cpu).unwrap()
}

pub fn small_config() -> CnnDssmConfig {
    let mut config = CnnDssmConfig::new(&embeddings(), shape());
    config.num_filters = 12;
    config.hidden_dims = 16;
    config
}

fn tokens(count: usize, offset: usize) -> Vec<u32> {
    (0..count)
        .map(|i| ((i * 7 + offset * 13) % (VOCAB_SIZE - 1) + 1) as u32)
        .collect()
}

/// `n` examples whose positive document repeats the query tokens
pub fn batch(n: usize, shape: &InputShape) -> Batch {
    let mut query = Vec::with_capacity(n * shape.query_length);
    let mut positive = Vec::with_capacity(n * shape.document_length);
    let mut negatives = vec![Vec::with_capacity(n * shape.document_length); shape.num_negatives];

    for example in 0..n {
        let q = tokens(shape.query_length, example);
        positive.extend(q.iter().cycle().take(shape.document_length));
        query.extend(q);
        for (j, negative) in negatives.iter_mut().enumerate() {
            negative.extend(tokens(shape.document_length, example + 11 * (j + 1)));
        }
    }

    Batch {
        query,
        positive,
        negatives,
        targets: vec![1.0; n],
    }
}
