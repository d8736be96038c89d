use crate::layers::{ConvBranch, Initializer, Linear};
use crate::models::description::{LayerDescription, LayerKind};
use crate::models::CnnDssmConfig;
use candle::{Module, Result, Tensor};
use candle_nn::{Dropout, Embedding, VarMap};

/// Convolutional sequence encoder.
///
/// `embedding -> dropout -> [conv(f) -> relu -> maxpool -> flatten] for f in filter_sizes
/// -> concat -> dense -> dropout -> relu`
///
/// The query tower and the document tower are two instances with the same topology and
/// independent weights.
#[derive(Debug)]
pub struct ConvTower {
    embedding: Embedding,
    trainable_embedding: bool,
    input_dropout: (f32, Dropout),
    branches: Vec<ConvBranch>,
    projection: Linear,
    hidden_dropout: (f32, Dropout),
    sequence_length: usize,
    vocab_size: usize,
    embedding_dim: usize,

    span: tracing::Span,
}

impl ConvTower {
    /// `embeddings` is the lookup table this tower reads from; it is registered by the caller
    pub fn load(
        varmap: &VarMap,
        init: &mut Initializer,
        prefix: &str,
        embeddings: Tensor,
        trainable_embedding: bool,
        config: &CnnDssmConfig,
        sequence_length: usize,
    ) -> Result<Self> {
        let (vocab_size, embedding_dim) = embeddings.dims2()?;

        let branches = config
            .filter_sizes
            .iter()
            .map(|&filter_size| {
                ConvBranch::load(
                    varmap,
                    init,
                    &format!("{prefix}.conv-{filter_size}"),
                    embedding_dim,
                    config.num_filters,
                    filter_size,
                    sequence_length,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let projection = Linear::load(
            varmap,
            init,
            &format!("{prefix}.dense"),
            config.feature_dim(),
            config.hidden_dims,
        )?;

        let (p0, p1) = config.dropout_prob;

        Ok(Self {
            embedding: Embedding::new(embeddings, embedding_dim),
            trainable_embedding,
            input_dropout: (p0, Dropout::new(p0)),
            branches,
            projection,
            hidden_dropout: (p1, Dropout::new(p1)),
            sequence_length,
            vocab_size,
            embedding_dim,
            span: tracing::span!(tracing::Level::TRACE, "tower"),
        })
    }

    pub fn output_dim(&self) -> usize {
        self.projection.out_features()
    }

    pub fn branches(&self) -> &[ConvBranch] {
        &self.branches
    }

    /// `input_ids` is `(batch, sequence_length)`; returns the `(batch, hidden_dims)` semantic vectors
    pub fn forward(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let _enter = self.span.enter();

        let (_, length) = input_ids.dims2()?;
        if length != self.sequence_length {
            candle::bail!(
                "tower expects sequences of length {}, got {length}",
                self.sequence_length
            );
        }

        let x = self.embedding.forward(input_ids)?;
        let x = self.input_dropout.1.forward(&x, train)?;

        // (batch, length, dim) -> (batch, dim, length) for the convolutions
        let x = x.transpose(1, 2)?.contiguous()?;

        let mut features = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            features.push(branch.forward(&x)?);
        }
        let x = if features.len() > 1 {
            Tensor::cat(&features, 1)?
        } else {
            features.remove(0)
        };

        let x = self.projection.forward(&x)?;
        let x = self.hidden_dropout.1.forward(&x, train)?;
        x.relu()
    }

    pub(crate) fn describe(&self, prefix: &str) -> Vec<LayerDescription> {
        let length = self.sequence_length;
        let mut layers = vec![
            LayerDescription::new(
                format!("{prefix}.embedding"),
                LayerKind::Embedding {
                    vocab_size: self.vocab_size,
                    embedding_dim: self.embedding_dim,
                    trainable: self.trainable_embedding,
                },
                vec![length, self.embedding_dim],
            ),
            LayerDescription::new(
                format!("{prefix}.input_dropout"),
                LayerKind::Dropout {
                    rate: self.input_dropout.0,
                },
                vec![length, self.embedding_dim],
            ),
        ];

        let mut flattened = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            let f = branch.filter_size();
            let filters = branch.num_filters();
            layers.push(LayerDescription::new(
                format!("{prefix}.conv-{f}"),
                LayerKind::Conv1d {
                    filter_size: f,
                    num_filters: filters,
                    activation: "relu".to_string(),
                },
                vec![branch.pool_width(), filters],
            ));
            layers.push(LayerDescription::new(
                format!("{prefix}.maxpool-{f}"),
                LayerKind::MaxPool1d {
                    pool_width: branch.pool_width(),
                },
                vec![1, filters],
            ));
            let name = format!("{prefix}.flatten-{f}");
            layers.push(LayerDescription::new(
                name.clone(),
                LayerKind::Flatten,
                vec![filters],
            ));
            flattened.push(name);
        }

        let feature_dim = self
            .branches
            .iter()
            .map(ConvBranch::num_filters)
            .sum::<usize>();
        if flattened.len() > 1 {
            layers.push(LayerDescription::new(
                format!("{prefix}.concat"),
                LayerKind::Concatenate { inputs: flattened },
                vec![feature_dim],
            ));
        }

        let hidden = self.output_dim();
        layers.push(LayerDescription::new(
            format!("{prefix}.dense"),
            LayerKind::Dense { units: hidden },
            vec![hidden],
        ));
        layers.push(LayerDescription::new(
            format!("{prefix}.hidden_dropout"),
            LayerKind::Dropout {
                rate: self.hidden_dropout.0,
            },
            vec![hidden],
        ));
        layers.push(LayerDescription::new(
            format!("{prefix}.relu"),
            LayerKind::Activation {
                function: "relu".to_string(),
            },
            vec![hidden],
        ));
        layers
    }
}
