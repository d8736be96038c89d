use crate::layers::{register, EmbeddingMatrix, Initializer};
use crate::models::description::{InputDescription, LayerDescription, LayerKind};
use crate::models::{CnnDssmConfig, ConvTower};
use crate::scoring::{positive_probability, scale, similarity_vector};
use candle::{Device, Result, Tensor};
use candle_nn::VarMap;
use cnn_dssm_backend_core::{Batch, InputShape};

/// Variable holding the lookup table when both towers share one frozen copy
pub const SHARED_EMBEDDINGS: &str = "embeddings.weight";

/// Token-index tensors for every graph input of one batch
#[derive(Debug, Clone)]
pub struct DssmInputs {
    /// `(batch, query_length)`
    pub query: Tensor,
    /// `(batch, document_length)`
    pub positive: Tensor,
    /// `J` tensors of `(batch, document_length)`
    pub negatives: Vec<Tensor>,
}

impl DssmInputs {
    pub fn from_batch(batch: &Batch, shape: &InputShape, device: &Device) -> Result<Self> {
        let n = batch.len();
        let query = Tensor::from_slice(&batch.query, (n, shape.query_length), device)?;
        let positive = Tensor::from_slice(&batch.positive, (n, shape.document_length), device)?;
        let negatives = batch
            .negatives
            .iter()
            .map(|negative| Tensor::from_slice(negative, (n, shape.document_length), device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            query,
            positive,
            negatives,
        })
    }

    pub fn batch_size(&self) -> Result<usize> {
        self.query.dim(0)
    }
}

/// Twin convolutional towers scored with a temperature softmax over the candidate set
#[derive(Debug)]
pub struct CnnDssm {
    query_tower: ConvTower,
    document_tower: ConvTower,
    config: CnnDssmConfig,

    span: tracing::Span,
}

impl CnnDssm {
    pub fn load(
        varmap: &VarMap,
        init: &mut Initializer,
        config: &CnnDssmConfig,
        embeddings: &EmbeddingMatrix,
    ) -> Result<Self> {
        config.validate()?;
        if embeddings.vocab_size() != config.vocab_size
            || embeddings.embedding_dim() != config.embedding_dim
        {
            candle::bail!(
                "embedding matrix is [{}, {}] but the model expects [{}, {}]",
                embeddings.vocab_size(),
                embeddings.embedding_dim(),
                config.vocab_size,
                config.embedding_dim
            );
        }
        let weight = embeddings.weight().to_dtype(init.dtype())?;

        let (query_embeddings, document_embeddings) = if config.trainable_embeddings {
            // Each tower fine-tunes its own copy of the shared initial table
            (
                register(varmap, "query_tower.embedding.weight", &weight)?,
                register(varmap, "document_tower.embedding.weight", &weight)?,
            )
        } else {
            let shared = register(varmap, SHARED_EMBEDDINGS, &weight)?.detach();
            (shared.clone(), shared)
        };

        let query_tower = ConvTower::load(
            varmap,
            init,
            "query_tower",
            query_embeddings,
            config.trainable_embeddings,
            config,
            config.query_length,
        )?;
        let document_tower = ConvTower::load(
            varmap,
            init,
            "document_tower",
            document_embeddings,
            config.trainable_embeddings,
            config,
            config.document_length,
        )?;

        Ok(Self {
            query_tower,
            document_tower,
            config: config.clone(),
            span: tracing::span!(tracing::Level::TRACE, "cnn-dssm"),
        })
    }

    pub fn config(&self) -> &CnnDssmConfig {
        &self.config
    }

    /// Names of the variables the optimizer must leave untouched
    pub fn frozen_variables(&self) -> Vec<&'static str> {
        if self.config.trainable_embeddings {
            vec![]
        } else {
            vec![SHARED_EMBEDDINGS]
        }
    }

    /// `(batch, J + 1)` similarities, positive first
    pub fn similarities(&self, inputs: &DssmInputs, train: bool) -> Result<Tensor> {
        let _enter = self.span.enter();

        if inputs.negatives.len() != self.config.num_negatives {
            candle::bail!(
                "expected {} negative documents, got {}",
                self.config.num_negatives,
                inputs.negatives.len()
            );
        }
        let batch_size = inputs.batch_size()?;

        let query = self.query_tower.forward(&inputs.query, train)?;

        // Positive and negatives go through the document tower as one stacked batch
        let mut documents = Vec::with_capacity(inputs.negatives.len() + 1);
        documents.push(&inputs.positive);
        documents.extend(inputs.negatives.iter());
        let documents = Tensor::cat(&documents, 0)?;
        let documents = self.document_tower.forward(&documents, train)?;

        let positive = documents.narrow(0, 0, batch_size)?;
        let negatives = (1..=inputs.negatives.len())
            .map(|i| documents.narrow(0, i * batch_size, batch_size))
            .collect::<Result<Vec<_>>>()?;

        similarity_vector(&query, &positive, &negatives)
    }

    /// `(batch, 1)` probability that the positive document is the relevant one
    pub fn forward(&self, inputs: &DssmInputs, train: bool) -> Result<Tensor> {
        let similarities = self.similarities(inputs, train)?;
        let _enter = self.span.enter();

        positive_probability(&scale(&similarities, self.config.gamma)?)
    }

    pub(crate) fn describe_inputs(&self) -> Vec<InputDescription> {
        let mut inputs = vec![
            InputDescription::tokens("query", self.config.query_length),
            InputDescription::tokens("positive_document", self.config.document_length),
        ];
        for i in 1..=self.config.num_negatives {
            inputs.push(InputDescription::tokens(
                format!("negative_document_{i}"),
                self.config.document_length,
            ));
        }
        inputs
    }

    pub(crate) fn describe_layers(&self) -> Vec<LayerDescription> {
        let mut layers = self.query_tower.describe("query_tower");
        layers.extend(self.document_tower.describe("document_tower"));

        let candidates = self.config.num_negatives + 1;
        layers.push(LayerDescription::new(
            "similarity",
            LayerKind::CosineSimilarity {
                query: "query_tower.relu".to_string(),
                document: "document_tower.relu".to_string(),
            },
            vec![candidates],
        ));
        layers.push(LayerDescription::new(
            "gamma",
            LayerKind::Scale {
                factor: self.config.gamma,
            },
            vec![candidates],
        ));
        layers.push(LayerDescription::new(
            "probability",
            LayerKind::PositiveSoftmax,
            vec![1],
        ));
        layers
    }
}
