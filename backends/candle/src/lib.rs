mod artifacts;
mod layers;
mod models;
pub mod scoring;

pub use crate::artifacts::{
    read_architecture, ARCHITECTURE_FILE, ARCHITECTURE_KEY, COMBINED_FILE, WEIGHTS_FILE,
};
pub use crate::layers::{pool_width, ConvBranch, EmbeddingMatrix, Initializer};
pub use crate::models::{
    CnnDssm, CnnDssmConfig, ConvTower, DssmInputs, InputDescription, LayerDescription, LayerKind,
    ModelDescription, ParameterDescription, SHARED_EMBEDDINGS,
};

use crate::artifacts::{named_tensors, read_combined, restore_weights};
use crate::scoring::binary_cross_entropy;
use candle::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use cnn_dssm_backend_core::{Backend, BackendError, Batch, DType, InputShape};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Adam hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl OptimizerConfig {
    fn params(&self) -> ParamsAdamW {
        ParamsAdamW {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: 0.0,
        }
    }
}

pub fn candle_dtype(dtype: DType) -> candle::DType {
    match dtype {
        DType::Float32 => candle::DType::F32,
        DType::Float64 => candle::DType::F64,
    }
}

pub struct CandleBackend {
    model: CnnDssm,
    varmap: VarMap,
    optimizer: AdamW,
    optimizer_config: OptimizerConfig,
    device: Device,
}

impl CandleBackend {
    /// Build a freshly initialised model around an externally supplied embedding matrix
    pub fn new(
        config: CnnDssmConfig,
        embeddings: &EmbeddingMatrix,
        optimizer_config: OptimizerConfig,
        seed: u64,
        device: &Device,
    ) -> Result<Self, BackendError> {
        let varmap = VarMap::new();
        let mut init = Initializer::new(seed, candle_dtype(config.dtype), device);
        let model = CnnDssm::load(&varmap, &mut init, &config, embeddings).c()?;

        let num_parameters: usize = varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum();
        tracing::info!(
            "Built CNN-DSSM with {num_parameters} parameters ({} filters x {:?}, {} hidden units, J = {})",
            config.num_filters,
            config.filter_sizes,
            config.hidden_dims,
            config.num_negatives
        );

        Self::with_model(model, varmap, optimizer_config, device)
    }

    /// Rebuild a model from an architecture artifact and a weights artifact
    pub fn from_artifacts(
        architecture: &Path,
        weights: &Path,
        device: &Device,
    ) -> Result<Self, BackendError> {
        let description = read_architecture(architecture).l()?;
        let tensors = candle::safetensors::load(weights, device).l()?;
        Self::restore(description, tensors, device)
    }

    /// Rebuild a model from a combined artifact
    pub fn from_combined(path: &Path, device: &Device) -> Result<Self, BackendError> {
        let (description, tensors) = read_combined(path, device).l()?;
        Self::restore(description, tensors, device)
    }

    fn restore(
        description: ModelDescription,
        tensors: HashMap<String, Tensor>,
        device: &Device,
    ) -> Result<Self, BackendError> {
        let config = description.config;
        let dtype = candle_dtype(config.dtype);

        // Topology first, then every variable is overwritten with the stored values
        let varmap = VarMap::new();
        let mut init = Initializer::new(0, dtype, device);
        let placeholder =
            EmbeddingMatrix::zeros(config.vocab_size, config.embedding_dim, dtype, device).l()?;
        let model = CnnDssm::load(&varmap, &mut init, &config, &placeholder).l()?;
        restore_weights(&varmap, tensors).l()?;

        tracing::info!("Restored CNN-DSSM from artifacts");
        Self::with_model(model, varmap, description.optimizer, device)
    }

    fn with_model(
        model: CnnDssm,
        varmap: VarMap,
        optimizer_config: OptimizerConfig,
        device: &Device,
    ) -> Result<Self, BackendError> {
        let frozen = model.frozen_variables();
        let trainable = {
            let data = varmap
                .data()
                .lock()
                .map_err(|_| BackendError::Construction("variable map lock is poisoned".into()))?;
            data.iter()
                .filter(|(name, _)| !frozen.contains(&name.as_str()))
                .map(|(_, var)| var.clone())
                .collect::<Vec<_>>()
        };
        let optimizer = AdamW::new(trainable, optimizer_config.params()).c()?;

        Ok(Self {
            model,
            varmap,
            optimizer,
            optimizer_config,
            device: device.clone(),
        })
    }

    pub fn model(&self) -> &CnnDssm {
        &self.model
    }

    pub fn config(&self) -> &CnnDssmConfig {
        self.model.config()
    }

    /// Architecture description of the live model
    pub fn describe(&self) -> Result<ModelDescription, BackendError> {
        let frozen = self.model.frozen_variables();
        let parameters = named_tensors(&self.varmap)
            .p()?
            .into_iter()
            .map(|(name, tensor)| ParameterDescription {
                trainable: !frozen.contains(&name.as_str()),
                name,
                shape: tensor.dims().to_vec(),
            })
            .collect();

        Ok(ModelDescription {
            class_name: "CnnDssm".to_string(),
            format_version: 1,
            config: self.model.config().clone(),
            optimizer: self.optimizer_config,
            inputs: self.model.describe_inputs(),
            layers: self.model.describe_layers(),
            parameters,
            output: "probability".to_string(),
        })
    }

    /// Raw `(batch, J + 1)` similarity vectors with dropout disabled
    pub fn similarities(&self, batch: &Batch) -> Result<Vec<Vec<f32>>, BackendError> {
        let inputs = self.inputs(batch)?;
        let similarities = self.model.similarities(&inputs, false).e()?;
        similarities
            .to_dtype(candle::DType::F32)
            .e()?
            .to_vec2::<f32>()
            .e()
    }

    fn inputs(&self, batch: &Batch) -> Result<DssmInputs, BackendError> {
        batch.validate(&self.input_shape())?;
        let vocab_size = self.model.config().vocab_size;
        let out_of_range = batch
            .negatives
            .iter()
            .chain([&batch.query, &batch.positive])
            .flat_map(|ids| ids.iter())
            .find(|&&id| id as usize >= vocab_size);
        if let Some(id) = out_of_range {
            return Err(BackendError::Batch(format!(
                "token index {id} is outside the vocabulary of size {vocab_size}"
            )));
        }
        DssmInputs::from_batch(batch, &self.input_shape(), &self.device).e()
    }

    fn targets(&self, batch: &Batch) -> Result<Tensor, BackendError> {
        Tensor::from_slice(&batch.targets, (batch.len(), 1), &self.device)
            .and_then(|t| t.to_dtype(candle_dtype(self.model.config().dtype)))
            .e()
    }
}

impl Backend for CandleBackend {
    fn input_shape(&self) -> InputShape {
        self.model.config().input_shape()
    }

    fn train_step(&mut self, batch: &Batch) -> Result<f32, BackendError> {
        let inputs = self.inputs(batch)?;
        let targets = self.targets(batch)?;

        let probabilities = self.model.forward(&inputs, true).s()?;
        let loss = binary_cross_entropy(&probabilities, &targets).s()?;
        self.optimizer.backward_step(&loss).s()?;

        let loss = loss.to_dtype(candle::DType::F32).s()?.to_scalar::<f32>().s()?;
        if !loss.is_finite() {
            return Err(BackendError::Step(format!("loss is not finite: {loss}")));
        }
        Ok(loss)
    }

    fn evaluate(&self, batch: &Batch) -> Result<f32, BackendError> {
        let inputs = self.inputs(batch)?;
        let targets = self.targets(batch)?;

        let probabilities = self.model.forward(&inputs, false).e()?;
        binary_cross_entropy(&probabilities, &targets)
            .and_then(|loss| loss.to_dtype(candle::DType::F32))
            .and_then(|loss| loss.to_scalar::<f32>())
            .e()
    }

    fn predict(&self, batch: &Batch) -> Result<Vec<f32>, BackendError> {
        let inputs = self.inputs(batch)?;
        let probabilities = self.model.forward(&inputs, false).e()?;
        probabilities
            .to_dtype(candle::DType::F32)
            .and_then(|p| p.flatten_all())
            .and_then(|p| p.to_vec1::<f32>())
            .e()
    }

    fn save_checkpoint(&self, path: &Path) -> Result<(), BackendError> {
        artifacts::write_weights(&self.varmap, path).p()
    }

    fn save(&self, dir: &Path) -> Result<(), BackendError> {
        std::fs::create_dir_all(dir).map_err(|err| BackendError::Persist(err.to_string()))?;
        let description = self.describe()?;

        artifacts::write_combined(&self.varmap, &description, &dir.join(COMBINED_FILE)).p()?;
        artifacts::write_architecture(&description, &dir.join(ARCHITECTURE_FILE)).p()?;
        artifacts::write_weights(&self.varmap, &dir.join(WEIGHTS_FILE)).p()?;
        Ok(())
    }
}

/// Tags a candle error with the stage it happened in
pub trait WrapErr<O> {
    /// Model construction
    fn c(self) -> Result<O, BackendError>;
    /// Forward pass outside of an optimization step
    fn e(self) -> Result<O, BackendError>;
    /// Optimization step
    fn s(self) -> Result<O, BackendError>;
    /// Persistence
    fn p(self) -> Result<O, BackendError>;
    /// Loading artifacts
    fn l(self) -> Result<O, BackendError>;
}

impl<O> WrapErr<O> for Result<O, candle::Error> {
    fn c(self) -> Result<O, BackendError> {
        self.map_err(|e| BackendError::Construction(e.to_string()))
    }
    fn e(self) -> Result<O, BackendError> {
        self.map_err(|e| BackendError::Batch(e.to_string()))
    }
    fn s(self) -> Result<O, BackendError> {
        self.map_err(|e| BackendError::Step(e.to_string()))
    }
    fn p(self) -> Result<O, BackendError> {
        self.map_err(|e| BackendError::Persist(e.to_string()))
    }
    fn l(self) -> Result<O, BackendError> {
        self.map_err(|e| BackendError::Load(e.to_string()))
    }
}
