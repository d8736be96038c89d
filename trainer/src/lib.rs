mod logging;
mod prometheus;

pub use logging::init_logging;

use anyhow::{anyhow, Context, Result};
use candle::Device;
use cnn_dssm_backend_candle::{
    candle_dtype, CandleBackend, CnnDssmConfig, EmbeddingMatrix, OptimizerConfig,
};
use cnn_dssm_backend_core::{DType, InputShape, Mode};
use cnn_dssm_core::generator::InMemoryGenerator;
use cnn_dssm_core::train::{History, Trainer, TrainingConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Everything a training run needs, resolved from the command line
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub embeddings: PathBuf,
    pub train_data: PathBuf,
    pub validation_data: PathBuf,
    pub output_dir: PathBuf,
    pub shape: InputShape,
    pub filter_sizes: Vec<usize>,
    pub num_filters: usize,
    pub hidden_dims: usize,
    pub dropout_prob: (f32, f32),
    pub gamma: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub samples_per_epoch: usize,
    pub validation_samples: usize,
    pub generator_epochs: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub freeze_embeddings: bool,
    pub dtype: DType,
}

pub fn run(config: RunConfig, prometheus_port: Option<u16>) -> Result<History> {
    if let Some(port) = prometheus_port {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        prometheus::prometheus_builder(addr)
            .context("failed to build prometheus recorder")?
            .install()
            .context("failed to install prometheus recorder")?;
        tracing::info!("Serving metrics on {addr}");
    }

    let device = device().map_err(|err| staged("construction", err))?;
    tracing::info!("Starting training on {device:?}");

    let embeddings =
        EmbeddingMatrix::from_safetensors(&config.embeddings, candle_dtype(config.dtype), &device)
            .map_err(|err| {
                staged(
                    "construction",
                    format!(
                        "could not load embeddings from {}: {err}",
                        config.embeddings.display()
                    ),
                )
            })?;
    tracing::info!(
        "Loaded embedding matrix [{} x {}]",
        embeddings.vocab_size(),
        embeddings.embedding_dim()
    );

    let model_config = CnnDssmConfig {
        filter_sizes: config.filter_sizes.clone(),
        num_filters: config.num_filters,
        hidden_dims: config.hidden_dims,
        dropout_prob: config.dropout_prob,
        gamma: config.gamma,
        trainable_embeddings: !config.freeze_embeddings,
        dtype: config.dtype,
        ..CnnDssmConfig::new(&embeddings, config.shape)
    };
    let optimizer = OptimizerConfig {
        learning_rate: config.learning_rate,
        ..Default::default()
    };
    let backend = CandleBackend::new(model_config, &embeddings, optimizer, config.seed, &device)
        .map_err(|err| staged(err.stage(), err))?;

    let mut train = generator(&config, &config.train_data, Mode::Training)?;
    let mut validation = generator(&config, &config.validation_data, Mode::Validation)?;

    let mut trainer = Trainer::new(
        backend,
        TrainingConfig {
            epochs: config.epochs,
            samples_per_epoch: config.samples_per_epoch,
            validation_samples: config.validation_samples,
            output_dir: config.output_dir.clone(),
        },
    )
    .map_err(|err| staged(err.stage(), err))?;

    let history = trainer
        .train(&mut train, &mut validation)
        .map_err(|err| staged(err.stage(), err))?;
    tracing::info!("Training finished: {history:?}");
    Ok(history)
}

fn generator(config: &RunConfig, path: &Path, mode: Mode) -> Result<InMemoryGenerator> {
    InMemoryGenerator::from_jsonl(
        path,
        config.shape,
        config.batch_size,
        mode,
        config.generator_epochs,
    )
    .map_err(|err| staged(err.stage(), format!("could not build the {mode} generator: {err}")))
}

/// Prefix an error with the stage it happened in
fn staged(stage: &str, err: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("{stage}: {err}")
}

fn device() -> candle::Result<Device> {
    if candle::utils::cuda_is_available() {
        Device::new_cuda(0)
    } else if candle::utils::metal_is_available() {
        Device::new_metal(0)
    } else {
        Ok(Device::Cpu)
    }
}
