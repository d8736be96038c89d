use crate::checkpoint::{checkpoint_path, HISTORY_FILE};
use crate::TrainError;
use cnn_dssm_backend_core::{Backend, BackendError, DataGenerator, Mode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::instrument;

/// Mean per-sample loss of every completed epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

/// Epoch schedule and output location.
///
/// Sample counts are fixed constants of the run and are never derived from the data.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub samples_per_epoch: usize,
    pub validation_samples: usize,
    pub output_dir: PathBuf,
}

impl TrainingConfig {
    fn validate(&self) -> Result<(), TrainError> {
        if self.epochs == 0 {
            return Err(TrainError::Config("`epochs` must be at least 1".to_string()));
        }
        if self.samples_per_epoch == 0 {
            return Err(TrainError::Config(
                "`samples_per_epoch` must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Trainer<B: Backend> {
    backend: B,
    config: TrainingConfig,
}

impl<B: Backend> Trainer<B> {
    pub fn new(backend: B, config: TrainingConfig) -> Result<Self, TrainError> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Fit, then persist the final artifacts and the history
    pub fn train<T, V>(&mut self, train: &mut T, validation: &mut V) -> Result<History, TrainError>
    where
        T: DataGenerator,
        V: DataGenerator,
    {
        let history = self.fit(train, validation)?;
        self.save(&history)?;
        Ok(history)
    }

    /// Run every epoch. Weights are checkpointed after each epoch, before the next one starts.
    #[instrument(skip_all)]
    pub fn fit<T, V>(&mut self, train: &mut T, validation: &mut V) -> Result<History, TrainError>
    where
        T: DataGenerator,
        V: DataGenerator,
    {
        check_mode(train, Mode::Training)?;
        check_mode(validation, Mode::Validation)?;
        std::fs::create_dir_all(&self.config.output_dir).map_err(record_failure)?;

        let mut history = History::default();
        for epoch in 0..self.config.epochs {
            let start = Instant::now();

            let loss = self
                .run_epoch(train)
                .map_err(|source| record_failure(TrainError::Epoch { epoch, source }))?;
            let val_loss = self
                .validate(validation)
                .map_err(|source| record_failure(TrainError::Epoch { epoch, source }))?;

            let path = checkpoint_path(&self.config.output_dir, epoch);
            self.backend
                .save_checkpoint(&path)
                .map_err(|source| record_failure(TrainError::Epoch { epoch, source }))?;
            tracing::info!("Saved checkpoint {}", path.display());

            metrics::gauge!("cnn_dssm_epoch").set(epoch as f64);
            metrics::gauge!("cnn_dssm_train_loss").set(loss);
            history.loss.push(loss);
            match val_loss {
                Some(val_loss) => {
                    metrics::gauge!("cnn_dssm_val_loss").set(val_loss);
                    history.val_loss.push(val_loss);
                    tracing::info!(
                        "Epoch {}/{}: loss {loss:.6}, val_loss {val_loss:.6} ({:?})",
                        epoch + 1,
                        self.config.epochs,
                        start.elapsed()
                    );
                }
                None => tracing::info!(
                    "Epoch {}/{}: loss {loss:.6} ({:?})",
                    epoch + 1,
                    self.config.epochs,
                    start.elapsed()
                ),
            }
        }
        Ok(history)
    }

    /// Persist the final artifacts and `history.json` into the output directory
    pub fn save(&self, history: &History) -> Result<(), TrainError> {
        let dir = &self.config.output_dir;
        self.backend.save(dir).map_err(record_failure)?;
        tracing::info!("Saved model artifacts to {}", dir.display());

        let path = dir.join(HISTORY_FILE);
        let json = serde_json::to_string_pretty(history).map_err(record_failure)?;
        std::fs::write(&path, json).map_err(record_failure)?;
        tracing::info!("Saved training history to {}", path.display());
        Ok(())
    }

    fn run_epoch<T: DataGenerator>(&mut self, train: &mut T) -> Result<f64, BackendError> {
        let mut seen = 0;
        let mut total = 0.0;
        while seen < self.config.samples_per_epoch {
            let batch = train.next_batch()?;
            if batch.is_empty() {
                return Err(BackendError::Batch(
                    "training generator returned an empty batch".to_string(),
                ));
            }

            let start = Instant::now();
            let loss = self.backend.train_step(&batch)?;
            metrics::histogram!("cnn_dssm_batch_duration").record(start.elapsed().as_secs_f64());
            metrics::counter!("cnn_dssm_samples_total").increment(batch.len() as u64);
            tracing::debug!("batch of {} samples, loss {loss:.6}", batch.len());

            seen += batch.len();
            total += loss as f64 * batch.len() as f64;
        }
        if seen > self.config.samples_per_epoch {
            tracing::warn!(
                "Epoch overshot `samples_per_epoch` = {} by {} samples",
                self.config.samples_per_epoch,
                seen - self.config.samples_per_epoch
            );
        }
        Ok(total / seen as f64)
    }

    fn validate<V: DataGenerator>(&self, validation: &mut V) -> Result<Option<f64>, BackendError> {
        if self.config.validation_samples == 0 {
            return Ok(None);
        }
        let mut seen = 0;
        let mut total = 0.0;
        while seen < self.config.validation_samples {
            let batch = validation.next_batch()?;
            if batch.is_empty() {
                return Err(BackendError::Batch(
                    "validation generator returned an empty batch".to_string(),
                ));
            }
            let loss = self.backend.evaluate(&batch)?;
            seen += batch.len();
            total += loss as f64 * batch.len() as f64;
        }
        Ok(Some(total / seen as f64))
    }
}

fn check_mode<G: DataGenerator>(generator: &G, expected: Mode) -> Result<(), TrainError> {
    if generator.mode() != expected {
        return Err(record_failure(TrainError::Config(format!(
            "expected a {expected} generator, got a {} generator",
            generator.mode()
        ))));
    }
    Ok(())
}

fn record_failure<E: Into<TrainError>>(err: E) -> TrainError {
    let err = err.into();
    metrics::counter!("cnn_dssm_failure", "stage" => err.stage()).increment(1);
    tracing::error!("{err}");
    err
}
