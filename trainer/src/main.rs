use anyhow::Result;
use clap::Parser;
use cnn_dssm_backend_core::{DType, InputShape};
use cnn_dssm_trainer::RunConfig;
use std::path::PathBuf;

/// App Configuration
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Safetensors file holding the pre-trained `embeddings` tensor of shape
    /// `[vocab_size, embedding_dim]`.
    #[clap(long, env)]
    embeddings: PathBuf,

    /// JSON lines of pre-tokenized training examples:
    /// `{"query": [..], "positive": [..], "negatives": [[..], ..]}`
    #[clap(long, env)]
    train_data: PathBuf,

    /// JSON lines of pre-tokenized validation examples, same format as `--train-data`
    #[clap(long, env)]
    validation_data: PathBuf,

    /// Where checkpoints, final artifacts and the training history are written
    #[clap(default_value = "models", long, env)]
    output_dir: PathBuf,

    /// Number of token indices per query. Shorter queries are padded with 0.
    #[clap(long, env)]
    query_length: usize,

    /// Number of token indices per document. Shorter documents are padded with 0.
    #[clap(long, env)]
    document_length: usize,

    /// Number of negative documents scored against every query
    #[clap(default_value = "3", long, env)]
    num_negative_examples: usize,

    /// Convolution widths, one parallel branch per width
    #[clap(default_value = "3,4", long, env, value_delimiter = ',')]
    filter_sizes: Vec<usize>,

    #[clap(default_value = "150", long, env)]
    num_filters: usize,

    #[clap(default_value = "150", long, env)]
    hidden_dims: usize,

    /// Dropout rate applied to the embedded tokens
    #[clap(default_value = "0.25", long, env)]
    input_dropout: f32,

    /// Dropout rate applied to the dense projection
    #[clap(default_value = "0.5", long, env)]
    hidden_dropout: f32,

    /// Softmax temperature applied to the similarity vector
    #[clap(default_value = "10", long, env)]
    gamma: f64,

    #[clap(default_value = "128", long, env)]
    batch_size: usize,

    #[clap(default_value = "15", long, env)]
    epochs: usize,

    /// Training samples consumed by each epoch
    #[clap(default_value = "1050916", long, env)]
    samples_per_epoch: usize,

    /// Validation samples evaluated after each epoch. `0` disables validation.
    #[clap(default_value = "262729", long, env)]
    validation_samples: usize,

    /// Passes over the data each generator serves before it is exhausted
    #[clap(default_value = "15", long, env)]
    generator_epochs: usize,

    #[clap(default_value = "0.001", long, env)]
    learning_rate: f64,

    /// Seed of the weight initializer
    #[clap(default_value = "1337", long, env)]
    seed: u64,

    /// Keep the embedding matrix fixed during training
    #[clap(long, env)]
    freeze_embeddings: bool,

    #[clap(default_value = "float32", long, env, value_enum)]
    dtype: DType,

    #[clap(long, env)]
    json_output: bool,

    // Whether or not to include the log trace through spans
    #[clap(long, env)]
    disable_spans: bool,

    /// Serve prometheus metrics on this port
    #[clap(long, env)]
    prometheus_port: Option<u16>,
}

impl Args {
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            embeddings: self.embeddings.clone(),
            train_data: self.train_data.clone(),
            validation_data: self.validation_data.clone(),
            output_dir: self.output_dir.clone(),
            shape: InputShape {
                query_length: self.query_length,
                document_length: self.document_length,
                num_negatives: self.num_negative_examples,
            },
            filter_sizes: self.filter_sizes.clone(),
            num_filters: self.num_filters,
            hidden_dims: self.hidden_dims,
            dropout_prob: (self.input_dropout, self.hidden_dropout),
            gamma: self.gamma,
            batch_size: self.batch_size,
            epochs: self.epochs,
            samples_per_epoch: self.samples_per_epoch,
            validation_samples: self.validation_samples,
            generator_epochs: self.generator_epochs,
            learning_rate: self.learning_rate,
            seed: self.seed,
            freeze_embeddings: self.freeze_embeddings,
            dtype: self.dtype,
        }
    }
}

#[cfg(test)]
mod main_tests;

fn main() -> Result<()> {
    // Pattern match configuration
    let args: Args = Args::parse();

    // Initialize logging
    cnn_dssm_trainer::init_logging(args.json_output, args.disable_spans);

    tracing::info!("{args:?}");

    cnn_dssm_trainer::run(args.run_config(), args.prometheus_port)?;
    Ok(())
}
