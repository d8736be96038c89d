use crate::layers::{register, Initializer};
use candle::{Module, Result, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, VarMap};

/// One parallel feature branch of a tower.
///
/// Valid 1-D convolution (stride 1) with ReLU, then a max-pool spanning the whole remaining
/// temporal axis, flattened to `num_filters` features.
#[derive(Debug)]
pub struct ConvBranch {
    conv: Conv1d,
    filter_size: usize,
    pool_width: usize,
    num_filters: usize,
    span: tracing::Span,
}

impl ConvBranch {
    pub fn load(
        varmap: &VarMap,
        init: &mut Initializer,
        prefix: &str,
        in_channels: usize,
        num_filters: usize,
        filter_size: usize,
        sequence_length: usize,
    ) -> Result<Self> {
        let pool_width = pool_width(sequence_length, filter_size)?;

        let weight = init.glorot_uniform(
            (num_filters, in_channels, filter_size),
            in_channels * filter_size,
            num_filters * filter_size,
        )?;
        let weight = register(varmap, &format!("{prefix}.weight"), &weight)?;
        let bias = register(varmap, &format!("{prefix}.bias"), &init.zeros(num_filters)?)?;

        Ok(Self {
            conv: Conv1d::new(weight, Some(bias), Conv1dConfig::default()),
            filter_size,
            pool_width,
            num_filters,
            span: tracing::span!(tracing::Level::TRACE, "conv-branch", filter_size),
        })
    }

    pub fn filter_size(&self) -> usize {
        self.filter_size
    }

    pub fn pool_width(&self) -> usize {
        self.pool_width
    }

    pub fn num_filters(&self) -> usize {
        self.num_filters
    }

    /// `x` is `(batch, channels, length)`; returns `(batch, num_filters)`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();

        let x = self.conv.forward(x)?.relu()?;
        // The conv output length is exactly `pool_width`, so one window covers it
        x.max(D::Minus1)
    }
}

/// Width of the max-pool window that collapses a valid convolution output to one step
pub fn pool_width(sequence_length: usize, filter_size: usize) -> Result<usize> {
    if filter_size == 0 {
        candle::bail!("filter size must be positive");
    }
    if sequence_length < filter_size {
        candle::bail!(
            "sequence length {sequence_length} is shorter than filter size {filter_size}: pooling width would be non-positive"
        );
    }
    Ok(sequence_length - filter_size + 1)
}
