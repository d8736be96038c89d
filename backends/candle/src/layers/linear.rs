use crate::layers::{register, Initializer};
use candle::{Result, Tensor};
use candle_nn::VarMap;

#[derive(Debug)]
pub struct Linear {
    weight: Tensor,
    bias: Tensor,
    span: tracing::Span,
}

impl Linear {
    pub fn new(weight: Tensor, bias: Tensor) -> Self {
        let span = tracing::span!(tracing::Level::TRACE, "linear");

        Self { weight, bias, span }
    }

    /// Fully-connected layer with a Glorot-initialised `(out, in)` weight and a zero bias
    pub fn load(
        varmap: &VarMap,
        init: &mut Initializer,
        prefix: &str,
        in_features: usize,
        out_features: usize,
    ) -> Result<Self> {
        let weight = init.glorot_uniform((out_features, in_features), in_features, out_features)?;
        let weight = register(varmap, &format!("{prefix}.weight"), &weight)?;
        let bias = register(varmap, &format!("{prefix}.bias"), &init.zeros(out_features)?)?;

        Ok(Self::new(weight, bias))
    }

    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();

        let w = match x.dims() {
            &[bsize, _, _] => self.weight.broadcast_left(bsize)?.t()?,
            _ => self.weight.t()?,
        };
        x.matmul(&w)?.broadcast_add(&self.bias)
    }
}
