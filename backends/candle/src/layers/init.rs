use candle::{DType, Device, Result, Shape, Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seeded source of initial parameter values.
///
/// Candle's CPU random generator cannot be seeded, so initial weights are drawn here and
/// registered into the [`VarMap`] explicitly.
pub struct Initializer {
    rng: StdRng,
    dtype: DType,
    device: Device,
}

impl Initializer {
    pub fn new(seed: u64, dtype: DType, device: &Device) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            dtype,
            device: device.clone(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Glorot uniform: `U(-limit, limit)` with `limit = sqrt(6 / (fan_in + fan_out))`
    pub fn glorot_uniform<S: Into<Shape>>(
        &mut self,
        shape: S,
        fan_in: usize,
        fan_out: usize,
    ) -> Result<Tensor> {
        let shape = shape.into();
        let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
        let values: Vec<f64> = (0..shape.elem_count())
            .map(|_| self.rng.random_range(-limit..limit))
            .collect();
        Tensor::from_vec(values, shape, &self.device)?.to_dtype(self.dtype)
    }

    pub fn zeros<S: Into<Shape>>(&self, shape: S) -> Result<Tensor> {
        Tensor::zeros(shape, self.dtype, &self.device)
    }
}

/// Register `value` as a named trainable variable and return the tensor backing it
pub fn register(varmap: &VarMap, name: &str, value: &Tensor) -> Result<Tensor> {
    let var = Var::from_tensor(value)?;
    let tensor = var.as_tensor().clone();
    let mut data = varmap
        .data()
        .lock()
        .map_err(|_| candle::Error::Msg("variable map lock is poisoned".to_string()))?;
    if data.contains_key(name) {
        candle::bail!("variable `{name}` is already registered");
    }
    data.insert(name.to_string(), var);
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glorot_uniform_is_seeded_and_bounded() -> Result<()> {
        let device = Device::Cpu;
        let mut a = Initializer::new(7, DType::F32, &device);
        let mut b = Initializer::new(7, DType::F32, &device);

        let x = a.glorot_uniform((4, 6), 6, 4)?.flatten_all()?.to_vec1::<f32>()?;
        let y = b.glorot_uniform((4, 6), 6, 4)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(x, y);

        let limit = (6.0f32 / 10.0).sqrt();
        assert!(x.iter().all(|v| v.abs() <= limit));
        Ok(())
    }

    #[test]
    fn test_register_rejects_duplicates() -> Result<()> {
        let varmap = VarMap::new();
        let value = Tensor::zeros(3, DType::F32, &Device::Cpu)?;
        register(&varmap, "bias", &value)?;
        assert!(register(&varmap, "bias", &value).is_err());
        assert_eq!(varmap.all_vars().len(), 1);
        Ok(())
    }
}
