//! Differentiable scoring functions composed by the CNN-DSSM head.
//!
//! All functions operate on `(batch, dim)` tensors and keep the batch dimension.

use candle::{DType, Result, Tensor, D};

/// Probability clipping applied before the logarithms of the cross-entropy
pub const BCE_EPSILON: f64 = 1e-7;

/// `sqrt(max(sum(x_i^2), tiny))` along the last axis, where `tiny` is the smallest positive
/// normal value of the tensor's float type
pub fn magnitude(x: &Tensor) -> Result<Tensor> {
    let squared = x.sqr()?.sum_keepdim(D::Minus1)?;
    let floored = match x.dtype() {
        DType::F32 => squared.maximum(f32::MIN_POSITIVE)?,
        DType::F64 => squared.maximum(f64::MIN_POSITIVE)?,
        dtype => candle::bail!("magnitude is not supported for {dtype:?}"),
    };
    floored.sqrt()
}

/// Cosine similarity clipped to `[0, 1]`.
///
/// Anti-correlated pairs score 0. An all-zero vector never divides by zero thanks to the
/// floor in [`magnitude`].
pub fn cosine_similarity(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    if x.dims() != y.dims() {
        candle::bail!(
            "cosine similarity needs equal shapes, got {:?} and {:?}",
            x.dims(),
            y.dims()
        );
    }
    let dot = (x * y)?.sum_keepdim(D::Minus1)?;
    let norms = (magnitude(x)? * magnitude(y)?)?;
    (dot / norms)?.clamp(0.0, 1.0)
}

/// Similarity vector `[R(q, d+), R(q, d1-), ..., R(q, dJ-)]` with the positive at index 0
pub fn similarity_vector(query: &Tensor, positive: &Tensor, negatives: &[Tensor]) -> Result<Tensor> {
    let mut similarities = Vec::with_capacity(negatives.len() + 1);
    similarities.push(cosine_similarity(query, positive)?);
    for negative in negatives {
        similarities.push(cosine_similarity(query, negative)?);
    }
    Tensor::cat(&similarities, D::Minus1)
}

/// Multiply every similarity by the temperature
pub fn scale(similarities: &Tensor, gamma: f64) -> Result<Tensor> {
    similarities.affine(gamma, 0.0)
}

pub fn exponentiate(x: &Tensor) -> Result<Tensor> {
    x.exp()
}

/// Share of entry 0 in the row sum: `x[:, 0] / sum(x, axis=1)`, shape `(batch, 1)`
pub fn positive_share(x: &Tensor) -> Result<Tensor> {
    let total = x.sum_keepdim(D::Minus1)?;
    x.narrow(D::Minus1, 0, 1)?.broadcast_div(&total)
}

/// Softmax mass of the positive candidate given temperature-scaled similarities.
///
/// The row maximum is subtracted before exponentiation; the result is the same as
/// `positive_share(exponentiate(scaled))`.
pub fn positive_probability(scaled: &Tensor) -> Result<Tensor> {
    let max = scaled.max_keepdim(D::Minus1)?;
    let shifted = scaled.broadcast_sub(&max)?;
    positive_share(&exponentiate(&shifted)?)
}

/// Mean binary cross-entropy between probabilities and targets of the same shape
pub fn binary_cross_entropy(probabilities: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let p = probabilities.clamp(BCE_EPSILON, 1.0 - BCE_EPSILON)?;
    let targets = targets.to_dtype(p.dtype())?;
    let positive = (&targets * p.log()?)?;
    let negative = (targets.affine(-1.0, 1.0)? * p.affine(-1.0, 1.0)?.log()?)?;
    (positive + negative)?.neg()?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::Device;

    fn row(values: &[f32]) -> Tensor {
        Tensor::new(values, &Device::Cpu).unwrap().unsqueeze(0).unwrap()
    }

    fn scalar(t: &Tensor) -> f32 {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_cosine_bounds() -> Result<()> {
        let x = row(&[1.0, 2.0, 3.0]);
        let minus_x = x.neg()?;
        let y = row(&[3.0, -1.0, 0.5]);

        assert!((scalar(&cosine_similarity(&x, &x)?) - 1.0).abs() < 1e-6);
        assert_eq!(scalar(&cosine_similarity(&x, &minus_x)?), 0.0);
        let s = scalar(&cosine_similarity(&x, &y)?);
        assert!((0.0..=1.0).contains(&s));
        Ok(())
    }

    #[test]
    fn test_cosine_zero_vector_is_finite() -> Result<()> {
        let zero = row(&[0.0, 0.0, 0.0]);
        let y = row(&[1.0, 2.0, 3.0]);

        let s = scalar(&cosine_similarity(&zero, &y)?);
        assert!(s.is_finite());
        assert_eq!(s, 0.0);
        let s = scalar(&cosine_similarity(&zero, &zero)?);
        assert!(s.is_finite());
        Ok(())
    }

    #[test]
    fn test_cosine_f64() -> Result<()> {
        let x = Tensor::new(&[[1.0f64, 1.0]], &Device::Cpu)?;
        let y = Tensor::new(&[[1.0f64, 0.0]], &Device::Cpu)?;
        let s = cosine_similarity(&x, &y)?.flatten_all()?.to_vec1::<f64>()?[0];
        assert!((s - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_cosine_f64_zero_vector_is_finite() -> Result<()> {
        let zero = Tensor::zeros((1, 3), DType::F64, &Device::Cpu)?;
        let y = Tensor::new(&[[1.0f64, 2.0, 3.0]], &Device::Cpu)?;

        let norm = magnitude(&zero)?.flatten_all()?.to_vec1::<f64>()?[0];
        assert_eq!(norm, f64::MIN_POSITIVE.sqrt());

        for (a, b) in [(&zero, &y), (&zero, &zero)] {
            let s = cosine_similarity(a, b)?.flatten_all()?.to_vec1::<f64>()?[0];
            assert!(s.is_finite());
            assert_eq!(s, 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_similarity_vector_puts_positive_first() -> Result<()> {
        let query = row(&[1.0, 0.0]);
        let positive = row(&[1.0, 0.0]);
        let negatives = vec![row(&[0.0, 1.0]), row(&[-1.0, 0.0])];

        let s = similarity_vector(&query, &positive, &negatives)?;
        assert_eq!(s.dims(), &[1, 3]);
        let s = s.flatten_all()?.to_vec1::<f32>()?;
        assert!((s[0] - 1.0).abs() < 1e-6);
        assert!(s[1].abs() < 1e-6);
        assert_eq!(s[2], 0.0);
        Ok(())
    }

    #[test]
    fn test_equal_similarities_split_mass_evenly() -> Result<()> {
        for j in 1..6usize {
            let s = row(&vec![0.4f32; j + 1]);
            let p = scalar(&positive_probability(&scale(&s, 10.0)?)?);
            assert!((p - 1.0 / (j as f32 + 1.0)).abs() < 1e-7);
        }
        Ok(())
    }

    #[test]
    fn test_positive_probability_reference_value() -> Result<()> {
        let s = row(&[0.9, 0.1, 0.2, 0.3]);
        let p = scalar(&positive_probability(&scale(&s, 10.0)?)?) as f64;

        let e = |x: f64| x.exp();
        let expected = e(9.0) / (e(9.0) + e(1.0) + e(2.0) + e(3.0));
        assert!((p - expected).abs() < 1e-5);
        assert!((p - 0.99629).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_stabilised_matches_direct() -> Result<()> {
        let s = scale(&row(&[0.7, 0.2, 0.9, 0.0]), 10.0)?;
        let direct = scalar(&positive_share(&exponentiate(&s)?)?);
        let stable = scalar(&positive_probability(&s)?);
        assert!((direct - stable).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_probability_is_monotonic() -> Result<()> {
        let base = [0.5f32, 0.3, 0.4, 0.2];
        let p = |values: &[f32]| scalar(&positive_probability(&scale(&row(values), 10.0).unwrap()).unwrap());
        let reference = p(&base);

        let mut higher_positive = base;
        higher_positive[0] = 0.6;
        assert!(p(&higher_positive) > reference);

        for i in 1..base.len() {
            let mut higher_negative = base;
            higher_negative[i] += 0.1;
            assert!(p(&higher_negative) < reference);
        }
        Ok(())
    }

    #[test]
    fn test_binary_cross_entropy() -> Result<()> {
        let p = Tensor::new(&[[0.5f32], [1.0]], &Device::Cpu)?;
        let t = Tensor::ones((2, 1), DType::F32, &Device::Cpu)?;
        let loss = binary_cross_entropy(&p, &t)?.to_scalar::<f32>()?;
        // (ln 2 + ~0) / 2
        assert!((loss - std::f32::consts::LN_2 / 2.0).abs() < 1e-4);

        // Zero probability is clipped, not infinite
        let p = Tensor::zeros((1, 1), DType::F32, &Device::Cpu)?;
        let t = Tensor::ones((1, 1), DType::F32, &Device::Cpu)?;
        assert!(binary_cross_entropy(&p, &t)?.to_scalar::<f32>()?.is_finite());
        Ok(())
    }
}
