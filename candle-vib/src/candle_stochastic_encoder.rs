use crate::candle_multivariate_gaussian::MultivariateGaussian;
use candle_core::{DType, Result, Tensor, D};

/// Shift applied before the diagonal softplus; raw values near zero map
/// to small positive scales (softplus(-5) ≈ 0.0067)
pub const DIAG_SHIFT: f64 = 5.0;

/// Off-diagonal multiplier for two-dimensional latent codes; every other
/// dimension keeps an axis-aligned posterior
pub const OFF_DIAG_FACTOR_2D: f64 = 0.01;

/// Free entries of a k x k lower-triangular matrix
pub fn num_cov_entries(k: usize) -> usize {
    k * (k + 1) / 2
}

/// Width of the encoder output that parameterizes a k-dimensional latent
pub fn num_encoder_outputs(k: usize) -> usize {
    k + num_cov_entries(k)
}

/// Split raw encoder output (..., k + k(k+1)/2) into
/// `(mean, cov_entries)` of widths `k` and `k(k+1)/2`
pub fn split_encoder_output(entries: &Tensor, k: usize) -> Result<(Tensor, Tensor)> {
    let width = entries.dim(D::Minus1)?;
    if width != num_encoder_outputs(k) {
        candle_core::bail!(
            "encoder output has {} entries; a {}-dim latent needs {}",
            width,
            k,
            num_encoder_outputs(k)
        );
    }
    let mean = entries.narrow(D::Minus1, 0, k)?;
    let cov_entries = entries.narrow(D::Minus1, k, num_cov_entries(k))?;
    Ok((mean, cov_entries))
}

/// Place (..., k(k+1)/2) entries into (..., k, k) lower-triangular
/// matrices, filling the lower triangle row by row:
///
/// ```text
/// [a b c d e f] -> [[a 0 0]
///                   [b c 0]
///                   [d e f]]
/// ```
///
/// Done with a 0/1 selection matrix so that every raw entry receives
/// its gradient.
pub fn fill_lower_triangular(cov_entries: &Tensor, k: usize) -> Result<Tensor> {
    let m = num_cov_entries(k);
    let width = cov_entries.dim(D::Minus1)?;
    if width != m {
        candle_core::bail!("expected {} triangular entries for k = {}, got {}", m, k, width);
    }

    let mut select = vec![0f32; m * k * k];
    for i in 0..k {
        for j in 0..=i {
            let src = i * (i + 1) / 2 + j;
            let dst = i * k + j;
            select[src * k * k + dst] = 1.0;
        }
    }
    let select_mkk = Tensor::from_vec(select, (m, k * k), cov_entries.device())?
        .to_dtype(cov_entries.dtype())?;

    let mut shape = cov_entries.dims().to_vec();
    shape.pop();
    shape.extend_from_slice(&[k, k]);

    cov_entries.broadcast_matmul(&select_mkk)?.reshape(shape)
}

/// Below this, ln(1 + exp(x)) rounds to zero in f32; use exp(x) instead
const SOFTPLUS_TAIL: f64 = -15.0;

/// Smallest positive normal number of `dtype`
fn min_positive(dtype: DType) -> f64 {
    match dtype {
        DType::F64 => f64::MIN_POSITIVE,
        DType::F16 => 6.103_515_625e-5,
        _ => f32::MIN_POSITIVE as f64,
    }
}

/// softplus(x) = ln(1 + exp(x)), written as max(x, 0) + ln(1 + exp(-|x|))
/// so large inputs do not overflow, and as exp(x) in the far negative
/// tail. `exp` underflows there too, so the result is floored at the
/// smallest positive normal of the dtype and never reaches zero.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let stable = (x.relu()? + (x.abs()?.neg()?.exp()? + 1.)?.log()?)?;
    let tail = x.clamp(f64::NEG_INFINITY, SOFTPLUS_TAIL)?.exp()?;
    x.lt(SOFTPLUS_TAIL)?
        .where_cond(&tail, &stable)?
        .maximum(min_positive(x.dtype()))
}

/// Build the Cholesky factor of the posterior covariance
///
/// * diagonal: `softplus(raw - 5)`, strictly positive
/// * strict lower triangle: `0.01 * raw` if `k == 2`, otherwise zero
/// * upper triangle: zero
///
/// # Arguments
/// * `cov_entries` - raw triangular entries (..., k(k+1)/2)
/// * `k` - latent dimension
pub fn build_scale_tril(cov_entries: &Tensor, k: usize) -> Result<Tensor> {
    let raw_kk = fill_lower_triangular(cov_entries, k)?;

    let dtype = raw_kk.dtype();
    let dev = raw_kk.device();
    let eye = Tensor::eye(k, dtype, dev)?;

    let diag_kk = softplus(&(raw_kk.broadcast_mul(&eye)? - DIAG_SHIFT)?)?.broadcast_mul(&eye)?;

    if k == 2 {
        let strict_lower = (Tensor::tril2(k, dtype, dev)? - &eye)?;
        let off_diag_kk = (raw_kk.broadcast_mul(&strict_lower)? * OFF_DIAG_FACTOR_2D)?;
        diag_kk + off_diag_kk
    } else {
        Ok(diag_kk)
    }
}

/// Posterior q(z|x) from the two halves of the encoder output
pub fn build_posterior(mean: &Tensor, cov_entries: &Tensor) -> Result<MultivariateGaussian> {
    let k = mean.dim(D::Minus1)?;
    MultivariateGaussian::new(mean.clone(), build_scale_tril(cov_entries, k)?)
}

/// Raw encoder output -> q(z|x)
pub fn encode(entries: &Tensor, k: usize) -> Result<MultivariateGaussian> {
    let (mean, cov_entries) = split_encoder_output(entries, k)?;
    build_posterior(&mean, &cov_entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn entries_from(values: &[f32], n: usize, dev: &Device) -> Result<Tensor> {
        Tensor::from_slice(values, (n, values.len() / n), dev)
    }

    #[test]
    fn row_major_fill() -> Result<()> {
        let dev = Device::Cpu;
        let cov = entries_from(&[1., 2., 3., 4., 5., 6.], 1, &dev)?;
        let tril = fill_lower_triangular(&cov, 3)?.squeeze(0)?.to_vec2::<f32>()?;
        assert_eq!(
            tril,
            vec![vec![1., 0., 0.], vec![2., 3., 0.], vec![4., 5., 6.]]
        );
        Ok(())
    }

    #[test]
    fn entry_counts() {
        assert_eq!(num_cov_entries(1), 1);
        assert_eq!(num_cov_entries(2), 3);
        assert_eq!(num_cov_entries(256), 32896);
        assert_eq!(num_encoder_outputs(2), 5);
    }

    #[test]
    fn diagonal_positive_for_extreme_inputs() -> Result<()> {
        let dev = Device::Cpu;
        for k in [1usize, 2, 3, 5] {
            let m = num_cov_entries(k);
            let raw: Vec<f32> = (0..(6 * m))
                .map(|i| match i % 6 {
                    0 => -1e4,
                    1 => -200.,
                    2 => -60.,
                    3 => -30.,
                    4 => 0.,
                    _ => 1e4,
                })
                .collect();
            let cov = entries_from(&raw, 6, &dev)?;
            let tril = build_scale_tril(&cov, k)?;
            let diag = crate::candle_multivariate_gaussian::diagonal(&tril)?;
            for row in diag.to_vec2::<f32>()? {
                for d in row {
                    assert!(d > 0.0 && d.is_finite(), "k = {}: diag {}", k, d);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn info_loss_finite_for_vanishing_scales() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::zeros((2, 2), DType::F32, &dev)?;
        let cov = entries_from(&[-120., 0., -200., -1e4, 5., -1e4], 2, &dev)?;
        let q = build_posterior(&mean, &cov)?;
        let prior = MultivariateGaussian::standard(2, DType::F32, &dev)?;

        for d in q.scale_diag()?.flatten_all()?.to_vec1::<f32>()? {
            assert!(d > 0.0);
        }
        for v in q.log_det_scale()?.to_vec1::<f32>()? {
            assert!(v.is_finite());
        }
        let kl = q.kl_divergence(&prior)?.to_vec1::<f32>()?;
        assert!(kl.iter().all(|v| v.is_finite() && *v > 0.0), "{:?}", kl);
        Ok(())
    }

    #[test]
    fn two_dim_off_diagonal_scaled() -> Result<()> {
        let dev = Device::Cpu;
        // row-major: [l00, l10, l11]
        let cov = entries_from(&[0.3f32, -7.0, 1.2, 2.0, 250.0, -4.0], 2, &dev)?;
        let tril = build_scale_tril(&cov, 2)?.to_vec3::<f32>()?;

        let expected_off = [-7.0f32 * 0.01, 250.0 * 0.01];
        for (b, tril_b) in tril.iter().enumerate() {
            assert!((tril_b[1][0] - expected_off[b]).abs() < 1e-6);
            assert_eq!(tril_b[0][1], 0.0);
        }
        Ok(())
    }

    #[test]
    fn other_dims_off_diagonal_zero() -> Result<()> {
        let dev = Device::Cpu;
        for k in [1usize, 3, 4] {
            let m = num_cov_entries(k);
            let raw: Vec<f32> = (0..(2 * m)).map(|i| i as f32 * 3.7 - 11.0).collect();
            let cov = entries_from(&raw, 2, &dev)?;
            let tril = build_scale_tril(&cov, k)?.to_vec3::<f32>()?;
            for tril_b in tril {
                for (i, row) in tril_b.iter().enumerate() {
                    for (j, &v) in row.iter().enumerate() {
                        if i != j {
                            assert_eq!(v, 0.0, "k = {}: entry ({}, {})", k, i, j);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn diagonal_is_shifted_softplus() -> Result<()> {
        let dev = Device::Cpu;
        let cov = Tensor::new(&[[0.0f64, 0.5, 5.0]], &dev)?;
        let tril = build_scale_tril(&cov, 2)?.squeeze(0)?.to_vec2::<f64>()?;
        let sp = |x: f64| (1.0 + x.exp()).ln();
        assert!((tril[0][0] - sp(-5.0)).abs() < 1e-12);
        assert!((tril[1][1] - sp(0.0)).abs() < 1e-12);
        assert!((tril[1][0] - 0.005).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn encode_splits_and_builds() -> Result<()> {
        let dev = Device::Cpu;
        let entries = Tensor::randn(0f32, 1f32, (6, num_encoder_outputs(3)), &dev)?;
        let q = encode(&entries, 3)?;
        assert_eq!(q.mean().dims(), &[6, 3]);
        assert_eq!(q.scale_tril().dims(), &[6, 3, 3]);
        assert_eq!(q.dtype(), DType::F32);

        assert!(encode(&entries, 2).is_err());
        Ok(())
    }

    #[test]
    fn gradients_reach_every_entry() -> Result<()> {
        let dev = Device::Cpu;
        let cov = candle_core::Var::new(&[[0.1f32, 0.2, 0.3]], &dev)?;
        let tril = build_scale_tril(cov.as_tensor(), 2)?;
        let grads = tril.sum_all()?.backward()?;
        let g = grads.get(cov.as_tensor()).unwrap().to_vec2::<f32>()?;
        assert!(g[0].iter().all(|&x| x != 0.0));
        Ok(())
    }
}
