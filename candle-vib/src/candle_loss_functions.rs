use crate::candle_multivariate_gaussian::MultivariateGaussian;
use candle_core::{DType, Result, Tensor, D};
use candle_nn::ops;
use clap::ValueEnum;
use std::f64::consts::LN_2;

/// Where the expectation over latent samples is taken
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[clap(rename_all = "lowercase")]
pub enum ClassLossType {
    /// average log-probabilities over samples
    #[default]
    Vib,
    /// average probabilities over samples, then take the log
    Vdb,
}

impl ClassLossType {
    pub fn compute(&self, logits: &Tensor, y: &Tensor) -> Result<Tensor> {
        match self {
            ClassLossType::Vib => vib_class_loss(logits, y),
            ClassLossType::Vdb => vdb_class_loss(logits, y),
        }
    }
}

/// How the KL divergence to the prior is reduced
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[clap(rename_all = "snake_case")]
pub enum InfoLossType {
    /// per-dimension terms averaged over examples then summed
    DiagCov,
    /// per-example KL averaged over examples
    #[default]
    FullCov,
}

impl InfoLossType {
    pub fn compute(&self, q: &MultivariateGaussian, prior: &MultivariateGaussian) -> Result<Tensor> {
        match self {
            InfoLossType::DiagCov => info_loss_diag_cov(q, prior),
            InfoLossType::FullCov => info_loss_full_cov(q, prior),
        }
    }
}

fn check_logits(logits: &Tensor, y: &Tensor) -> Result<()> {
    let (_, n, _) = logits.dims3()?;
    if y.dims() != [n] {
        candle_core::bail!(
            "labels {:?} do not match logits {:?} (samples x batch x classes)",
            y.dims(),
            logits.dims()
        );
    }
    Ok(())
}

/// Negative log-probability of the true labels, batch mean, in bits
///
/// * `log_prob_nc` - log-probabilities (n x classes)
/// * `y` - class indices (n)
fn label_nll_bits(log_prob_nc: &Tensor, y: &Tensor) -> Result<Tensor> {
    let y_n1 = y.to_dtype(DType::U32)?.unsqueeze(1)?;
    let llik_n = log_prob_nc.gather(&y_n1, 1)?.squeeze(1)?;
    llik_n.mean_all()?.neg()? / LN_2
}

/// Average softmax over the sample axis
///
/// * `logits` - (M x n x classes)
///
/// # Returns (n x classes)
pub fn mean_softmax_from_logits(logits: &Tensor) -> Result<Tensor> {
    let max = logits.max_keepdim(D::Minus1)?;
    ops::softmax(&logits.broadcast_sub(&max)?, D::Minus1)?.mean(0)
}

/// VIB classification loss in bits
///
/// loss = - mean_i [ (1/M) Σ_m log softmax(logits[m, i])[y_i] ] / ln 2
///
/// * `logits` - (M x n x classes)
/// * `y` - class indices (n)
pub fn vib_class_loss(logits: &Tensor, y: &Tensor) -> Result<Tensor> {
    check_logits(logits, y)?;
    let log_prob_nc = ops::log_softmax(logits, D::Minus1)?.mean(0)?;
    label_nll_bits(&log_prob_nc, y)
}

/// VDB classification loss in bits
///
/// loss = - mean_i log [ (1/M) Σ_m softmax(logits[m, i])[y_i] ] / ln 2
///
/// * `logits` - (M x n x classes)
/// * `y` - class indices (n)
pub fn vdb_class_loss(logits: &Tensor, y: &Tensor) -> Result<Tensor> {
    check_logits(logits, y)?;
    let log_prob_nc = mean_softmax_from_logits(logits)?.log()?;
    label_nll_bits(&log_prob_nc, y)
}

/// KL(q || prior) in bits: the closed-form KL of each example,
/// averaged over the leading (sample) axis, then summed
pub fn info_loss_diag_cov(q: &MultivariateGaussian, prior: &MultivariateGaussian) -> Result<Tensor> {
    let kl = q.kl_divergence(prior)?;
    let kl = if kl.rank() > 0 { kl.mean(0)? } else { kl };
    kl.sum_all()? / LN_2
}

/// KL(q || prior) in bits, averaged over examples
pub fn info_loss_full_cov(q: &MultivariateGaussian, prior: &MultivariateGaussian) -> Result<Tensor> {
    q.kl_divergence(prior)?.mean_all()? / LN_2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_stochastic_encoder::build_posterior;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    fn scalar(x: &Tensor) -> Result<f64> {
        x.to_dtype(DType::F64)?.to_scalar::<f64>()
    }

    #[test]
    fn single_sample_variants_agree() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::randn(0f64, 3f64, (1, 16, 10), &dev)?;
        let y = Tensor::from_vec((0..16u32).map(|i| i % 10).collect::<Vec<u32>>(), 16, &dev)?;

        let vib = scalar(&vib_class_loss(&logits, &y)?)?;
        let vdb = scalar(&vdb_class_loss(&logits, &y)?)?;
        assert_abs_diff_eq!(vib, vdb, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn divergent_samples_separate_variants() -> Result<()> {
        let dev = Device::Cpu;
        // two samples, one confident and right, one confident and wrong
        let logits = Tensor::new(&[[[8.0f64, 0.0]], [[0.0, 8.0]]], &dev)?;
        let y = Tensor::new(&[0u32], &dev)?;

        let vib = scalar(&vib_class_loss(&logits, &y)?)?;
        let vdb = scalar(&vdb_class_loss(&logits, &y)?)?;

        let p_right = 1.0 / (1.0 + (-8f64).exp());
        let p_wrong = 1.0 - p_right;
        let expected_vib = -0.5 * (p_right.ln() + p_wrong.ln()) / LN_2;
        let expected_vdb = -(0.5 * (p_right + p_wrong)).ln() / LN_2;

        assert_abs_diff_eq!(vib, expected_vib, epsilon = 1e-9);
        assert_abs_diff_eq!(vdb, expected_vdb, epsilon = 1e-9);
        assert!((vib - vdb).abs() > 1.0);
        Ok(())
    }

    #[test]
    fn uniform_logits_cost_log2_classes() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::zeros((3, 5, 10), DType::F32, &dev)?;
        let y = Tensor::new(&[0u32, 3, 9, 2, 2], &dev)?;
        for loss in [vib_class_loss(&logits, &y)?, vdb_class_loss(&logits, &y)?] {
            assert_abs_diff_eq!(scalar(&loss)?, 10f64.log2(), epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn label_shape_checked() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::zeros((1, 5, 10), DType::F32, &dev)?;
        let y = Tensor::new(&[0u32, 3], &dev)?;
        assert!(vib_class_loss(&logits, &y).is_err());
        assert!(vdb_class_loss(&logits.squeeze(0)?, &y).is_err());
        Ok(())
    }

    #[test]
    fn info_losses_agree_for_axis_aligned_posteriors() -> Result<()> {
        let dev = Device::Cpu;
        let k = 3;
        let mean = Tensor::randn(0f64, 1f64, (8, k), &dev)?;
        let cov = Tensor::randn(0f64, 2f64, (8, k * (k + 1) / 2), &dev)?;
        let q = build_posterior(&mean, &cov)?;
        let prior = MultivariateGaussian::standard(k, DType::F64, &dev)?;

        let diag = scalar(&info_loss_diag_cov(&q, &prior)?)?;
        let full = scalar(&info_loss_full_cov(&q, &prior)?)?;
        assert!(full > 0.0);
        assert_abs_diff_eq!(diag, full, epsilon = 1e-8);
        Ok(())
    }

    #[test]
    fn info_losses_agree_for_correlated_posteriors() -> Result<()> {
        let dev = Device::Cpu;
        // k = 2 keeps 0.01 * raw below the diagonal, here l10 = 3
        let mean = Tensor::zeros((1, 2), DType::F64, &dev)?;
        let cov = Tensor::new(&[[5.0f64, 300.0, 5.0]], &dev)?;
        let q = build_posterior(&mean, &cov)?;
        let prior = MultivariateGaussian::standard(2, DType::F64, &dev)?;

        let diag = scalar(&info_loss_diag_cov(&q, &prior)?)?;
        let full = scalar(&info_loss_full_cov(&q, &prior)?)?;

        let sp = (1f64 + 1.).ln();
        let expected = 0.5 * (2. * sp * sp + 9. - 2.) - 2. * sp.ln();
        assert_abs_diff_eq!(full, expected / LN_2, epsilon = 1e-9);
        assert_abs_diff_eq!(diag, full, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn info_loss_in_bits() -> Result<()> {
        let dev = Device::Cpu;
        // N(1, 1) in one dimension: KL = 0.5 nats
        let q = MultivariateGaussian::new(
            Tensor::new(&[[1.0f64]], &dev)?,
            Tensor::new(&[[[1.0f64]]], &dev)?,
        )?;
        let prior = MultivariateGaussian::standard(1, DType::F64, &dev)?;
        assert_abs_diff_eq!(
            scalar(&info_loss_full_cov(&q, &prior)?)?,
            0.5 / LN_2,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            scalar(&info_loss_diag_cov(&q, &prior)?)?,
            0.5 / LN_2,
            epsilon = 1e-12
        );
        Ok(())
    }
}
