use crate::candle_model_traits::VibModelT;
use candle_core::{DType, Result, Tensor};

/// Differentiable pieces of the VIB objective
pub struct VibLoss {
    /// class_loss + beta * info_loss
    pub total: Tensor,
    pub class_loss: Tensor,
    pub info_loss: Tensor,
    /// log2(classes) - class_loss, an estimate of I(Z;Y)
    pub izy_bound: Tensor,
    /// info_loss, an upper bound of I(Z;X)
    pub izx_bound: Tensor,
}

/// The reported triple `(loss, I(Z;Y) bound, I(Z;X) bound)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibMetrics {
    pub loss: f64,
    pub izy_bound: f64,
    pub izx_bound: f64,
}

fn to_f64(x: &Tensor) -> Result<f64> {
    x.to_dtype(DType::F64)?.to_scalar::<f64>()
}

impl VibLoss {
    pub fn metrics(&self) -> Result<VibMetrics> {
        Ok(VibMetrics {
            loss: to_f64(&self.total)?,
            izy_bound: to_f64(&self.izy_bound)?,
            izx_bound: to_f64(&self.izx_bound)?,
        })
    }

    pub fn class_loss_f64(&self) -> Result<f64> {
        to_f64(&self.class_loss)
    }

    pub fn info_loss_f64(&self) -> Result<f64> {
        to_f64(&self.info_loss)
    }
}

/// Evaluate the VIB objective on a minibatch
///
/// # Arguments
/// * `model` - VIB model
/// * `x_nd` - input data
/// * `y_n` - class labels
/// * `num_samples` - latent draws per input (M)
/// * `train` - training mode flag passed to the model
pub fn compute_loss<M>(
    model: &M,
    x_nd: &Tensor,
    y_n: &Tensor,
    num_samples: usize,
    train: bool,
) -> Result<VibLoss>
where
    M: VibModelT + ?Sized,
{
    let ((mean_nk, cov_entries_nm), logits_mnc) = model.forward_t(x_nd, num_samples, train)?;

    let q_zgx = model.encode(&mean_nk, &cov_entries_nm)?;

    let class_loss = model.class_loss(&logits_mnc, y_n)?;
    let info_loss = model.info_loss(&q_zgx, model.prior())?;

    let max_bits = (model.num_classes() as f64).log2();
    let izy_bound = (class_loss.neg()? + max_bits)?;
    let izx_bound = info_loss.clone();

    let total = (&class_loss + (&info_loss * model.beta())?)?;

    Ok(VibLoss {
        total,
        class_loss,
        info_loss,
        izy_bound,
        izx_bound,
    })
}
