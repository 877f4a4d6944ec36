use candle_core::{DType, Device, Result, Tensor, D};

/// Multivariate Gaussian N(μ, L Lᵀ) parameterized by a lower-triangular
/// scale (Cholesky factor) `L`
///
/// * `mean` - (..., k)
/// * `scale_tril` - (..., k, k), diagonal > 0, upper triangle zero
///
/// Leading dimensions are batch dimensions; an unbatched distribution
/// (e.g., the prior) has `mean: (k)` and `scale_tril: (k, k)` and
/// broadcasts against batched ones.
#[derive(Clone, Debug)]
pub struct MultivariateGaussian {
    mean: Tensor,
    scale_tril: Tensor,
}

impl MultivariateGaussian {
    pub fn new(mean: Tensor, scale_tril: Tensor) -> Result<Self> {
        let k = mean.dim(D::Minus1)?;
        let rank = mean.rank();
        if scale_tril.rank() != rank + 1
            || scale_tril.dim(D::Minus1)? != k
            || scale_tril.dim(D::Minus2)? != k
        {
            candle_core::bail!(
                "scale_tril {:?} does not match mean {:?}",
                scale_tril.dims(),
                mean.dims()
            );
        }
        Ok(Self { mean, scale_tril })
    }

    /// N(0, I) in `k` dimensions
    pub fn standard(k: usize, dtype: DType, device: &Device) -> Result<Self> {
        Self::new(
            Tensor::zeros(k, dtype, device)?,
            Tensor::eye(k, dtype, device)?,
        )
    }

    /// N(μ, diag(σ²))
    pub fn from_diag(mean: Tensor, scale_diag: &Tensor) -> Result<Self> {
        let k = scale_diag.dim(D::Minus1)?;
        let eye = Tensor::eye(k, scale_diag.dtype(), scale_diag.device())?;
        let scale_tril = scale_diag.unsqueeze(D::Minus1)?.broadcast_mul(&eye)?;
        Self::new(mean, scale_tril)
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    pub fn scale_tril(&self) -> &Tensor {
        &self.scale_tril
    }

    pub fn dim(&self) -> usize {
        self.mean.dims().last().copied().unwrap_or(0)
    }

    pub fn dtype(&self) -> DType {
        self.mean.dtype()
    }

    pub fn device(&self) -> &Device {
        self.mean.device()
    }

    /// Σ = L Lᵀ
    pub fn covariance(&self) -> Result<Tensor> {
        self.scale_tril.matmul(&self.scale_tril.t()?)
    }

    /// diag(L): (..., k)
    pub fn scale_diag(&self) -> Result<Tensor> {
        diagonal(&self.scale_tril)
    }

    /// Σ_i ln L_ii = 0.5 * ln det Σ
    pub fn log_det_scale(&self) -> Result<Tensor> {
        self.scale_diag()?.log()?.sum(D::Minus1)
    }

    /// Draw `num_samples` reparameterized samples
    ///
    /// z = μ + L ε, where ε ~ N(0, I)
    ///
    /// # Returns
    /// * `z` - (num_samples, ..., k)
    pub fn sample(&self, num_samples: usize) -> Result<Tensor> {
        let mut shape = vec![num_samples];
        shape.extend_from_slice(self.mean.dims());

        let eps = Tensor::randn(0f32, 1f32, shape, self.device())?.to_dtype(self.dtype())?;

        let l_eps = self
            .scale_tril
            .unsqueeze(0)?
            .broadcast_matmul(&eps.unsqueeze(D::Minus1)?)?
            .squeeze(D::Minus1)?;

        self.mean.unsqueeze(0)?.broadcast_add(&l_eps)
    }

    /// Closed-form KL(self || other) for two multivariate Gaussians
    ///
    /// KL = 0.5 * ( ‖L_p⁻¹ L_q‖²_F + ‖L_p⁻¹ (μ_p - μ_q)‖² - k )
    ///      + Σ ln diag(L_p) - Σ ln diag(L_q)
    ///
    /// where `q = self`, `p = other`.
    ///
    /// # Returns
    /// KL divergence over the broadcast batch dimensions, e.g., (n)
    pub fn kl_divergence(&self, other: &Self) -> Result<Tensor> {
        let k = self.dim();
        if other.dim() != k {
            candle_core::bail!("dimension mismatch: {} vs {}", k, other.dim());
        }

        // trace term
        let m = solve_lower_triangular(&other.scale_tril, &self.scale_tril)?;
        let trace = m.sqr()?.sum(D::Minus1)?.sum(D::Minus1)?;

        // Mahalanobis term
        let diff = other
            .mean
            .broadcast_sub(&self.mean)?
            .unsqueeze(D::Minus1)?;
        let w = solve_lower_triangular(&other.scale_tril, &diff)?;
        let mahalanobis = w.sqr()?.sum(D::Minus1)?.sum(D::Minus1)?;

        let log_det = other
            .log_det_scale()?
            .broadcast_sub(&self.log_det_scale()?)?;

        ((trace.broadcast_add(&mahalanobis)? - k as f64)? * 0.5)?.broadcast_add(&log_det)
    }
}

/// Diagonal entries of the last two dimensions, (..., k, k) -> (..., k)
pub fn diagonal(x: &Tensor) -> Result<Tensor> {
    let k = x.dim(D::Minus1)?;
    let eye = Tensor::eye(k, x.dtype(), x.device())?;
    x.broadcast_mul(&eye)?.sum(D::Minus1)
}

/// Solve L X = B by forward substitution
///
/// * `l` - lower triangular (..., k, k)
/// * `b` - right-hand side (..., k, r)
///
/// Batch dimensions broadcast. Each row is built from tensor ops so the
/// solution stays differentiable in both `l` and `b`.
pub fn solve_lower_triangular(l: &Tensor, b: &Tensor) -> Result<Tensor> {
    let k = l.dim(D::Minus1)?;
    if b.dim(D::Minus2)? != k {
        candle_core::bail!(
            "cannot solve {:?} against right-hand side {:?}",
            l.dims(),
            b.dims()
        );
    }

    let mut rows: Vec<Tensor> = Vec::with_capacity(k);

    for i in 0..k {
        let l_row = l.narrow(D::Minus2, i, 1)?; // (..., 1, k)
        let l_ii = l_row.narrow(D::Minus1, i, 1)?; // (..., 1, 1)
        let b_i = b.narrow(D::Minus2, i, 1)?; // (..., 1, r)

        let rhs = if i == 0 {
            b_i
        } else {
            let x_prev = Tensor::cat(&rows, D::Minus2)?; // (..., i, r)
            let l_prev = l_row.narrow(D::Minus1, 0, i)?; // (..., 1, i)
            b_i.broadcast_sub(&l_prev.broadcast_matmul(&x_prev)?)?
        };

        rows.push(rhs.broadcast_div(&l_ii)?);
    }

    Tensor::cat(&rows, D::Minus2)
}
