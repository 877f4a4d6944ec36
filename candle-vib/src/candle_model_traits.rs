use crate::candle_multivariate_gaussian::MultivariateGaussian;
use candle_core::{Result, Tensor, Var};

pub trait StochasticEncoderT {
    /// An encoder that spits out the raw posterior parameters
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d, or any shape flattened to n x d)
    /// * `train` - whether to use dropout/batchnorm or not
    ///
    /// # Returns `entries_nm` where m = k + k(k+1)/2
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait ClassDecoderT {
    /// Latent samples (M x n x k) to class logits (M x n x classes)
    fn forward(&self, z_mnk: &Tensor) -> Result<Tensor>;

    fn dim_latent(&self) -> usize;

    fn num_classes(&self) -> usize;
}

/// What a VIB classifier exposes to the loss and the optimizer
/// strategies
pub trait VibModelT {
    /// Run encoder and decoder with `num_samples` latent draws per input
    ///
    /// # Returns `((mean_nk, cov_entries_nm), logits_mnc)`
    fn forward_t(
        &self,
        x_nd: &Tensor,
        num_samples: usize,
        train: bool,
    ) -> Result<((Tensor, Tensor), Tensor)>;

    /// Assemble q(z|x) from the posterior parameters
    fn encode(&self, mean_nk: &Tensor, cov_entries_nm: &Tensor) -> Result<MultivariateGaussian>;

    /// Classification loss in bits
    fn class_loss(&self, logits_mnc: &Tensor, y_n: &Tensor) -> Result<Tensor>;

    /// Information loss in bits
    fn info_loss(&self, q: &MultivariateGaussian, prior: &MultivariateGaussian) -> Result<Tensor>;

    fn prior(&self) -> &MultivariateGaussian;

    /// Weight of the information loss, non-negative
    fn beta(&self) -> f64;

    fn num_classes(&self) -> usize;

    /// Default number of latent draws M
    fn num_samples(&self) -> usize;

    fn encoder_vars(&self) -> Vec<Var>;

    fn decoder_vars(&self) -> Vec<Var>;

    fn all_vars(&self) -> Vec<Var> {
        let mut vars = self.encoder_vars();
        vars.extend(self.decoder_vars());
        vars
    }
}
