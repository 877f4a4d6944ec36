use crate::arch_spec::ArchSpec;
use crate::candle_loss_functions::{ClassLossType, InfoLossType};
use crate::candle_model_traits::*;
use crate::candle_multivariate_gaussian::MultivariateGaussian;
use crate::candle_stochastic_encoder::*;
use crate::errors::ConfigError;

use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap};

/// Hyperparameters of the reference VIB classifier
#[derive(Debug, Clone, PartialEq)]
pub struct VibConfig {
    /// latent dimension k
    pub n_latent: usize,
    /// hidden widths of the encoder, each followed by ReLU
    pub encoder_layers: Vec<usize>,
    pub num_classes: usize,
    /// weight of the information loss
    pub beta: f64,
    /// latent draws per input M
    pub num_samples: usize,
    pub class_loss: ClassLossType,
    pub info_loss: InfoLossType,
}

impl Default for VibConfig {
    fn default() -> Self {
        Self {
            n_latent: 2,
            encoder_layers: vec![1024, 1024],
            num_classes: 10,
            beta: 1e-3,
            num_samples: 1,
            class_loss: ClassLossType::Vib,
            info_loss: InfoLossType::FullCov,
        }
    }
}

impl VibConfig {
    /// Read `z` (latent dimension) and the hidden widths `e1`, `e2`, ...
    /// from an architecture spec such as `e1:1024|e2:1024|z:2`
    pub fn from_arch(arch: &ArchSpec) -> std::result::Result<Self, ConfigError> {
        let n_latent = arch.require_usize("architecture", "z")?;

        let mut encoder_layers = vec![];
        let mut j = 1;
        while let Some(width) = arch.get_usize(&format!("e{}", j)) {
            encoder_layers.push(width?);
            j += 1;
        }

        let config = Self {
            n_latent,
            encoder_layers,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |name: &str, value: String| {
            Err(ConfigError::InvalidHyperparameter {
                name: name.to_string(),
                value,
            })
        };

        if self.n_latent == 0 {
            return invalid("z", "0".into());
        }
        if let Some(j) = self.encoder_layers.iter().position(|&w| w == 0) {
            return invalid(&format!("e{}", j + 1), "0".into());
        }
        if self.num_classes < 2 {
            return invalid("num_classes", self.num_classes.to_string());
        }
        if !(self.beta >= 0.0 && self.beta.is_finite()) {
            return invalid("beta", self.beta.to_string());
        }
        if self.num_samples == 0 {
            return invalid("num_samples", "0".into());
        }
        Ok(())
    }
}

/////////////////////////////////
// Fully connected VIB encoder //
/////////////////////////////////

pub struct MlpStochasticEncoder {
    n_features: usize,
    n_latent: usize,
    fc: Vec<Linear>,
    z_params: Linear,
}

impl MlpStochasticEncoder {
    /// Will create a new encoder with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.z.weight` for k + k(k+1)/2 posterior parameters
    ///
    /// # Arguments
    /// * `n_features` - input dimension after flattening
    /// * `n_latent` - latent dimension k
    /// * `layers` - hidden widths
    /// * `vs` - variable builder
    pub fn new(n_features: usize, n_latent: usize, layers: &[usize], vs: VarBuilder) -> Result<Self> {
        let mut fc = Vec::with_capacity(layers.len());
        let mut prev_dim = n_features;
        for (j, &next_dim) in layers.iter().enumerate() {
            fc.push(candle_nn::linear(prev_dim, next_dim, vs.pp(format!("nn.enc.fc.{}", j)))?);
            prev_dim = next_dim;
        }

        let z_params = candle_nn::linear(prev_dim, num_encoder_outputs(n_latent), vs.pp("nn.enc.z"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            z_params,
        })
    }
}

impl StochasticEncoderT for MlpStochasticEncoder {
    fn forward_t(&self, x_nd: &Tensor, _train: bool) -> Result<Tensor> {
        let mut h = x_nd.flatten_from(1)?;
        if h.dim(1)? != self.n_features {
            candle_core::bail!(
                "expected {} features per example, got {:?}",
                self.n_features,
                x_nd.dims()
            );
        }
        for layer in self.fc.iter() {
            h = layer.forward(&h)?.relu()?;
        }
        self.z_params.forward(&h)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

/////////////////////////////
// Linear softmax decoder //
/////////////////////////////

pub struct LinearClassDecoder {
    n_latent: usize,
    num_classes: usize,
    logits: Linear,
}

impl LinearClassDecoder {
    /// * `nn.dec.logits.weight`
    pub fn new(n_latent: usize, num_classes: usize, vs: VarBuilder) -> Result<Self> {
        let logits = candle_nn::linear(n_latent, num_classes, vs.pp("nn.dec.logits"))?;
        Ok(Self {
            n_latent,
            num_classes,
            logits,
        })
    }
}

impl ClassDecoderT for LinearClassDecoder {
    fn forward(&self, z_mnk: &Tensor) -> Result<Tensor> {
        self.logits.forward(z_mnk)
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

///////////////////////////
// Reference VIB network //
///////////////////////////

/// Fully connected VIB classifier. Encoder and decoder parameters live
/// in separate `VarMap`s, so the two groups never overlap.
pub struct VibMlp {
    encoder: MlpStochasticEncoder,
    decoder: LinearClassDecoder,
    encoder_params: VarMap,
    decoder_params: VarMap,
    prior: MultivariateGaussian,
    config: VibConfig,
}

impl VibMlp {
    pub fn new(
        n_features: usize,
        config: VibConfig,
        dtype: DType,
        device: &Device,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let encoder_params = VarMap::new();
        let decoder_params = VarMap::new();

        let encoder = MlpStochasticEncoder::new(
            n_features,
            config.n_latent,
            &config.encoder_layers,
            VarBuilder::from_varmap(&encoder_params, dtype, device),
        )?;

        let decoder = LinearClassDecoder::new(
            config.n_latent,
            config.num_classes,
            VarBuilder::from_varmap(&decoder_params, dtype, device),
        )?;

        let prior = MultivariateGaussian::standard(config.n_latent, dtype, device)?;

        Ok(Self {
            encoder,
            decoder,
            encoder_params,
            decoder_params,
            prior,
            config,
        })
    }

    pub fn config(&self) -> &VibConfig {
        &self.config
    }
}

impl VibModelT for VibMlp {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        num_samples: usize,
        train: bool,
    ) -> Result<((Tensor, Tensor), Tensor)> {
        let entries_nm = self.encoder.forward_t(x_nd, train)?;
        let (mean_nk, cov_entries_nm) = split_encoder_output(&entries_nm, self.config.n_latent)?;

        let q = self.encode(&mean_nk, &cov_entries_nm)?;
        let z_mnk = q.sample(num_samples)?;
        let logits_mnc = self.decoder.forward(&z_mnk)?;

        Ok(((mean_nk, cov_entries_nm), logits_mnc))
    }

    fn encode(&self, mean_nk: &Tensor, cov_entries_nm: &Tensor) -> Result<MultivariateGaussian> {
        build_posterior(mean_nk, cov_entries_nm)
    }

    fn class_loss(&self, logits_mnc: &Tensor, y_n: &Tensor) -> Result<Tensor> {
        self.config.class_loss.compute(logits_mnc, y_n)
    }

    fn info_loss(&self, q: &MultivariateGaussian, prior: &MultivariateGaussian) -> Result<Tensor> {
        self.config.info_loss.compute(q, prior)
    }

    fn prior(&self) -> &MultivariateGaussian {
        &self.prior
    }

    fn beta(&self) -> f64 {
        self.config.beta
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn num_samples(&self) -> usize {
        self.config.num_samples
    }

    fn encoder_vars(&self) -> Vec<Var> {
        self.encoder_params.all_vars()
    }

    fn decoder_vars(&self) -> Vec<Var> {
        self.decoder_params.all_vars()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VibConfig {
        VibConfig {
            n_latent: 3,
            encoder_layers: vec![8, 6],
            num_classes: 4,
            num_samples: 5,
            ..VibConfig::default()
        }
    }

    #[test]
    fn forward_shapes() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let model = VibMlp::new(12, small_config(), DType::F32, &dev)?;

        // images are flattened
        let x = Tensor::randn(0f32, 1f32, (7, 3, 4), &dev)?;
        let ((mean, cov), logits) = model.forward_t(&x, 5, true)?;

        assert_eq!(mean.dims(), &[7, 3]);
        assert_eq!(cov.dims(), &[7, 6]);
        assert_eq!(logits.dims(), &[5, 7, 4]);
        Ok(())
    }

    #[test]
    fn parameter_groups_are_disjoint() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let model = VibMlp::new(12, small_config(), DType::F32, &dev)?;

        let enc = model.encoder_vars();
        let dec = model.decoder_vars();

        // three linear layers (weight + bias) and one
        assert_eq!(enc.len(), 6);
        assert_eq!(dec.len(), 2);
        assert_eq!(model.all_vars().len(), 8);

        for e in enc.iter() {
            assert!(dec.iter().all(|d| d.as_tensor().id() != e.as_tensor().id()));
        }
        Ok(())
    }

    #[test]
    fn config_from_arch() -> anyhow::Result<()> {
        let arch = ArchSpec::parse("e1:1024|e2:512|z:2")?;
        let config = VibConfig::from_arch(&arch)?;
        assert_eq!(config.n_latent, 2);
        assert_eq!(config.encoder_layers, vec![1024, 512]);

        let arch = ArchSpec::parse("e1:64")?;
        assert!(VibConfig::from_arch(&arch).is_err());
        Ok(())
    }

    #[test]
    fn negative_beta_rejected() {
        let config = VibConfig {
            beta: -0.1,
            ..small_config()
        };
        assert!(VibMlp::new(12, config, DType::F32, &Device::Cpu).is_err());
    }

    #[test]
    fn wrong_feature_count() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let model = VibMlp::new(12, small_config(), DType::F32, &dev)?;
        let x = Tensor::randn(0f32, 1f32, (7, 10), &dev)?;
        assert!(model.forward_t(&x, 1, false).is_err());
        Ok(())
    }
}
