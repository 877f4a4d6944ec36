use crate::arch_spec::ArchSpec;
use crate::candle_dataset::{DatasetSizeT, LabelledMinibatch};
use crate::candle_lr_schedule::{get_lr_with_mode, LearningRate, LrScheduleMode};
use crate::candle_model_traits::VibModelT;
use crate::candle_vib_loss::{compute_loss, VibMetrics};
use crate::errors::ConfigError;

use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::{debug, info};
use std::str::FromStr;

/// Adam first-moment decay used for every optimizer here
pub const ADAM_BETA1: f64 = 0.5;
pub const ADAM_BETA2: f64 = 0.999;
pub const ADAM_EPS: f64 = 1e-7;

/// How encoder and decoder parameters receive gradient updates
#[derive(Debug, Clone, PartialEq)]
pub enum OptimStrategy {
    /// one optimizer over all parameters, one step per minibatch
    Oneshot,
    /// one shared forward/backward pass; the decoder steps on epochs
    /// divisible by `dec_every`, the encoder on epochs divisible by
    /// `enc_every`
    Algo1 { dec_every: usize, enc_every: usize },
    /// separate encoder and decoder passes; the decoder schedule is
    /// stretched by `dec_step_factor`
    Algo2 { dec_step_factor: f64 },
}

impl OptimStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            OptimStrategy::Oneshot => "oneshot",
            OptimStrategy::Algo1 { .. } => "algo1",
            OptimStrategy::Algo2 { .. } => "algo2",
        }
    }

    /// Parse `<name>` or `<name>/<arch-spec>`, e.g., `oneshot`,
    /// `algo1/d:2|e:1`, `algo2/k:2`
    pub fn parse(spec: &str) -> std::result::Result<Self, ConfigError> {
        let (name, arch) = match spec.split_once('/') {
            Some((name, arch)) => (name.trim(), Some(ArchSpec::parse(arch)?)),
            None => (spec.trim(), None),
        };

        let require_arch = |key: &str| {
            arch.as_ref().ok_or_else(|| ConfigError::MissingHyperparameter {
                context: name.to_string(),
                name: key.to_string(),
            })
        };

        let positive = |key: &str, value: usize| {
            if value == 0 {
                Err(ConfigError::InvalidHyperparameter {
                    name: key.to_string(),
                    value: "0".to_string(),
                })
            } else {
                Ok(value)
            }
        };

        match name {
            "oneshot" => Ok(OptimStrategy::Oneshot),
            "algo1" => {
                let arch = require_arch("d")?;
                let dec_every = positive("d", arch.require_usize(name, "d")?)?;
                let enc_every = positive("e", arch.require_usize(name, "e")?)?;
                Ok(OptimStrategy::Algo1 {
                    dec_every,
                    enc_every,
                })
            }
            "algo2" => {
                let arch = require_arch("k")?;
                let k = arch.require_f64(name, "k")?;
                if k <= 0.0 {
                    return Err(ConfigError::InvalidHyperparameter {
                        name: "k".to_string(),
                        value: k.to_string(),
                    });
                }
                Ok(OptimStrategy::Algo2 { dec_step_factor: k })
            }
            _ => Err(ConfigError::UnknownStrategy(name.to_string())),
        }
    }
}

impl FromStr for OptimStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(Self::parse(s)?)
    }
}

impl std::fmt::Display for OptimStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimStrategy::Oneshot => write!(f, "oneshot"),
            OptimStrategy::Algo1 {
                dec_every,
                enc_every,
            } => write!(f, "algo1/d:{}|e:{}", dec_every, enc_every),
            OptimStrategy::Algo2 { dec_step_factor } => write!(f, "algo2/k:{}", dec_step_factor),
        }
    }
}

/// Adam bound to one parameter group, with the learning rate read from
/// a schedule at the number of steps applied so far
pub struct ScheduledAdam {
    adam: AdamW,
    schedule: LearningRate,
    iterations: usize,
}

impl ScheduledAdam {
    pub fn new(vars: Vec<Var>, schedule: LearningRate) -> Result<Self> {
        let params = ParamsAdamW {
            lr: schedule.at(0),
            beta1: ADAM_BETA1,
            beta2: ADAM_BETA2,
            eps: ADAM_EPS,
            weight_decay: 0.0,
        };
        Ok(Self {
            adam: AdamW::new(vars, params)?,
            schedule,
            iterations: 0,
        })
    }

    /// Apply one update to this group's variables; gradients of other
    /// variables in `grads` are ignored
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.adam.set_learning_rate(self.schedule.at(self.iterations));
        self.adam.step(grads)?;
        self.iterations += 1;
        Ok(())
    }

    /// Number of applied updates
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Learning rate of the next update
    pub fn learning_rate(&self) -> f64 {
        self.schedule.at(self.iterations)
    }

    pub fn schedule(&self) -> &LearningRate {
        &self.schedule
    }
}

/// Optimizers set up for one strategy; each variant carries its own
/// hyperparameters and update rule
pub enum VibOptimizer {
    Oneshot {
        joint: ScheduledAdam,
    },
    Algo1 {
        encoder: ScheduledAdam,
        decoder: ScheduledAdam,
        dec_every: usize,
        enc_every: usize,
    },
    Algo2 {
        encoder: ScheduledAdam,
        decoder: ScheduledAdam,
    },
}

impl VibOptimizer {
    /// Build the optimizers for `strategy`
    ///
    /// # Arguments
    /// * `model` - provides the encoder/decoder parameter groups
    /// * `strategy` - training strategy
    /// * `lr` - base learning rate
    /// * `lr_schedule` - schedule name (see `LrScheduleMode`)
    /// * `dataset` - dataset size, for steps per epoch
    /// * `batch_size` - minibatch size
    pub fn new<M, D>(
        model: &M,
        strategy: &OptimStrategy,
        lr: f64,
        lr_schedule: &str,
        dataset: &D,
        batch_size: usize,
    ) -> anyhow::Result<Self>
    where
        M: VibModelT + ?Sized,
        D: DatasetSizeT + ?Sized,
    {
        let mode: LrScheduleMode = lr_schedule.parse()?;

        match *strategy {
            OptimStrategy::Oneshot => {
                info!("using oneshot strategy with lr_schedule {}", mode);
                let schedule = get_lr_with_mode(lr, dataset, batch_size, mode, 1.)?;
                Ok(VibOptimizer::Oneshot {
                    joint: ScheduledAdam::new(model.all_vars(), schedule)?,
                })
            }
            OptimStrategy::Algo1 {
                dec_every,
                enc_every,
            } => {
                if !mode.is_constant() {
                    return Err(ConfigError::UnsupportedSchedule {
                        strategy: strategy.name().to_string(),
                        schedule: mode.name().to_string(),
                    }
                    .into());
                }
                info!(
                    "using algo1 strategy with d:{}|e:{}",
                    dec_every, enc_every
                );
                let schedule = get_lr_with_mode(lr, dataset, batch_size, mode, 1.)?;
                Ok(VibOptimizer::Algo1 {
                    encoder: ScheduledAdam::new(model.encoder_vars(), schedule.clone())?,
                    decoder: ScheduledAdam::new(model.decoder_vars(), schedule)?,
                    dec_every,
                    enc_every,
                })
            }
            OptimStrategy::Algo2 { dec_step_factor } => {
                info!("using algo2 strategy with k:{}", dec_step_factor);
                let enc_schedule = get_lr_with_mode(lr, dataset, batch_size, mode, 1.)?;
                let dec_schedule =
                    get_lr_with_mode(lr, dataset, batch_size, mode, dec_step_factor)?;
                Ok(VibOptimizer::Algo2 {
                    encoder: ScheduledAdam::new(model.encoder_vars(), enc_schedule)?,
                    decoder: ScheduledAdam::new(model.decoder_vars(), dec_schedule)?,
                })
            }
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        match self {
            VibOptimizer::Oneshot { .. } => "oneshot",
            VibOptimizer::Algo1 { .. } => "algo1",
            VibOptimizer::Algo2 { .. } => "algo2",
        }
    }

    /// Evaluate the loss on one minibatch and apply the updates this
    /// strategy permits at `epoch`
    ///
    /// # Arguments
    /// * `model` - VIB model whose variables the optimizers hold
    /// * `batch` - labelled minibatch
    /// * `epoch` - current epoch, for the algo1 update periods
    /// * `num_samples` - latent draws per input (M)
    /// * `train` - training mode flag passed to the model
    ///
    /// # Returns the metrics of the pass that produced the last update
    pub fn compute_apply_gradients<M>(
        &mut self,
        model: &M,
        batch: &LabelledMinibatch,
        epoch: usize,
        num_samples: usize,
        train: bool,
    ) -> anyhow::Result<VibMetrics>
    where
        M: VibModelT + ?Sized,
    {
        let (x, y) = (&batch.input, &batch.labels);

        match self {
            VibOptimizer::Oneshot { joint } => {
                let loss = compute_loss(model, x, y, num_samples, train)?;
                let grads = loss.total.backward()?;
                joint.step(&grads)?;
                Ok(loss.metrics()?)
            }
            VibOptimizer::Algo1 {
                encoder,
                decoder,
                dec_every,
                enc_every,
            } => {
                let loss = compute_loss(model, x, y, num_samples, train)?;
                let metrics = loss.metrics()?;

                let update_decoder = epoch % *dec_every == 0;
                let update_encoder = epoch % *enc_every == 0;

                if !update_decoder && !update_encoder {
                    debug!("epoch {}: no group scheduled for an update", epoch);
                    return Ok(metrics);
                }

                let grads = loss.total.backward()?;

                if update_decoder {
                    decoder.step(&grads)?;
                } else {
                    debug!("epoch {}: decoder update skipped", epoch);
                }

                if update_encoder {
                    encoder.step(&grads)?;
                } else {
                    debug!("epoch {}: encoder update skipped", epoch);
                }

                Ok(metrics)
            }
            VibOptimizer::Algo2 { encoder, decoder } => {
                let enc_loss = compute_loss(model, x, y, num_samples, train)?;
                encoder.step(&enc_loss.total.backward()?)?;

                let dec_loss = compute_loss(model, x, y, num_samples, train)?;
                decoder.step(&dec_loss.total.backward()?)?;

                Ok(dec_loss.metrics()?)
            }
        }
    }

    /// Applied updates per group, `(encoder, decoder)`; the joint
    /// optimizer counts for both
    pub fn iterations(&self) -> (usize, usize) {
        match self {
            VibOptimizer::Oneshot { joint } => (joint.iterations(), joint.iterations()),
            VibOptimizer::Algo1 {
                encoder, decoder, ..
            }
            | VibOptimizer::Algo2 { encoder, decoder } => {
                (encoder.iterations(), decoder.iterations())
            }
        }
    }
}

/// Parse the strategy and build its optimizers in one go
pub fn get_optimizer<M, D>(
    model: &M,
    strategy: &str,
    lr: f64,
    lr_schedule: &str,
    dataset: &D,
    batch_size: usize,
) -> anyhow::Result<(OptimStrategy, VibOptimizer)>
where
    M: VibModelT + ?Sized,
    D: DatasetSizeT + ?Sized,
{
    let strategy = OptimStrategy::parse(strategy)?;
    let optimizer = VibOptimizer::new(model, &strategy, lr, lr_schedule, dataset, batch_size)?;
    Ok((strategy, optimizer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strategies() {
        assert_eq!(OptimStrategy::parse("oneshot").unwrap(), OptimStrategy::Oneshot);
        assert_eq!(
            OptimStrategy::parse("algo1/d:3|e:1").unwrap(),
            OptimStrategy::Algo1 {
                dec_every: 3,
                enc_every: 1
            }
        );
        assert_eq!(
            OptimStrategy::parse("algo2/k:2").unwrap(),
            OptimStrategy::Algo2 {
                dec_step_factor: 2.
            }
        );
    }

    #[test]
    fn display_round_trips_hyperparameters() {
        let s = OptimStrategy::Algo1 {
            dec_every: 4,
            enc_every: 2,
        };
        assert_eq!(s.to_string(), "algo1/d:4|e:2");
        assert_eq!(OptimStrategy::parse(&s.to_string()).unwrap(), s);
    }

    #[test]
    fn strategy_errors() {
        assert_eq!(
            OptimStrategy::parse("sgd").unwrap_err(),
            ConfigError::UnknownStrategy("sgd".into())
        );
        assert!(matches!(
            OptimStrategy::parse("algo1").unwrap_err(),
            ConfigError::MissingHyperparameter { .. }
        ));
        assert!(matches!(
            OptimStrategy::parse("algo1/d:2").unwrap_err(),
            ConfigError::MissingHyperparameter { .. }
        ));
        assert!(matches!(
            OptimStrategy::parse("algo1/d:0|e:1").unwrap_err(),
            ConfigError::InvalidHyperparameter { .. }
        ));
        assert!(matches!(
            OptimStrategy::parse("algo2/k:-1").unwrap_err(),
            ConfigError::InvalidHyperparameter { .. }
        ));
        assert!(OptimStrategy::parse("algo1/d2|e:1")
            .unwrap_err()
            .is_parse_error());
        assert!(OptimStrategy::parse("algo2/").unwrap_err().is_parse_error());
    }

    #[test]
    fn scheduled_adam_reads_schedule_at_applied_steps() -> anyhow::Result<()> {
        let schedule = LearningRate::piecewise_constant(vec![1.], vec![0.1, 0.01])?;
        let var = Var::new(&[1.0f64, 2.0], &candle_core::Device::Cpu)?;
        let mut adam = ScheduledAdam::new(vec![var.clone()], schedule)?;

        assert_eq!(adam.learning_rate(), 0.1);
        for _ in 0..2 {
            let grads = var.as_tensor().sqr()?.sum_all()?.backward()?;
            adam.step(&grads)?;
        }
        assert_eq!(adam.iterations(), 2);
        assert_eq!(adam.learning_rate(), 0.01);
        Ok(())
    }
}
