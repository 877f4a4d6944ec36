use crate::candle_dataset::DatasetSizeT;
use crate::errors::ConfigError;
use clap::ValueEnum;
use std::str::FromStr;

/// Named learning-rate schedules
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "snake_case")]
pub enum LrScheduleMode {
    /// keep the base learning rate
    Constant,
    /// piecewise constant at epochs 80, 120, 160, 180 (keras.io cifar10 resnet example)
    KerasResnet20Cifar10,
    /// piecewise constant at epochs 100, 150 (akamaster/pytorch_resnet_cifar10)
    PytorchResnet20Cifar10,
    /// staircase exponential decay by 0.97 every two epochs (alemi vib_demo)
    AlemiVibMnist,
}

impl LrScheduleMode {
    pub fn name(&self) -> &'static str {
        match self {
            LrScheduleMode::Constant => "constant",
            LrScheduleMode::KerasResnet20Cifar10 => "keras_resnet20_cifar10",
            LrScheduleMode::PytorchResnet20Cifar10 => "pytorch_resnet20_cifar10",
            LrScheduleMode::AlemiVibMnist => "alemi_vib_mnist",
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, LrScheduleMode::Constant)
    }
}

impl FromStr for LrScheduleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "constant" => Ok(Self::Constant),
            "keras_resnet20_cifar10" => Ok(Self::KerasResnet20Cifar10),
            "pytorch_resnet20_cifar10" => Ok(Self::PytorchResnet20Cifar10),
            "alemi_vib_mnist" => Ok(Self::AlemiVibMnist),
            _ => Err(ConfigError::UnknownSchedule(s.to_string()).into()),
        }
    }
}

impl std::fmt::Display for LrScheduleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Learning rate as a function of the optimizer's step count
#[derive(Debug, Clone, PartialEq)]
pub enum LearningRate {
    Constant(f64),
    /// `values[i]` while `step <= boundaries[i]`, the last value after
    PiecewiseConstant {
        boundaries: Vec<f64>,
        values: Vec<f64>,
    },
    /// `initial * decay_rate^(step / decay_steps)`, the exponent floored
    /// when `staircase`
    ExponentialDecay {
        initial: f64,
        decay_steps: f64,
        decay_rate: f64,
        staircase: bool,
    },
}

impl LearningRate {
    pub fn piecewise_constant(boundaries: Vec<f64>, values: Vec<f64>) -> anyhow::Result<Self> {
        if values.len() != boundaries.len() + 1 {
            anyhow::bail!(
                "piecewise schedule needs {} values for {} boundaries, got {}",
                boundaries.len() + 1,
                boundaries.len(),
                values.len()
            );
        }
        if boundaries.windows(2).any(|w| w[0] > w[1]) {
            anyhow::bail!("piecewise boundaries must be non-decreasing: {:?}", boundaries);
        }
        Ok(Self::PiecewiseConstant { boundaries, values })
    }

    pub fn exponential_decay(
        initial: f64,
        decay_steps: f64,
        decay_rate: f64,
        staircase: bool,
    ) -> anyhow::Result<Self> {
        if decay_steps <= 0.0 {
            return Err(ConfigError::InvalidHyperparameter {
                name: "decay_steps".to_string(),
                value: decay_steps.to_string(),
            }
            .into());
        }
        Ok(Self::ExponentialDecay {
            initial,
            decay_steps,
            decay_rate,
            staircase,
        })
    }

    pub fn at(&self, step: usize) -> f64 {
        let step = step as f64;
        match self {
            LearningRate::Constant(lr) => *lr,
            LearningRate::PiecewiseConstant { boundaries, values } => {
                let idx = boundaries
                    .iter()
                    .position(|&b| step <= b)
                    .unwrap_or(boundaries.len());
                values.get(idx).or(values.last()).copied().unwrap_or(0.)
            }
            LearningRate::ExponentialDecay {
                initial,
                decay_steps,
                decay_rate,
                staircase,
            } => {
                let p = step / decay_steps;
                let p = if *staircase { p.floor() } else { p };
                initial * decay_rate.powf(p)
            }
        }
    }
}

/// Select a learning-rate schedule by name
///
/// * `lr` - base learning rate (only `constant` and `alemi_vib_mnist` use it)
/// * `dataset` - for the number of steps per epoch
/// * `batch_size` - minibatch size
/// * `schedule_mode` - schedule name
/// * `step_factor` - divides the piecewise boundaries
///
pub fn get_lr<D>(
    lr: f64,
    dataset: &D,
    batch_size: usize,
    schedule_mode: &str,
    step_factor: f64,
) -> anyhow::Result<LearningRate>
where
    D: DatasetSizeT + ?Sized,
{
    let mode: LrScheduleMode = schedule_mode.parse()?;
    get_lr_with_mode(lr, dataset, batch_size, mode, step_factor)
}

pub fn get_lr_with_mode<D>(
    lr: f64,
    dataset: &D,
    batch_size: usize,
    mode: LrScheduleMode,
    step_factor: f64,
) -> anyhow::Result<LearningRate>
where
    D: DatasetSizeT + ?Sized,
{
    if mode.is_constant() {
        return Ok(LearningRate::Constant(lr));
    }

    if !(step_factor > 0.0 && step_factor.is_finite()) {
        return Err(ConfigError::InvalidHyperparameter {
            name: "step_factor".to_string(),
            value: step_factor.to_string(),
        }
        .into());
    }

    let steps_per_epoch = dataset.steps_per_epoch(batch_size)? as f64;

    let epochs_to_steps = |epochs: &[f64]| -> Vec<f64> {
        epochs
            .iter()
            .map(|e| e * steps_per_epoch / step_factor)
            .collect()
    };

    match mode {
        LrScheduleMode::Constant => Ok(LearningRate::Constant(lr)),
        LrScheduleMode::KerasResnet20Cifar10 => LearningRate::piecewise_constant(
            epochs_to_steps(&[80., 120., 160., 180.]),
            vec![1e-3, 1e-4, 1e-5, 1e-6, 0.5e-6],
        ),
        LrScheduleMode::PytorchResnet20Cifar10 => LearningRate::piecewise_constant(
            epochs_to_steps(&[100., 150.]),
            vec![1e-1, 1e-2, 1e-3],
        ),
        // the step factor does not stretch this one
        LrScheduleMode::AlemiVibMnist => {
            LearningRate::exponential_decay(lr, 2. * steps_per_epoch, 0.97, true)
        }
    }
}
