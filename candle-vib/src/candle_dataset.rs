use crate::errors::ConfigError;
use candle_core::{Device, Tensor};
use std::str::FromStr;

/// A labelled minibatch
/// * `input` - features (n x d, or any shape the encoder flattens)
/// * `labels` - class indices (n), `u32`
pub struct LabelledMinibatch {
    pub input: Tensor,
    pub labels: Tensor,
}

impl LabelledMinibatch {
    pub fn new(input: Tensor, labels: Tensor) -> candle_core::Result<Self> {
        let n = input.dim(0)?;
        if labels.dims() != [n] {
            candle_core::bail!(
                "labels should be a vector of {} class indices, got {:?}",
                n,
                labels.dims()
            );
        }
        Ok(Self { input, labels })
    }

    pub fn to_device(&self, device: &Device) -> candle_core::Result<Self> {
        Ok(Self {
            input: self.input.to_device(device)?,
            labels: self.labels.to_device(device)?,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the learning-rate schedules need to know about a dataset
pub trait DatasetSizeT {
    fn train_size(&self) -> usize;

    fn test_size(&self) -> usize;

    /// Full minibatches per epoch, `floor(train_size / batch_size)`
    fn steps_per_epoch(&self, batch_size: usize) -> Result<usize, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::InvalidHyperparameter {
                name: "batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(self.train_size() / batch_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownDataset {
    Mnist,
    FashionMnist,
    Cifar10,
}

impl KnownDataset {
    pub fn name(&self) -> &'static str {
        match self {
            KnownDataset::Mnist => "mnist",
            KnownDataset::FashionMnist => "fashion_mnist",
            KnownDataset::Cifar10 => "cifar10",
        }
    }

    pub fn num_classes(&self) -> usize {
        10
    }
}

impl DatasetSizeT for KnownDataset {
    fn train_size(&self) -> usize {
        match self {
            KnownDataset::Mnist | KnownDataset::FashionMnist => 60_000,
            KnownDataset::Cifar10 => 50_000,
        }
    }

    fn test_size(&self) -> usize {
        10_000
    }
}

impl FromStr for KnownDataset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "mnist" => Ok(Self::Mnist),
            "fashion_mnist" | "fashion-mnist" | "fmnist" => Ok(Self::FashionMnist),
            "cifar10" | "cifar-10" => Ok(Self::Cifar10),
            _ => Err(ConfigError::UnknownDataset(s.to_string()).into()),
        }
    }
}

impl std::fmt::Display for KnownDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A dataset known only by its split sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSize {
    pub train: usize,
    pub test: usize,
}

impl DatasetSizeT for DatasetSize {
    fn train_size(&self) -> usize {
        self.train
    }

    fn test_size(&self) -> usize {
        self.test
    }
}
