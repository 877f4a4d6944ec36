pub mod check_strategy;
pub mod lr_table;
pub mod train_step;

use candle_core::Device;
use clap::{Parser, Subcommand, ValueEnum};

pub use check_strategy::CheckStrategyArgs;
pub use lr_table::LrTableArgs;
pub use train_step::TrainStepArgs;

#[derive(Parser)]
#[command(name = "candle-vib")]
#[command(about = "Variational information bottleneck training steps with candle")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a learning-rate schedule at selected steps
    LrTable(LrTableArgs),
    /// Validate a strategy and schedule and show the optimizer layout
    CheckStrategy(CheckStrategyArgs),
    /// Run single strategy steps on a synthetic batch
    TrainStep(TrainStepArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    /// Create a candle `Device` from this enum.
    pub fn to_device(&self, device_no: usize) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}
