use crate::arch_spec::ArchSpec;
use crate::candle_dataset::KnownDataset;
use crate::candle_lr_schedule::LrScheduleMode;
use crate::candle_model_traits::VibModelT;
use crate::candle_optim_strategy::{get_optimizer, VibOptimizer};
use crate::candle_vib_model::{VibConfig, VibMlp};
use anyhow::Result;
use candle_core::{DType, Device};
use clap::Args;
use log::info;

#[derive(Args, Debug)]
pub struct CheckStrategyArgs {
    #[arg(
        short,
        long,
        default_value = "oneshot",
        help = "oneshot, algo1/d:<int>|e:<int>, or algo2/k:<float>"
    )]
    pub strategy: String,

    #[arg(long, default_value = "constant")]
    pub lr_schedule: LrScheduleMode,

    #[arg(long, default_value = "1e-4")]
    pub lr: f64,

    #[arg(short, long, default_value = "mnist")]
    pub dataset: KnownDataset,

    #[arg(short, long, default_value = "100")]
    pub batch_size: usize,

    #[arg(short, long, default_value = "e1:1024|e2:1024|z:2")]
    pub arch: String,

    #[arg(long, default_value = "784")]
    pub n_features: usize,
}

/// `(parameter group, learning rate of its first update)` per optimizer
pub fn optimizer_layout(optimizer: &VibOptimizer) -> Vec<(&'static str, f64)> {
    match optimizer {
        VibOptimizer::Oneshot { joint } => vec![("all", joint.learning_rate())],
        VibOptimizer::Algo1 {
            encoder, decoder, ..
        }
        | VibOptimizer::Algo2 { encoder, decoder } => vec![
            ("encoder", encoder.learning_rate()),
            ("decoder", decoder.learning_rate()),
        ],
    }
}

pub fn run(args: &CheckStrategyArgs) -> Result<()> {
    let arch = ArchSpec::parse(&args.arch)?;
    let config = VibConfig {
        num_classes: args.dataset.num_classes(),
        ..VibConfig::from_arch(&arch)?
    };

    // parameters are never trained here
    let model = VibMlp::new(args.n_features, config, DType::F32, &Device::Cpu)?;

    let (strategy, optimizer) = get_optimizer(
        &model,
        &args.strategy,
        args.lr,
        args.lr_schedule.name(),
        &args.dataset,
        args.batch_size,
    )?;

    info!(
        "{} tensors in the encoder, {} in the decoder",
        model.encoder_vars().len(),
        model.decoder_vars().len()
    );

    println!("strategy\t{}", strategy);
    println!("lr_schedule\t{}", args.lr_schedule);
    for (group, lr) in optimizer_layout(&optimizer) {
        println!("optimizer\t{}\t{:e}", group, lr);
    }
    Ok(())
}
