use crate::candle_dataset::{DatasetSizeT, KnownDataset};
use crate::candle_lr_schedule::{get_lr, LearningRate, LrScheduleMode};
use anyhow::Result;
use clap::Args;
use log::info;

#[derive(Args, Debug)]
pub struct LrTableArgs {
    #[arg(short, long, default_value = "alemi_vib_mnist")]
    pub schedule: LrScheduleMode,

    #[arg(long, default_value = "1e-4")]
    pub lr: f64,

    #[arg(short, long, default_value = "mnist")]
    pub dataset: KnownDataset,

    #[arg(short, long, default_value = "100")]
    pub batch_size: usize,

    #[arg(long, default_value = "1", help = "Divides the piecewise boundaries")]
    pub step_factor: f64,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Epochs to evaluate at (default: every 20 epochs up to 200)"
    )]
    pub epochs: Vec<usize>,
}

/// Learning rate at the first step of each epoch
pub fn lr_rows(
    schedule: &LearningRate,
    steps_per_epoch: usize,
    epochs: &[usize],
) -> Vec<(usize, usize, f64)> {
    epochs
        .iter()
        .map(|&epoch| {
            let step = epoch * steps_per_epoch;
            (epoch, step, schedule.at(step))
        })
        .collect()
}

pub fn run(args: &LrTableArgs) -> Result<()> {
    let schedule = get_lr(
        args.lr,
        &args.dataset,
        args.batch_size,
        args.schedule.name(),
        args.step_factor,
    )?;

    let steps_per_epoch = args.dataset.steps_per_epoch(args.batch_size)?;
    info!(
        "{}: {} on {} ({} steps per epoch)",
        args.schedule, args.lr, args.dataset, steps_per_epoch
    );

    let epochs = if args.epochs.is_empty() {
        (0..=200).step_by(20).collect::<Vec<_>>()
    } else {
        args.epochs.clone()
    };

    println!("epoch\tstep\tlr");
    for (epoch, step, lr) in lr_rows(&schedule, steps_per_epoch, &epochs) {
        println!("{}\t{}\t{:e}", epoch, step, lr);
    }
    Ok(())
}
