use super::ComputeDevice;
use crate::arch_spec::ArchSpec;
use crate::candle_dataset::{KnownDataset, LabelledMinibatch};
use crate::candle_loss_functions::{ClassLossType, InfoLossType};
use crate::candle_lr_schedule::LrScheduleMode;
use crate::candle_model_traits::VibModelT;
use crate::candle_optim_strategy::{get_optimizer, VibOptimizer};
use crate::candle_vib_loss::VibMetrics;
use crate::candle_vib_model::{VibConfig, VibMlp};

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use clap::Args;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};

#[derive(Args, Debug)]
pub struct TrainStepArgs {
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

    #[arg(long, default_value = "784", help = "Features per synthetic example")]
    pub n_features: usize,

    #[arg(long, default_value = "1e-3")]
    pub beta: f64,

    #[arg(short = 'm', long, default_value = "1", help = "Latent draws per example")]
    pub num_samples: usize,

    #[arg(long, default_value = "vib")]
    pub class_loss: ClassLossType,

    #[arg(long, default_value = "full_cov")]
    pub info_loss: InfoLossType,

    #[arg(long, default_value = "10", help = "Number of single steps")]
    pub steps: usize,

    #[arg(long, default_value = "1", help = "Steps per epoch for the algo1 schedule")]
    pub steps_per_epoch: usize,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(long, value_enum, default_value = "cpu")]
    pub device: ComputeDevice,

    #[arg(long, default_value = "0")]
    pub device_no: usize,

    #[arg(short, long)]
    pub verbose: bool,
}

/// Gaussian features with uniformly drawn class labels
///
/// # Arguments
/// * `n` - number of examples
/// * `d` - number of features
/// * `num_classes` - labels are drawn from `0..num_classes`
/// * `seed` - random seed
pub fn simulate_minibatch(
    n: usize,
    d: usize,
    num_classes: usize,
    seed: u64,
    device: &Device,
) -> Result<LabelledMinibatch> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let rnorm = Normal::new(0_f32, 1_f32)?;
    let x: Vec<f32> = (0..(n * d)).map(|_| rnorm.sample(&mut rng)).collect();

    let runif = Uniform::new(0_u32, num_classes as u32)?;
    let y: Vec<u32> = (0..n).map(|_| runif.sample(&mut rng)).collect();

    // assembled on CPU, then moved
    let batch = LabelledMinibatch::new(
        Tensor::from_vec(x, (n, d), &Device::Cpu)?,
        Tensor::from_vec(y, n, &Device::Cpu)?,
    )?;
    Ok(batch.to_device(device)?)
}

/// Run `steps` single strategy steps on the same batch
///
/// # Returns the metrics of each step
pub fn run_steps<M>(
    model: &M,
    optimizer: &mut VibOptimizer,
    batch: &LabelledMinibatch,
    steps: usize,
    steps_per_epoch: usize,
    num_samples: usize,
    pb: &ProgressBar,
) -> Result<Vec<VibMetrics>>
where
    M: VibModelT + ?Sized,
{
    let steps_per_epoch = steps_per_epoch.max(1);
    let mut trace = Vec::with_capacity(steps);
    for s in 0..steps {
        let epoch = s / steps_per_epoch;
        let metrics = optimizer.compute_apply_gradients(model, batch, epoch, num_samples, true)?;
        pb.inc(1);
        trace.push(metrics);
    }
    Ok(trace)
}

pub fn run(args: &TrainStepArgs) -> Result<()> {
    let device = args.device.to_device(args.device_no)?;

    let arch = ArchSpec::parse(&args.arch)?;
    let config = VibConfig {
        num_classes: args.dataset.num_classes(),
        beta: args.beta,
        num_samples: args.num_samples,
        class_loss: args.class_loss,
        info_loss: args.info_loss,
        ..VibConfig::from_arch(&arch)?
    };

    let model = VibMlp::new(args.n_features, config, DType::F32, &device)?;
    info!("{:?}", model.config());

    let (strategy, mut optimizer) = get_optimizer(
        &model,
        &args.strategy,
        args.lr,
        args.lr_schedule.name(),
        &args.dataset,
        args.batch_size,
    )?;

    let batch = simulate_minibatch(
        args.batch_size,
        args.n_features,
        model.num_classes(),
        args.seed,
        &device,
    )?;

    let pb = ProgressBar::new(args.steps as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let trace = run_steps(
        &model,
        &mut optimizer,
        &batch,
        args.steps,
        args.steps_per_epoch,
        model.num_samples(),
        &pb,
    )?;
    pb.finish_and_clear();

    let (enc_iter, dec_iter) = optimizer.iterations();
    info!(
        "{}: {} encoder and {} decoder updates",
        strategy, enc_iter, dec_iter
    );

    println!("step\tloss\tIZY_bound\tIZX_bound");
    for (s, m) in trace.iter().enumerate() {
        println!(
            "{}\t{:.6}\t{:.6}\t{:.6}",
            s, m.loss, m.izy_bound, m.izx_bound
        );
    }
    Ok(())
}
