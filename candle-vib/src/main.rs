use anyhow::Result;
use candle_vib::cli::{check_strategy, lr_table, train_step, Cli, Commands};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::LrTable(args) => {
            lr_table::run(args)?;
        }
        Commands::CheckStrategy(args) => {
            check_strategy::run(args)?;
        }
        Commands::TrainStep(args) => {
            train_step::run(args)?;
        }
    }

    Ok(())
}
