pub mod arch_spec;
pub mod candle_dataset;
pub mod candle_loss_functions;
pub mod candle_lr_schedule;
pub mod candle_model_traits;
pub mod candle_multivariate_gaussian;
pub mod candle_optim_strategy;
pub mod candle_stochastic_encoder;
pub mod candle_vib_loss;
pub mod candle_vib_model;
pub mod cli;
pub mod errors;

pub use candle_core;
pub use candle_nn;
