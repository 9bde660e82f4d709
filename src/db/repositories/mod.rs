pub mod baselines;
pub mod daily_steps;
