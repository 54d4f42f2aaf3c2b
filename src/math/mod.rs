//! Numerical building blocks shared by the decision cores.

mod indicators;
mod rolling;

pub use indicators::{AverageTrueRange, Ema, Rsi, VolumeOscillator};
pub use rolling::{ar1_half_life, ols_slope, realized_volatility, RollingWindow};
