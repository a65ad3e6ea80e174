//! Built-in aggregate implementations provided by the crate.

pub mod covariance;
pub mod ema;
pub mod ma;
pub mod threshold;
pub mod tick;
pub mod variance;
pub mod window_stats;
pub mod winbuf;

pub use covariance::{PairStatistic, WindowCovariance};
pub use ema::Ema;
pub use ma::MovingAverage;
pub use threshold::Threshold;
pub use tick::TimeSeriesTick;
pub use variance::WindowVariance;
pub use window_stats::{Extremum, WindowExtremum, WindowSum};
pub use winbuf::TimeSeriesWindow;
