//! Price indicators feeding the signal engine.

mod moving_average;

pub use moving_average::MovingAverage;
