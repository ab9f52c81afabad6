pub mod backtest;
pub mod instruments;
pub mod summary;
