//! Core domain types and logic.

pub mod candle;
pub mod series;
pub mod structure;
pub mod scan;
pub mod profile;
pub mod confluence;
pub mod risk;
pub mod trade;
pub mod backtest;
pub mod metrics;
pub mod signal;
pub mod scanner;
pub mod config_validation;
pub mod error;
