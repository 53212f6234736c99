//! Traits at the external boundary.

pub mod config_port;
pub mod market_data_port;
pub mod notify_port;
pub mod price_port;
pub mod signal_port;
