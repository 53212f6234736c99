//! Concrete adapter implementations for ports.

pub mod console_notifier;
pub mod csv_adapter;
pub mod file_config_adapter;
pub mod json_signal_adapter;
pub mod static_price_adapter;
