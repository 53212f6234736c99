//! propdesk: multi-timeframe setup scanner, challenge risk engine and
//! walk-forward backtester for prop-firm trading accounts.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
