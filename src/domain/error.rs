//! Domain error types.
//!
//! Risk rejections and low-grade setups are ordinary values, not errors; only
//! configuration faults, data access failures and broken risk bookkeeping
//! surface here.

use crate::domain::candle::Timeframe;

/// Rejected append to a [`TimeframeSeries`](crate::domain::series::TimeframeSeries).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    #[error("candle closing at {close_time} duplicates the last close_time")]
    Duplicate { close_time: String },

    #[error("candle closing at {close_time} is older than the last close_time {last}")]
    OutOfOrder { close_time: String, last: String },

    #[error("candle closing at {close_time} has close_time before open_time")]
    Inverted { close_time: String },
}

/// Top-level error type for propdesk.
#[derive(Debug, thiserror::Error)]
pub enum TraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown account profile '{0}'")]
    UnknownProfile(String),

    #[error("no {timeframe} data for {asset}: {reason}")]
    DataUnavailable {
        asset: String,
        timeframe: Timeframe,
        reason: String,
    },

    #[error("risk state inconsistency: {reason}")]
    StateInconsistency { reason: String },

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraderError {
    /// True for faults that must stop the process before any trading logic runs.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TraderError::ConfigParse { .. }
                | TraderError::ConfigMissing { .. }
                | TraderError::ConfigInvalid { .. }
                | TraderError::UnknownProfile(_)
        )
    }
}

impl From<&TraderError> for std::process::ExitCode {
    fn from(err: &TraderError) -> Self {
        let code: u8 = match err {
            TraderError::Io(_) | TraderError::Json(_) => 1,
            TraderError::ConfigParse { .. }
            | TraderError::ConfigMissing { .. }
            | TraderError::ConfigInvalid { .. }
            | TraderError::UnknownProfile(_) => 2,
            TraderError::DataUnavailable { .. } | TraderError::Series(_) => 3,
            TraderError::StateInconsistency { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
