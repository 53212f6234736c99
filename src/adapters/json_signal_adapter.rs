//! Signal file writer for an execution bridge to poll.

use crate::domain::error::TraderError;
use crate::domain::signal::SignalExport;
use crate::ports::signal_port::SignalSink;
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub struct JsonSignalFile {
    path: PathBuf,
}

impl JsonSignalFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SignalSink for JsonSignalFile {
    /// Replace the file with `export`. The document is written to a sibling
    /// temp file first so a reader never sees a partial write.
    fn publish(&self, export: &SignalExport) -> Result<(), TraderError> {
        let json = serde_json::to_string_pretty(export)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        info!(
            path = %self.path.display(),
            signals = export.signals.len(),
            actionable = export.actionable().count(),
            "signals published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::AccountProfile;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn writes_envelope_with_signals_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signals.json");
        let profile = AccountProfile::the5ers_100k_high_stakes();
        let at = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();

        JsonSignalFile::new(path.clone())
            .publish(&SignalExport::new(&profile, at, Vec::new()))
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["signals"].as_array().unwrap().is_empty());
        assert_eq!(value["account_size"], 100_000.0);
        assert_eq!(value["profile"], profile.display_name.as_str());
        assert_eq!(value["generated_at"], "2024-03-06T12:00:00Z");
        assert!(!dir.path().join("signals.json.tmp").exists());
    }
}
