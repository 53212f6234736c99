//! Signal publication port trait.

use crate::domain::error::TraderError;
use crate::domain::signal::SignalExport;

pub trait SignalSink {
    fn publish(&self, export: &SignalExport) -> Result<(), TraderError>;
}
