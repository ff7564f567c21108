//! Frozen export of the audit chain: a JSON array of event records that can
//! be verified offline without database access.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::audit::entry::AuditEvent;
use crate::error::TrustChainError;

/// Load an export file
pub fn load_export(path: &Path) -> Result<Vec<AuditEvent>, TrustChainError> {
    let file = File::open(path).map_err(|e| {
        TrustChainError::IoError(format!("Failed to open export {:?}: {}", path, e))
    })?;

    let events: Vec<AuditEvent> = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        TrustChainError::InvalidPayload(format!("Failed to parse export {:?}: {}", path, e))
    })?;

    debug!("Loaded {} events from {:?}", events.len(), path);
    Ok(events)
}

/// Write events as a pretty-printed JSON array
pub fn write_export(path: &Path, events: &[AuditEvent]) -> Result<(), TrustChainError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path).map_err(|e| {
        TrustChainError::IoError(format!("Failed to create export {:?}: {}", path, e))
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, events)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    info!("Exported {} events to {:?}", events.len(), path);
    Ok(())
}
