//! CSV export of audit entries.

use std::io::Write;

use crate::audit::AuditEntry;
use crate::errors::AuditStoreError;

pub const CSV_HEADER: [&str; 8] = [
    "Timestamp",
    "Username",
    "Permission Level",
    "Action",
    "Module",
    "Details",
    "Target Username",
    "IP Address",
];

/// Write `entries` in the given order, header first. Missing values are empty cells.
pub fn write_csv<W: Write>(entries: &[AuditEntry], out: W) -> Result<(), AuditStoreError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(CSV_HEADER)?;
    for entry in entries {
        let timestamp = entry.timestamp.to_rfc3339();
        writer.write_record([
            timestamp.as_str(),
            entry.username.as_str(),
            entry.actor_level.map_or("", |l| l.code()),
            entry.action.as_str(),
            entry.module.as_str(),
            entry.details.as_str(),
            entry.target_username.as_deref().unwrap_or(""),
            entry.source_ip.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush().map_err(AuditStoreError::Export)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::Level;
    use chrono::{TimeZone, Utc};

    fn entry(id: u64, details: &str) -> AuditEntry {
        AuditEntry {
            id,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            username: "ann".to_string(),
            actor_level: Some(Level::L2),
            action: "update_asset".to_string(),
            module: "inventory".to_string(),
            details: details.to_string(),
            target_username: None,
            source_ip: Some("10.0.0.7".to_string()),
        }
    }

    #[test]
    fn test_header_and_rows() {
        let mut out = Vec::new();
        write_csv(&[entry(2, "Counted bin 4")], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Timestamp,Username,Permission Level,Action,Module,Details,Target Username,IP Address"
        );
        assert_eq!(
            lines[1],
            "2024-03-01T09:30:00+00:00,ann,L2,update_asset,inventory,Counted bin 4,,10.0.0.7"
        );
    }

    #[test]
    fn test_details_with_commas_and_quotes_are_quoted() {
        let mut out = Vec::new();
        write_csv(&[entry(1, r#"moved "A", then B"#)], &mut out).unwrap();

        let mut reader = csv::Reader::from_reader(out.as_slice());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.len(), CSV_HEADER.len());
        assert_eq!(&row[5], r#"moved "A", then B"#);
    }

    #[test]
    fn test_empty_export_has_header_only() {
        let mut out = Vec::new();
        write_csv(&[], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }
}
