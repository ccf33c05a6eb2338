//! JSON Lines ingest and port lists.

use anyhow::{Context, Result};
use ship2ship_core::{Ping, Port};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::warn;

/// Pings read from a JSONL file, with the count of lines that failed to parse.
#[derive(Debug, Default)]
pub struct PingImport {
    pub pings: Vec<Ping>,
    pub skipped: usize,
}

/// Reads one ping per line. Blank lines are ignored; unparsable lines are
/// logged and skipped.
pub fn read_pings_jsonl<P: AsRef<Path>>(path: P) -> Result<PingImport> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut import = PingImport::default();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Ping>(&line) {
            Ok(ping) => import.pings.push(ping),
            Err(e) => {
                warn!(line = number + 1, error = %e, "Skipping unparsable ping");
                import.skipped += 1;
            }
        }
    }
    Ok(import)
}

/// Writes one ping per line.
pub fn write_pings_jsonl<P: AsRef<Path>>(path: P, pings: &[Ping]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for ping in pings {
        serde_json::to_writer(&mut writer, ping)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a JSON array of ports.
pub fn read_ports<P: AsRef<Path>>(path: P) -> Result<Vec<Port>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid port list in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{FleetConfig, FleetSimulator};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_jsonl_round_trip_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pings.jsonl");
        let start = Utc.with_ymd_and_hms(2018, 1, 31, 0, 0, 0).unwrap();
        let pings = FleetSimulator::new(9, FleetConfig::new(3, 2, start)).unwrap().run();

        write_pings_jsonl(&path, &pings).unwrap();
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("\n{\"vessel_id\": \"oops\"}\n");
        std::fs::write(&path, text).unwrap();

        let import = read_pings_jsonl(&path).unwrap();
        assert_eq!(import.pings, pings);
        assert_eq!(import.skipped, 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_pings_jsonl(dir.path().join("absent.jsonl")).is_err());
        assert!(read_ports(dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_reads_port_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.json");
        std::fs::write(&path, r#"[{"name": "Rotterdam", "longitude": 4.4, "latitude": 51.9}]"#).unwrap();

        let ports = read_ports(&path).unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name, "Rotterdam");
    }
}
