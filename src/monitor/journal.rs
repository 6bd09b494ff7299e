//! Append-only per-endpoint CSV journal
//!
//! One line per iteration:
//! `timestamp,latency,predicted,is_spike,severity,suggested,improvement`.
//! Missing suggestion or improvement is written as an empty field.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use super::config::JournalConfig;
use super::status::StatusUpdate;

#[derive(Debug, Clone, Default)]
pub struct LatencyJournal {
    dir: Option<PathBuf>,
}

impl LatencyJournal {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn from_config(config: &JournalConfig) -> Self {
        Self::new(config.target_dir())
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// File the endpoint's records go to, if journaling is enabled
    pub fn path_for(&self, endpoint: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("latency_log_{}.csv", sanitize(endpoint))))
    }

    pub fn append(&self, update: &StatusUpdate) -> anyhow::Result<()> {
        let Some(path) = self.path_for(&update.endpoint) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", format_record(update))?;
        Ok(())
    }
}

fn format_record(update: &StatusUpdate) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        update.timestamp.to_rfc3339(),
        update.observed_ms,
        update.predicted_ms,
        update.is_spike,
        update.severity,
        update.suggested_server.as_deref().unwrap_or(""),
        update
            .improvement_ms
            .map(|v| v.to_string())
            .unwrap_or_default(),
    )
}

/// Keep endpoint names safe as file name components.
///
/// Names that needed rewriting get a digest of the original name appended,
/// so `a:b` and `a_b` never share a file.
fn sanitize(endpoint: &str) -> String {
    let safe: String = endpoint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe == endpoint {
        return safe;
    }
    let digest = Sha256::digest(endpoint.as_bytes());
    format!("{}-{}", safe, hex::encode(&digest[..4]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn update(endpoint: &str, suggested: Option<&str>) -> StatusUpdate {
        StatusUpdate {
            endpoint: endpoint.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap(),
            observed_ms: 250.5,
            predicted_ms: 40.0,
            is_spike: suggested.is_some(),
            severity: 5.2625,
            suggested_server: suggested.map(String::from),
            improvement_ms: suggested.map(|_| 220.5),
        }
    }

    #[test]
    fn test_appends_one_line_per_update() {
        let dir = tempfile::tempdir().unwrap();
        let journal = LatencyJournal::new(Some(dir.path().join("logs")));

        journal.append(&update("example.com", Some("10.0.0.9"))).unwrap();
        journal.append(&update("example.com", None)).unwrap();

        let path = journal.path_for("example.com").unwrap();
        assert!(path.ends_with("logs/latency_log_example.com.csv"));

        let contents = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "2024-05-06T14:00:00+00:00,250.5,40,true,5.2625,10.0.0.9,220.5"
        );
        assert_eq!(lines[1], "2024-05-06T14:00:00+00:00,250.5,40,false,5.2625,,");
    }

    #[test]
    fn test_disabled_journal_writes_nothing() {
        let journal = LatencyJournal::disabled();
        assert!(!journal.is_enabled());
        assert!(journal.path_for("example.com").is_none());
        journal.append(&update("example.com", None)).unwrap();
    }

    #[test]
    fn test_endpoint_names_sanitized() {
        let journal = LatencyJournal::new(Some(PathBuf::from("logs")));
        let path = journal.path_for("https://a.example/x?y").unwrap();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(name.starts_with("latency_log_https___a.example_x_y-"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "latency_log_https___a.example_x_y-".len() + 8 + 4);

        // stable across calls
        assert_eq!(journal.path_for("https://a.example/x?y").unwrap(), path);
    }

    #[test]
    fn test_rewritten_names_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let journal = LatencyJournal::new(Some(dir.path().to_path_buf()));

        let plain = journal.path_for("a_b").unwrap();
        let rewritten = journal.path_for("a:b").unwrap();
        assert!(plain.ends_with("latency_log_a_b.csv"));
        assert_ne!(plain, rewritten);

        journal.append(&update("a_b", None)).unwrap();
        journal.append(&update("a:b", Some("10.0.0.9"))).unwrap();
        assert_eq!(fs::read_to_string(plain).unwrap().lines().count(), 1);
        assert_eq!(fs::read_to_string(rewritten).unwrap().lines().count(), 1);
    }
}
