use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const ANONYMOUS: &str = "anonymous";
const UNKNOWN: &str = "unknown";

/// One lookup attempt, as written to the access log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: String,
    pub user: String,
    pub track_id: String,
    pub ip: String,
    pub user_agent: String,
    /// HTTP status returned for the attempt
    pub status: u16,
}

impl AccessLogEntry {
    pub fn new(
        at: DateTime<Utc>,
        user_id: Option<&str>,
        track_id: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
        status: u16,
    ) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            user: user_id.unwrap_or(ANONYMOUS).to_string(),
            track_id: track_id.to_string(),
            ip: ip.unwrap_or(UNKNOWN).to_string(),
            user_agent: user_agent.unwrap_or(UNKNOWN).to_string(),
            status,
        }
    }
}

/// Best-effort access log: a tracing event plus an optional JSON-lines file
#[derive(Debug, Clone, Default)]
pub struct AccessLog {
    path: Option<PathBuf>,
}

impl AccessLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record an entry. Never fails; write errors are logged and dropped.
    pub async fn record(&self, entry: &AccessLogEntry) {
        info!(
            user = %entry.user,
            track_id = %entry.track_id,
            ip = %entry.ip,
            user_agent = %entry.user_agent,
            status = entry.status,
            "Track access"
        );

        let Some(path) = &self.path else {
            return;
        };

        if let Err(error) = append_line(path, entry).await {
            warn!(?path, %error, "Failed to write access log entry");
        }
    }
}

async fn append_line(path: &Path, entry: &AccessLogEntry) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(track_id: &str) -> AccessLogEntry {
        AccessLogEntry::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            None,
            track_id,
            Some("127.0.0.1"),
            None,
            200,
        )
    }

    #[test]
    fn test_entry_defaults() {
        let entry = entry("track001");
        assert_eq!(entry.timestamp, "2023-11-14T22:13:20Z");
        assert_eq!(entry.user, "anonymous");
        assert_eq!(entry.ip, "127.0.0.1");
        assert_eq!(entry.user_agent, "unknown");
        assert_eq!(entry.status, 200);
    }

    #[tokio::test]
    async fn test_record_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("access-{}.log", uuid::Uuid::new_v4()));
        let log = AccessLog::new(Some(path.clone()));

        log.record(&entry("track001")).await;
        log.record(&entry("track002")).await;

        let content = std::fs::read_to_string(&path).unwrap();
        let entries = content
            .lines()
            .map(|l| serde_json::from_str::<AccessLogEntry>(l).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].track_id, "track001");
        assert_eq!(entries[1].track_id, "track002");

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_record_swallows_write_failures() {
        let path = std::env::temp_dir()
            .join(format!("missing-{}", uuid::Uuid::new_v4()))
            .join("access.log");
        let log = AccessLog::new(Some(path.clone()));

        // Parent directory does not exist; must not panic or error
        log.record(&entry("track001")).await;
        assert!(!path.exists());
    }
}
