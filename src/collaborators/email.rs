//! Inbox-directory email watcher.
//!
//! Whatever fetches mail (a VM automation, a mail rule, a script) drops one
//! JSON manifest per message into the inbox directory:
//!
//! ```json
//! { "id": "msg-123", "from": "bot@example.com", "subject": "Your report", "attachment": "msg-123/report.pptx" }
//! ```
//!
//! Relative attachment paths resolve against the inbox directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{EmailQuery, EmailWatcher, ReceivedEmail};

#[derive(Debug, Deserialize)]
struct Manifest {
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    attachment: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct InboxDirectory {
    dir: PathBuf,
    poll_interval: Duration,
}

impl InboxDirectory {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// One pass over the inbox, oldest manifest name first.
    pub fn scan(&self, query: &EmailQuery) -> Result<Option<ReceivedEmail>> {
        if !self.dir.exists() {
            return Ok(None);
        }
        for entry in WalkDir::new(&self.dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            let is_manifest = entry.file_type().is_file()
                && path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"));
            if !is_manifest {
                continue;
            }

            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let manifest: Manifest = match serde_json::from_str(&content) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping unreadable inbox manifest {}: {}", path.display(), e);
                    continue;
                }
            };

            if query.seen_ids.contains(&manifest.id) {
                continue;
            }
            if !query.accepts(&manifest.from, &manifest.subject) {
                debug!("Ignoring message {} from '{}'", manifest.id, manifest.from);
                continue;
            }

            let attachment_path = manifest.attachment.map(|a| {
                if a.is_absolute() {
                    a
                } else {
                    self.dir.join(a)
                }
            });
            return Ok(Some(ReceivedEmail {
                email_id: manifest.id,
                from: manifest.from,
                subject: manifest.subject,
                attachment_path,
            }));
        }
        Ok(None)
    }
}

impl InboxDirectory {
    /// Run [`scan`](Self::scan) on the blocking pool so directory walks and
    /// manifest reads never stall the runtime.
    async fn scan_blocking(&self, query: &EmailQuery) -> Result<Option<ReceivedEmail>> {
        let inbox = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || inbox.scan(&query))
            .await
            .context("Inbox scan task failed")?
    }
}

#[async_trait]
impl EmailWatcher for InboxDirectory {
    async fn poll(&self, query: &EmailQuery) -> Result<Option<ReceivedEmail>> {
        let deadline = Instant::now() + query.timeout;
        loop {
            if let Some(email) = self.scan_blocking(query).await? {
                return Ok(Some(email));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, name: &str, json: &str) {
        std::fs::write(dir.join(name), json).unwrap();
    }

    #[test]
    fn test_scan_skips_seen_and_filtered() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            "001.json",
            r#"{"id":"a","from":"bot@reports.io","subject":"Deck","attachment":"a/deck.pptx"}"#,
        );
        write_manifest(
            temp.path(),
            "002.json",
            r#"{"id":"b","from":"spam@else.io","subject":"Deck"}"#,
        );
        write_manifest(
            temp.path(),
            "003.json",
            r#"{"id":"c","from":"bot@reports.io","subject":"Deck v2","attachment":"/abs/c.pptx"}"#,
        );

        let inbox = InboxDirectory::new(temp.path(), Duration::from_millis(10));
        let mut query = EmailQuery {
            sender_allowlist: vec!["reports.io".into()],
            ..EmailQuery::default()
        };

        let first = inbox.scan(&query).unwrap().unwrap();
        assert_eq!(first.email_id, "a");
        assert_eq!(first.attachment_path, Some(temp.path().join("a/deck.pptx")));

        query.seen_ids.insert("a".into());
        let next = inbox.scan(&query).unwrap().unwrap();
        assert_eq!(next.email_id, "c");
        assert_eq!(next.attachment_path, Some(PathBuf::from("/abs/c.pptx")));
    }

    #[test]
    fn test_scan_ignores_malformed_manifests() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "bad.json", "{ nope");
        let inbox = InboxDirectory::new(temp.path(), Duration::from_millis(10));
        assert!(inbox.scan(&EmailQuery::default()).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_with_none() {
        let temp = TempDir::new().unwrap();
        let inbox = InboxDirectory::new(temp.path(), Duration::from_millis(500));
        let query = EmailQuery {
            timeout: Duration::from_secs(2),
            ..EmailQuery::default()
        };
        assert!(inbox.poll(&query).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_picks_up_manifest_written_while_waiting() {
        let temp = TempDir::new().unwrap();
        let inbox = InboxDirectory::new(temp.path(), Duration::from_millis(20));
        let query = EmailQuery {
            timeout: Duration::from_secs(5),
            ..EmailQuery::default()
        };

        let dir = temp.path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            write_manifest(&dir, "001.json", r#"{"id":"late","from":"bot@reports.io"}"#);
        });

        let email = inbox.poll(&query).await.unwrap().unwrap();
        writer.await.unwrap();
        assert_eq!(email.email_id, "late");
    }
}
