//! Recipient transports.
//!
//! The core only ever talks to the [`Sink`] trait: it renders messages in
//! the sink's declared style and calls `send`. Sinks throttle and
//! de-duplicate on their side using the `tag` (the event's region name).
//! Two reference implementations ship here: a line-appending file sink and
//! a tracing-backed log sink; network transports live with the host.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::types::Coords;

/// Message rendering styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    /// Headline only, tight length budget.
    Short,
    /// Full detail line.
    Long,
    /// Conversational phrasing for direct messages.
    Human,
    /// Stable machine-parsable fields.
    Machine,
    /// Fixed layout for log files.
    Fixed,
}

/// A recipient channel.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn style(&self) -> Style {
        Style::Long
    }

    /// Minimum seconds between messages the sink itself enforces.
    fn throttle_secs(&self) -> u64 {
        0
    }

    fn accepts_colors(&self) -> bool {
        false
    }

    /// Delivery ordering priority among a subscriber's sinks.
    fn priority(&self) -> i32 {
        0
    }

    /// (open, close) markers for bold emphasis, empty when unsupported.
    fn bold_markers(&self) -> (&str, &str) {
        ("", "")
    }

    /// (open, close) markers for italics.
    fn italic_markers(&self) -> (&str, &str) {
        ("", "")
    }

    /// Deliver one message; returns an opaque thread id the core may pass
    /// to `redact`.
    async fn send(
        &self,
        title: &str,
        body: &str,
        coords: &Coords,
        tag: &str,
        pings: &[String],
        urgent: bool,
    ) -> Option<String>;

    /// Withdraw a previously-sent thread (superseded misinformation).
    async fn redact(&self, _thread: &str, _tag: &str) {}
}

/// Appends rendered notices to a log file, one line each.
pub struct FileSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn style(&self) -> Style {
        Style::Fixed
    }

    async fn send(
        &self,
        title: &str,
        body: &str,
        _coords: &Coords,
        tag: &str,
        _pings: &[String],
        urgent: bool,
    ) -> Option<String> {
        let _guard = self.write_lock.lock().await;
        let marker = if urgent { "!" } else { " " };
        let line = format!("{marker} [{tag}] {title} | {body}\n");

        let result = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await;
        match result {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    tracing::warn!(error = %e, "file sink write failed");
                    return None;
                }
                Some(tag.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "file sink open failed");
                None
            }
        }
    }
}

/// Renders notices into the process log; the default operator channel.
pub struct LogSink {
    style: Style,
}

impl LogSink {
    pub fn new(style: Style) -> Self {
        Self { style }
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn style(&self) -> Style {
        self.style
    }

    async fn send(
        &self,
        title: &str,
        body: &str,
        _coords: &Coords,
        tag: &str,
        pings: &[String],
        urgent: bool,
    ) -> Option<String> {
        info!(tag, urgent, pings = pings.len(), "{title} — {body}");
        Some(tag.to_string())
    }
}

#[cfg(test)]
pub mod testing {
    //! A sink that records everything it is told to send.

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct Delivery {
        pub title: String,
        pub body: String,
        pub tag: String,
        pub urgent: bool,
    }

    pub struct RecordingSink {
        pub style: Style,
        pub deliveries: Mutex<Vec<Delivery>>,
    }

    impl RecordingSink {
        pub fn new(style: Style) -> Self {
            Self {
                style,
                deliveries: Mutex::new(Vec::new()),
            }
        }

        pub fn count(&self) -> usize {
            match self.deliveries.lock() {
                Ok(guard) => guard.len(),
                Err(poisoned) => poisoned.into_inner().len(),
            }
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn style(&self) -> Style {
            self.style
        }

        async fn send(
            &self,
            title: &str,
            body: &str,
            _coords: &Coords,
            tag: &str,
            _pings: &[String],
            urgent: bool,
        ) -> Option<String> {
            let delivery = Delivery {
                title: title.to_string(),
                body: body.to_string(),
                tag: tag.to_string(),
                urgent,
            };
            match self.deliveries.lock() {
                Ok(mut guard) => guard.push(delivery),
                Err(poisoned) => poisoned.into_inner().push(delivery),
            }
            Some(tag.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_appends() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("alerts.log");
            let sink = FileSink::new(&path);

            let coords = Coords::new(35.6, 139.7, -10.0);
            sink.send("Quake", "M5.2 near Tokyo", &coords, "Japan", &[], true)
                .await
                .expect("thread id");
            sink.send("Quake", "Revised M5.4", &coords, "Japan", &[], false)
                .await
                .expect("thread id");

            let contents = std::fs::read_to_string(&path).expect("read back");
            assert_eq!(contents.lines().count(), 2);
            assert!(contents.starts_with("! [Japan]"));
        });
    }
}
