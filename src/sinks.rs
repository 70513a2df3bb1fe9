//! Where rendered reports go once a cycle has finished.

use crate::http::build_client;
use crate::report::RenderedReport;
use reqwest::Client;
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

pub const NOTIFY_SUBJECT: &str = "[NEW ORDERS]";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("notification webhook answered HTTP {0}")]
    Status(u16),
}

pub trait ReportSink: Send + Sync {
    /// Persists the rendered views and returns what was written.
    fn write(&self, report: &RenderedReport) -> Result<Vec<PathBuf>, SinkError>;
}

/// Overwrites the report files in one directory every cycle.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReportSink for FileSink {
    fn write(&self, report: &RenderedReport) -> Result<Vec<PathBuf>, SinkError> {
        fs::create_dir_all(&self.dir).map_err(|source| SinkError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut written = Vec::new();
        for (name, contents) in report.files() {
            let path = self.dir.join(name);
            fs::write(&path, contents).map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        info!(
            target = "pickwell.cycle",
            dir = %self.dir().display(),
            files = written.len(),
            "report files written"
        );
        Ok(written)
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Delivers the flat order list to whoever is packing today.
#[derive(Debug, Clone)]
pub enum Notifier {
    Webhook { url: String, http: Client },
    Log,
}

impl Notifier {
    pub fn from_url(url: Option<String>) -> Self {
        match url {
            Some(url) => Notifier::Webhook {
                url,
                http: build_client(),
            },
            None => Notifier::Log,
        }
    }

    pub async fn notify(&self, body: &str) -> Result<(), SinkError> {
        match self {
            Notifier::Webhook { url, http } => {
                let response = http
                    .post(url)
                    .json(&WebhookPayload {
                        subject: NOTIFY_SUBJECT,
                        body,
                    })
                    .send()
                    .await
                    .map_err(|err| SinkError::Request(err.to_string()))?;
                if !response.status().is_success() {
                    return Err(SinkError::Status(response.status().as_u16()));
                }
                info!(target = "pickwell.cycle", "notification delivered");
                Ok(())
            }
            Notifier::Log => {
                info!(target = "pickwell.cycle", subject = NOTIFY_SUBJECT, "{body}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FLAT_FILE, HTML_FILE, PICK_LIST_FILE};
    use httpmock::prelude::*;
    use serde_json::json;

    fn rendered() -> RenderedReport {
        RenderedReport {
            flat_text: "A-600-SML ... (5)\n".into(),
            pick_list_text: "A-600 -> SML (5)\n".into(),
            html: "<a href=\"u\">A-600-SML</a><br>".into(),
            console: String::new(),
        }
    }

    #[test]
    fn file_sink_overwrites_each_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = FileSink::new(dir.path().join("out"));
        sink.write(&RenderedReport {
            flat_text: "stale\nlines\n".into(),
            ..RenderedReport::default()
        })
        .expect("first write");

        let written = sink.write(&rendered()).expect("second write");
        assert_eq!(written.len(), 3);
        let flat = fs::read_to_string(sink.dir().join(FLAT_FILE)).expect("flat");
        assert_eq!(flat, "A-600-SML ... (5)\n");
        let picks = fs::read_to_string(sink.dir().join(PICK_LIST_FILE)).expect("pick list");
        assert_eq!(picks, "A-600 -> SML (5)\n");
        assert!(sink.dir().join(HTML_FILE).exists());
    }

    #[tokio::test]
    async fn webhook_posts_subject_and_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .json_body(json!({ "subject": "[NEW ORDERS]", "body": "X-1\n" }));
                then.status(204);
            })
            .await;
        let notifier = Notifier::from_url(Some(server.url("/hook")));
        notifier.notify("X-1\n").await.expect("notify");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_failure_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(500);
            })
            .await;
        let notifier = Notifier::from_url(Some(server.url("/hook")));
        assert!(matches!(
            notifier.notify("X").await,
            Err(SinkError::Status(500))
        ));
    }
}
