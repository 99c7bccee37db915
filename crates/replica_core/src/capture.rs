//! Page captures and the producers that make them.
//!
//! A capture is an ordered list of viewport snapshots plus structural hints
//! lifted from the DOM. It is produced upstream (a headless browser service)
//! and never modified afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// One viewport-sized screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Base64-encoded PNG
    pub data: String,
    /// Vertical scroll offset in CSS pixels
    pub offset: u32,
}

impl Snapshot {
    pub fn new(data: impl Into<String>, offset: u32) -> Self {
        Self {
            data: data.into(),
            offset,
        }
    }
}

/// Structural hints extracted alongside the screenshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureHints {
    pub title: Option<String>,
    /// Dominant colours, most frequent first
    pub palette: Vec<String>,
    pub fonts: Vec<String>,
    /// Icon library the page appears to use, if any
    pub icon_library: Option<String>,
    /// Logo image URLs
    pub logos: Vec<String>,
    /// Short descriptions of interactive elements and what they control
    pub interactions: Vec<String>,
    /// Links discovered on the page
    pub links: Vec<String>,
    /// Content image URLs
    pub images: Vec<String>,
}

/// A captured page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capture {
    pub url: String,
    pub snapshots: Vec<Snapshot>,
    /// Full scroll height in CSS pixels
    pub total_height: u32,
    #[serde(default)]
    pub hints: CaptureHints,
}

impl Capture {
    pub fn new(url: impl Into<String>, snapshots: Vec<Snapshot>) -> Self {
        let total_height = snapshots.last().map(|s| s.offset + 720).unwrap_or(0);
        Self {
            url: url.into(),
            snapshots,
            total_height,
            hints: CaptureHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: CaptureHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Up to `count` evenly spaced snapshots, always including the first.
    pub fn sample(&self, count: usize) -> Vec<&Snapshot> {
        sample_indices(self.snapshots.len(), count)
            .into_iter()
            .map(|i| &self.snapshots[i])
            .collect()
    }
}

/// Up to `count` evenly spaced indices in `0..len`, ascending and distinct.
pub fn sample_indices(len: usize, count: usize) -> Vec<usize> {
    if len == 0 || count == 0 {
        return Vec::new();
    }
    if count >= len {
        return (0..len).collect();
    }
    if count == 1 {
        return vec![0];
    }
    let mut indices: Vec<usize> = (0..count)
        .map(|i| i * (len - 1) / (count - 1))
        .collect();
    indices.dedup();
    indices
}

/// Prefix `https://` when no scheme is given; reject blanks.
pub fn normalize_url(raw: &str) -> CoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidUrl("empty URL".to_string()));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(CoreError::InvalidUrl(trimmed.to_string()));
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(trimmed.to_string())
    } else if trimmed.contains("://") {
        Err(CoreError::InvalidUrl(format!("unsupported scheme: {}", trimmed)))
    } else {
        Ok(format!("https://{}", trimmed))
    }
}

/// Something that can turn a URL into a capture.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptureProducer: Send + Sync {
    async fn capture(&self, url: &str) -> CoreResult<Capture>;
}

/// Capture service reached over HTTP.
///
/// Posts `{"url": ...}` to `<endpoint>/capture` and expects a [`Capture`].
pub struct HttpCaptureProducer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCaptureProducer {
    pub fn new(endpoint: impl Into<String>) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CaptureProducer for HttpCaptureProducer {
    async fn capture(&self, url: &str) -> CoreResult<Capture> {
        let target = format!("{}/capture", self.endpoint);
        debug!("Requesting capture of {} from {}", url, target);

        let response = self
            .client
            .post(&target)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Capture(format!(
                "capture service returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let capture: Capture = response.json().await?;
        if capture.is_empty() {
            return Err(CoreError::EmptyCapture);
        }
        info!("Captured {} snapshots of {}", capture.len(), url);
        Ok(capture)
    }
}

/// Loads pre-recorded captures from disk.
///
/// Looks for `<dir>/<host>.json`, then `<dir>/capture.json`.
pub struct DirectoryCaptureProducer {
    dir: PathBuf,
}

impl DirectoryCaptureProducer {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn candidates(&self, url: &str) -> Vec<PathBuf> {
        let host = url
            .split("://")
            .nth(1)
            .unwrap_or(url)
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .replace(':', "_");
        let mut paths = Vec::new();
        if !host.is_empty() {
            paths.push(self.dir.join(format!("{}.json", host)));
        }
        paths.push(self.dir.join("capture.json"));
        paths
    }
}

#[async_trait]
impl CaptureProducer for DirectoryCaptureProducer {
    async fn capture(&self, url: &str) -> CoreResult<Capture> {
        for path in self.candidates(url) {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let mut capture: Capture = serde_json::from_str(&content)?;
                    if capture.is_empty() {
                        return Err(CoreError::EmptyCapture);
                    }
                    capture.url = url.to_string();
                    debug!("Loaded capture bundle {}", path.display());
                    return Ok(capture);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Capture(format!(
            "no capture bundle for {} in {}",
            url,
            self.dir.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url(" example.com ").unwrap(), "https://example.com");
        assert_eq!(normalize_url("http://a.dev/x").unwrap(), "http://a.dev/x");
        assert!(normalize_url("   ").is_err());
        assert!(normalize_url("ftp://a.dev").is_err());
        assert!(normalize_url("a b.com").is_err());
    }

    #[test]
    fn test_sample_indices() {
        assert_eq!(sample_indices(10, 4), vec![0, 3, 6, 9]);
        assert_eq!(sample_indices(3, 4), vec![0, 1, 2]);
        assert_eq!(sample_indices(5, 1), vec![0]);
        assert!(sample_indices(0, 3).is_empty());
    }

    #[test]
    fn test_hints_default_when_missing() {
        let capture: Capture = serde_json::from_str(
            r#"{"url":"https://a.dev","snapshots":[{"data":"AA==","offset":0}],"totalHeight":720}"#,
        )
        .unwrap();
        assert_eq!(capture.hints, CaptureHints::default());
    }

    #[tokio::test]
    async fn test_directory_producer_prefers_host_bundle() {
        let dir = TempDir::new().unwrap();
        let host = Capture::new("x", vec![Snapshot::new("aG9zdA==", 0)]);
        let generic = Capture::new("x", vec![Snapshot::new("Z2Vu", 0), Snapshot::new("Z2Vu", 720)]);
        std::fs::write(dir.path().join("example.com.json"), serde_json::to_string(&host).unwrap()).unwrap();
        std::fs::write(dir.path().join("capture.json"), serde_json::to_string(&generic).unwrap()).unwrap();

        let producer = DirectoryCaptureProducer::new(dir.path());
        let capture = producer.capture("https://example.com/pricing").await.unwrap();
        assert_eq!(capture.len(), 1);
        assert_eq!(capture.url, "https://example.com/pricing");

        let fallback = producer.capture("https://other.dev").await.unwrap();
        assert_eq!(fallback.len(), 2);
    }

    #[tokio::test]
    async fn test_mocked_producer() {
        let mut producer = MockCaptureProducer::new();
        producer
            .expect_capture()
            .returning(|_| Err(CoreError::Capture("browser crashed".to_string())));
        assert!(producer.capture("https://a.dev").await.is_err());
    }
}
