//! Mock sandbox provider for testing.
//!
//! Provides a configurable mock implementation of the SandboxProvider trait
//! for use in unit tests without a container runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{SandboxError, SandboxResult};
use crate::provider::{ExecOutput, SandboxProvider};

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub handle: Option<String>,
    /// Command, upload path or image depending on the method
    pub detail: Option<String>,
}

/// Mock sandbox provider for testing.
///
/// Every call is captured. Exec replies are matched by command substring;
/// unmatched commands succeed with empty output. Uploaded files are kept per
/// handle and can be inspected.
#[derive(Clone)]
pub struct MockProvider {
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    exec_replies: Arc<RwLock<Vec<(String, ExecOutput)>>>,
    files: Arc<RwLock<HashMap<String, HashMap<String, Vec<u8>>>>>,
    live: Arc<RwLock<Vec<String>>>,
    next_id: Arc<AtomicUsize>,
    address: Arc<RwLock<String>>,
    fail_create: Arc<RwLock<Option<String>>>,
    create_delay: Arc<RwLock<Option<Duration>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            exec_replies: Arc::new(RwLock::new(Vec::new())),
            files: Arc::new(RwLock::new(HashMap::new())),
            live: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicUsize::new(1)),
            address: Arc::new(RwLock::new("http://127.0.0.1:9".to_string())),
            fail_create: Arc::new(RwLock::new(None)),
            create_delay: Arc::new(RwLock::new(None)),
        }
    }

    /// Reply to commands containing `needle`. Later entries win.
    pub fn on_exec(self, needle: impl Into<String>, output: ExecOutput) -> Self {
        self.exec_replies.write().push((needle.into(), output));
        self
    }

    /// Address returned by `routable_address`.
    pub fn with_address(self, address: impl Into<String>) -> Self {
        self.set_address(address);
        self
    }

    pub fn set_address(&self, address: impl Into<String>) {
        *self.address.write() = address.into();
    }

    /// Make every `create` fail with the given message.
    pub fn simulate_create_failure(self, message: impl Into<String>) -> Self {
        *self.fail_create.write() = Some(message.into());
        self
    }

    pub fn clear_create_failure(&self) {
        *self.fail_create.write() = None;
    }

    /// Delay every `create`, to exercise concurrency.
    pub fn with_create_delay(self, delay: Duration) -> Self {
        *self.create_delay.write() = Some(delay);
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Number of calls to a specific method.
    pub fn count(&self, method: &str) -> usize {
        self.get_method_calls(method).len()
    }

    /// Handles created and not yet deleted.
    pub fn live_handles(&self) -> Vec<String> {
        self.live.read().clone()
    }

    /// Content uploaded to `path` in `handle`.
    pub fn file(&self, handle: &str, path: &str) -> Option<String> {
        self.files
            .read()
            .get(handle)
            .and_then(|files| files.get(path))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// All paths uploaded to `handle`.
    pub fn uploaded_paths(&self, handle: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .read()
            .get(handle)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    fn record_call(&self, method: &str, handle: Option<&str>, detail: Option<&str>) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            handle: handle.map(str::to_string),
            detail: detail.map(str::to_string),
        });
    }

    fn check_live(&self, handle: &str) -> SandboxResult<()> {
        if self.live.read().iter().any(|h| h == handle) {
            Ok(())
        } else {
            Err(SandboxError::UnknownHandle(handle.to_string()))
        }
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, image: &str, _port: u16) -> SandboxResult<String> {
        self.record_call("create", None, Some(image));
        let delay = *self.create_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.fail_create.read().clone() {
            return Err(SandboxError::Provider(message));
        }
        let handle = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.write().push(handle.clone());
        Ok(handle)
    }

    async fn upload(&self, handle: &str, path: &str, bytes: &[u8]) -> SandboxResult<()> {
        self.record_call("upload", Some(handle), Some(path));
        self.check_live(handle)?;
        self.files
            .write()
            .entry(handle.to_string())
            .or_default()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exec(&self, handle: &str, command: &str, _timeout: Duration) -> SandboxResult<ExecOutput> {
        self.record_call("exec", Some(handle), Some(command));
        self.check_live(handle)?;
        let replies = self.exec_replies.read();
        Ok(replies
            .iter()
            .rev()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn routable_address(&self, handle: &str, _port: u16) -> SandboxResult<String> {
        self.record_call("routable_address", Some(handle), None);
        self.check_live(handle)?;
        Ok(self.address.read().clone())
    }

    async fn project_dir(&self, handle: &str) -> SandboxResult<String> {
        self.check_live(handle)?;
        Ok("/home/mock/project".to_string())
    }

    async fn delete(&self, handle: &str) -> SandboxResult<()> {
        self.record_call("delete", Some(handle), None);
        self.live.write().retain(|h| h != handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_reply_matching() {
        let provider = MockProvider::new()
            .on_exec("npm install", ExecOutput::new(1, "ERR!"))
            .on_exec("localhost", ExecOutput::new(0, "200"));
        let handle = provider.create("node:20-slim", 3000).await.unwrap();

        let install = provider
            .exec(&handle, "cd /p && npm install", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(install.exit_code, 1);

        let other = provider.exec(&handle, "ls", Duration::from_secs(1)).await.unwrap();
        assert!(other.success());
        assert_eq!(provider.count("exec"), 2);
    }

    #[tokio::test]
    async fn test_deleted_handle_is_unknown() {
        let provider = MockProvider::new();
        let handle = provider.create("img", 3000).await.unwrap();
        provider.upload(&handle, "/p/a.txt", b"hi").await.unwrap();
        assert_eq!(provider.file(&handle, "/p/a.txt").as_deref(), Some("hi"));

        provider.delete(&handle).await.unwrap();
        assert!(provider.live_handles().is_empty());
        assert!(matches!(
            provider.upload(&handle, "/p/b.txt", b"x").await,
            Err(SandboxError::UnknownHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_simulated_create_failure() {
        let provider = MockProvider::new().simulate_create_failure("quota");
        assert!(provider.create("img", 3000).await.is_err());
        provider.clear_create_failure();
        assert!(provider.create("img", 3000).await.is_ok());
    }
}
