//! Sandbox runtime adapter
//!
//! The narrow interface the pool and pipeline use to drive an external
//! isolation engine. `docker` talks to the Docker Engine API; the in-memory
//! implementation in `testing::mock_runtime` backs the test suite.

pub mod archive;
pub mod docker;

use crate::config::types::{ExecOutput, Result, SandboxId, Stage, WarmboxError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Label carried by every container this crate creates
pub const MANAGED_LABEL: &str = "warmbox.managed";
/// Label naming the language a container serves
pub const LANGUAGE_LABEL: &str = "warmbox.language";

/// Long-lived command that keeps a pooled sandbox idle
pub fn idle_command() -> Vec<String> {
    vec!["sleep".to_string(), "infinity".to_string()]
}

/// What to create at the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub image: String,
    /// Top-level process of the sandbox
    pub command: Vec<String>,
    /// Working directory; the engine creates it at create time
    pub working_dir: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub name: Option<String>,
}

impl SandboxSpec {
    /// Pooled sandbox idling on `sleep infinity`
    pub fn idle(image: &str, language: &str) -> Self {
        Self {
            image: image.to_string(),
            command: idle_command(),
            working_dir: None,
            labels: Self::labels(language, "pooled"),
            name: None,
        }
    }

    /// Disposable sandbox whose top-level process is the program itself
    pub fn one_shot(image: &str, language: &str, command: Vec<String>, working_dir: &str) -> Self {
        Self {
            image: image.to_string(),
            command,
            working_dir: Some(working_dir.to_string()),
            labels: Self::labels(language, "one-shot"),
            name: Some(format!("warmbox-{}-{}", language, uuid::Uuid::new_v4())),
        }
    }

    fn labels(language: &str, mode: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), mode.to_string());
        labels.insert(LANGUAGE_LABEL.to_string(), language.to_string());
        labels
    }
}

/// Operations on the isolation engine. Every method is fallible and reports
/// failures in the error class of its stage.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Engine reachability check
    async fn ping(&self) -> Result<()>;

    async fn image_present(&self, image: &str) -> Result<bool>;

    /// Pull `image` when absent; returns true when a pull happened
    async fn ensure_image(&self, image: &str) -> Result<bool>;

    /// Create a sandbox without starting it
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId>;

    async fn start(&self, id: &SandboxId) -> Result<()>;

    /// Create and start; a sandbox that fails to start is removed best-effort
    async fn create_and_start(&self, spec: &SandboxSpec) -> Result<SandboxId> {
        let id = self.create(spec).await?;
        if let Err(err) = self.start(&id).await {
            if let Err(cleanup) = self.remove(&id).await {
                log::warn!(
                    "Failed to remove sandbox {} after start failure: {}",
                    id.short(),
                    cleanup
                );
            }
            return Err(match err {
                WarmboxError::Resource(_) => err,
                other => WarmboxError::Resource(other.to_string()),
            });
        }
        Ok(id)
    }

    /// `mkdir -p path` inside the sandbox; idempotent
    async fn ensure_directory(&self, id: &SandboxId, path: &str) -> Result<()>;

    /// Write `content` to `dest` byte-for-byte, overwriting any existing file
    async fn inject_file(&self, id: &SandboxId, content: &[u8], dest: &str) -> Result<()>;

    /// Read a regular file back out of the sandbox
    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>>;

    /// Run `argv` as an attached exec session and capture its output
    async fn execute(&self, id: &SandboxId, argv: &[String]) -> Result<ExecOutput>;

    /// Wait for the top-level process to exit and collect its output
    async fn wait(&self, id: &SandboxId) -> Result<ExecOutput>;

    async fn stop(&self, id: &SandboxId) -> Result<()>;

    /// Delete the sandbox; removing an unknown sandbox succeeds
    async fn remove(&self, id: &SandboxId) -> Result<()>;
}

/// Instant bounding every adapter call of one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn unbounded() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    pub fn is_bounded(&self) -> bool {
        self.0.is_some()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Await `fut`, failing with `Timeout { stage }` once the deadline passes
    pub async fn run<T, F>(&self, stage: Stage, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.0 {
            None => fut.await,
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(result) => result,
                Err(_) => Err(WarmboxError::Timeout { stage }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_runtime::InMemoryRuntime;

    #[test]
    fn test_idle_spec() {
        let spec = SandboxSpec::idle("python:3.12", "python");
        assert_eq!(spec.command, vec!["sleep", "infinity"]);
        assert!(spec.working_dir.is_none());
        assert_eq!(spec.labels.get(LANGUAGE_LABEL).map(String::as_str), Some("python"));
    }

    #[test]
    fn test_one_shot_spec() {
        let spec = SandboxSpec::one_shot(
            "node:20",
            "javascript",
            vec!["node".to_string(), "/app/main.js".to_string()],
            "/app",
        );
        assert_eq!(spec.working_dir.as_deref(), Some("/app"));
        assert!(spec
            .name
            .as_deref()
            .is_some_and(|name| name.starts_with("warmbox-javascript-")));
    }

    #[tokio::test]
    async fn test_start_failure_removes_sandbox() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_starts(true);

        let err = runtime
            .create_and_start(&SandboxSpec::idle("golang:1.22", "golang"))
            .await
            .unwrap_err();
        assert!(matches!(err, WarmboxError::Resource(_)));
        assert_eq!(runtime.created(), 1);
        assert_eq!(runtime.removed(), 1);
        assert_eq!(runtime.live(), 0);
    }

    #[tokio::test]
    async fn test_deadline_unbounded() {
        let deadline = Deadline::unbounded();
        assert!(!deadline.is_bounded());
        let value = deadline.run(Stage::Execute, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let err = deadline
            .run(Stage::InjectCode, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WarmboxError::Timeout { stage: Stage::InjectCode }));
    }
}
