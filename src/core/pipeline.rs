/// Execution pipeline
///
/// Runs one request end to end: resolve the language profile, obtain a
/// sandbox, prepare the workspace, inject the source, execute and capture.
/// The pooled strategy borrows a warm sandbox through a lease; the one-shot
/// strategy creates a dedicated sandbox and removes it afterwards.
use crate::config::presets::LanguageProfile;
use crate::config::types::{
    ExecOutput, ExecutionMode, ExecutionRequest, ExecutionResult, Result, SandboxId, Stage,
    WarmboxError,
};
use crate::core::pool::{SandboxLease, SandboxPool};
use crate::runtime::{Deadline, SandboxRuntime, SandboxSpec};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Directory inside the sandbox that receives the source file
    pub workspace: String,
    /// Bound on every engine call of one request
    pub timeout: Option<Duration>,
    pub mode: ExecutionMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workspace: "/app".to_string(),
            timeout: None,
            mode: ExecutionMode::Pooled,
        }
    }
}

pub struct ExecutionPipeline {
    pool: Arc<SandboxPool>,
    settings: PipelineSettings,
}

/// Decrements the active-requests gauge however the request ends
struct ActiveRequest<'a>(&'a SandboxPool);

impl<'a> ActiveRequest<'a> {
    fn enter(pool: &'a SandboxPool) -> Self {
        pool.metrics().active_requests.inc();
        Self(pool)
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.0.metrics().active_requests.dec();
    }
}

/// Removes a one-shot sandbox if the request is dropped before cleanup ran
struct Teardown {
    runtime: Arc<dyn SandboxRuntime>,
    id: Option<SandboxId>,
}

impl Teardown {
    async fn finish(mut self) {
        if let Some(id) = self.id.take() {
            if let Err(err) = self.runtime.remove(&id).await {
                log::warn!("Failed to remove one-shot sandbox {}: {}", id.short(), err);
            }
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let runtime = Arc::clone(&self.runtime);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = runtime.remove(&id).await {
                        log::warn!("Failed to remove one-shot sandbox {}: {}", id.short(), err);
                    }
                });
            }
            Err(_) => log::warn!("One-shot sandbox {} leaked: no runtime for cleanup", id.short()),
        }
    }
}

impl ExecutionPipeline {
    pub fn new(pool: Arc<SandboxPool>, settings: PipelineSettings) -> Self {
        Self { pool, settings }
    }

    pub fn pool(&self) -> &Arc<SandboxPool> {
        &self.pool
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        self.run(&request.language, &request.code).await
    }

    /// Run `code` with the configured strategy. A non-zero exit status or
    /// stderr output is a normal result, not an error.
    pub async fn run(&self, language: &str, code: &[u8]) -> Result<ExecutionResult> {
        self.run_with_mode(language, code, self.settings.mode).await
    }

    pub async fn run_with_mode(
        &self,
        language: &str,
        code: &[u8],
        mode: ExecutionMode,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let _active = ActiveRequest::enter(&self.pool);

        let outcome = match self.pool.registry().resolve(language) {
            Ok(profile) => {
                let deadline = Deadline::from_timeout(self.settings.timeout);
                match mode {
                    ExecutionMode::Pooled => self.run_pooled(profile, code, deadline).await,
                    ExecutionMode::OneShot => self.run_one_shot(profile, code, deadline).await,
                }
            }
            Err(err) => Err(err),
        };

        let elapsed = started.elapsed();
        self.pool
            .metrics()
            .record_request(outcome.as_ref().err().map(WarmboxError::class), elapsed);

        let duration_ms = elapsed.as_millis() as u64;
        match outcome {
            Ok((output, id)) => {
                log::debug!(
                    "{} request on {} finished in {}ms with exit {:?}",
                    language,
                    id.short(),
                    duration_ms,
                    output.exit_code
                );
                Ok(ExecutionResult::from_output(output, id, duration_ms))
            }
            Err(err) => {
                if err.is_client_error() {
                    log::info!("Rejected {} request: {}", language, err);
                } else {
                    log::error!("{} request failed after {}ms: {}", language, duration_ms, err);
                }
                Err(err)
            }
        }
    }

    async fn run_pooled(
        &self,
        profile: &LanguageProfile,
        code: &[u8],
        deadline: Deadline,
    ) -> Result<(ExecOutput, SandboxId)> {
        let lease = deadline
            .run(Stage::Acquire, self.pool.acquire(&profile.language))
            .await?;

        let outcome = self.drive(&lease, profile, code, deadline).await;
        let id = lease.id().clone();

        match outcome {
            // The program may still be running; the sandbox cannot be reused
            Err(err @ WarmboxError::Timeout { .. }) => {
                drop(lease.discard());
                Err(err)
            }
            Err(err) => {
                lease.release();
                Err(err)
            }
            Ok(output) => {
                lease.release();
                Ok((output, id))
            }
        }
    }

    async fn drive(
        &self,
        lease: &SandboxLease,
        profile: &LanguageProfile,
        code: &[u8],
        deadline: Deadline,
    ) -> Result<ExecOutput> {
        let runtime = self.pool.runtime();
        let id = lease.id();
        let workspace = self.settings.workspace.as_str();
        let file = profile.source_path(workspace);

        deadline
            .run(Stage::PrepareWorkspace, runtime.ensure_directory(id, workspace))
            .await?;
        deadline
            .run(Stage::InjectCode, runtime.inject_file(id, code, &file))
            .await?;
        deadline
            .run(Stage::Execute, runtime.execute(id, &profile.run_command(&file)))
            .await
    }

    async fn run_one_shot(
        &self,
        profile: &LanguageProfile,
        code: &[u8],
        deadline: Deadline,
    ) -> Result<(ExecOutput, SandboxId)> {
        let runtime = Arc::clone(self.pool.runtime());
        let workspace = self.settings.workspace.as_str();
        let file = profile.source_path(workspace);
        let spec = SandboxSpec::one_shot(
            &profile.image,
            &profile.language,
            profile.run_command(&file),
            workspace,
        );

        deadline
            .run(Stage::Acquire, self.pool.prepare_image(&profile.image))
            .await?;
        let id = deadline
            .run(Stage::Acquire, runtime.create(&spec))
            .await?;
        let teardown = Teardown {
            runtime: Arc::clone(&runtime),
            id: Some(id.clone()),
        };

        let outcome = self
            .drive_one_shot(runtime.as_ref(), &id, code, &file, deadline)
            .await;

        teardown.finish().await;
        outcome.map(|output| (output, id))
    }

    async fn drive_one_shot(
        &self,
        runtime: &dyn SandboxRuntime,
        id: &SandboxId,
        code: &[u8],
        file: &str,
        deadline: Deadline,
    ) -> Result<ExecOutput> {
        deadline
            .run(Stage::InjectCode, runtime.inject_file(id, code, file))
            .await?;
        deadline.run(Stage::Execute, runtime.start(id)).await?;
        deadline.run(Stage::Wait, runtime.wait(id)).await
    }
}
