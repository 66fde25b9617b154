/// Docker Engine API backend
///
/// Pooled sandboxes are containers idling on `sleep infinity`; code runs in
/// them through attached exec sessions. Files travel through the archive
/// endpoints as single-entry tar streams.
use crate::config::config::EngineConfig;
use crate::config::types::{ExecOutput, Result, SandboxId, WarmboxError};
use crate::runtime::archive;
use crate::runtime::{SandboxRuntime, SandboxSpec};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::time::Duration;

/// Seconds the engine waits before killing a container on stop
const STOP_GRACE_SECS: i64 = 2;

/// The attach stream can close before the engine records the exit status
const EXEC_INSPECT_ATTEMPTS: usize = 50;
const EXEC_INSPECT_INTERVAL: Duration = Duration::from_millis(20);

pub struct DockerRuntime {
    docker: Docker,
}

fn status_code(err: &DockerError) -> Option<u16> {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// Engine answered with one of `codes`
fn has_status(err: &DockerError, codes: &[u16]) -> bool {
    status_code(err).is_some_and(|code| codes.contains(&code))
}

/// Whether an exec inspection reflects a finished session. Engines that do
/// not report `running` are trusted once they report an exit code.
fn exec_settled(running: Option<bool>, exit_code: Option<i64>) -> bool {
    match running {
        Some(running) => !running,
        None => exit_code.is_some(),
    }
}

fn demux(output: &mut ExecOutput, chunk: LogOutput) {
    match chunk {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            output.stdout.extend_from_slice(&message)
        }
        LogOutput::StdErr { message } => output.stderr.extend_from_slice(&message),
        LogOutput::StdIn { .. } => {}
    }
}

impl DockerRuntime {
    /// Connect using `engine.endpoint`, or the local defaults (which honour
    /// `DOCKER_HOST`) when none is configured, then negotiate the API version.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let timeout = config.timeout_secs;
        let docker = match config.endpoint.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(endpoint) if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") => {
                Docker::connect_with_http(endpoint, timeout, API_DEFAULT_VERSION)
            }
            #[cfg(unix)]
            Some(endpoint) => Docker::connect_with_unix(endpoint, timeout, API_DEFAULT_VERSION),
            #[cfg(not(unix))]
            Some(endpoint) => {
                return Err(WarmboxError::Config(format!(
                    "unsupported engine endpoint on this platform: {}",
                    endpoint
                )))
            }
        }
        .map_err(|e| WarmboxError::Resource(format!("failed to connect to Docker: {}", e)))?;

        let docker = docker
            .negotiate_version()
            .await
            .map_err(|e| WarmboxError::Resource(format!("Docker version negotiation failed: {}", e)))?;

        log::info!(
            "Connected to Docker engine ({})",
            config.endpoint.as_deref().unwrap_or("local defaults")
        );
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Run `argv` attached, drain both streams, then inspect the exit code
    async fn run_exec(
        &self,
        id: &SandboxId,
        argv: &[String],
    ) -> std::result::Result<ExecOutput, DockerError> {
        let exec = self
            .docker
            .create_exec(
                id.as_str(),
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut output = ExecOutput::default();
        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(chunk) = stream.next().await {
                    demux(&mut output, chunk?);
                }
            }
            StartExecResults::Detached => {
                log::debug!("Exec session {} started detached", exec.id);
            }
        }

        output.exit_code = self.exec_exit_code(&exec.id).await?;
        Ok(output)
    }

    async fn exec_exit_code(&self, exec_id: &str) -> std::result::Result<Option<i64>, DockerError> {
        let mut attempts = 0;
        loop {
            let inspect = self.docker.inspect_exec(exec_id).await?;
            attempts += 1;
            if exec_settled(inspect.running, inspect.exit_code) {
                return Ok(inspect.exit_code);
            }
            if attempts >= EXEC_INSPECT_ATTEMPTS {
                log::warn!(
                    "Exec session {} still running after {} inspections",
                    exec_id,
                    attempts
                );
                return Ok(inspect.exit_code);
            }
            tokio::time::sleep(EXEC_INSPECT_INTERVAL).await;
        }
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| WarmboxError::Resource(format!("Docker engine unreachable: {}", e)))
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if has_status(&e, &[404]) => Ok(false),
            Err(e) => Err(WarmboxError::Resource(format!(
                "failed to inspect image {}: {}",
                image, e
            ))),
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<bool> {
        if self.image_present(image).await? {
            return Ok(false);
        }

        log::info!("Pulling image {}", image);
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });
        let stream = self.docker.create_image(options, None, None);
        futures_util::pin_mut!(stream);
        while let Some(progress) = stream.next().await {
            let progress = progress
                .map_err(|e| WarmboxError::Resource(format!("failed to pull {}: {}", image, e)))?;
            if let Some(status) = progress.status {
                log::debug!("{}: {}", image, status);
            }
        }
        Ok(true)
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: spec.working_dir.clone(),
            labels: Some(spec.labels.clone().into_iter().collect::<HashMap<_, _>>()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| {
                WarmboxError::Resource(format!(
                    "failed to create container from {}: {}",
                    spec.image, e
                ))
            })?;

        for warning in &response.warnings {
            log::warn!("Docker warning for {}: {}", spec.image, warning);
        }
        Ok(SandboxId::new(response.id))
    }

    async fn start(&self, id: &SandboxId) -> Result<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                WarmboxError::Resource(format!("failed to start container {}: {}", id.short(), e))
            })
    }

    async fn ensure_directory(&self, id: &SandboxId, path: &str) -> Result<()> {
        let argv = vec!["mkdir".to_string(), "-p".to_string(), path.to_string()];
        let output = self.run_exec(id, &argv).await.map_err(|e| {
            WarmboxError::Transfer(format!(
                "failed to prepare {} in {}: {}",
                path,
                id.short(),
                e
            ))
        })?;

        match output.exit_code {
            Some(0) => Ok(()),
            code => Err(WarmboxError::Transfer(format!(
                "mkdir -p {} in {} exited with {:?}: {}",
                path,
                id.short(),
                code,
                output.stderr_lossy().trim()
            ))),
        }
    }

    async fn inject_file(&self, id: &SandboxId, content: &[u8], dest: &str) -> Result<()> {
        let (dir, name) = archive::split_destination(dest)?;
        let tar = archive::pack_single_file(&name, content)?;

        self.docker
            .upload_to_container(
                id.as_str(),
                Some(UploadToContainerOptions {
                    path: dir,
                    ..Default::default()
                }),
                tar.into(),
            )
            .await
            .map_err(|e| {
                WarmboxError::Transfer(format!(
                    "failed to inject {} into {}: {}",
                    dest,
                    id.short(),
                    e
                ))
            })
    }

    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>> {
        let stream = self.docker.download_from_container(
            id.as_str(),
            Some(DownloadFromContainerOptions {
                path: path.to_string(),
            }),
        );
        let tar = stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(|e| {
                WarmboxError::Transfer(format!(
                    "failed to read {} from {}: {}",
                    path,
                    id.short(),
                    e
                ))
            })?;

        archive::unpack_single_file(&tar)
    }

    async fn execute(&self, id: &SandboxId, argv: &[String]) -> Result<ExecOutput> {
        self.run_exec(id, argv).await.map_err(|e| {
            WarmboxError::Execution(format!("exec in {} failed: {}", id.short(), e))
        })
    }

    async fn wait(&self, id: &SandboxId) -> Result<ExecOutput> {
        let mut output = ExecOutput::default();

        let waiter = self.docker.wait_container(
            id.as_str(),
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        futures_util::pin_mut!(waiter);
        while let Some(item) = waiter.next().await {
            match item {
                Ok(response) => output.exit_code = Some(response.status_code),
                // Non-zero exits surface as wait errors
                Err(DockerError::DockerContainerWaitError { code, .. }) => {
                    output.exit_code = Some(code)
                }
                Err(e) => {
                    return Err(WarmboxError::Execution(format!(
                        "failed to wait for {}: {}",
                        id.short(),
                        e
                    )))
                }
            }
        }

        let logs = self.docker.logs(
            id.as_str(),
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: false,
                ..Default::default()
            }),
        );
        futures_util::pin_mut!(logs);
        while let Some(chunk) = logs.next().await {
            let chunk = chunk.map_err(|e| {
                WarmboxError::Execution(format!("failed to read logs of {}: {}", id.short(), e))
            })?;
            demux(&mut output, chunk);
        }

        Ok(output)
    }

    async fn stop(&self, id: &SandboxId) -> Result<()> {
        match self
            .docker
            .stop_container(id.as_str(), Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped, 404: already gone
            Err(e) if has_status(&e, &[304, 404]) => Ok(()),
            Err(e) => Err(WarmboxError::Resource(format!(
                "failed to stop container {}: {}",
                id.short(),
                e
            ))),
        }
    }

    async fn remove(&self, id: &SandboxId) -> Result<()> {
        match self
            .docker
            .remove_container(
                id.as_str(),
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if has_status(&e, &[404]) => Ok(()),
            Err(e) => Err(WarmboxError::Resource(format!(
                "failed to remove container {}: {}",
                id.short(),
                e
            ))),
        }
    }
}
