//! Integration tests against a live Docker Engine
//!
//! Ignored by default; run with `--ignored` on a host where the daemon is
//! reachable and the default language images can be pulled.

use std::sync::Arc;
use std::time::Duration;
use warmbox::config::config::EngineConfig;
use warmbox::runtime::docker::DockerRuntime;
use warmbox::{
    ExecutionMode, ExecutionPipeline, LanguageRegistry, PipelineSettings, SandboxPool,
    SandboxRuntime, SandboxSpec, WarmboxError,
};

async fn docker() -> Arc<DockerRuntime> {
    let runtime = DockerRuntime::connect(&EngineConfig::default())
        .await
        .expect("docker client");
    runtime.ping().await.expect("docker daemon reachable");
    Arc::new(runtime)
}

async fn pipeline(settings: PipelineSettings, languages: &[&str], size: usize) -> ExecutionPipeline {
    let runtime = docker().await;
    let pool = Arc::new(SandboxPool::new(runtime, Arc::new(LanguageRegistry::new())));
    let languages: Vec<String> = languages.iter().map(|l| l.to_string()).collect();
    pool.pull_images(&languages).await.expect("pull images");
    let report = pool.initialize(&languages, size).await;
    assert!(report.is_complete(), "warm-up failed: {:?}", report.failures);
    ExecutionPipeline::new(pool, settings)
}

#[tokio::test]
#[ignore]
async fn test_python_hello() {
    let pipeline = pipeline(PipelineSettings::default(), &["python"], 1).await;

    let result = pipeline.run("python", b"print('hi')").await.unwrap();
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, Some(0));

    let report = pipeline.pool().drain().await;
    assert!(report.failures.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_nonzero_exit_and_stderr() {
    let pipeline = pipeline(PipelineSettings::default(), &["python"], 1).await;

    let result = pipeline
        .run("python", b"import sys\nprint('out')\nsys.stderr.write('err\\n')\nsys.exit(3)")
        .await
        .unwrap();
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
    assert_eq!(result.exit_code, Some(3));

    pipeline.pool().drain().await;
}

#[tokio::test]
#[ignore]
async fn test_file_round_trip() {
    let runtime = docker().await;
    runtime.ensure_image("python:3.12").await.unwrap();
    let id = runtime
        .create_and_start(&SandboxSpec::idle("python:3.12", "python"))
        .await
        .unwrap();

    runtime.ensure_directory(&id, "/app").await.unwrap();
    let content = vec![0x00, 0xff, b'\n', 0x80, b'z'];
    runtime.inject_file(&id, &content, "/app/blob.bin").await.unwrap();
    assert_eq!(runtime.read_file(&id, "/app/blob.bin").await.unwrap(), content);

    runtime.stop(&id).await.unwrap();
    runtime.remove(&id).await.unwrap();
    // Removing twice is tolerated
    runtime.remove(&id).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_timeout_discards_container() {
    let settings = PipelineSettings {
        timeout: Some(Duration::from_secs(2)),
        ..Default::default()
    };
    let pipeline = pipeline(settings, &["python"], 1).await;

    let err = pipeline
        .run("python", b"import time\ntime.sleep(30)")
        .await
        .unwrap_err();
    assert!(matches!(err, WarmboxError::Timeout { .. }));
    assert_eq!(pipeline.pool().size("python"), 0);
}

#[tokio::test]
#[ignore]
async fn test_one_shot_node() {
    let settings = PipelineSettings {
        mode: ExecutionMode::OneShot,
        ..Default::default()
    };
    let pipeline = pipeline(settings, &["javascript"], 0).await;

    let result = pipeline.run("js", b"console.log(6 * 7)").await.unwrap();
    assert_eq!(result.stdout, "42\n");
    assert_eq!(result.exit_code, Some(0));
}
