use crate::config::config::WarmboxConfig;
use crate::config::types::{
    ErrorReport, ExecutionMode, ExecutionRequest, ExecutionResult, WarmboxError,
};
use crate::core::pipeline::{ExecutionPipeline, PipelineSettings};
use crate::core::pool::SandboxPool;
use crate::runtime::docker::DockerRuntime;
use crate::runtime::SandboxRuntime;
use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config.json (defaults to ./config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Docker endpoint (unix socket path, unix://, tcp:// or http://)
    #[arg(long, global = true)]
    engine: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one snippet and print the result as JSON
    ExecuteCode {
        /// Language tag (python, golang, javascript or an alias)
        #[arg(long)]
        language: String,
        /// Source code as string
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,
        /// Read source code from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Execution strategy (pooled or one-shot)
        #[arg(long)]
        mode: Option<ExecutionMode>,
        /// Request deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Warm sandboxes to create before running
        #[arg(long)]
        pool_size: Option<usize>,
    },
    /// Run JSON-lines requests concurrently, one JSON result line per request
    Batch {
        /// Input file (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Execution strategy (pooled or one-shot)
        #[arg(long)]
        mode: Option<ExecutionMode>,
        /// Request deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Warm sandboxes per language
        #[arg(long)]
        pool_size: Option<usize>,
    },
    /// List registered languages
    Languages,
    /// Check engine connectivity and image availability
    CheckEngine {
        /// Verbose output showing images and run commands
        #[arg(long)]
        verbose: bool,
    },
}

pub async fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = WarmboxConfig::load_or_default(cli.config.as_deref())?;
    if let Some(engine) = cli.engine {
        config.engine.endpoint = Some(engine);
    }

    match cli.command {
        Commands::ExecuteCode {
            language,
            code,
            file,
            mode,
            timeout_ms,
            pool_size,
        } => {
            apply_overrides(&mut config, mode, timeout_ms, pool_size);
            let code = match (code, file) {
                (Some(code), _) => code.into_bytes(),
                (None, Some(path)) => std::fs::read(&path).map_err(|e| {
                    anyhow::anyhow!("Failed to read source file {}: {}", path.display(), e)
                })?,
                (None, None) => return Err(anyhow::anyhow!("either --code or --file is required")),
            };
            execute_code(&config, &language, code, pool_size.unwrap_or(0)).await
        }
        Commands::Batch {
            input,
            mode,
            timeout_ms,
            pool_size,
        } => {
            apply_overrides(&mut config, mode, timeout_ms, pool_size);
            run_batch(&config, input).await
        }
        Commands::Languages => list_languages(&config),
        Commands::CheckEngine { verbose } => check_engine(&config, verbose).await,
    }
}

fn apply_overrides(
    config: &mut WarmboxConfig,
    mode: Option<ExecutionMode>,
    timeout_ms: Option<u64>,
    pool_size: Option<usize>,
) {
    if let Some(mode) = mode {
        config.execution.mode = mode;
    }
    if timeout_ms.is_some() {
        config.execution.timeout_ms = timeout_ms;
    }
    if let Some(size) = pool_size {
        config.pool.size = size;
    }
}

fn pipeline_settings(config: &WarmboxConfig) -> PipelineSettings {
    PipelineSettings {
        workspace: config.execution.workspace.clone(),
        timeout: config.request_timeout(),
        mode: config.execution.mode,
    }
}

/// Connect to the engine, pull images and warm `size` sandboxes per language
async fn start_pool(
    config: &WarmboxConfig,
    languages: &[String],
    size: usize,
) -> Result<Arc<SandboxPool>> {
    let registry = Arc::new(config.validate()?);
    let runtime: Arc<dyn SandboxRuntime> = Arc::new(DockerRuntime::connect(&config.engine).await?);
    runtime.ping().await?;

    let pool = Arc::new(
        SandboxPool::new(runtime, registry).with_image_pulls(config.engine.pull_images),
    );
    if config.engine.pull_images {
        let pulled = pool.pull_images(languages).await?;
        if !pulled.is_empty() {
            log::info!("Pulled images: {}", pulled.join(", "));
        }
    }

    if size > 0 && config.execution.mode == ExecutionMode::Pooled {
        let report = pool.initialize(languages, size).await;
        for failure in &report.failures {
            eprintln!(
                "Warning: failed to warm sandbox for {}: {}",
                failure.language, failure.error
            );
        }
        log::info!("Warmed {} sandboxes", report.total_created());
    }

    if let Some(max_idle) = config.idle_timeout() {
        pool.spawn_reaper(config.reap_interval(), max_idle, size);
    }

    Ok(pool)
}

fn outcome_json(
    index: Option<usize>,
    outcome: &std::result::Result<ExecutionResult, WarmboxError>,
) -> serde_json::Value {
    let mut value = match outcome {
        Ok(result) => json!({ "status": "ok", "result": result }),
        Err(err) => json!({ "status": "error", "error": ErrorReport::from(err) }),
    };
    if let (Some(index), Some(object)) = (index, value.as_object_mut()) {
        object.insert("index".to_string(), json!(index));
    }
    value
}

async fn execute_code(
    config: &WarmboxConfig,
    language: &str,
    code: Vec<u8>,
    warm: usize,
) -> Result<()> {
    let registry = config.validate()?;
    let canonical = registry
        .canonical(language)
        .map(str::to_string)
        .unwrap_or_else(|| language.to_string());

    let outcome = if registry.has(language) {
        let pool = start_pool(config, &[canonical], warm).await?;
        let pipeline = ExecutionPipeline::new(Arc::clone(&pool), pipeline_settings(config));
        let outcome = pipeline.run(language, &code).await;
        let drained = pool.drain().await;
        for failure in &drained.failures {
            eprintln!("Warning: cleanup failed: {}", failure);
        }
        outcome
    } else {
        Err(WarmboxError::unsupported_language(language))
    };

    println!("{}", serde_json::to_string_pretty(&outcome_json(None, &outcome))?);

    match outcome {
        Ok(_) => Ok(()),
        Err(err) if err.is_client_error() => std::process::exit(2),
        Err(_) => std::process::exit(1),
    }
}

fn read_requests(input: Option<PathBuf>) -> Result<Vec<std::result::Result<ExecutionRequest, String>>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(std::io::BufReader::new(std::fs::File::open(&path).map_err(
            |e| anyhow::anyhow!("Failed to open {}: {}", path.display(), e),
        )?)),
        None => Box::new(std::io::BufReader::new(std::io::stdin())),
    };

    let mut requests = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        requests.push(
            serde_json::from_str::<ExecutionRequest>(&line)
                .map_err(|e| format!("invalid request JSON: {}", e)),
        );
    }
    Ok(requests)
}

async fn run_batch(config: &WarmboxConfig, input: Option<PathBuf>) -> Result<()> {
    let requests = read_requests(input)?;
    let pool = start_pool(config, &config.pool.languages, config.pool.size).await?;
    let pipeline = Arc::new(ExecutionPipeline::new(
        Arc::clone(&pool),
        pipeline_settings(config),
    ));

    let handles: Vec<JoinHandle<std::result::Result<ExecutionResult, WarmboxError>>> = requests
        .into_iter()
        .map(|request| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                match request {
                    Ok(request) => pipeline.submit(&request).await,
                    Err(message) => Err(WarmboxError::Validation(message)),
                }
            })
        })
        .collect();
    log::info!("Dispatched {} requests", handles.len());

    let mut platform_errors = 0;
    let mut cancelled = Vec::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut handles = handles.into_iter().enumerate();
    while let Some((index, mut handle)) = handles.next() {
        tokio::select! {
            joined = &mut handle => {
                let outcome = joined.unwrap_or_else(|e| {
                    Err(WarmboxError::Execution(format!("request task failed: {}", e)))
                });
                if matches!(&outcome, Err(err) if !err.is_client_error()) {
                    platform_errors += 1;
                }
                println!("{}", outcome_json(Some(index), &outcome));
            }
            _ = &mut ctrl_c => {
                eprintln!("Interrupted, cancelling outstanding requests");
                handle.abort();
                cancelled.push(handle);
                for (_, rest) in handles.by_ref() {
                    rest.abort();
                    cancelled.push(rest);
                }
                break;
            }
        }
    }

    // Aborted requests drop their leases, which returns the sandboxes before draining
    let interrupted = !cancelled.is_empty();
    for handle in cancelled {
        let _ = handle.await;
    }

    eprintln!("{}", serde_json::to_string_pretty(&pool.status())?);
    eprint!("{}", pool.metrics().export_prometheus());

    let drained = pool.drain().await;
    for failure in &drained.failures {
        eprintln!("Warning: cleanup failed: {}", failure);
    }

    if interrupted {
        std::process::exit(130);
    }
    if platform_errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn list_languages(config: &WarmboxConfig) -> Result<()> {
    let registry = config.build_registry()?;
    println!("{}", serde_json::to_string_pretty(&registry.list())?);
    Ok(())
}

/// Check engine connectivity and whether each language image is present
async fn check_engine(config: &WarmboxConfig, verbose: bool) -> Result<()> {
    let registry = config.build_registry()?;

    println!("🔍 Checking container engine...");
    println!();

    let runtime = match DockerRuntime::connect(&config.engine).await {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("❌ Engine - UNREACHABLE ({})", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.ping().await {
        println!("❌ Engine - UNREACHABLE ({})", e);
        std::process::exit(1);
    }
    println!("✅ Engine - OK");

    let mut missing = Vec::new();
    for profile in registry.list() {
        match runtime.image_present(&profile.image).await {
            Ok(true) => println!("✅ {} - {} present", profile.language, profile.image),
            Ok(false) => {
                println!("❌ {} - {} MISSING", profile.language, profile.image);
                missing.push(profile.image.clone());
            }
            Err(e) => {
                println!("❌ {} - {} ({})", profile.language, profile.image, e);
                missing.push(profile.image.clone());
            }
        }
        if verbose {
            println!("  run -> {}", profile.run.join(" "));
            println!("  file -> {}", profile.source_path(&config.execution.workspace));
        }
    }

    println!();
    if missing.is_empty() {
        println!("🎉 All language images are available");
    } else if config.engine.pull_images {
        println!("Missing images are pulled on start-up: {}", missing.join(", "));
    } else {
        println!("🔧 Pull missing images with:");
        for image in &missing {
            println!("   docker pull {}", image);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_execute_code() {
        let cli = Cli::try_parse_from([
            "warmbox",
            "execute-code",
            "--language",
            "python",
            "--code",
            "print('hi')",
            "--mode",
            "one-shot",
            "--timeout-ms",
            "500",
        ])
        .unwrap();

        match cli.command {
            Commands::ExecuteCode {
                language,
                code,
                mode,
                timeout_ms,
                ..
            } => {
                assert_eq!(language, "python");
                assert_eq!(code.as_deref(), Some("print('hi')"));
                assert_eq!(mode, Some(ExecutionMode::OneShot));
                assert_eq!(timeout_ms, Some(500));
            }
            _ => panic!("expected execute-code"),
        }
    }

    #[test]
    fn test_code_or_file_required() {
        assert!(Cli::try_parse_from(["warmbox", "execute-code", "--language", "python"]).is_err());
        assert!(Cli::try_parse_from([
            "warmbox",
            "execute-code",
            "--language",
            "python",
            "--code",
            "x",
            "--file",
            "main.py",
        ])
        .is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = WarmboxConfig::default();
        apply_overrides(&mut config, Some(ExecutionMode::OneShot), Some(250), Some(5));
        assert_eq!(config.execution.mode, ExecutionMode::OneShot);
        assert_eq!(config.execution.timeout_ms, Some(250));
        assert_eq!(config.pool.size, 5);

        let settings = pipeline_settings(&config);
        assert_eq!(settings.timeout, Some(std::time::Duration::from_millis(250)));
    }

    #[test]
    fn test_outcome_json() {
        let err: std::result::Result<ExecutionResult, WarmboxError> =
            Err(WarmboxError::unsupported_language("ruby"));
        let value = outcome_json(Some(3), &err);
        assert_eq!(value["index"], 3);
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["class"], "validation");
        assert_eq!(value["error"]["client_error"], true);
    }
}
