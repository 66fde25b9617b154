/// In-memory sandbox runtime
///
/// Containers are entries in a map, files are byte buffers keyed by path and
/// programs are run by a tiny interpreter that understands the handful of
/// statements the test suite feeds it:
///
/// - `print(..)`, `console.log(..)`, `fmt.Println(..)` write a line to stdout
/// - `sys.exit(n)`, `process.exit(n)`, `os.Exit(n)` stop with exit code `n`
/// - `raise ..`, `throw ..` write the message to stderr and exit with 1
///
/// Statements are separated by newlines or `;`; anything else is ignored.
use crate::config::types::{ExecOutput, Result, SandboxId, WarmboxError};
use crate::runtime::archive;
use crate::runtime::{SandboxRuntime, SandboxSpec};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

#[derive(Debug)]
struct MockContainer {
    command: Vec<String>,
    running: bool,
    dirs: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
}

impl MockContainer {
    fn new(spec: &SandboxSpec) -> Self {
        let mut container = Self {
            command: spec.command.clone(),
            running: false,
            dirs: HashSet::new(),
            files: HashMap::new(),
        };
        container.mkdir("/");
        if let Some(dir) = &spec.working_dir {
            container.mkdir(dir);
        }
        container
    }

    fn mkdir(&mut self, path: &str) {
        let mut current = String::new();
        self.dirs.insert("/".to_string());
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            self.dirs.insert(current.clone());
        }
    }

    /// Run `argv` against the container's filesystem
    fn run(&self, argv: &[String]) -> ExecOutput {
        let source = argv.iter().rev().find_map(|arg| self.files.get(arg));
        match source {
            Some(code) => interpret(code),
            None => ExecOutput {
                stdout: Vec::new(),
                stderr: format!("{}: No such file or directory\n", argv.join(" ")).into_bytes(),
                exit_code: Some(127),
            },
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    pulled: HashSet<String>,
}

/// Sandbox runtime that keeps everything in process memory
#[derive(Debug)]
pub struct InMemoryRuntime {
    state: Mutex<MockState>,
    next_id: AtomicUsize,
    created: AtomicUsize,
    removed: AtomicUsize,
    stopped: AtomicUsize,
    programs_run: AtomicUsize,
    failing_creates: AtomicUsize,
    failing_injects: AtomicBool,
    failing_starts: AtomicBool,
    create_delay: Duration,
    exec_delay: Duration,
    exec_barrier: Option<Arc<Barrier>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            next_id: AtomicUsize::new(1),
            created: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            programs_run: AtomicUsize::new(0),
            failing_creates: AtomicUsize::new(0),
            failing_injects: AtomicBool::new(false),
            failing_starts: AtomicBool::new(false),
            create_delay: Duration::ZERO,
            exec_delay: Duration::ZERO,
            exec_barrier: None,
        }
    }

    /// Delay every sandbox creation
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Delay every program run
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    /// Hold program runs until `parties` of them are in flight together
    pub fn with_exec_barrier(mut self, parties: usize) -> Self {
        self.exec_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// Make the next `count` creations fail
    pub fn fail_next_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_injects(&self, fail: bool) {
        self.failing_injects.store(fail, Ordering::SeqCst);
    }

    pub fn fail_starts(&self, fail: bool) {
        self.failing_starts.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn programs_run(&self) -> usize {
        self.programs_run.load(Ordering::SeqCst)
    }

    /// Containers that exist (created and not removed)
    pub fn live(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn is_running(&self, id: &SandboxId) -> bool {
        self.lock()
            .containers
            .get(id.as_str())
            .map(|c| c.running)
            .unwrap_or(false)
    }

    /// Contents of `path` inside `id`, if present
    pub fn file(&self, id: &SandboxId, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(id.as_str())
            .and_then(|c| c.files.get(path).cloned())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_container<T>(
        &self,
        id: &SandboxId,
        f: impl FnOnce(&mut MockContainer) -> T,
    ) -> Option<T> {
        self.lock().containers.get_mut(id.as_str()).map(f)
    }

    async fn hold_program(&self) {
        self.programs_run.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.exec_barrier {
            barrier.wait().await;
        }
        if !self.exec_delay.is_zero() {
            tokio::time::sleep(self.exec_delay).await;
        }
    }
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxRuntime for InMemoryRuntime {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        Ok(self.lock().pulled.contains(image))
    }

    async fn ensure_image(&self, image: &str) -> Result<bool> {
        Ok(self.lock().pulled.insert(image.to_string()))
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }

        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WarmboxError::Resource(format!(
                "failed to create container from {}: injected failure",
                spec.image
            )));
        }

        let id = format!("mock{:060x}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.lock()
            .containers
            .insert(id.clone(), MockContainer::new(spec));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxId::new(id))
    }

    async fn start(&self, id: &SandboxId) -> Result<()> {
        if self.failing_starts.load(Ordering::SeqCst) {
            return Err(WarmboxError::Execution(format!(
                "failed to start {}: injected failure",
                id.short()
            )));
        }
        self.with_container(id, |c| c.running = true)
            .ok_or_else(|| WarmboxError::Resource(format!("no such container: {}", id.short())))
    }

    async fn ensure_directory(&self, id: &SandboxId, path: &str) -> Result<()> {
        self.with_container(id, |c| {
            if c.running {
                c.mkdir(path);
                Ok(())
            } else {
                Err(WarmboxError::Transfer(format!(
                    "container {} is not running",
                    id.short()
                )))
            }
        })
        .unwrap_or_else(|| {
            Err(WarmboxError::Transfer(format!(
                "no such container: {}",
                id.short()
            )))
        })
    }

    async fn inject_file(&self, id: &SandboxId, content: &[u8], dest: &str) -> Result<()> {
        if self.failing_injects.load(Ordering::SeqCst) {
            return Err(WarmboxError::Transfer(format!(
                "failed to inject {} into {}: injected failure",
                dest,
                id.short()
            )));
        }

        let (dir, name) = archive::split_destination(dest)?;
        let tar = archive::pack_single_file(&name, content)?;
        let bytes = archive::unpack_single_file(&tar)?;

        self.with_container(id, |c| {
            if !c.dirs.contains(&dir) {
                return Err(WarmboxError::Transfer(format!(
                    "failed to inject {} into {}: no such directory {}",
                    dest,
                    id.short(),
                    dir
                )));
            }
            c.files.insert(dest.to_string(), bytes);
            Ok(())
        })
        .unwrap_or_else(|| {
            Err(WarmboxError::Transfer(format!(
                "no such container: {}",
                id.short()
            )))
        })
    }

    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>> {
        let (_, name) = archive::split_destination(path)?;
        let content = self.file(id, path).ok_or_else(|| {
            WarmboxError::Transfer(format!("no such file {} in {}", path, id.short()))
        })?;
        let tar = archive::pack_single_file(&name, &content)?;
        archive::unpack_single_file(&tar)
    }

    async fn execute(&self, id: &SandboxId, argv: &[String]) -> Result<ExecOutput> {
        let running = self.with_container(id, |c| c.running).ok_or_else(|| {
            WarmboxError::Execution(format!("no such container: {}", id.short()))
        })?;
        if !running {
            return Err(WarmboxError::Execution(format!(
                "container {} is not running",
                id.short()
            )));
        }

        if argv.first().map(String::as_str) == Some("mkdir") {
            self.with_container(id, |c| {
                for path in argv[1..].iter().filter(|arg| !arg.starts_with('-')) {
                    c.mkdir(path);
                }
            });
            return Ok(ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            });
        }

        self.hold_program().await;
        self.with_container(id, |c| c.run(argv))
            .ok_or_else(|| WarmboxError::Execution(format!("container {} vanished", id.short())))
    }

    async fn wait(&self, id: &SandboxId) -> Result<ExecOutput> {
        let command = self
            .with_container(id, |c| c.command.clone())
            .ok_or_else(|| WarmboxError::Execution(format!("no such container: {}", id.short())))?;

        self.hold_program().await;
        self.with_container(id, |c| {
            let output = c.run(&command);
            c.running = false;
            output
        })
        .ok_or_else(|| WarmboxError::Execution(format!("container {} vanished", id.short())))
    }

    async fn stop(&self, id: &SandboxId) -> Result<()> {
        if self.with_container(id, |c| c.running = false).is_some() {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn remove(&self, id: &SandboxId) -> Result<()> {
        if self.lock().containers.remove(id.as_str()).is_some() {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn interpret(code: &[u8]) -> ExecOutput {
    let source = String::from_utf8_lossy(code);
    let mut output = ExecOutput {
        exit_code: Some(0),
        ..Default::default()
    };

    for statement in source.split(|c: char| c == '\n' || c == ';').map(str::trim) {
        if let Some(arg) = call_argument(statement, &["print", "console.log", "fmt.Println"]) {
            output.stdout.extend_from_slice(literal(arg).as_bytes());
            output.stdout.push(b'\n');
        } else if let Some(arg) = call_argument(statement, &["sys.exit", "process.exit", "os.Exit"]) {
            output.exit_code = Some(arg.trim().parse().unwrap_or(1));
            break;
        } else if let Some(message) = statement
            .strip_prefix("raise ")
            .or_else(|| statement.strip_prefix("throw "))
        {
            output.stderr.extend_from_slice(message.trim().as_bytes());
            output.stderr.push(b'\n');
            output.exit_code = Some(1);
            break;
        }
    }

    output
}

fn call_argument<'a>(statement: &'a str, functions: &[&str]) -> Option<&'a str> {
    functions.iter().find_map(|function| {
        statement
            .strip_prefix(function)
            .and_then(|rest| rest.trim_start().strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
    })
}

fn literal(arg: &str) -> &str {
    let arg = arg.trim();
    for quote in ['\'', '"', '`'] {
        if let Some(inner) = arg
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    arg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_print() {
        let output = interpret(b"print('hi')");
        assert_eq!(output.stdout, b"hi\n");
        assert!(output.stderr.is_empty());
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn test_interpret_exit() {
        let output = interpret(b"import sys; sys.exit(1)");
        assert!(output.stdout.is_empty());
        assert_eq!(output.exit_code, Some(1));
    }

    #[test]
    fn test_interpret_throw() {
        let output = interpret(b"console.log(\"a\")\nthrow new Error('boom')\nconsole.log(\"b\")");
        assert_eq!(output.stdout, b"a\n");
        assert_eq!(output.stderr, b"new Error('boom')\n");
        assert_eq!(output.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_inject_requires_directory() {
        let runtime = InMemoryRuntime::new();
        let id = runtime
            .create_and_start(&SandboxSpec::idle("python:3.12", "python"))
            .await
            .unwrap();

        let err = runtime
            .inject_file(&id, b"print(1)", "/app/main.py")
            .await
            .unwrap_err();
        assert!(matches!(err, WarmboxError::Transfer(_)));

        runtime.ensure_directory(&id, "/app").await.unwrap();
        runtime.inject_file(&id, b"print(1)", "/app/main.py").await.unwrap();
        assert_eq!(runtime.file(&id, "/app/main.py").unwrap(), b"print(1)");
    }

    #[tokio::test]
    async fn test_failed_creates() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_next_creates(1);
        let spec = SandboxSpec::idle("node:20", "javascript");

        assert!(runtime.create(&spec).await.is_err());
        assert!(runtime.create(&spec).await.is_ok());
        assert_eq!(runtime.created(), 1);
    }
}
