/// Core types and error taxonomy for the warmbox system
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque sandbox identifier assigned by the isolation engine
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(String);

impl SandboxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines (container ids are 64 hex chars)
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stage, used to label where a request deadline expired
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquire,
    PrepareWorkspace,
    InjectCode,
    Execute,
    Wait,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Acquire => "sandbox acquisition",
            Stage::PrepareWorkspace => "workspace preparation",
            Stage::InjectCode => "code injection",
            Stage::Execute => "execution",
            Stage::Wait => "wait for exit",
        };
        f.write_str(name)
    }
}

/// Coarse error classification handed to the serving layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad request (unknown language)
    Validation,
    /// Sandbox creation/start or engine connectivity
    Resource,
    /// Workspace preparation or file transfer
    Transfer,
    /// Exec session create/attach/start/inspect
    Execution,
    /// Request deadline expired
    Timeout,
    /// Local configuration problem
    Config,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Resource => "resource",
            ErrorClass::Transfer => "transfer",
            ErrorClass::Execution => "execution",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Config => "config",
        }
    }
}

/// Error types for warmbox operations
#[derive(Error, Debug)]
pub enum WarmboxError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Deadline exceeded during {stage}")]
    Timeout { stage: Stage },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WarmboxError {
    pub fn unsupported_language(tag: &str) -> Self {
        WarmboxError::Validation(format!("unsupported language: {}", tag))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            WarmboxError::Validation(_) => ErrorClass::Validation,
            WarmboxError::Resource(_) => ErrorClass::Resource,
            WarmboxError::Transfer(_) => ErrorClass::Transfer,
            WarmboxError::Execution(_) => ErrorClass::Execution,
            WarmboxError::Timeout { .. } => ErrorClass::Timeout,
            WarmboxError::Config(_) | WarmboxError::Io(_) => ErrorClass::Config,
        }
    }

    /// True when the caller sent a bad request rather than hitting an infrastructure failure
    pub fn is_client_error(&self) -> bool {
        self.class() == ErrorClass::Validation
    }
}

pub type Result<T> = std::result::Result<T, WarmboxError>;

/// Strategy used by the pipeline to obtain a sandbox
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Borrow a warm sandbox from the pool and return it afterwards
    #[default]
    #[serde(rename = "pooled")]
    Pooled,
    /// Create a dedicated sandbox that runs the program as its main process, then remove it
    #[serde(rename = "one-shot")]
    OneShot,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pooled" | "pool" => Ok(ExecutionMode::Pooled),
            "one-shot" | "oneshot" | "one_shot" => Ok(ExecutionMode::OneShot),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Pooled => f.write_str("pooled"),
            ExecutionMode::OneShot => f.write_str("one-shot"),
        }
    }
}

/// Inbound request, after authentication by the serving layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Registered language tag (aliases accepted)
    pub language: String,
    /// Source code, transferred byte-for-byte
    #[serde(serialize_with = "serialize_code", deserialize_with = "deserialize_code")]
    pub code: Vec<u8>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<Vec<u8>>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }
}

/// JSON strings cannot carry arbitrary bytes; refuse rather than rewrite them
fn serialize_code<S: Serializer>(code: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let text = std::str::from_utf8(code).map_err(|e| {
        serde::ser::Error::custom(format!("code is not valid UTF-8: {}", e))
    })?;
    serializer.serialize_str(text)
}

fn deserialize_code<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    String::deserialize(deserializer).map(String::into_bytes)
}

/// Captured output of a command run inside a sandbox
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit status reported by the engine, when it could be inspected
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Successful pipeline result. A non-zero `exit_code` is ordinary data, not a failure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code of the user program, if the engine reported one
    pub exit_code: Option<i64>,
    /// Sandbox that ran the request
    pub sandbox_id: Option<SandboxId>,
    /// Wall time of the whole request in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn from_output(output: ExecOutput, sandbox_id: SandboxId, duration_ms: u64) -> Self {
        Self {
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            exit_code: output.exit_code,
            sandbox_id: Some(sandbox_id),
            duration_ms,
        }
    }
}

/// Error payload rendered for callers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorReport {
    pub class: ErrorClass,
    pub client_error: bool,
    pub message: String,
}

impl From<&WarmboxError> for ErrorReport {
    fn from(err: &WarmboxError) -> Self {
        Self {
            class: err.class(),
            client_error: err.is_client_error(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            WarmboxError::unsupported_language("ruby").class(),
            ErrorClass::Validation
        );
        assert!(WarmboxError::unsupported_language("ruby").is_client_error());
        assert!(!WarmboxError::Resource("engine down".into()).is_client_error());
        assert_eq!(
            WarmboxError::Timeout { stage: Stage::Execute }.class(),
            ErrorClass::Timeout
        );
        assert_eq!(
            WarmboxError::Timeout { stage: Stage::Execute }.to_string(),
            "Deadline exceeded during execution"
        );
    }

    #[test]
    fn test_sandbox_id_short() {
        let id = SandboxId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(SandboxId::new("abc").short(), "abc");
    }

    #[test]
    fn test_execution_mode_parse() {
        assert_eq!("pooled".parse::<ExecutionMode>(), Ok(ExecutionMode::Pooled));
        assert_eq!("One-Shot".parse::<ExecutionMode>(), Ok(ExecutionMode::OneShot));
        assert!("batch".parse::<ExecutionMode>().is_err());

        let mode: ExecutionMode = serde_json::from_str("\"one-shot\"").unwrap();
        assert_eq!(mode, ExecutionMode::OneShot);
    }

    #[test]
    fn test_request_json_keeps_code_bytes() {
        let request: ExecutionRequest =
            serde_json::from_str(r#"{"language":"python","code":"print('hi')\n"}"#).unwrap();
        assert_eq!(request.code, b"print('hi')\n".to_vec());

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""code":"print('hi')\n""#));
    }

    #[test]
    fn test_request_json_rejects_non_utf8_code() {
        let request = ExecutionRequest::new("python", vec![b'#', 0xff, 0xfe, b'\n']);
        let err = serde_json::to_string(&request).unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));

        // Valid UTF-8, NUL included, survives unchanged
        let request = ExecutionRequest::new("python", "print('\u{0}é')\n");
        let json = serde_json::to_string(&request).unwrap();
        let back: ExecutionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, request.code);
    }

    #[test]
    fn test_error_report() {
        let err = WarmboxError::Transfer("upload failed".into());
        let report = ErrorReport::from(&err);
        assert_eq!(report.class, ErrorClass::Transfer);
        assert!(!report.client_error);
        assert_eq!(report.message, "Transfer error: upload failed");
    }
}
