//! In-process sandbox provider for dry runs and tests.
//!
//! Sessions keep their files in a map. Commands are not executed; each
//! command string can be scripted with an exit code and output, anything
//! unscripted succeeds silently.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{OutputChunk, OutputSender, SandboxError, SandboxHandle, SandboxProvider};
use crate::id::generate_session_id;

/// Canned result for a command string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedCommand {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Simulated runtime; exceeding the command timeout fails the call
    pub delay: Option<Duration>,
}

impl ScriptedCommand {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Scripts = Arc<Mutex<HashMap<String, ScriptedCommand>>>;

#[derive(Default)]
pub struct MemorySandboxProvider {
    sessions: Mutex<HashMap<String, Arc<MemorySandbox>>>,
    expired: Mutex<HashSet<String>>,
    scripts: Scripts,
    created: AtomicUsize,
    failing_creates: AtomicU32,
}

impl MemorySandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result of an exact command string for every session
    pub fn script_command(&self, command: impl Into<String>, script: ScriptedCommand) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(command.into(), script);
        }
    }

    /// Make the next `n` calls to `create` fail with a transient error
    pub fn fail_next_creates(&self, n: u32) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    /// Expire a session so later connects fail
    pub fn expire(&self, session_id: &str) {
        if let Ok(mut expired) = self.expired.lock() {
            expired.insert(session_id.to_string());
        }
    }

    /// Number of sessions successfully created
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Inspect a session without going through `connect`
    pub fn session(&self, session_id: &str) -> Option<Arc<MemorySandbox>> {
        self.sessions.lock().ok()?.get(session_id).cloned()
    }
}

#[async_trait]
impl SandboxProvider for MemorySandboxProvider {
    async fn create(&self, template: &str) -> Result<String, SandboxError> {
        let remaining = self.failing_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(SandboxError::Provider(format!("template '{}' temporarily unavailable", template)));
        }

        let session_id = generate_session_id();
        let sandbox = Arc::new(MemorySandbox {
            session_id: session_id.clone(),
            files: Mutex::new(BTreeMap::new()),
            commands: Mutex::new(Vec::new()),
            scripts: self.scripts.clone(),
        });
        self.sessions
            .lock()
            .map_err(|e| SandboxError::Provider(e.to_string()))?
            .insert(session_id.clone(), sandbox);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(session_id)
    }

    async fn connect(&self, session_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        let is_expired = self
            .expired
            .lock()
            .map_err(|e| SandboxError::Provider(e.to_string()))?
            .contains(session_id);
        if is_expired {
            return Err(SandboxError::Expired {
                session_id: session_id.to_string(),
            });
        }
        let sandbox: Arc<dyn SandboxHandle> = self.session(session_id).ok_or_else(|| SandboxError::NotFound {
            session_id: session_id.to_string(),
        })?;
        Ok(sandbox)
    }
}

pub struct MemorySandbox {
    session_id: String,
    files: Mutex<BTreeMap<String, String>>,
    commands: Mutex<Vec<String>>,
    scripts: Scripts,
}

impl MemorySandbox {
    /// Snapshot of the session's files
    pub fn files(&self) -> BTreeMap<String, String> {
        self.files.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Commands run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SandboxHandle for MemorySandbox {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        if path.is_empty() || path.starts_with('/') || path.split('/').any(|part| part == "..") {
            return Err(SandboxError::PathEscape { path: path.into() });
        }
        self.files
            .lock()
            .map_err(|e| SandboxError::Provider(e.to_string()))?
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.files
            .lock()
            .map_err(|e| SandboxError::Provider(e.to_string()))?
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::FileNotFound { path: path.to_string() })
    }

    async fn run_command(&self, command: &str, timeout: Duration, output: OutputSender) -> Result<i32, SandboxError> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }

        let script = self
            .scripts
            .lock()
            .map_err(|e| SandboxError::Provider(e.to_string()))?
            .get(command)
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = script.delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay)).await.is_err() {
                return Err(SandboxError::CommandTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }

        if !script.stdout.is_empty() {
            let _ = output.send(OutputChunk::Stdout(script.stdout));
        }
        if !script.stderr.is_empty() {
            let _ = output.send(OutputChunk::Stderr(script.stderr));
        }
        Ok(script.exit_code)
    }

    fn endpoint(&self, port: u16) -> String {
        format!("https://{}-{}.sandbox.local", port, self.session_id)
    }
}
