//! Directory-backed sandbox provider.
//!
//! Each session is a directory `<root>/<session_id>/` plus a metadata file
//! `<root>/<session_id>.json`. Sessions older than the configured TTL are
//! expired and cannot be reconnected. File paths are confined to the session
//! directory; commands run through `sh -c` inside it.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::{OutputChunk, OutputSender, SandboxError, SandboxHandle, SandboxProvider};
use crate::id::{generate_session_id, now_ms};

/// How long output is still collected after the shell exits. Background
/// processes it started may keep the pipes open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Configuration for local sandboxes
#[derive(Debug, Clone)]
pub struct LocalSandboxConfig {
    /// Directory holding all sessions
    pub root: PathBuf,
    /// Directory holding one sub-directory per template, copied into new sessions
    pub templates_dir: Option<PathBuf>,
    /// Sessions older than this are expired
    pub session_ttl: Duration,
    pub endpoint_scheme: String,
    /// Host for an endpoint; `{port}` and `{session}` are substituted
    pub host_pattern: String,
}

impl LocalSandboxConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            templates_dir: None,
            session_ttl: Duration::from_secs(30 * 60),
            endpoint_scheme: "http".to_string(),
            host_pattern: "localhost:{port}".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionMeta {
    session_id: String,
    template: String,
    created_at: i64,
}

pub struct LocalSandboxProvider {
    config: LocalSandboxConfig,
}

impl LocalSandboxProvider {
    pub fn new(config: LocalSandboxConfig) -> Self {
        Self { config }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.config.root.join(session_id)
    }

    fn meta_path(&self, session_id: &str) -> PathBuf {
        self.config.root.join(format!("{}.json", session_id))
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self, template: &str) -> Result<String, SandboxError> {
        let session_id = generate_session_id();
        let dir = self.session_dir(&session_id);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SandboxError::io("create session directory", e))?;

        if let Some(templates) = &self.config.templates_dir {
            let source = templates.join(template);
            if source.is_dir() {
                let target = dir.clone();
                tokio::task::spawn_blocking(move || copy_dir(&source, &target))
                    .await
                    .map_err(|e| SandboxError::Provider(e.to_string()))?
                    .map_err(|e| SandboxError::io("seed session from template", e))?;
            } else {
                warn!("Template '{}' not found under {}, starting empty", template, templates.display());
            }
        }

        let meta = SessionMeta {
            session_id: session_id.clone(),
            template: template.to_string(),
            created_at: now_ms(),
        };
        let body = serde_json::to_vec(&meta).map_err(|e| SandboxError::Provider(e.to_string()))?;
        tokio::fs::write(self.meta_path(&session_id), body)
            .await
            .map_err(|e| SandboxError::io("write session metadata", e))?;

        info!("Created local sandbox {} from template '{}'", session_id, template);
        Ok(session_id)
    }

    async fn connect(&self, session_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        let raw = match tokio::fs::read(self.meta_path(session_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::NotFound {
                    session_id: session_id.to_string(),
                });
            }
            Err(e) => return Err(SandboxError::io("read session metadata", e)),
        };
        let meta: SessionMeta = serde_json::from_slice(&raw).map_err(|e| SandboxError::Provider(e.to_string()))?;

        let age_ms = now_ms().saturating_sub(meta.created_at).max(0) as u128;
        let dir = self.session_dir(session_id);
        if age_ms > self.config.session_ttl.as_millis() || !dir.is_dir() {
            return Err(SandboxError::Expired {
                session_id: session_id.to_string(),
            });
        }

        debug!("Connected to local sandbox {}", session_id);
        Ok(Arc::new(LocalSandbox {
            session_id: session_id.to_string(),
            dir,
            endpoint_scheme: self.config.endpoint_scheme.clone(),
            host_pattern: self.config.host_pattern.clone(),
        }))
    }
}

/// Handle to one local session directory
pub struct LocalSandbox {
    session_id: String,
    dir: PathBuf,
    endpoint_scheme: String,
    host_pattern: String,
}

impl LocalSandbox {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a sandbox path lexically, rejecting anything outside the session
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let mut resolved = PathBuf::new();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(SandboxError::PathEscape { path: path.into() });
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::PathEscape { path: path.into() });
                }
            }
        }
        if resolved.as_os_str().is_empty() {
            return Err(SandboxError::PathEscape { path: path.into() });
        }
        Ok(self.dir.join(resolved))
    }
}

#[async_trait]
impl SandboxHandle for LocalSandbox {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::io(format!("create parent of {}", path), e))?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| SandboxError::io(format!("write {}", path), e))
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let full_path = self.resolve(path)?;
        match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SandboxError::FileNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(SandboxError::io(format!("read {}", path), e)),
        }
    }

    async fn run_command(&self, command: &str, timeout: Duration, output: OutputSender) -> Result<i32, SandboxError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::io("spawn sh", e))?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, output.clone(), OutputChunk::Stdout)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(err, output.clone(), OutputChunk::Stderr)));

        let started = tokio::time::Instant::now();
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let grace = timeout.saturating_sub(started.elapsed()).min(OUTPUT_DRAIN_GRACE);
                let deadline = tokio::time::Instant::now() + grace;
                for mut task in [stdout_task, stderr_task].into_iter().flatten() {
                    if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                        debug!("Output of '{}' still open after exit; detaching", command);
                        task.abort();
                    }
                }
                Ok(status.code().unwrap_or(-1))
            }
            Ok(Err(e)) => Err(SandboxError::io(format!("wait for '{}'", command), e)),
            Err(_) => {
                let _ = child.kill().await;
                // Grandchildren may still hold the pipes open; stop forwarding.
                for task in [stdout_task, stderr_task].into_iter().flatten() {
                    task.abort();
                }
                Err(SandboxError::CommandTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn endpoint(&self, port: u16) -> String {
        let host = self
            .host_pattern
            .replace("{port}", &port.to_string())
            .replace("{session}", &self.session_id);
        format!("{}://{}", self.endpoint_scheme, host)
    }
}

async fn forward_lines<R, F>(reader: R, tx: OutputSender, wrap: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> OutputChunk,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(wrap(format!("{}\n", line))).is_err() {
            break;
        }
    }
}

fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::run_collecting;
    use tempfile::TempDir;

    fn provider(temp: &TempDir) -> LocalSandboxProvider {
        LocalSandboxProvider::new(LocalSandboxConfig::new(temp.path().join("sessions")))
    }

    #[tokio::test]
    async fn test_create_and_connect() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);

        let id = provider.create("nextjs").await.unwrap();
        let handle = provider.connect(&id).await.unwrap();
        assert_eq!(handle.session_id(), id);
    }

    #[tokio::test]
    async fn test_connect_unknown_session() {
        let temp = TempDir::new().unwrap();
        let result = provider(&temp).connect("sbx-missing").await;
        assert!(matches!(result, Err(SandboxError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_connect_expired_session() {
        let temp = TempDir::new().unwrap();
        let mut config = LocalSandboxConfig::new(temp.path().join("sessions"));
        config.session_ttl = Duration::ZERO;
        let provider = LocalSandboxProvider::new(config);

        let id = provider.create("nextjs").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = provider.connect(&id).await;
        assert!(matches!(result, Err(SandboxError::Expired { .. })));
    }

    #[tokio::test]
    async fn test_template_seeds_session() {
        let temp = TempDir::new().unwrap();
        let templates = temp.path().join("templates");
        std::fs::create_dir_all(templates.join("nextjs/app")).unwrap();
        std::fs::write(templates.join("nextjs/app/layout.tsx"), "layout").unwrap();

        let mut config = LocalSandboxConfig::new(temp.path().join("sessions"));
        config.templates_dir = Some(templates);
        let provider = LocalSandboxProvider::new(config);

        let id = provider.create("nextjs").await.unwrap();
        let handle = provider.connect(&id).await.unwrap();
        assert_eq!(handle.read_file("app/layout.tsx").await.unwrap(), "layout");
    }

    #[tokio::test]
    async fn test_write_then_read_nested() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let handle = provider.connect(&provider.create("t").await.unwrap()).await.unwrap();

        handle.write_file("app/page.tsx", "hello").await.unwrap();
        assert_eq!(handle.read_file("./app/page.tsx").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let handle = provider.connect(&provider.create("t").await.unwrap()).await.unwrap();

        let result = handle.read_file("nope.txt").await;
        assert!(matches!(result, Err(SandboxError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_paths_cannot_escape() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let handle = provider.connect(&provider.create("t").await.unwrap()).await.unwrap();

        for path in ["../outside.txt", "/etc/passwd", "a/../../b", ""] {
            let result = handle.write_file(path, "x").await;
            assert!(matches!(result, Err(SandboxError::PathEscape { .. })), "path {:?}", path);
        }
        assert!(handle.write_file("a/../b.txt", "x").await.is_ok());
    }

    #[tokio::test]
    async fn test_run_command_streams_separate_buffers() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let handle = provider.connect(&provider.create("t").await.unwrap()).await.unwrap();

        let (result, output) =
            run_collecting(handle.as_ref(), "echo out; echo err >&2; exit 3", Duration::from_secs(5)).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_run_command_runs_in_session_dir() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let handle = provider.connect(&provider.create("t").await.unwrap()).await.unwrap();
        handle.write_file("marker.txt", "found").await.unwrap();

        let (result, output) = run_collecting(handle.as_ref(), "cat marker.txt", Duration::from_secs(5)).await;
        assert_eq!(result.unwrap(), 0);
        assert!(output.stdout.contains("found"));
    }

    #[tokio::test]
    async fn test_run_command_timeout() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let handle = provider.connect(&provider.create("t").await.unwrap()).await.unwrap();

        let (result, _) = run_collecting(handle.as_ref(), "sleep 10", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(SandboxError::CommandTimeout { timeout_ms: 100 })));
    }

    #[tokio::test]
    async fn test_background_process_does_not_hold_command() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let handle = provider.connect(&provider.create("t").await.unwrap()).await.unwrap();

        let start = std::time::Instant::now();
        let (result, output) =
            run_collecting(handle.as_ref(), "sleep 5 & echo started", Duration::from_secs(2)).await;

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(result.unwrap(), 0);
        assert!(output.stdout.contains("started"));
    }

    #[tokio::test]
    async fn test_endpoint_pattern() {
        let temp = TempDir::new().unwrap();
        let mut config = LocalSandboxConfig::new(temp.path().join("sessions"));
        config.endpoint_scheme = "https".to_string();
        config.host_pattern = "{port}-{session}.sandbox.dev".to_string();
        let provider = LocalSandboxProvider::new(config);

        let id = provider.create("t").await.unwrap();
        let handle = provider.connect(&id).await.unwrap();
        assert_eq!(handle.endpoint(3000), format!("https://3000-{}.sandbox.dev", id));
    }
}
