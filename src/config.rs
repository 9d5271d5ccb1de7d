use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vibe_runner::llm::{AnthropicConfig, DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL};
use vibe_runner::runner::{DEFAULT_MAX_ITERATIONS, DEFAULT_PORT, DEFAULT_TEMPLATE, WorkerConfig};
use vibe_runner::sandbox::LocalSandboxConfig;
use vibe_runner::steps::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    pub run: RunConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 8192,
            timeout_ms: 300000,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub template: String,
    /// Directory holding session directories; defaults under the data dir
    pub root: Option<PathBuf>,
    /// Directory holding template directories
    pub templates_dir: Option<PathBuf>,
    pub port: u16,
    pub endpoint_scheme: String,
    pub host_pattern: String,
    pub command_timeout_ms: u64,
    pub session_ttl_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            root: None,
            templates_dir: None,
            port: DEFAULT_PORT,
            endpoint_scheme: "http".to_string(),
            host_pattern: "localhost:{port}".to_string(),
            command_timeout_ms: 120000,
            session_ttl_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_iterations: u32,
    pub step_max_attempts: u32,
    pub step_initial_backoff_ms: u64,
    pub step_max_backoff_ms: u64,
    pub step_timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            step_max_attempts: 4,
            step_initial_backoff_ms: 500,
            step_max_backoff_ms: 30000,
            step_timeout_ms: 300000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(env!("CARGO_PKG_NAME")),
        }
    }
}

impl StorageConfig {
    pub fn steps_dir(&self) -> PathBuf {
        self.data_dir.join("steps")
    }

    pub fn outcomes_dir(&self) -> PathBuf {
        self.data_dir.join("outcomes")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            llm: LlmConfig::default(),
            sandbox: SandboxConfig::default(),
            run: RunConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.run.step_max_attempts,
            Duration::from_millis(self.run.step_initial_backoff_ms),
            Duration::from_millis(self.run.step_max_backoff_ms),
        )
    }

    pub fn anthropic(&self) -> AnthropicConfig {
        AnthropicConfig {
            base_url: self.llm.base_url.clone(),
            model: self.llm.model.clone(),
            max_tokens: self.llm.max_tokens,
            timeout: Duration::from_millis(self.llm.timeout_ms),
            api_key_env: self.llm.api_key_env.clone(),
        }
    }

    pub fn local_sandbox(&self) -> LocalSandboxConfig {
        LocalSandboxConfig {
            root: self
                .sandbox
                .root
                .clone()
                .unwrap_or_else(|| self.storage.data_dir.join("sandboxes")),
            templates_dir: self.sandbox.templates_dir.clone(),
            session_ttl: Duration::from_secs(self.sandbox.session_ttl_secs),
            endpoint_scheme: self.sandbox.endpoint_scheme.clone(),
            host_pattern: self.sandbox.host_pattern.clone(),
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            template: self.sandbox.template.clone(),
            port: self.sandbox.port,
            max_iterations: self.run.max_iterations,
            max_tokens: self.llm.max_tokens,
            llm_timeout: Duration::from_millis(self.llm.timeout_ms),
            command_timeout: Duration::from_millis(self.sandbox.command_timeout_ms),
            step_timeout: Duration::from_millis(self.run.step_timeout_ms),
            retry: self.retry_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.run.max_iterations, 15);
        assert_eq!(config.sandbox.port, 3000);
        assert_eq!(config.sandbox.template, "vibe-nextjs-test-23");
        assert_eq!(config.worker().retry.max_attempts, 4);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vibe-runner.yml");
        fs::write(
            &path,
            "run:\n  max_iterations: 5\nsandbox:\n  host_pattern: \"{port}-{session}.example.dev\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.run.max_iterations, 5);
        assert_eq!(config.run.step_max_attempts, 4);
        assert_eq!(config.sandbox.host_pattern, "{port}-{session}.example.dev");
        assert_eq!(config.llm.max_tokens, 8192);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let path = PathBuf::from("/nonexistent/vibe-runner.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_sandbox_root_defaults_under_data_dir() {
        let mut config = Config::default();
        config.storage.data_dir = PathBuf::from("/tmp/vr");
        assert_eq!(config.local_sandbox().root, PathBuf::from("/tmp/vr/sandboxes"));
        assert_eq!(config.storage.steps_dir(), PathBuf::from("/tmp/vr/steps"));
    }
}
