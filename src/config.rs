use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Token in tool argument templates replaced by the materialized source path.
pub const REPO_PATH_PLACEHOLDER: &str = "{repo_path}";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root under which every run gets its own materialized-source directory.
    pub repos_root: PathBuf,
    /// Staging area for uploaded archives awaiting extraction.
    #[serde(default)]
    pub uploads_dir: Option<PathBuf>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_retention_days() -> u64 {
    7
}
fn default_sweep_interval_secs() -> u64 {
    3600
}

impl StorageConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads_dir
            .clone()
            .unwrap_or_else(|| self.repos_root.join(".uploads"))
    }

    pub fn retention(&self) -> Duration {
        days(self.retention_days)
    }
}

/// `n` days as a [`Duration`], saturating on overflow.
pub fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(24 * 60 * 60))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_analyze_args")]
    pub analyze_args: Vec<String>,
    #[serde(default = "default_generate_args")]
    pub generate_args: Vec<String>,
    /// Per-phase timeout; 0 waits indefinitely.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            working_dir: None,
            analyze_args: default_analyze_args(),
            generate_args: default_generate_args(),
            timeout_secs: 0,
        }
    }
}

fn default_program() -> String {
    "uv".to_string()
}
fn default_analyze_args() -> Vec<String> {
    ["run", "src/main.py", "analyze", "--repo-path", REPO_PATH_PLACEHOLDER]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_generate_args() -> Vec<String> {
    [
        "run",
        "src/main.py",
        "generate",
        "readme",
        "--repo-path",
        REPO_PATH_PLACEHOLDER,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl ToolConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    /// Clone depth; 0 performs a full clone.
    #[serde(default = "default_depth")]
    pub depth: u32,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
        }
    }
}

fn default_depth() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactsConfig {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    #[serde(default = "default_summary_file")]
    pub summary_file: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            summary_file: default_summary_file(),
        }
    }
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from(".ai/docs")
}
fn default_summary_file() -> PathBuf {
    PathBuf::from("README.md")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Request body limit for archive uploads.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_mb() -> usize {
    200
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.storage.retention_days == 0 {
        anyhow::bail!("storage.retention_days must be > 0");
    }

    if config.tool.program.trim().is_empty() {
        anyhow::bail!("tool.program must not be empty");
    }

    for (key, args) in [
        ("tool.analyze_args", &config.tool.analyze_args),
        ("tool.generate_args", &config.tool.generate_args),
    ] {
        if !args.iter().any(|a| a.contains(REPO_PATH_PLACEHOLDER)) {
            anyhow::bail!("{} must contain the {} placeholder", key, REPO_PATH_PLACEHOLDER);
        }
    }

    if config.artifacts.docs_dir.is_absolute() {
        anyhow::bail!("artifacts.docs_dir must be relative to the repository root");
    }
    if config.artifacts.summary_file.is_absolute()
        || config.artifacts.summary_file.as_os_str().is_empty()
    {
        anyhow::bail!("artifacts.summary_file must be a relative file path");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> &'static str {
        r#"
[db]
path = "/tmp/repodoc.sqlite"

[storage]
repos_root = "/tmp/repos"
"#
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let config: Config = toml::from_str(minimal()).unwrap();
        validate(&config).unwrap();

        assert_eq!(config.storage.retention_days, 7);
        assert_eq!(config.storage.uploads_dir(), PathBuf::from("/tmp/repos/.uploads"));
        assert_eq!(config.tool.program, "uv");
        assert!(config.tool.timeout().is_none());
        assert_eq!(config.git.depth, 1);
        assert_eq!(config.artifacts.docs_dir, PathBuf::from(".ai/docs"));
        assert_eq!(config.artifacts.summary_file, PathBuf::from("README.md"));
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.max_upload_mb, 200);
    }

    #[test]
    fn rejects_zero_retention() {
        let text = format!("{}retention_days = 0\n", minimal());
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn huge_retention_saturates() {
        let text = format!("{}retention_days = 300000000000000\n", minimal());
        let config: Config = toml::from_str(&text).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.storage.retention(), Duration::from_secs(u64::MAX));
        assert_eq!(days(2), Duration::from_secs(2 * 86_400));
    }

    #[test]
    fn rejects_args_without_placeholder() {
        let text = format!(
            "{}\n[tool]\nprogram = \"doc-tool\"\nanalyze_args = [\"analyze\"]\n",
            minimal()
        );
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("tool.analyze_args"), "{}", err);
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
