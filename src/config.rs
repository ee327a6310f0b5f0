//! Pipeline configuration, read once per run

use crate::adapter::ToolId;
use crate::digest::{DetailLevel, ItemBudget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one external analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Part of the enabled tool set
    pub enabled: bool,
    /// Executable path; the tool's default name when unset
    pub executable: Option<String>,
    /// `false` reports the tool as not installed without spawning it
    pub available: bool,
    /// Per-invocation timeout; the tool's default when unset
    pub timeout_secs: Option<u64>,
    /// Appended to the tool's main analysis command
    pub extra_args: Vec<String>,
    /// CodeQL query/suite or Semgrep rules path
    pub ruleset: Option<String>,
    /// Source language for tools that need one (CodeQL database creation)
    pub language: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable: None,
            available: true,
            timeout_secs: None,
            extra_args: Vec::new(),
            ruleset: None,
            language: None,
        }
    }
}

impl ToolConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_ruleset(mut self, ruleset: impl Into<String>) -> Self {
        self.ruleset = Some(ruleset.into());
        self
    }

    pub fn program(&self, tool: ToolId) -> &str {
        self.executable.as_deref().unwrap_or(tool.default_executable())
    }

    pub fn timeout(&self, tool: ToolId) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(tool.default_timeout_secs()))
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or("java")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub cpg: ToolConfig,
    pub taint: ToolConfig,
    pub pattern: ToolConfig,
}

/// Digest budget and rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub max_items: usize,
    pub max_paths: usize,
    pub detail: DetailLevel,
}

impl Default for DigestConfig {
    fn default() -> Self {
        let budget = ItemBudget::default();
        Self {
            max_items: budget.max_items,
            max_paths: budget.max_paths,
            detail: DetailLevel::High,
        }
    }
}

impl DigestConfig {
    pub fn budget(&self) -> ItemBudget {
        ItemBudget {
            max_items: self.max_items,
            max_paths: self.max_paths,
        }
    }
}

/// Everything the pipeline reads from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache_dir: PathBuf,
    /// Units processed concurrently by a batch
    pub max_concurrent_units: usize,
    pub digest: DigestConfig,
    pub tools: ToolsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_concurrent_units: 4,
            digest: DigestConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// `<platform cache dir>/secgraph`, falling back to the temp dir.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("secgraph")
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_units == 0 {
            return Err(ConfigError::Invalid("max_concurrent_units must be at least 1".into()));
        }
        if self.digest.max_items == 0 {
            return Err(ConfigError::Invalid("digest.max_items must be at least 1".into()));
        }
        for tool in ToolId::ALL {
            if self.tool(tool).timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!("tools.{}.timeout_secs must be positive", tool)));
            }
        }
        Ok(())
    }

    pub fn tool(&self, tool: ToolId) -> &ToolConfig {
        match tool {
            ToolId::Cpg => &self.tools.cpg,
            ToolId::Taint => &self.tools.taint,
            ToolId::Pattern => &self.tools.pattern,
        }
    }

    pub fn tool_mut(&mut self, tool: ToolId) -> &mut ToolConfig {
        match tool {
            ToolId::Cpg => &mut self.tools.cpg,
            ToolId::Taint => &mut self.tools.taint,
            ToolId::Pattern => &mut self.tools.pattern,
        }
    }

    pub fn with_tool(mut self, tool: ToolId, config: ToolConfig) -> Self {
        *self.tool_mut(tool) = config;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Enabled tools, in tool order.
    pub fn enabled_tools(&self) -> Vec<ToolId> {
        ToolId::ALL.into_iter().filter(|t| self.tool(*t).enabled).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_every_tool() {
        let config = PipelineConfig::default();
        assert_eq!(config.enabled_tools(), ToolId::ALL.to_vec());
        assert_eq!(config.max_concurrent_units, 4);
        assert_eq!(config.digest.max_items, 10);
        assert!(config.cache_dir.ends_with("secgraph"));
    }

    #[test]
    fn tool_defaults_come_from_tool_identity() {
        let config = ToolConfig::default();
        assert_eq!(config.program(ToolId::Cpg), "joern");
        assert_eq!(config.program(ToolId::Pattern), "semgrep");
        assert_eq!(config.timeout(ToolId::Taint), Duration::from_secs(900));
        assert_eq!(config.language(), "java");

        let custom = ToolConfig::default().with_executable("/opt/codeql/codeql").with_timeout(5);
        assert_eq!(custom.program(ToolId::Taint), "/opt/codeql/codeql");
        assert_eq!(custom.timeout(ToolId::Taint), Duration::from_secs(5));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
cache_dir: /tmp/secgraph-test
digest:
  max_items: 3
  detail: low
tools:
  taint:
    enabled: false
  pattern:
    ruleset: p/java
    timeout_secs: 60
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/secgraph-test"));
        assert_eq!(config.digest.max_items, 3);
        assert_eq!(config.digest.max_paths, 5);
        assert_eq!(config.digest.detail, DetailLevel::Low);
        assert_eq!(config.enabled_tools(), vec![ToolId::Cpg, ToolId::Pattern]);
        assert_eq!(config.tools.pattern.ruleset.as_deref(), Some("p/java"));
        assert!(config.tools.pattern.available);
        assert_eq!(config.max_concurrent_units, 4);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_yaml_str("max_concurrent_units: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_yaml_str("digest:\n  max_items: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_yaml_str("tools:\n  cpg:\n    timeout_secs: 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        assert!(matches!(
            PipelineConfig::from_yaml_str("tools: [not, a, map"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secgraph.yaml");
        std::fs::write(&path, "max_concurrent_units: 2\n").unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap().max_concurrent_units, 2);
        assert!(matches!(
            PipelineConfig::load(dir.path().join("missing.yaml")),
            Err(ConfigError::Io(_))
        ));
    }
}
