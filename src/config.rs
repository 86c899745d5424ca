//! Project configuration: parsing and discovery of `script.toml`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching `script.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScriptConfig {
    #[serde(default)]
    pub package: PackageConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

impl ScriptConfig {
    /// Load configuration from an explicit file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: ScriptConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search upward from the current directory for `script.toml`, falling
    /// back to defaults if none is found.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Search upward from `start_dir` for `script.toml`.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join("script.toml");
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Package metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default = "default_package_name")]
    pub name: String,

    #[serde(default)]
    pub description: String,
}

fn default_package_name() -> String {
    "script-project".to_string()
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self { name: default_package_name(), description: String::new() }
    }
}

/// Toggles for individual optimizer passes (static pre-evaluation,
/// null-coalesce simplification, dead-branch pruning, block flattening,
/// unreachable-code pruning, unused-variable pruning). All on by default; a
/// pass can be disabled to make disassembly easier to read while debugging
/// a codegen change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_true")]
    pub constant_folding: bool,

    #[serde(default = "default_true")]
    pub null_coalesce_simplification: bool,

    #[serde(default = "default_true")]
    pub dead_branch_pruning: bool,

    #[serde(default = "default_true")]
    pub block_flattening: bool,

    #[serde(default = "default_true")]
    pub unreachable_code_pruning: bool,

    #[serde(default = "default_true")]
    pub unused_variable_pruning: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            constant_folding: true,
            null_coalesce_simplification: true,
            dead_branch_pruning: true,
            block_flattening: true,
            unreachable_code_pruning: true,
            unused_variable_pruning: true,
        }
    }
}

impl OptimizerConfig {
    pub fn all_disabled() -> Self {
        Self {
            constant_folding: false,
            null_coalesce_simplification: false,
            dead_branch_pruning: false,
            block_flattening: false,
            unreachable_code_pruning: false,
            unused_variable_pruning: false,
        }
    }
}

/// Runtime and compile-time resource caps. Mirrors the constants hardcoded
/// in `parse.rs`/`vm.rs`/`behavior.rs` (`MAX_EXPR_DEPTH`, `MAX_INSTRUCTIONS`,
/// the tracer's recursion cap); this config layer only lets a host tune them
/// without recompiling, the parser/VM/evaluator still fall back to the same
/// defaults otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_expr_depth")]
    pub max_expression_depth: u32,

    #[serde(default = "default_max_instructions")]
    pub max_instructions: u32,

    #[serde(default = "default_tracer_depth")]
    pub max_tracer_depth: u8,
}

fn default_expr_depth() -> u32 {
    25
}

fn default_max_instructions() -> u32 {
    25_000
}

fn default_tracer_depth() -> u8 {
    16
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_expression_depth: default_expr_depth(),
            max_instructions: default_max_instructions(),
            max_tracer_depth: default_tracer_depth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_hardcoded_engine_limits() {
        let config = ScriptConfig::default();
        assert_eq!(config.limits.max_instructions, 25_000);
        assert_eq!(config.limits.max_tracer_depth, 16);
        assert!(config.optimizer.constant_folding);
    }

    #[test]
    fn parses_a_partial_toml_document() {
        let toml_str = r#"
[package]
name = "goblin-ai"

[optimizer]
constant_folding = false

[limits]
max_instructions = 5000
"#;
        let config: ScriptConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.package.name, "goblin-ai");
        assert!(!config.optimizer.constant_folding);
        assert!(config.optimizer.dead_branch_pruning);
        assert_eq!(config.limits.max_instructions, 5000);
    }

    #[test]
    fn find_and_load_falls_back_to_defaults_when_absent() {
        let dir = std::env::temp_dir();
        let config = ScriptConfig::find_and_load(&dir).unwrap();
        assert_eq!(config.package.name, "script-project");
    }
}
