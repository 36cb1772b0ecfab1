use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::paths::Paths;
use crate::types::{ChangeLevel, FindingKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerConfig {
    /// Analysis window in days when the caller does not override it.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// Targets with fewer invocations are exempt from the success-rate rule.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,
    /// Success rate (percent) below which a finding is emitted.
    #[serde(default = "default_success_rate_threshold")]
    pub success_rate_threshold: f64,
    /// Skip count at or above which a finding is emitted.
    #[serde(default = "default_skip_threshold")]
    pub skip_threshold: u64,
    /// Sections every skill document is expected to carry.
    #[serde(default = "default_required_sections")]
    pub required_sections: Vec<String>,
}

fn default_window_days() -> i64 {
    7
}

fn default_min_sample_size() -> u64 {
    5
}

fn default_success_rate_threshold() -> f64 {
    70.0
}

fn default_skip_threshold() -> u64 {
    3
}

fn default_required_sections() -> Vec<String> {
    vec![
        "Out of Scope".to_string(),
        "Verification".to_string(),
        "Integrations".to_string(),
    ]
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            min_sample_size: default_min_sample_size(),
            success_rate_threshold: default_success_rate_threshold(),
            skip_threshold: default_skip_threshold(),
            required_sections: default_required_sections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalConfig {
    /// Horizon after which a pending proposal expires.
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
    /// Delay window between approval and eligibility for minor proposals.
    #[serde(default = "default_minor_delay_hours")]
    pub minor_delay_hours: i64,
}

fn default_expiry_days() -> i64 {
    7
}

fn default_minor_delay_hours() -> i64 {
    24
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            expiry_days: default_expiry_days(),
            minor_delay_hours: default_minor_delay_hours(),
        }
    }
}

/// Declarative finding-kind → change-level mapping. Levels are configuration,
/// not code: a deployment can promote or demote a kind without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRules {
    #[serde(default = "default_level_map")]
    pub levels: BTreeMap<String, ChangeLevel>,
}

fn default_level_map() -> BTreeMap<String, ChangeLevel> {
    let mut map = BTreeMap::new();
    map.insert("repeated_skips".to_string(), ChangeLevel::Patch);
    map.insert("missing_metadata".to_string(), ChangeLevel::Patch);
    map.insert("low_success_rate".to_string(), ChangeLevel::Minor);
    map.insert("missing_section".to_string(), ChangeLevel::Minor);
    map.insert("unused".to_string(), ChangeLevel::Major);
    map
}

impl Default for LevelRules {
    fn default() -> Self {
        Self {
            levels: default_level_map(),
        }
    }
}

impl LevelRules {
    /// Unmapped kinds fall back to minor so nothing auto-applies at a lower
    /// tier than the configuration explicitly allows.
    pub fn level_for(&self, kind: FindingKind) -> ChangeLevel {
        self.levels
            .get(kind.as_str())
            .copied()
            .unwrap_or(ChangeLevel::Minor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub proposals: ProposalConfig,
    #[serde(default)]
    pub rules: LevelRules,
}

impl Config {
    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_file = paths.config_file();
        if !config_file.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_file)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> Result<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.analyzer.min_sample_size, 5);
        assert_eq!(config.analyzer.success_rate_threshold, 70.0);
        assert_eq!(config.analyzer.skip_threshold, 3);
        assert_eq!(config.proposals.expiry_days, 7);
        assert_eq!(config.proposals.minor_delay_hours, 24);
        assert_eq!(
            config.rules.level_for(FindingKind::Unused),
            ChangeLevel::Major
        );
        assert_eq!(
            config.rules.level_for(FindingKind::LowSuccessRate),
            ChangeLevel::Minor
        );
        assert_eq!(
            config.rules.level_for(FindingKind::RepeatedSkips),
            ChangeLevel::Patch
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::with_base(temp.path().to_path_buf());

        let mut config = Config::default();
        config.analyzer.skip_threshold = 10;
        config.save(&paths).unwrap();

        let loaded = Config::load_or_default(&paths).unwrap();
        assert_eq!(loaded.analyzer.skip_threshold, 10);
        // Untouched fields keep their defaults.
        assert_eq!(loaded.proposals.expiry_days, 7);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::with_base(temp.path().to_path_buf());
        let config = Config::load_or_default(&paths).unwrap();
        assert_eq!(config.analyzer.window_days, 7);
    }
}
