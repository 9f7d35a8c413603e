use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::agenda::AgendaPolicy;
use crate::error::RuleError;

/// Configuration for an [`EngineContext`](crate::EngineContext).
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration.
///
/// # Examples
///
/// ```
/// use ruleweave_rules::EngineConfig;
///
/// let config = EngineConfig::from_toml_str("max_cycles = 500").unwrap();
/// assert_eq!(config.max_cycles, 500);
/// assert_eq!(config.parallelism_degree, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum activations fired by one forward-chaining run.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,
    /// Maximum nesting of rule applications in one backward-chaining proof.
    #[serde(default = "default_max_proof_depth")]
    pub max_proof_depth: usize,
    /// Worker threads used for the match phase. `1` matches on the calling
    /// thread.
    #[serde(default = "default_parallelism_degree")]
    pub parallelism_degree: usize,
    /// No-loop setting for rules that do not specify one.
    #[serde(default)]
    pub no_loop_default: bool,
    /// Abort the run on the first failing activation, and surface
    /// evaluation errors from matching instead of treating them as a
    /// non-match.
    #[serde(default)]
    pub strict: bool,
    /// Tie-break order below salience.
    #[serde(default)]
    pub agenda_policy: AgendaPolicy,
}

fn default_max_cycles() -> u64 {
    10_000
}

fn default_max_proof_depth() -> usize {
    64
}

fn default_parallelism_degree() -> usize {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            max_proof_depth: default_max_proof_depth(),
            parallelism_degree: default_parallelism_degree(),
            no_loop_default: false,
            strict: false,
            agenda_policy: AgendaPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, RuleError> {
        let config: Self =
            toml::from_str(content).map_err(|e| RuleError::Config(e.message().to_owned()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuleError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuleError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.max_cycles == 0 {
            return Err(RuleError::Config("max_cycles must be at least 1".into()));
        }
        if self.parallelism_degree == 0 {
            return Err(RuleError::Config(
                "parallelism_degree must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Set `max_cycles`.
    #[must_use]
    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Set `max_proof_depth`.
    #[must_use]
    pub fn with_max_proof_depth(mut self, depth: usize) -> Self {
        self.max_proof_depth = depth;
        self
    }

    /// Set `parallelism_degree`.
    #[must_use]
    pub fn with_parallelism(mut self, degree: usize) -> Self {
        self.parallelism_degree = degree;
        self
    }

    /// Set `no_loop_default`.
    #[must_use]
    pub fn with_no_loop_default(mut self, no_loop: bool) -> Self {
        self.no_loop_default = no_loop;
        self
    }

    /// Set `strict`.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set `agenda_policy`.
    #[must_use]
    pub fn with_agenda_policy(mut self, policy: AgendaPolicy) -> Self {
        self.agenda_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_cycles, 10_000);
        assert_eq!(config.max_proof_depth, 64);
        assert_eq!(config.parallelism_degree, 1);
        assert!(!config.no_loop_default);
        assert!(!config.strict);
        assert_eq!(config.agenda_policy, AgendaPolicy::Recency);
    }

    #[test]
    fn custom_config() {
        let toml = r#"
            max_cycles = 500
            max_proof_depth = 32
            parallelism_degree = 4
            no_loop_default = true
            strict = true
            agenda_policy = "declaration"
        "#;
        let config = EngineConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.max_cycles, 500);
        assert_eq!(config.max_proof_depth, 32);
        assert_eq!(config.parallelism_degree, 4);
        assert!(config.no_loop_default);
        assert!(config.strict);
        assert_eq!(config.agenda_policy, AgendaPolicy::Declaration);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EngineConfig::from_toml_str("max_cycle = 5").unwrap_err();
        assert!(matches!(err, RuleError::Config(_)));
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(EngineConfig::from_toml_str("max_cycles = 0").is_err());
        assert!(EngineConfig::from_toml_str("parallelism_degree = 0").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "max_proof_depth = 8\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.max_proof_depth, 8);

        let missing = EngineConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(RuleError::Config(_))));
    }
}
