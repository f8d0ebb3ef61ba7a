use serde::{Deserialize, Serialize};

use crate::error::{RefineError, Result};

/// Termination policy for one refinement run. Immutable once the run starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Upper bound on attempts (default: 3).
    pub max_iterations: usize,
    /// Early-stop signals are ignored below this many attempts (default: 1).
    pub min_iterations: usize,
    /// Stop on an identical candidate or an empty critique (default: true).
    pub stop_on_convergence: bool,
    /// Stop once a candidate executes cleanly with output (default: false).
    pub stop_on_success: bool,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            min_iterations: 1,
            stop_on_convergence: true,
            stop_on_success: false,
        }
    }
}

impl RefinementConfig {
    /// SQL generation: a query that runs and returns rows is a usable answer.
    pub fn sql() -> Self {
        Self {
            max_iterations: 3,
            min_iterations: 1,
            stop_on_convergence: true,
            stop_on_success: true,
        }
    }

    /// Chart generation: rendering without error says nothing about design quality.
    pub fn chart() -> Self {
        Self {
            max_iterations: 2,
            min_iterations: 1,
            stop_on_convergence: true,
            stop_on_success: false,
        }
    }

    /// Essay writing: draft plus one critique-driven revision by default.
    pub fn essay() -> Self {
        Self::chart()
    }

    /// Preset for a generation model of the given capability tier.
    pub fn for_generation_tier(tier: ModelTier) -> Self {
        match tier {
            ModelTier::Strong => Self {
                max_iterations: 2,
                min_iterations: 1,
                stop_on_convergence: true,
                stop_on_success: true,
            },
            ModelTier::Medium => Self::sql(),
            ModelTier::Weak => Self {
                max_iterations: 5,
                min_iterations: 2,
                stop_on_convergence: true,
                stop_on_success: false,
            },
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_min_iterations(mut self, min_iterations: usize) -> Self {
        self.min_iterations = min_iterations;
        self
    }

    pub fn with_stop_on_convergence(mut self, enabled: bool) -> Self {
        self.stop_on_convergence = enabled;
        self
    }

    pub fn with_stop_on_success(mut self, enabled: bool) -> Self {
        self.stop_on_success = enabled;
        self
    }

    /// Check `1 <= min_iterations <= max_iterations`.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(RefineError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.min_iterations == 0 {
            return Err(RefineError::Config(
                "min_iterations must be at least 1".to_string(),
            ));
        }
        if self.min_iterations > self.max_iterations {
            return Err(RefineError::Config(format!(
                "min_iterations ({}) exceeds max_iterations ({})",
                self.min_iterations, self.max_iterations
            )));
        }
        Ok(())
    }
}

/// Rough capability class of a generation model.
///
/// Classification happens once, when a caller picks a preset; nothing in the
/// loop inspects model names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    /// Likely right on the first try.
    Strong,
    /// May need one or two refinements.
    Medium,
    /// Needs forced refinement.
    Weak,
}

impl ModelTier {
    pub fn classify(model_name: &str) -> Self {
        let lower = model_name.to_lowercase();
        let name = lower.rsplit(':').next().unwrap_or(&lower);
        // "gpt-4o-mini" must be checked before the broader "gpt-4" prefix
        if ["gpt-3.5", "claude-3-sonnet", "gpt-4o-mini"]
            .iter()
            .any(|m| name.contains(m))
        {
            return Self::Medium;
        }
        if ["gpt-4", "gpt-5", "claude-3.5", "claude-3-opus"]
            .iter()
            .any(|m| name.contains(m))
        {
            return Self::Strong;
        }
        Self::Weak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for config in [
            RefinementConfig::default(),
            RefinementConfig::sql(),
            RefinementConfig::chart(),
            RefinementConfig::essay(),
            RefinementConfig::for_generation_tier(ModelTier::Strong),
            RefinementConfig::for_generation_tier(ModelTier::Medium),
            RefinementConfig::for_generation_tier(ModelTier::Weak),
        ] {
            config.validate().unwrap();
        }
        assert!(RefinementConfig::sql().stop_on_success);
        assert!(!RefinementConfig::chart().stop_on_success);
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let config = RefinementConfig::default()
            .with_max_iterations(2)
            .with_min_iterations(3);
        assert!(matches!(config.validate(), Err(RefineError::Config(_))));
        assert!(RefinementConfig::default()
            .with_max_iterations(0)
            .validate()
            .is_err());
        assert!(RefinementConfig::default()
            .with_min_iterations(0)
            .validate()
            .is_err());
    }

    #[test]
    fn classify_model_tiers() {
        assert_eq!(ModelTier::classify("openai:gpt-4o"), ModelTier::Strong);
        assert_eq!(ModelTier::classify("gpt-4o-mini"), ModelTier::Medium);
        assert_eq!(ModelTier::classify("gpt-3.5-turbo"), ModelTier::Medium);
        assert_eq!(ModelTier::classify("llama3:8b"), ModelTier::Weak);

        let weak = RefinementConfig::for_generation_tier(ModelTier::Weak);
        assert_eq!(weak.min_iterations, 2);
        assert!(!weak.stop_on_success);
    }
}
