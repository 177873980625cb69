//! Name-to-constructor table for matcher algorithms.
//!
//! Built-ins are registered up front. New variants can be added with
//! [`MatcherRegistry::register`], and an alias file maps extra names onto
//! registered ones without recompiling:
//!
//! ```yaml
//! Correlation: MaximumCorrelation
//! LeastSquares: AdaptiveGruen
//! ```

use std::path::Path;

use hashbrown::HashMap;

use crate::config::AutoRegConfig;
use crate::error::{Error, Result};
use crate::matcher::{AutoReg, Gruen, MatchAlgorithm, MaximumCorrelation, MinimumDifference};

pub type MatcherConstructor = fn(&AutoRegConfig) -> Result<Box<dyn MatchAlgorithm>>;

#[derive(Debug, Clone)]
pub struct MatcherRegistry {
    constructors: HashMap<String, MatcherConstructor>,
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MinimumDifference::NAME, |config| {
            Ok(Box::new(MinimumDifference::new(config.sampling_stride())))
        });
        registry.register(MaximumCorrelation::NAME, |config| {
            Ok(Box::new(MaximumCorrelation::new(config.sampling_stride())))
        });
        registry.register(Gruen::NAME, |config| Ok(Box::new(gruen(config, false))));
        registry.register(Gruen::ADAPTIVE_NAME, |config| Ok(Box::new(gruen(config, true))));
        registry
    }
}

fn gruen(config: &AutoRegConfig, adaptive: bool) -> Gruen {
    Gruen::new(
        config.algorithm.gruen.clone(),
        config.algorithm.tolerance,
        config.pattern_chip.valid_percent,
        adaptive,
    )
}

impl MatcherRegistry {
    /// Registry with no constructors.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Adds or replaces the constructor for `name`.
    pub fn register(&mut self, name: &str, constructor: MatcherConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registers every `Alias: Target` pair of a YAML mapping. Each target
    /// must already be registered.
    pub fn load_aliases(&mut self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        self.load_aliases_str(&text)
    }

    pub fn load_aliases_str(&mut self, yaml: &str) -> Result<usize> {
        let aliases: HashMap<String, String> = serde_yml::from_str(yaml)?;
        for (alias, target) in &aliases {
            let constructor = *self
                .constructors
                .get(target)
                .ok_or_else(|| Error::UnknownAlgorithm { name: target.clone() })?;
            self.constructors.insert(alias.clone(), constructor);
            tracing::debug!("Matcher alias {} -> {}", alias, target);
        }
        Ok(aliases.len())
    }

    /// Builds the algorithm named by `config.algorithm.name`.
    pub fn algorithm(&self, config: &AutoRegConfig) -> Result<Box<dyn MatchAlgorithm>> {
        let name = &config.algorithm.name;
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownAlgorithm { name: name.clone() })?;
        constructor(config)
    }

    /// Validates `config` and builds a ready-to-load matcher.
    pub fn create(&self, config: &AutoRegConfig) -> Result<AutoReg> {
        config.validate()?;
        let algorithm = self.algorithm(config)?;
        AutoReg::new(config.clone(), algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> AutoRegConfig {
        AutoRegConfig::new(name, 0.5, (15, 15), (31, 31))
    }

    #[test]
    fn builtins_are_registered() {
        let registry = MatcherRegistry::default();
        assert_eq!(
            registry.names(),
            vec!["AdaptiveGruen", "Gruen", "MaximumCorrelation", "MinimumDifference"]
        );
        for name in registry.names() {
            let matcher = registry.create(&config(name)).unwrap();
            assert_eq!(matcher.algorithm_name(), name);
        }
        let adaptive = registry.create(&config("AdaptiveGruen")).unwrap();
        assert!(adaptive.algorithm().is_adaptive());
        let plain = registry.create(&config("Gruen")).unwrap();
        assert!(!plain.algorithm().is_adaptive());
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = MatcherRegistry::default();
        let err = registry.create(&config("PhaseCorrelation")).unwrap_err();
        assert!(matches!(err, Error::UnknownAlgorithm { name } if name == "PhaseCorrelation"));
    }

    #[test]
    fn invalid_config_fails_before_lookup() {
        let registry = MatcherRegistry::empty();
        let mut bad = config("Whatever");
        bad.pattern_chip.valid_percent = 0.0;
        assert!(matches!(registry.create(&bad), Err(Error::Configuration(_))));
    }

    #[test]
    fn runtime_registration() {
        let mut registry = MatcherRegistry::empty();
        assert!(!registry.contains("Diff"));
        registry.register("Diff", |_| Ok(Box::new(MinimumDifference::default())));
        let matcher = registry.create(&config("Diff")).unwrap();
        assert_eq!(matcher.algorithm_name(), MinimumDifference::NAME);
    }

    #[test]
    fn aliases_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matchers.yaml");
        std::fs::write(&path, "Correlation: MaximumCorrelation\nLsq: AdaptiveGruen\n").unwrap();

        let mut registry = MatcherRegistry::default();
        assert_eq!(registry.load_aliases(&path).unwrap(), 2);
        let matcher = registry.create(&config("Correlation")).unwrap();
        assert_eq!(matcher.algorithm_name(), MaximumCorrelation::NAME);
        assert!(registry.create(&config("Lsq")).unwrap().algorithm().is_adaptive());
    }

    #[test]
    fn alias_to_unknown_target_is_rejected() {
        let mut registry = MatcherRegistry::default();
        let err = registry.load_aliases_str("Fast: Phase\n").unwrap_err();
        assert!(matches!(err, Error::UnknownAlgorithm { .. }));
        assert!(!registry.contains("Fast"));
    }

    #[test]
    fn missing_alias_file_is_io_error() {
        let mut registry = MatcherRegistry::default();
        let err = registry.load_aliases(Path::new("/nonexistent/aliases.yaml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
