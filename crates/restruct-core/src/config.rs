use serde::Deserialize;

use crate::detect::DEFAULT_SPLIT_BUDGET;

/// Top-level settings for one structurizer run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StructurizeConfig {
    /// Node-split attempts allowed per child of the container being reduced.
    pub split_budget: usize,
    /// After a strict scan finds nothing, retry with the cached extended
    /// postdominator candidates.
    pub forced_pass: bool,
    pub passes: PassConfig,
    pub debug: DebugConfig,
}

impl Default for StructurizeConfig {
    fn default() -> Self {
        Self {
            split_budget: DEFAULT_SPLIT_BUDGET,
            forced_pass: true,
            passes: PassConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

/// Configuration for debug dumps during the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DebugConfig {
    /// Dump the finished tree to stderr.
    pub dump_tree: bool,
    /// Stop after the named pass and dump the tree at that point.
    ///
    /// Pass names use the same kebab-case as `--skip-pass`. The special value
    /// `"build"` dumps the tree right after graph conversion. Honoured by
    /// [`crate::pipeline::PassPipeline::run_with_debug`].
    pub dump_after: Option<String>,
    /// Restrict dumps to methods whose name contains this string, compared
    /// case-insensitively.
    pub method_filter: Option<String>,
}

impl DebugConfig {
    /// A config with all dumps disabled.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn should_dump(&self, method: &str) -> bool {
        let Some(filter) = self.method_filter.as_deref() else {
            return true;
        };
        method.contains(filter) || method.to_lowercase().contains(&filter.to_lowercase())
    }
}

/// Which optional passes run after region detection.
///
/// All passes are enabled by default. Disable individual passes by setting
/// their fields to `false`, or use `from_skip_list` with pass name strings.
/// Graph conversion, region detection, and condensation always run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PassConfig {
    /// Fold monitor-enter / catch-all pairs into `synchronized` blocks.
    pub synchronized: bool,
    /// Label cleanup and implicit/explicit classification of jumps.
    pub label_normalize: bool,
    /// Copy single-instruction exit blocks into jump-only `if` statements.
    pub exit_merge: bool,
    pub redundant_returns: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            synchronized: true,
            label_normalize: true,
            exit_merge: true,
            redundant_returns: true,
        }
    }
}

impl PassConfig {
    /// Create a config with all passes enabled except those in the skip list.
    ///
    /// Pass names correspond to `Pass::name()` values:
    /// - `"synchronized"`
    /// - `"label-normalize"`
    /// - `"exit-merge"`
    /// - `"redundant-returns"`
    pub fn from_skip_list(skip: &[&str]) -> Self {
        let mut config = Self::default();
        for name in skip {
            match *name {
                "synchronized" => config.synchronized = false,
                "label-normalize" => config.label_normalize = false,
                "exit-merge" => config.exit_merge = false,
                "redundant-returns" => config.redundant_returns = false,
                _ => {}
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_all() {
        let config = PassConfig::default();
        assert!(config.synchronized);
        assert!(config.label_normalize);
        assert!(config.exit_merge);
        assert!(config.redundant_returns);
    }

    #[test]
    fn skip_list_disables_passes() {
        let config = PassConfig::from_skip_list(&["exit-merge"]);
        assert!(config.synchronized);
        assert!(config.label_normalize);
        assert!(!config.exit_merge);
        assert!(config.redundant_returns);
    }

    #[test]
    fn skip_list_unknown_ignored() {
        let config = PassConfig::from_skip_list(&["nonexistent"]);
        assert!(config.synchronized);
        assert!(config.exit_merge);
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: StructurizeConfig =
            serde_json::from_str(r#"{ "split-budget": 2, "passes": { "synchronized": false } }"#)
                .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.split_budget, 2);
        assert!(config.forced_pass);
        assert!(!config.passes.synchronized);
        assert!(config.passes.exit_merge);
        assert!(config.debug.dump_after.is_none());
    }

    #[test]
    fn pass_keys_use_pass_names() {
        let config: StructurizeConfig = serde_json::from_str(
            r#"{ "passes": { "label-normalize": false, "exit-merge": false, "redundant-returns": false } }"#,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(config.passes.synchronized);
        assert!(!config.passes.label_normalize);
        assert!(!config.passes.exit_merge);
        assert!(!config.passes.redundant_returns);
    }

    #[test]
    fn method_filter_is_case_insensitive() {
        let cfg = DebugConfig {
            method_filter: Some("RUN".into()),
            ..DebugConfig::none()
        };
        assert!(cfg.should_dump("Worker.run"));
        assert!(!cfg.should_dump("Worker.stop"));
        assert!(DebugConfig::none().should_dump("anything"));
    }
}
