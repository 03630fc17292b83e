use log::debug;

use crate::condense::condense_sequences;
use crate::config::{DebugConfig, StructurizeConfig};
use crate::detect::RegionDetector;
use crate::error::StructurizeError;
use crate::exits::{condense_exits, remove_redundant_returns};
use crate::labels::{clean_up_edges, identify_labels, low_continue_labels};
use crate::model::StatTree;
use crate::printer::print_tree;
use crate::sync::build_synchronized;

/// A rewrite of the statement tree.
pub trait Pass: Send + Sync {
    /// Name of this pass, as used by `--dump-after`.
    fn name(&self) -> &str;

    /// Apply this pass in place, returning whether anything changed.
    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError>;
}

/// Output of the pass pipeline.
pub struct PipelineOutput {
    pub tree: StatTree,
    /// `true` when the pipeline was stopped early by `dump_after`.
    pub stopped_early: bool,
}

/// Valid pass names for `--dump-after`, in pipeline order.
pub const VALID_PASS_NAMES: &[&str] = &[
    "build",
    "detect",
    "continue-labels",
    "condense",
    "synchronized",
    "label-cleanup",
    "label-identify",
    "exit-merge",
    "redundant-returns",
];

/// Collapse the block graph into nested statements.
pub struct DetectRegions {
    pub detector: RegionDetector,
}

impl Pass for DetectRegions {
    fn name(&self) -> &str {
        "detect"
    }

    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError> {
        self.detector.run(tree)?;
        Ok(true)
    }
}

/// Point each continue at the innermost loop restarting at its target.
pub struct LowerContinueLabels;

impl Pass for LowerContinueLabels {
    fn name(&self) -> &str {
        "continue-labels"
    }

    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError> {
        let root = tree.root();
        low_continue_labels(tree, root, &mut Vec::new());
        Ok(false)
    }
}

pub struct Condense;

impl Pass for Condense {
    fn name(&self) -> &str {
        "condense"
    }

    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError> {
        Ok(condense_sequences(tree))
    }
}

/// Rebuild `synchronized` blocks, re-condensing afterwards.
pub struct Synchronized;

impl Pass for Synchronized {
    fn name(&self) -> &str {
        "synchronized"
    }

    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError> {
        let root = tree.root();
        tree.build_monitor_flags(root);
        let changed = build_synchronized(tree);
        if changed {
            condense_sequences(tree);
        }
        Ok(changed)
    }
}

pub struct LabelCleanup;

impl Pass for LabelCleanup {
    fn name(&self) -> &str {
        "label-cleanup"
    }

    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError> {
        clean_up_edges(tree);
        Ok(false)
    }
}

/// Merge exit blocks into jump-only `if`s until nothing changes. When
/// `relabel` is set, jumps are re-cleaned and re-classified after each round
/// so the next round sees current explicit/labeled flags.
pub struct ExitMerge {
    pub relabel: bool,
}

impl Pass for ExitMerge {
    fn name(&self) -> &str {
        "exit-merge"
    }

    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError> {
        let mut changed = false;
        while condense_exits(tree) {
            changed = true;
            if self.relabel {
                clean_up_edges(tree);
                identify_labels(tree);
            }
        }
        Ok(changed)
    }
}

pub struct LabelIdentify;

impl Pass for LabelIdentify {
    fn name(&self) -> &str {
        "label-identify"
    }

    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError> {
        identify_labels(tree);
        Ok(false)
    }
}

pub struct RedundantReturns;

impl Pass for RedundantReturns {
    fn name(&self) -> &str {
        "redundant-returns"
    }

    fn apply(&self, tree: &mut StatTree) -> Result<bool, StructurizeError> {
        remove_redundant_returns(tree);
        Ok(false)
    }
}

/// An ordered sequence of passes to apply.
pub struct PassPipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// The standard pipeline, minus the passes `config` disables.
    pub fn from_config(config: &StructurizeConfig) -> Self {
        let mut pipeline = Self::new();
        let detector = RegionDetector::new(config.split_budget).with_forced_pass(config.forced_pass);
        pipeline.add(Box::new(DetectRegions { detector }));
        pipeline.add(Box::new(LowerContinueLabels));
        pipeline.add(Box::new(Condense));

        let passes = &config.passes;
        if passes.synchronized {
            pipeline.add(Box::new(Synchronized));
        }
        if passes.label_normalize {
            pipeline.add(Box::new(LabelCleanup));
            pipeline.add(Box::new(LabelIdentify));
        }
        if passes.exit_merge {
            pipeline.add(Box::new(ExitMerge {
                relabel: passes.label_normalize,
            }));
        }
        if passes.redundant_returns {
            pipeline.add(Box::new(RedundantReturns));
        }
        pipeline
    }

    pub fn add(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes in order.
    pub fn run(&self, tree: StatTree) -> Result<StatTree, StructurizeError> {
        Ok(self.run_with_debug(tree, &DebugConfig::default(), "")?.tree)
    }

    /// Run the pipeline, honouring debug configuration.
    ///
    /// When `debug.dump_after` is `Some(pass_name)`:
    /// - `"build"` dumps the tree before any pass and returns immediately.
    /// - Otherwise the pipeline stops after the named pass, dumps the tree
    ///   (if `method` passes the filter) and returns with
    ///   `stopped_early = true`.
    /// - If the named pass is not in the pipeline, it runs to completion and
    ///   returns `stopped_early = false`.
    pub fn run_with_debug(
        &self,
        mut tree: StatTree,
        debug: &DebugConfig,
        method: &str,
    ) -> Result<PipelineOutput, StructurizeError> {
        let stop_after = debug.dump_after.as_deref();
        if stop_after == Some("build") {
            dump_tree(&tree, debug, method, "build");
            return Ok(PipelineOutput {
                tree,
                stopped_early: true,
            });
        }

        for pass in &self.passes {
            let changed = pass.apply(&mut tree)?;
            debug!("{method}: {} (changed: {changed})", pass.name());
            if stop_after == Some(pass.name()) {
                dump_tree(&tree, debug, method, pass.name());
                return Ok(PipelineOutput {
                    tree,
                    stopped_early: true,
                });
            }
        }

        if debug.dump_tree {
            dump_tree(&tree, debug, method, "end");
        }
        Ok(PipelineOutput {
            tree,
            stopped_early: false,
        })
    }
}

impl Default for PassPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn dump_tree(tree: &StatTree, debug: &DebugConfig, method: &str, stage: &str) {
    if debug.should_dump(method) {
        eprintln!("=== tree: {method} after {stage} ===\n{}=== end tree ===\n", print_tree(tree));
    }
}
