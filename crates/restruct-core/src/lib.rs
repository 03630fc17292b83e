//! Control-flow structurizer.
//!
//! Turns a graph of basic blocks into a tree of nested statements
//! (sequences, `if`, loops, `switch`, `try`, `synchronized`) with every
//! remaining jump classified as implicit fall-through or an explicit,
//! possibly labeled, `break`/`continue`.

pub mod entity;
pub mod error;
pub mod graph;
pub mod model;

pub mod builder;
pub mod exceptions;
pub mod order;
pub mod postdom;

pub mod detect;
pub mod irreducible;
pub mod patterns;

pub mod condense;
pub mod exits;
pub mod labels;
pub mod sync;

pub mod config;
pub mod pipeline;
pub mod printer;


pub use config::{DebugConfig, PassConfig, StructurizeConfig};
pub use detect::{RegionDetector, DEFAULT_SPLIT_BUDGET};
pub use error::StructurizeError;
pub use graph::{Block, BlockGraph, ExceptionRange, GraphBuilder, GraphError, Insn, InsnKind};
pub use model::{Edge, EdgeId, EdgeKind, EdgeMask, StatId, StatKind, StatTree};
pub use pipeline::{Pass, PassPipeline, PipelineOutput, VALID_PASS_NAMES};
pub use printer::{print_tree, TreeSummary};

/// Structurize one method body with the given configuration.
pub fn structurize(graph: &BlockGraph, config: &StructurizeConfig) -> Result<StatTree, StructurizeError> {
    Ok(structurize_method("", graph, config)?.tree)
}

/// Like [`structurize`], with a method name for debug dump filtering.
pub fn structurize_method(
    name: &str,
    graph: &BlockGraph,
    config: &StructurizeConfig,
) -> Result<PipelineOutput, StructurizeError> {
    let tree = builder::graph_to_statement(graph)?;
    PassPipeline::from_config(config).run_with_debug(tree, &config.debug, name)
}
