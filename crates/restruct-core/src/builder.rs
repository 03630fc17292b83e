//! Block graph to initial statement tree.

use std::collections::HashMap;

use log::debug;

use crate::error::StructurizeError;
use crate::graph::BlockGraph;
use crate::model::{Edge, EdgeKind, StatId, StatKind, StatTree};

/// Wrap every block in a leaf and classify the edges between them.
///
/// A single block without a self edge becomes the root's only child with no
/// edges. Otherwise the leaves go into one unresolved region under the root:
/// jumps back to the entry become `Continue` edges on the region, flow into
/// the merged return block becomes `Break` edges into the dummy exit, edges
/// leaving a finally handler become `FinallyExit` edges into the dummy exit,
/// and exception successors become `Exception` edges unless their range is
/// circular.
pub fn graph_to_statement(graph: &BlockGraph) -> Result<StatTree, StructurizeError> {
    graph.validate()?;

    let mut tree = StatTree::new();
    let root = tree.root();
    let dummy_exit = tree.dummy_exit();

    let mut leaves: HashMap<u32, StatId> = HashMap::new();
    let mut order = Vec::with_capacity(graph.blocks.len());
    for block in &graph.blocks {
        let leaf = tree.new_basic_block(Some(block.id), block.insns.clone());
        leaves.insert(block.id, leaf);
        order.push(leaf);
    }
    let first = leaves[&graph.first];

    let self_loop = graph
        .block(graph.first)
        .is_some_and(|b| b.succs.contains(&graph.first));
    if graph.blocks.len() == 1 && !self_loop {
        attach_body(&mut tree, root, first);
        tree.build_monitor_flags(first);
        debug!("single block {}, no region needed", graph.first);
        return Ok(tree);
    }

    let general = tree.new_compound(StatKind::Region { resolved: false }, first, order, None);
    tree.set_all_parent(general);

    for block in &graph.blocks {
        let stat = leaves[&block.id];
        for &succ in &block.succs {
            let edge = if succ == graph.first {
                Edge::new(EdgeKind::Continue, stat, general, Some(general))
            } else if graph.finally_exits.contains(&block.id) {
                Edge::new(EdgeKind::FinallyExit, stat, dummy_exit, Some(general))
            } else if succ == graph.last {
                Edge::new(EdgeKind::Break, stat, dummy_exit, Some(general))
            } else {
                Edge::regular(stat, leaves[&succ])
            };
            tree.add_edge(edge);
        }
        for &handler in &block.exc_succs {
            let Some(range) = graph.range(handler, block.id) else {
                continue;
            };
            if range.is_circular() {
                continue;
            }
            tree.add_edge(Edge::exception(stat, leaves[&handler], range.types.clone()));
        }
    }

    attach_body(&mut tree, root, general);
    tree.build_continue_set(general);
    tree.build_monitor_flags(general);
    debug!(
        "built region {general} over {} blocks, entry {}",
        graph.blocks.len(),
        graph.first
    );
    Ok(tree)
}

fn attach_body(tree: &mut StatTree, root: StatId, body: StatId) {
    let stat = tree.stat_mut(root);
    stat.stats = vec![body];
    stat.first = Some(body);
    tree.stat_mut(body).parent = Some(root);
}
