//! Irreducible flow inside a container, and node splitting to escape it.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::debug;

use crate::model::{Edge, EdgeMask, StatId, StatKind, StatTree};

/// Detects irreducible flow and duplicates nodes to remove it.
pub trait IrreducibilityHandler: Send + Sync {
    /// Whether the regular flow between the container's children is
    /// irreducible.
    fn is_irreducible(&self, tree: &StatTree, container: StatId) -> bool;

    /// Duplicate one child so that a later scan can make progress. Returns
    /// `false` when there is nothing to split.
    fn split(&self, tree: &mut StatTree, container: StatId) -> bool;
}

/// T1/T2 reduction for the check, cheapest-leaf duplication for the split.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSplitter;

impl IrreducibilityHandler for NodeSplitter {
    fn is_irreducible(&self, tree: &StatTree, container: StatId) -> bool {
        let children = tree.children(container);
        if children
            .iter()
            .any(|&c| !tree.succ_edges(c, EdgeMask::EXCEPTION).is_empty())
        {
            return false;
        }

        let members: HashSet<StatId> = children.iter().copied().collect();
        let mut succs: BTreeMap<StatId, BTreeSet<StatId>> = BTreeMap::new();
        let mut preds: BTreeMap<StatId, BTreeSet<StatId>> = BTreeMap::new();
        for &c in children {
            succs.entry(c).or_default();
            preds.entry(c).or_default();
        }
        for &c in children {
            for s in tree.successors(c, EdgeMask::REGULAR) {
                if members.contains(&s) {
                    succs.entry(c).or_default().insert(s);
                    preds.entry(s).or_default().insert(c);
                }
            }
        }

        while succs.len() > 1 {
            let pick = succs.keys().copied().find(|n| {
                succs[n].contains(n) || preds.get(n).is_some_and(|p| p.len() == 1)
            });
            let Some(node) = pick else {
                return true;
            };

            if succs[&node].contains(&node) {
                // T1: drop the self loop
                succs.entry(node).or_default().remove(&node);
                preds.entry(node).or_default().remove(&node);
                continue;
            }

            // T2: fold a node with a single predecessor into it
            let Some(&pred) = preds.get(&node).and_then(|p| p.iter().next()) else {
                return true;
            };
            let node_succs = succs.remove(&node).unwrap_or_default();
            preds.remove(&node);
            let pred_succs = succs.entry(pred).or_default();
            pred_succs.remove(&node);
            pred_succs.extend(node_succs.iter().copied().filter(|&s| s != node));
            for s in node_succs {
                if s == node {
                    continue;
                }
                let p = preds.entry(s).or_default();
                p.remove(&node);
                p.insert(pred);
            }
        }
        false
    }

    fn split(&self, tree: &mut StatTree, container: StatId) -> bool {
        let Some(node) = split_candidate(tree, container) else {
            return false;
        };
        let Some(enter) = tree.pred_edges(node, EdgeMask::REGULAR).first().copied() else {
            return false;
        };
        let enter_source = tree.edge(enter).source;

        let (block, insns) = match tree.kind(node) {
            StatKind::BasicBlock { block, insns } => (*block, insns.clone()),
            _ => return false,
        };
        let copy = tree.new_basic_block(block, insns);
        tree.stat_mut(container).stats.push(copy);
        tree.stat_mut(copy).parent = Some(container);

        for e in tree.pred_edges(node, EdgeMask::ALL) {
            let edge = tree.edge(e);
            if edge.source == enter_source || edge.closure == Some(enter_source) {
                tree.redirect_dest(e, copy);
            }
        }
        for e in tree.succ_edges(node, EdgeMask::ALL) {
            let edge = tree.edge(e);
            let mut dup = Edge::new(edge.kind, copy, edge.dest, edge.closure);
            dup.exceptions = edge.exceptions.clone();
            tree.add_edge(dup);
        }
        tree.build_continue_set(copy);
        tree.build_monitor_flags(copy);
        debug!("split {node} into {copy} for entry from {enter_source}");
        true
    }
}

/// The leaf with several regular entries that is cheapest to copy: fewest
/// regular successors, then fewest instructions.
fn split_candidate(tree: &StatTree, container: StatId) -> Option<StatId> {
    let mut best: Option<(usize, usize, StatId)> = None;
    for &child in tree.children(container) {
        let stat = tree.stat(child);
        let Some(insns) = stat.exprents() else {
            continue;
        };
        let preds = tree.predecessors(child, EdgeMask::REGULAR);
        if preds.len() < 2 || preds.contains(&child) {
            continue;
        }
        let succ_count = tree.successors(child, EdgeMask::REGULAR).len();
        let key = (succ_count, insns.len());
        if best.map_or(true, |(s, n, _)| key < (s, n)) {
            best = Some((key.0, key.1, child));
        }
    }
    best.map(|(_, _, child)| child)
}
