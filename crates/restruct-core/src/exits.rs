//! Exit merging and return cleanup.

use log::debug;

use crate::condense::condense_sequences;
use crate::model::{Edge, EdgeId, EdgeKind, EdgeMask, LoopKind, StatId, StatKind, StatTree};

/// Copy single-instruction exit blocks into the `if` statements that jump to
/// them. Returns whether anything changed; on change, leftover unreachable
/// blocks are emptied and the tree re-condensed.
pub fn condense_exits(tree: &mut StatTree) -> bool {
    let root = tree.root();
    let changed = integrate_exits(tree, root);
    if changed {
        clean_up_unreachable_blocks(tree, root);
        condense_sequences(tree);
    }
    changed
}

fn integrate_exits(tree: &mut StatTree, stat: StatId) -> bool {
    if tree.stat(stat).is_basic_block() {
        return false;
    }
    let mut changed = false;
    'retry: loop {
        for child in tree.children(stat).to_vec() {
            if integrate_exits(tree, child) {
                changed = true;
                continue 'retry;
            }
        }
        break;
    }

    let StatKind::If(shape) = tree.kind(stat) else {
        return changed;
    };
    if shape.if_stat.is_some() {
        return changed;
    }
    let Some(if_edge) = shape.if_edge else {
        return changed;
    };
    let Some(exit) = exit_destination(tree, if_edge) else {
        return changed;
    };
    let Some(old_exit) = tree.succ_edges(exit, EdgeMask::ALL).first().copied() else {
        return changed;
    };

    let insns = tree.stat(exit).exprents().map(<[_]>::to_vec).unwrap_or_default();
    let copy = tree.new_basic_block(None, insns);
    let head = tree.first_of(stat);
    tree.remove_edge(if_edge);
    let new_edge = tree.add_edge(Edge::regular(head, copy));
    if let StatKind::If(shape) = &mut tree.stat_mut(stat).kind {
        shape.if_edge = Some(new_edge);
        shape.if_stat = Some(copy);
    }
    tree.stat_mut(stat).stats.push(copy);
    tree.stat_mut(copy).parent = Some(stat);

    let (dest, closure) = {
        let e = tree.edge(old_exit);
        (e.dest, e.closure)
    };
    tree.add_edge(Edge::new(EdgeKind::Break, copy, dest, closure));
    tree.build_monitor_flags(copy);
    debug!("copied exit block {exit} into {stat}");
    true
}

/// The destination of `edge` when it is an explicit break into a block
/// holding nothing but a return or throw.
fn exit_destination(tree: &StatTree, edge: EdgeId) -> Option<StatId> {
    let e = tree.edge(edge);
    if e.kind != EdgeKind::Break || !e.explicit || !(e.labeled || is_only_edge(tree, edge)) {
        return None;
    }
    match tree.stat(e.dest).exprents() {
        Some([insn]) if insn.is_exit() => Some(e.dest),
        _ => None,
    }
}

/// No other edge reaches the destination by normal fall-through.
fn is_only_edge(tree: &StatTree, edge: EdgeId) -> bool {
    let dest = tree.edge(edge).dest;
    tree.pred_edges(dest, EdgeMask::ALL)
        .into_iter()
        .filter(|&e| e != edge)
        .all(|e| {
            let other = tree.edge(e);
            if other.kind != EdgeKind::Regular {
                return false;
            }
            match tree.kind(other.source) {
                StatKind::BasicBlock { .. } => false,
                StatKind::If(shape) => shape.has_else(),
                StatKind::Loop { kind } => *kind == LoopKind::Infinite,
                _ => true,
            }
        })
}

/// Empty the tail of a sequence that only its predecessor could reach, when
/// that predecessor never falls through.
fn clean_up_unreachable_blocks(tree: &mut StatTree, stat: StatId) {
    'retry: loop {
        for child in tree.children(stat).to_vec() {
            clean_up_unreachable_blocks(tree, child);
            if !matches!(tree.kind(child), StatKind::Sequence) {
                continue;
            }
            let &[.., second_last, last] = tree.children(child) else {
                continue;
            };
            if tree.stat(last).is_empty_block() || tree.has_basic_succ_edge(second_last) {
                continue;
            }
            let reached_elsewhere = tree
                .predecessors(last, EdgeMask::DIRECT_ALL)
                .into_iter()
                .any(|p| p != second_last);
            if reached_elsewhere {
                continue;
            }

            if tree.stat(last).is_basic_block() {
                tree.set_insns(last, Vec::new());
            } else {
                let empty = tree.new_basic_block(None, Vec::new());
                tree.replace_statement(child, last, empty);
            }
            debug!("emptied unreachable tail {last} of {child}");
            continue 'retry;
        }
        break;
    }
}

/// Drop a trailing value-less `return` from blocks that reach the end of the
/// method without a jump.
pub fn remove_redundant_returns(tree: &mut StatTree) {
    let exit = tree.dummy_exit();
    for e in tree.pred_edges(exit, EdgeMask::ALL) {
        if tree.edge(e).explicit {
            continue;
        }
        let source = tree.edge(e).source;
        let Some(insns) = tree.stat(source).exprents() else {
            continue;
        };
        if let Some((last, rest)) = insns.split_last() {
            if last.is_void_return() {
                let rest = rest.to_vec();
                tree.set_insns(source, rest);
            }
        }
    }
}
