//! Recovery of `synchronized` blocks.
//!
//! A monitor-enter leaf followed in a sequence by a catch-all whose body and
//! handler both release the monitor is folded into one `Synchronized`
//! statement.

use log::debug;

use crate::graph::InsnKind;
use crate::model::{Edge, EdgeKind, EdgeMask, StatId, StatKind, StatTree};

/// Rewrite every monitor-enter / catch-all pair in the tree, innermost
/// sequences first. Returns whether anything changed.
pub fn build_synchronized(tree: &mut StatTree) -> bool {
    let root = tree.root();
    build_rec(tree, root)
}

fn build_rec(tree: &mut StatTree, stat: StatId) -> bool {
    let mut changed = false;
    for child in tree.children(stat).to_vec() {
        changed |= build_rec(tree, child);
    }
    if !matches!(tree.kind(stat), StatKind::Sequence) {
        return changed;
    }
    while let Some((current, next)) = find_pair(tree, stat) {
        fold_pair(tree, stat, current, next);
        changed = true;
    }
    changed
}

/// The first monitor-enter child whose next sibling, after unwrapping
/// sequences, is a catch-all releasing the monitor on both paths.
fn find_pair(tree: &StatTree, seq: StatId) -> Option<(StatId, StatId)> {
    tree.children(seq).windows(2).find_map(|pair| {
        let (current, next) = (pair[0], pair[1]);
        if !tree.stat(current).monitor_enter {
            return None;
        }
        let mut inner = next;
        while matches!(tree.kind(inner), StatKind::Sequence) {
            inner = tree.first_of(inner);
        }
        let StatKind::CatchAll { handler, .. } = tree.kind(inner) else {
            return None;
        };
        let body = tree.first_of(inner);
        (tree.stat(body).contains_monitor_exit && tree.stat(*handler).contains_monitor_exit)
            .then_some((current, next))
    })
}

fn fold_pair(tree: &mut StatTree, seq: StatId, current: StatId, next: StatId) {
    let mut catch_all = next;
    while matches!(tree.kind(catch_all), StatKind::Sequence) {
        catch_all = tree.first_of(catch_all);
    }
    let StatKind::CatchAll { handler, .. } = *tree.kind(catch_all) else {
        return;
    };
    let body = tree.first_of(catch_all);

    if let Some(out) = tree.succ_edges(current, EdgeMask::DIRECT_ALL).first().copied() {
        tree.remove_edge(out);
    }
    for e in tree.pred_edges(current, EdgeMask::DIRECT_ALL) {
        tree.redirect_dest(e, next);
    }
    tree.remove_child(seq, current);

    let post = tree
        .first_direct_succ(body)
        .map(|e| tree.edge(e))
        .filter(|e| e.kind == EdgeKind::Regular)
        .map(|e| e.dest);
    let sync = tree.new_compound(
        StatKind::Synchronized {
            head: current,
            body,
            handler,
        },
        current,
        vec![current, body, handler],
        post,
    );
    tree.set_all_parent(sync);
    for e in tree.labels(catch_all).to_vec() {
        tree.set_closure(e, Some(sync));
    }
    tree.add_edge(Edge::regular(current, body));
    strip_monitor_exits(tree, body);
    strip_monitor_exits(tree, handler);

    if let Some(parent) = tree.parent(catch_all) {
        tree.replace_statement(parent, catch_all, sync);
    }
    tree.build_monitor_flags(sync);
    debug!("synchronized block {sync} from {current} and {catch_all}");
}

/// The statement releases the monitor itself; drop the explicit releases.
fn strip_monitor_exits(tree: &mut StatTree, stat: StatId) {
    for leaf in tree.descendants(stat) {
        let Some(insns) = tree.stat(leaf).exprents() else {
            continue;
        };
        if !insns.iter().any(|i| i.kind == InsnKind::MonitorExit) {
            continue;
        }
        let kept = insns
            .iter()
            .filter(|i| i.kind != InsnKind::MonitorExit)
            .cloned()
            .collect();
        tree.set_insns(leaf, kept);
    }
}
