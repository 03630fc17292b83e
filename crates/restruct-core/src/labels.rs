//! Jump classification and label placement.
//!
//! [`clean_up_edges`] resets every jump to explicit and labeled, drops jumps
//! hanging off statements that cannot fall through, and pushes each jump's
//! closure as deep into the tree as it can go while still reaching the same
//! destination. [`identify_labels`] then works out, for every statement,
//! where plain fall-through would lead; jumps to that place become implicit,
//! and jumps that a loop or switch can take without naming a label become
//! unlabeled.

use std::collections::BTreeSet;

use crate::model::{Edge, EdgeId, EdgeKind, EdgeMask, LoopKind, StatId, StatKind, StatTree};

pub fn clean_up_edges(tree: &mut StatTree) {
    let root = tree.root();
    reset_all_edges(tree, root);
    remove_non_immediate_edges(tree, root);
    lift_closures(tree, root);
    low_continue_labels(tree, root, &mut Vec::new());
    low_closures(tree, root);
}

pub fn identify_labels(tree: &mut StatTree) {
    let root = tree.root();
    set_explicit_edges(tree, root);
    hide_default_switch_edges(tree, root);
    let mut set_break = BTreeSet::new();
    let mut set_continue = BTreeSet::new();
    process_statement_label(tree, root, &mut set_break, &mut set_continue);
    set_ret_edges_unlabeled(tree);
}

fn reset_all_edges(tree: &mut StatTree, stat: StatId) {
    for e in tree.succ_edges(stat, EdgeMask::ALL) {
        let edge = tree.edge_mut(e);
        edge.explicit = true;
        edge.labeled = true;
    }
    for child in tree.children(stat).to_vec() {
        reset_all_edges(tree, child);
    }
}

fn remove_non_immediate_edges(tree: &mut StatTree, stat: StatId) {
    for child in tree.children(stat).to_vec() {
        remove_non_immediate_edges(tree, child);
    }
    if !tree.has_basic_succ_edge(stat) {
        for e in tree.succ_edges(stat, EdgeMask::BREAK | EdgeMask::CONTINUE) {
            tree.remove_edge(e);
        }
    }
}

/// A continue is owned by the loop it restarts. A break into a sequence or
/// switch is owned by the statement right before its destination.
fn lift_closures(tree: &mut StatTree, stat: StatId) {
    for e in tree.succ_edges(stat, EdgeMask::ALL) {
        let (kind, dest, closure) = {
            let edge = tree.edge(e);
            (edge.kind, edge.dest, edge.closure)
        };
        match kind {
            EdgeKind::Continue if closure != Some(dest) => tree.set_closure(e, Some(dest)),
            EdgeKind::Break if dest != tree.dummy_exit() => {
                let Some(parent) = tree.parent(dest) else {
                    continue;
                };
                let siblings = match tree.kind(parent) {
                    StatKind::Sequence => tree.children(parent).to_vec(),
                    StatKind::Switch(shape) => shape.cases.clone(),
                    _ => Vec::new(),
                };
                if let Some(pos) = siblings.iter().skip(1).position(|&s| s == dest) {
                    tree.set_closure(e, Some(siblings[pos]));
                }
            }
            _ => {}
        }
    }
    for child in tree.children(stat).to_vec() {
        lift_closures(tree, child);
    }
}

/// Point continues at the innermost loop that contains their source and
/// restarts at the same head.
pub fn low_continue_labels(tree: &mut StatTree, stat: StatId, edges: &mut Vec<EdgeId>) {
    for e in tree.pred_edges(stat, EdgeMask::CONTINUE) {
        if !edges.contains(&e) {
            edges.push(e);
        }
    }
    if matches!(tree.kind(stat), StatKind::Loop { .. }) {
        for &e in edges.iter() {
            if tree.contains_strict(stat, tree.edge(e).source) {
                tree.redirect_dest(e, stat);
                tree.set_closure(e, Some(stat));
            }
        }
    }

    let first = tree.stat(stat).first;
    for child in tree.children(stat).to_vec() {
        if Some(child) == first {
            low_continue_labels(tree, child, edges);
        } else {
            low_continue_labels(tree, child, &mut Vec::new());
        }
    }
}

fn low_closures(tree: &mut StatTree, stat: StatId) {
    for e in tree.labels(stat).to_vec() {
        if tree.edge(e).kind != EdgeKind::Break {
            continue;
        }
        for child in tree.children(stat).to_vec() {
            let (source, dest) = (tree.edge(e).source, tree.edge(e).dest);
            if tree.contains_strict(child, source) && is_direct_path(tree, child, dest) {
                tree.set_closure(e, Some(child));
            }
        }
    }
    for child in tree.children(stat).to_vec() {
        low_closures(tree, child);
    }
}

/// Whether leaving `stat` normally arrives at `end`.
pub fn is_direct_path(tree: &StatTree, stat: StatId, end: StatId) -> bool {
    let succs = tree.successors(stat, EdgeMask::DIRECT_ALL);
    if !succs.is_empty() {
        return succs.contains(&end);
    }
    let Some(parent) = tree.parent(stat) else {
        return false;
    };
    match tree.kind(parent) {
        StatKind::Root { .. } => end == tree.dummy_exit(),
        StatKind::Loop { .. } => end == parent,
        StatKind::Switch(shape) => {
            let count = shape.cases.len();
            match shape.cases.iter().position(|&c| c == stat) {
                Some(i) if i + 1 < count => end == skip_empty_case(tree, shape.cases[i + 1]),
                _ => is_direct_path(tree, parent, end),
            }
        }
        _ => is_direct_path(tree, parent, end),
    }
}

/// An empty case stands for wherever its single jump leads.
fn skip_empty_case(tree: &StatTree, case: StatId) -> StatId {
    if !tree.stat(case).is_empty_block() {
        return case;
    }
    tree.succ_edges(case, EdgeMask::ALL)
        .first()
        .map_or(case, |&e| tree.edge(e).dest)
}

// -------------------------------------------------------------------------
// Explicit edges
// -------------------------------------------------------------------------

/// Unresolved jumps leaving a statement, grouped by destination in the order
/// the destinations were first seen.
#[derive(Debug, Default)]
struct EdgeMap(Vec<(StatId, Vec<EdgeId>)>);

impl EdgeMap {
    fn single(dest: StatId, edge: EdgeId) -> Self {
        Self(vec![(dest, vec![edge])])
    }

    fn put(&mut self, dest: StatId, edges: Vec<EdgeId>) {
        match self.0.iter_mut().find(|(d, _)| *d == dest) {
            Some((_, slot)) => *slot = edges,
            None => self.0.push((dest, edges)),
        }
    }

    fn merge(&mut self, other: EdgeMap) {
        for (dest, edges) in other.0 {
            match self.0.iter_mut().find(|(d, _)| *d == dest) {
                Some((_, slot)) => slot.extend(edges),
                None => self.0.push((dest, edges)),
            }
        }
    }

    fn get(&self, dest: StatId) -> Option<&[EdgeId]> {
        self.0
            .iter()
            .find(|(d, _)| *d == dest)
            .map(|(_, edges)| edges.as_slice())
    }
}

fn set_explicit_edges(tree: &mut StatTree, stat: StatId) -> EdgeMap {
    let mut map = EdgeMap::default();
    match tree.kind(stat).clone() {
        StatKind::BasicBlock { .. } | StatKind::DummyExit | StatKind::Region { .. } => {}
        kind @ (StatKind::TryCatch { .. } | StatKind::CatchAll { .. }) => {
            let merge_all = matches!(kind, StatKind::TryCatch { .. });
            let first = tree.first_of(stat);
            for child in tree.children(stat).to_vec() {
                let mut child_map = set_explicit_edges(tree, child);
                process_edges_with_next(tree, child, &mut child_map, None);
                // jumps leaving a finally handler stay explicit
                if merge_all || child == first {
                    map.merge(child_map);
                }
            }
        }
        StatKind::Loop { .. } => {
            let first = tree.first_of(stat);
            map = set_explicit_edges(tree, first);
            process_edges_with_next(tree, first, &mut map, Some(stat));
        }
        StatKind::If(shape) => match shape.if_stat {
            None => {
                let head = tree.first_of(stat);
                process_edges_with_next(tree, head, &mut map, None);
            }
            Some(if_stat) => {
                map = set_explicit_edges(tree, if_stat);
                process_edges_with_next(tree, if_stat, &mut map, None);
                if let Some(else_stat) = shape.else_stat {
                    let mut else_map = set_explicit_edges(tree, else_stat);
                    process_edges_with_next(tree, else_stat, &mut else_map, None);
                    map.merge(else_map);
                }
            }
        },
        StatKind::Root { dummy_exit } => {
            let body = tree.first_of(stat);
            if body != stat {
                map = set_explicit_edges(tree, body);
                process_edges_with_next(tree, body, &mut map, Some(dummy_exit));
            }
        }
        StatKind::Sequence => {
            let children = tree.children(stat).to_vec();
            if let Some((&last, rest)) = children.split_last() {
                for (i, &child) in rest.iter().enumerate() {
                    let mut child_map = set_explicit_edges(tree, child);
                    process_edges_with_next(tree, child, &mut child_map, Some(children[i + 1]));
                }
                map = set_explicit_edges(tree, last);
                process_edges_with_next(tree, last, &mut map, None);
            }
        }
        StatKind::Switch(shape) => {
            let cases = shape.cases;
            if let Some((&last, rest)) = cases.split_last() {
                for (i, &case) in rest.iter().enumerate() {
                    let next = skip_empty_case(tree, cases[i + 1]);
                    let mut case_map = set_explicit_edges(tree, case);
                    process_edges_with_next(tree, case, &mut case_map, Some(next));
                }
                let empty_exit = tree.stat(last).is_empty_block().then(|| {
                    tree.succ_edges(last, EdgeMask::ALL).first().copied()
                });
                match empty_exit {
                    Some(Some(edge)) => map = EdgeMap::single(tree.edge(edge).dest, edge),
                    Some(None) => {}
                    None => {
                        map = set_explicit_edges(tree, last);
                        process_edges_with_next(tree, last, &mut map, None);
                    }
                }
            }
        }
        StatKind::Synchronized { head, body, .. } => {
            let mut head_map = set_explicit_edges(tree, head);
            process_edges_with_next(tree, head, &mut head_map, Some(body));
            map = set_explicit_edges(tree, body);
            process_edges_with_next(tree, body, &mut map, None);
        }
    }
    map
}

/// Resolve the jumps collected below `stat` against `next`, the statement
/// that follows it by fall-through.
fn process_edges_with_next(tree: &mut StatTree, stat: StatId, map: &mut EdgeMap, next: Option<StatId>) {
    let mut next = next;
    let mut own = tree.first_direct_succ(stat);
    if let Some(e) = own {
        let dest = tree.edge(e).dest;
        if Some(dest) == next {
            tree.edge_mut(e).explicit = false;
            own = None;
        } else {
            next = Some(dest);
        }
    }

    if matches!(tree.kind(stat), StatKind::Loop { kind } if *kind == LoopKind::Infinite) {
        next = None;
    }

    match next {
        None => {
            if let [(dest, edges)] = map.0.as_slice() {
                if edges.len() > 1 && *dest != tree.dummy_exit() {
                    let edges = edges.clone();
                    let added = add_merged_edge(tree, stat, &edges);
                    map.put(tree.edge(added).dest, vec![added]);
                }
            }
        }
        Some(next) => {
            let implicit = map.get(next).map(<[EdgeId]>::to_vec);
            let found = implicit.is_some();
            for e in implicit.unwrap_or_default() {
                tree.edge_mut(e).explicit = false;
            }

            if !found && tree.succ_edges(stat, EdgeMask::ALL).is_empty() {
                let mut largest: Option<&Vec<EdgeId>> = None;
                for (dest, edges) in &map.0 {
                    if *dest != tree.dummy_exit() && largest.map_or(true, |l| edges.len() > l.len()) {
                        largest = Some(edges);
                    }
                }
                if let Some(edges) = largest.filter(|l| l.len() > 1).cloned() {
                    add_merged_edge(tree, stat, &edges);
                }
            }
            map.0.clear();
        }
    }

    if let Some(e) = own {
        map.put(tree.edge(e).dest, vec![e]);
    }
}

/// Replace several jumps to one place by a single jump leaving `stat`.
fn add_merged_edge(tree: &mut StatTree, stat: StatId, edges: &[EdgeId]) -> EdgeId {
    let example = tree.edge(edges[0]).clone();
    let mut closure = tree.parent(stat);
    if let Some(parent) = closure {
        if !example.closure.is_some_and(|c| tree.contains_strict(parent, c)) {
            closure = example.closure;
        }
    }
    let added = tree.add_edge(Edge::new(example.kind, stat, example.dest, closure));
    for &e in edges {
        tree.edge_mut(e).explicit = false;
    }
    added
}

/// A default case that is only an implicit jump out of the switch is not
/// printed.
fn hide_default_switch_edges(tree: &mut StatTree, stat: StatId) {
    if let StatKind::Switch(shape) = tree.kind(stat).clone() {
        if let Some(&last) = shape.cases.last() {
            let implicit_exit = tree.stat(last).is_empty_block()
                && tree
                    .succ_edges(last, EdgeMask::ALL)
                    .first()
                    .is_some_and(|&e| !tree.edge(e).explicit);
            if implicit_exit {
                if let StatKind::Switch(shape) = &mut tree.stat_mut(stat).kind {
                    let idx = shape.cases.len() - 1;
                    let default = shape.default_edge;
                    if let Some(pos) = shape.case_edges[idx].iter().position(|&e| Some(e) == default) {
                        shape.case_edges[idx].remove(pos);
                        shape.case_values[idx].remove(pos);
                    }
                    if shape.case_edges[idx].is_empty() {
                        shape.cases.pop();
                        shape.case_edges.pop();
                        shape.case_values.pop();
                    }
                }
            }
        }
    }
    for child in tree.children(stat).to_vec() {
        hide_default_switch_edges(tree, child);
    }
}

/// Loops and switches catch unlabeled jumps from statements not nested in
/// an inner loop or switch.
fn process_statement_label(
    tree: &mut StatTree,
    stat: StatId,
    set_break: &mut BTreeSet<StatId>,
    set_continue: &mut BTreeSet<StatId>,
) {
    if !tree.stat(stat).is_basic_block() {
        for child in tree.children(stat).to_vec() {
            process_statement_label(tree, child, set_break, set_continue);
        }

        let is_loop = matches!(tree.kind(stat), StatKind::Loop { .. });
        let is_switch = matches!(tree.kind(stat), StatKind::Switch(_));
        if is_loop || is_switch {
            for e in tree.labels(stat).to_vec() {
                let edge = tree.edge(e);
                let reachable = match edge.kind {
                    EdgeKind::Break => set_break.contains(&edge.source),
                    EdgeKind::Continue => set_continue.contains(&edge.source),
                    _ => false,
                };
                if edge.explicit && reachable {
                    tree.edge_mut(e).labeled = false;
                }
            }
        }
        if is_loop {
            set_continue.clear();
        }
        if is_loop || is_switch {
            set_break.clear();
        }
    }
    set_break.insert(stat);
    set_continue.insert(stat);
}

/// Returns, throws, and finally exits print as statements, never as jumps.
fn set_ret_edges_unlabeled(tree: &mut StatTree) {
    let exit = tree.dummy_exit();
    for e in tree.pred_edges(exit, EdgeMask::ALL) {
        let edge = tree.edge(e);
        let ends_in_exit = tree
            .stat(edge.source)
            .exprents()
            .and_then(<[_]>::last)
            .is_some_and(|i| i.is_exit());
        if edge.kind == EdgeKind::FinallyExit || ends_in_exit {
            tree.edge_mut(e).labeled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::graph_to_statement;
    use crate::condense::condense_sequences;
    use crate::detect::RegionDetector;
    use crate::graph::{GraphBuilder, Insn};

    fn structured(g: GraphBuilder, first: u32) -> StatTree {
        let mut tree = graph_to_statement(&g.finish(first)).unwrap_or_else(|e| panic!("{e}"));
        RegionDetector::default()
            .run(&mut tree)
            .unwrap_or_else(|e| panic!("{e}"));
        let root = tree.root();
        low_continue_labels(&mut tree, root, &mut Vec::new());
        condense_sequences(&mut tree);
        clean_up_edges(&mut tree);
        identify_labels(&mut tree);
        tree
    }

    fn explicit_jumps(tree: &StatTree) -> Vec<Edge> {
        tree.descendants(tree.root())
            .into_iter()
            .flat_map(|s| tree.succ_edges(s, EdgeMask::BREAK | EdgeMask::CONTINUE))
            .map(|e| tree.edge(e).clone())
            .filter(|e| e.explicit)
            .collect()
    }

    #[test]
    fn straight_line_needs_no_jumps() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::plain("a")]);
        let b = g.block(vec![Insn::plain("b")]);
        g.edge(a, b).exit(b);
        let tree = structured(g, a);

        assert!(explicit_jumps(&tree).is_empty());
        let body = tree.first_of(tree.root());
        for &child in tree.children(body) {
            for e in tree.succ_edges(child, EdgeMask::ALL) {
                assert!(!tree.edge(e).explicit);
            }
        }
    }

    #[test]
    fn if_else_arms_fall_through_to_join() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::cond("c")]);
        let b = g.block(vec![Insn::plain("b")]);
        let c = g.block(vec![Insn::plain("c")]);
        let d = g.block(vec![Insn::plain("d")]);
        g.edge(a, b).edge(a, c).edge(b, d).edge(c, d).exit(d);
        let tree = structured(g, a);

        assert!(explicit_jumps(&tree).is_empty());
    }

    #[test]
    fn loop_exit_stays_an_explicit_break() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::plain("a")]);
        let b = g.block(vec![Insn::cond("c")]);
        g.edge(a, b).edge(b, a).exit(b);
        let tree = structured(g, a);

        let body = tree.first_of(tree.root());
        match tree.kind(body) {
            StatKind::Loop { .. } => {}
            other => panic!("Expected Loop, got {other:?}"),
        }
        let jumps = explicit_jumps(&tree);
        assert!(jumps
            .iter()
            .any(|e| e.kind == EdgeKind::Break && e.dest == tree.dummy_exit()));
        for e in &jumps {
            if let Some(closure) = e.closure {
                assert!(tree.contains_strict(closure, e.source));
            }
        }
    }

    #[test]
    fn direct_path_through_root_reaches_exit() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::ret(None)]);
        g.exit(a);
        let tree = structured(g, a);
        let body = tree.first_of(tree.root());
        assert!(is_direct_path(&tree, body, tree.dummy_exit()));
    }
}
