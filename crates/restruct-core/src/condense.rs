//! Sequence condensation.
//!
//! Nested sequences are unfolded into their parent, single-child sequences
//! disbanded, empty leaves inside sequences bypassed, and childless compound
//! statements replaced by empty leaves. Running it twice changes nothing the
//! second time.

use log::trace;

use crate::model::{Edge, EdgeKind, EdgeMask, StatId, StatKind, StatTree};

/// Condense the whole tree. Returns whether anything changed.
pub fn condense_sequences(tree: &mut StatTree) -> bool {
    let root = tree.root();
    condense_rec(tree, root)
}

fn is_sequence(tree: &StatTree, stat: StatId) -> bool {
    matches!(tree.kind(stat), StatKind::Sequence)
}

fn condense_rec(tree: &mut StatTree, mut stat: StatId) -> bool {
    let mut changed = false;

    if is_sequence(tree, stat) {
        let mut list = tree.children(stat).to_vec();
        let mut unfolded = false;

        let mut i = 0;
        while i < list.len() {
            let st = list[i];
            if is_sequence(tree, st) {
                changed |= remove_empty_statements(tree, st);
                let is_last = i + 1 == list.len();
                if is_last || is_sequence_disbandable(tree, st, list[i + 1]) {
                    unfold_into_parent(tree, stat, st, list.get(i + 1).copied());
                    let inner = tree.children(st).to_vec();
                    list.splice(i..=i, inner);
                    unfolded = true;
                    continue;
                }
            }
            i += 1;
        }

        if unfolded {
            if let (Some(parent), Some(&first)) = (tree.parent(stat), list.first()) {
                let seq = tree.new_compound(StatKind::Sequence, first, list, None);
                tree.set_all_parent(seq);
                tree.replace_statement(parent, stat, seq);
                trace!("unfolded nested sequences of {stat} into {seq}");
                stat = seq;
                changed = true;
            }
        }
    }

    if is_sequence(tree, stat) {
        changed |= remove_empty_statements(tree, stat);
        if let Some(single) = disband_target(tree, stat) {
            if let Some(parent) = tree.parent(stat) {
                tree.replace_statement(parent, stat, single);
                trace!("disbanded single-child sequence {stat}");
                stat = single;
                changed = true;
            }
        }
    }

    loop {
        let hollow = tree.children(stat).iter().copied().find(|&c| {
            let s = tree.stat(c);
            s.stats.is_empty() && !s.is_basic_block() && !matches!(s.kind, StatKind::DummyExit)
        });
        let Some(hollow) = hollow else {
            break;
        };
        let leaf = tree.new_basic_block(None, Vec::new());
        tree.replace_statement(stat, hollow, leaf);
        changed = true;
    }

    let mut i = 0;
    while i < tree.children(stat).len() {
        let child = tree.children(stat)[i];
        changed |= condense_rec(tree, child);
        i += 1;
    }
    changed
}

/// Move the children of the nested sequence `st` up into `parent`, in place
/// of `st`. `next` is the sibling after `st`, if any.
fn unfold_into_parent(tree: &mut StatTree, parent: StatId, st: StatId, next: Option<StatId>) {
    let first = tree.first_of(st);
    for e in tree.pred_edges(st, EdgeMask::ALL) {
        tree.redirect_dest(e, first);
    }

    let Some(&last) = tree.children(st).last() else {
        return;
    };
    let last_succs = tree.succ_edges(last, EdgeMask::DIRECT_ALL);
    match next {
        Some(next) if last_succs.is_empty() => {
            tree.add_edge(Edge::regular(last, next));
        }
        Some(_) => {
            for e in last_succs {
                tree.set_edge_kind(e, EdgeKind::Regular);
                tree.set_closure(e, None);
            }
        }
        None => {
            for e in last_succs {
                if tree.edge(e).closure == Some(st) {
                    tree.set_closure(e, Some(parent));
                }
            }
        }
    }

    for e in tree.succ_edges(st, EdgeMask::ALL) {
        tree.remove_edge(e);
    }
    for e in tree.labels(st).to_vec() {
        if tree.edge(e).source != last {
            tree.set_closure(e, Some(last));
        }
    }
}

/// A nested sequence can merge with its parent when its tail falls through
/// to `next` and nothing outside the tail breaks to `next`.
fn is_sequence_disbandable(tree: &StatTree, block: StatId, next: StatId) -> bool {
    let Some(&last) = tree.children(block).last() else {
        return false;
    };
    if let Some(&first) = tree.succ_edges(last, EdgeMask::DIRECT_ALL).first() {
        if tree.edge(first).dest != next {
            return false;
        }
    }
    tree.pred_edges(next, EdgeMask::BREAK).into_iter().all(|e| {
        let source = tree.edge(e).source;
        source == last || tree.contains_strict(last, source)
    })
}

/// The only child of `seq` when the sequence can be dropped, after removing
/// the child's jump that duplicates the sequence's own.
fn disband_target(tree: &mut StatTree, seq: StatId) -> Option<StatId> {
    let [single] = tree.children(seq) else {
        return None;
    };
    let single = *single;
    let Some(&inner) = tree.succ_edges(single, EdgeMask::ALL).first() else {
        return Some(single);
    };
    let Some(&outer) = tree.succ_edges(seq, EdgeMask::ALL).first() else {
        return Some(single);
    };
    if tree.edge(inner).dest != tree.edge(outer).dest {
        return None;
    }
    tree.remove_edge(inner);
    Some(single)
}

/// Drop empty leaves from a sequence, routing their incoming flow to where
/// they led.
fn remove_empty_statements(tree: &mut StatTree, seq: StatId) -> bool {
    let mut changed = false;
    while tree.children(seq).len() > 1 {
        let mut removed = None;
        for st in tree.children(seq).to_vec() {
            if !tree.stat(st).is_empty_block() || !tree.succ_edges(st, EdgeMask::EXCEPTION).is_empty() {
                continue;
            }
            match tree.first_direct_succ(st) {
                None => {
                    if tree.pred_edges(st, EdgeMask::BREAK).is_empty() {
                        for e in tree.pred_edges(st, EdgeMask::ALL) {
                            tree.remove_edge(e);
                        }
                        removed = Some(st);
                    }
                }
                Some(out) => {
                    let (kind, dest, closure) = {
                        let edge = tree.edge(out);
                        (edge.kind, edge.dest, edge.closure)
                    };
                    if kind != EdgeKind::FinallyExit {
                        tree.remove_edge(out);
                        for e in tree.pred_edges(st, EdgeMask::ALL) {
                            if kind != EdgeKind::Regular {
                                tree.set_edge_kind(e, kind);
                            }
                            tree.redirect_dest(e, dest);
                            if closure.is_some() {
                                tree.set_closure(e, closure);
                            }
                        }
                        removed = Some(st);
                    }
                }
            }
            if removed.is_some() {
                break;
            }
        }
        let Some(st) = removed else {
            break;
        };
        tree.remove_child(seq, st);
        trace!("removed empty leaf {st} from {seq}");
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Insn;

    fn leaf(tree: &mut StatTree, text: &str) -> StatId {
        tree.new_basic_block(None, vec![Insn::plain(text)])
    }

    fn seq(tree: &mut StatTree, children: Vec<StatId>) -> StatId {
        let s = tree.new_compound(StatKind::Sequence, children[0], children, None);
        tree.set_all_parent(s);
        s
    }

    fn attach(tree: &mut StatTree, body: StatId) {
        let root = tree.root();
        let stat = tree.stat_mut(root);
        stat.stats = vec![body];
        stat.first = Some(body);
        tree.stat_mut(body).parent = Some(root);
    }

    #[test]
    fn trailing_nested_sequence_is_unfolded() {
        let mut tree = StatTree::new();
        let (a, b, c) = (leaf(&mut tree, "a"), leaf(&mut tree, "b"), leaf(&mut tree, "c"));
        let inner = seq(&mut tree, vec![b, c]);
        tree.add_edge(Edge::regular(b, c));
        let outer = seq(&mut tree, vec![a, inner]);
        let into = tree.add_edge(Edge::regular(a, inner));
        attach(&mut tree, outer);

        assert!(condense_sequences(&mut tree));

        let body = tree.first_of(tree.root());
        assert!(matches!(tree.kind(body), StatKind::Sequence));
        assert_eq!(tree.children(body), &[a, b, c]);
        assert_eq!(tree.edge(into).dest, b);
        assert_eq!(tree.parent(b), Some(body));
    }

    #[test]
    fn middle_sequence_falls_into_next_sibling() {
        let mut tree = StatTree::new();
        let (a, b, c) = (leaf(&mut tree, "a"), leaf(&mut tree, "b"), leaf(&mut tree, "c"));
        let inner = seq(&mut tree, vec![a, b]);
        tree.add_edge(Edge::regular(a, b));
        let outer = seq(&mut tree, vec![inner, c]);
        tree.add_edge(Edge::regular(inner, c));
        attach(&mut tree, outer);

        condense_sequences(&mut tree);

        let body = tree.first_of(tree.root());
        assert_eq!(tree.children(body), &[a, b, c]);
        assert_eq!(tree.successors(b, EdgeMask::REGULAR), vec![c]);
        assert!(tree.succ_edges(inner, EdgeMask::ALL).is_empty());
    }

    #[test]
    fn single_child_sequence_is_disbanded() {
        let mut tree = StatTree::new();
        let a = leaf(&mut tree, "a");
        let s = seq(&mut tree, vec![a]);
        attach(&mut tree, s);

        assert!(condense_sequences(&mut tree));
        assert_eq!(tree.first_of(tree.root()), a);
        assert_eq!(tree.parent(a), Some(tree.root()));
    }

    #[test]
    fn empty_leaf_is_bypassed() {
        let mut tree = StatTree::new();
        let a = leaf(&mut tree, "a");
        let empty = tree.new_basic_block(None, Vec::new());
        let b = leaf(&mut tree, "b");
        let s = seq(&mut tree, vec![a, empty, b]);
        let into = tree.add_edge(Edge::regular(a, empty));
        tree.add_edge(Edge::regular(empty, b));
        attach(&mut tree, s);

        condense_sequences(&mut tree);

        assert_eq!(tree.children(s), &[a, b]);
        assert_eq!(tree.edge(into).dest, b);
        assert!(tree.pred_edges(empty, EdgeMask::ALL).is_empty());
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut tree = StatTree::new();
        let (a, b, c) = (leaf(&mut tree, "a"), leaf(&mut tree, "b"), leaf(&mut tree, "c"));
        let inner = seq(&mut tree, vec![b, c]);
        tree.add_edge(Edge::regular(b, c));
        let outer = seq(&mut tree, vec![a, inner]);
        tree.add_edge(Edge::regular(a, inner));
        attach(&mut tree, outer);

        assert!(condense_sequences(&mut tree));
        assert!(!condense_sequences(&mut tree));
    }
}
