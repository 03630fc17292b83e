use log::trace;

use crate::error::StructurizeError;
use crate::exceptions::check_statement_exceptions;
use crate::model::{EdgeKind, EdgeMask, IfShape, LastBasic, StatId, StatKind, StatTree};

use super::{choice_cluster, ShapeMatcher};

/// A basic block ending in a conditional.
///
/// The block's direct successors are `[fallthrough, jump]`. Depending on how
/// many of them are regular edges the result is a jump-only `if`, an
/// `if-then` (negated when the then-branch is the fallthrough), or an
/// `if-else` converging on the choice post.
pub struct IfMatcher;

impl ShapeMatcher for IfMatcher {
    fn name(&self) -> &'static str {
        "if"
    }

    fn detect(&self, tree: &mut StatTree, head: StatId) -> Result<Option<StatId>, StructurizeError> {
        let stat = tree.stat(head);
        if !stat.is_basic_block() || stat.last_basic != LastBasic::If {
            return Ok(None);
        }
        if tree.succ_edges(head, EdgeMask::DIRECT_ALL).len() < 2 {
            return Ok(None);
        }

        let regular = tree.succ_edges(head, EdgeMask::REGULAR).len();
        let mut choice_post = None;
        if regular >= 2 {
            let Some(choice) = choice_cluster(tree, head) else {
                return Ok(None);
            };
            if choice.members.iter().any(|&m| tree.stat(m).monitor_enter) {
                return Ok(None);
            }
            let mut group = vec![head];
            group.extend(&choice.members);
            if !check_statement_exceptions(tree, &group) {
                return Ok(None);
            }
            choice_post = choice.post;
        }
        Ok(Some(build_if(tree, head, regular, choice_post)))
    }
}

fn build_if(tree: &mut StatTree, head: StatId, regular: usize, choice_post: Option<StatId>) -> StatId {
    let succs = tree.succ_edges(head, EdgeMask::DIRECT_ALL);
    let dest = |tree: &StatTree, i: usize| tree.edge(succs[i]).dest;

    let mut if_stat = None;
    let mut else_stat = None;
    let mut post = None;
    let mut negated = false;
    let mut regedges = regular.min(2);

    match regedges {
        0 => {}
        1 => {
            if tree.edge(succs[1]).kind != EdgeKind::Regular {
                post = Some(dest(tree, 0));
            } else {
                post = Some(dest(tree, 1));
                negated = true;
            }
        }
        _ => {
            let else_target = dest(tree, 0);
            let if_target = dest(tree, 1);
            let if_succs = tree.successors(if_target, EdgeMask::REGULAR);
            let else_succs = tree.successors(else_target, EdgeMask::REGULAR);

            if tree.pred_edges(if_target, EdgeMask::REGULAR).len() > 1 || if_succs.len() > 1 {
                post = Some(if_target);
            } else if tree.pred_edges(else_target, EdgeMask::REGULAR).len() > 1 || else_succs.len() > 1 {
                post = Some(else_target);
            } else if if_succs.is_empty() {
                post = Some(else_target);
            } else if else_succs.is_empty() {
                post = Some(if_target);
            }

            if post == Some(if_target) {
                if post != Some(else_target) {
                    if_stat = Some(else_target);
                    negated = true;
                }
            } else if post == Some(else_target) {
                if_stat = Some(if_target);
            } else {
                if_stat = Some(if_target);
                else_stat = Some(else_target);
                post = choice_post;
            }
            if else_stat.is_none() {
                regedges = 1;
            }
        }
    }

    let if_edge = succs[if negated { 0 } else { 1 }];
    let else_edge = (regedges == 2).then(|| succs[if negated { 1 } else { 0 }]);

    let mut children = vec![head];
    children.extend(if_stat);
    children.extend(else_stat);
    let shape = IfShape {
        if_stat,
        else_stat,
        if_edge: Some(if_edge),
        else_edge,
        negated,
    };
    let stat = tree.new_compound(StatKind::If(shape), head, children, None);

    // Without an else branch the remaining exit belongs to the `if` itself.
    if regedges < 2 {
        let moved = match regedges {
            0 => succs[0],
            _ => succs[if negated { 1 } else { 0 }],
        };
        tree.redirect_source(moved, stat);
    }

    tree.stat_mut(stat).post = if post == Some(head) { Some(stat) } else { post };
    trace!(
        "if at {head}: then={if_stat:?} else={else_stat:?} negated={negated} post={:?}",
        tree.stat(stat).post
    );
    stat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Insn;
    use crate::model::Edge;
    use crate::patterns::test_util::{cond, flat, plain};

    fn detect_and_collapse(tree: &mut StatTree, container: StatId, head: StatId) -> StatId {
        let stat = IfMatcher
            .detect(tree, head)
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("Expected an if at {head}"));
        tree.collapse_nodes_to_statement(container, stat);
        stat
    }

    #[test]
    fn diamond_becomes_if_else() {
        // 0 -> {1, 2} -> 3
        let (mut tree, container, s) = flat(
            vec![cond("c"), plain("b"), plain("c"), plain("d")],
            &[(0, 1), (0, 2), (1, 3), (2, 3)],
        );
        let stat = detect_and_collapse(&mut tree, container, s[0]);

        match tree.kind(stat) {
            StatKind::If(shape) => {
                assert_eq!(shape.if_stat, Some(s[2]));
                assert_eq!(shape.else_stat, Some(s[1]));
                assert!(!shape.negated);
            }
            other => panic!("Expected If, got {other:?}"),
        }
        assert_eq!(tree.successors(stat, EdgeMask::REGULAR), vec![s[3]]);
        // arms now leave the if through breaks
        assert_eq!(tree.successors(s[1], EdgeMask::BREAK), vec![s[3]]);
        assert_eq!(tree.successors(s[2], EdgeMask::BREAK), vec![s[3]]);
    }

    #[test]
    fn fallthrough_arm_becomes_negated_then() {
        // 0 -> {1, 2}, 1 -> 2: jump target 2 is the post
        let (mut tree, container, s) = flat(
            vec![cond("c"), plain("b"), plain("d")],
            &[(0, 1), (0, 2), (1, 2)],
        );
        let stat = detect_and_collapse(&mut tree, container, s[0]);

        match tree.kind(stat) {
            StatKind::If(shape) => {
                assert_eq!(shape.if_stat, Some(s[1]));
                assert_eq!(shape.else_stat, None);
                assert!(shape.negated);
            }
            other => panic!("Expected If, got {other:?}"),
        }
        assert_eq!(tree.successors(stat, EdgeMask::REGULAR), vec![s[2]]);
        assert_eq!(tree.succ_edges(stat, EdgeMask::REGULAR).len(), 1);
    }

    #[test]
    fn jump_only_if_keeps_its_break() {
        // 0: if (c) break; else -> 1
        let (mut tree, container, s) = flat(vec![cond("c"), plain("b")], &[(0, 1)]);
        let exit = tree.dummy_exit();
        let brk = tree.add_edge(Edge::new(EdgeKind::Break, s[0], exit, Some(container)));
        let stat = detect_and_collapse(&mut tree, container, s[0]);

        match tree.kind(stat) {
            StatKind::If(shape) => {
                assert_eq!(shape.if_stat, None);
                assert_eq!(shape.if_edge, Some(brk));
                assert!(!shape.negated);
            }
            other => panic!("Expected If, got {other:?}"),
        }
        assert_eq!(tree.edge(brk).source, s[0]);
        assert_eq!(tree.successors(stat, EdgeMask::REGULAR), vec![s[1]]);
    }

    #[test]
    fn plain_block_is_not_an_if() {
        let (mut tree, _, s) = flat(vec![vec![Insn::plain("x")], plain("b")], &[(0, 1)]);
        assert!(IfMatcher
            .detect(&mut tree, s[0])
            .unwrap_or_else(|e| panic!("{e}"))
            .is_none());
    }
}
