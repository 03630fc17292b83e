//! Exception-handler consistency checks for candidate node groups.

use std::collections::BTreeSet;

use crate::model::{EdgeKind, EdgeMask, StatId, StatTree};

fn handlers_of(tree: &StatTree, stat: StatId) -> BTreeSet<StatId> {
    tree.successors(stat, EdgeMask::EXCEPTION).into_iter().collect()
}

/// Check that an ordered group `[head, rest...]` can become one statement.
///
/// Handlers protecting only part of the group must themselves be members
/// whose every protected node is also a member. No member other than the
/// head may be entered by an exception edge unless it is such a handler.
pub fn check_statement_exceptions(tree: &StatTree, group: &[StatId]) -> bool {
    let all: BTreeSet<StatId> = group.iter().copied().collect();
    let mut partial: BTreeSet<StatId> = BTreeSet::new();
    let mut common: Option<BTreeSet<StatId>> = None;

    for &stat in group {
        let handlers = handlers_of(tree, stat);
        common = Some(match common {
            None => handlers,
            Some(shared) => {
                partial.extend(shared.difference(&handlers).copied());
                partial.extend(handlers.difference(&shared).copied());
                shared.intersection(&handlers).copied().collect()
            }
        });
    }

    for &handler in &partial {
        if !all.contains(&handler) {
            return false;
        }
        let protected = tree.predecessors(handler, EdgeMask::EXCEPTION);
        if !protected.iter().all(|p| all.contains(p)) {
            return false;
        }
    }

    group.iter().skip(1).all(|&stat| {
        tree.pred_edges(stat, EdgeKind::Exception.into()).is_empty() || partial.contains(&stat)
    })
}

/// Admissibility of an unordered region rooted at `head`.
///
/// Every handler reached from the region but lying outside it must protect
/// all members, and only `head` may be entered by an exception edge coming
/// from outside the region.
pub fn check_region(tree: &StatTree, head: StatId, nodes: &BTreeSet<StatId>) -> bool {
    for &node in nodes {
        for handler in tree.successors(node, EdgeMask::EXCEPTION) {
            if nodes.contains(&handler) {
                continue;
            }
            let protected = tree.predecessors(handler, EdgeMask::EXCEPTION);
            if !nodes.iter().all(|n| protected.contains(n)) {
                return false;
            }
        }
    }

    nodes.iter().filter(|&&n| n != head).all(|&node| {
        tree.predecessors(node, EdgeMask::EXCEPTION)
            .iter()
            .all(|p| nodes.contains(p))
    })
}

/// Every monitor-enter member must flow, by a single regular edge, to
/// another member.
pub fn check_monitor_completeness(tree: &StatTree, nodes: &BTreeSet<StatId>) -> bool {
    nodes.iter().all(|&node| {
        if !tree.stat(node).monitor_enter {
            return true;
        }
        let succs = tree.succ_edges(node, EdgeMask::DIRECT_ALL);
        match succs.as_slice() {
            [only] => {
                let edge = tree.edge(*only);
                edge.kind == EdgeKind::Regular && nodes.contains(&edge.dest)
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Insn;
    use crate::model::{Edge, StatKind};

    struct Arms {
        tree: StatTree,
        head: StatId,
        arms: Vec<StatId>,
        handler: StatId,
    }

    /// `head` dispatching to three arms, each protected by `handler`.
    fn three_arms() -> Arms {
        let mut tree = StatTree::new();
        let head = tree.new_basic_block(None, vec![Insn::switch("k", vec![1, 2])]);
        let arms: Vec<StatId> = (0..3)
            .map(|i| tree.new_basic_block(None, vec![Insn::plain(format!("arm{i}"))]))
            .collect();
        let handler = tree.new_basic_block(None, vec![Insn::throw("e")]);
        let mut children = vec![head];
        children.extend(&arms);
        children.push(handler);
        let container = tree.new_compound(StatKind::Region { resolved: false }, head, children, None);
        tree.set_all_parent(container);
        for &arm in &arms {
            tree.add_edge(Edge::regular(head, arm));
            tree.add_edge(Edge::exception(arm, handler, Some(vec!["E".into()])));
        }
        Arms {
            tree,
            head,
            arms,
            handler,
        }
    }

    #[test]
    fn shared_handler_on_every_arm_is_admitted() {
        let fx = three_arms();
        assert!(check_statement_exceptions(&fx.tree, &fx.arms));
        let set: BTreeSet<StatId> = fx.arms.iter().copied().collect();
        assert!(check_region(&fx.tree, fx.arms[0], &set));
    }

    #[test]
    fn handler_missing_from_one_arm_is_rejected() {
        let mut fx = three_arms();
        let edge = fx.tree.succ_edges(fx.arms[2], EdgeMask::EXCEPTION)[0];
        fx.tree.remove_edge(edge);

        assert!(!check_statement_exceptions(&fx.tree, &fx.arms));
        let set: BTreeSet<StatId> = fx.arms.iter().copied().collect();
        assert!(!check_region(&fx.tree, fx.arms[0], &set));
    }

    #[test]
    fn handler_inside_group_protecting_only_members_is_admitted() {
        let fx = three_arms();
        let mut group = fx.arms.clone();
        group.push(fx.handler);
        // The handler is unprotected itself, so it partially covers the group.
        assert!(check_statement_exceptions(&fx.tree, &group));
        // Adding the head leaves the handler protecting a strict subset.
        let mut with_head = vec![fx.head];
        with_head.extend(&fx.arms);
        assert!(!check_statement_exceptions(&fx.tree, &with_head));
    }

    #[test]
    fn only_head_may_be_entered_by_exception() {
        let fx = three_arms();
        let set: BTreeSet<StatId> = [fx.arms[0], fx.handler].into_iter().collect();
        // handler is entered from arms 1 and 2, outside the set
        assert!(!check_region(&fx.tree, fx.arms[0], &set));
        assert!(check_region(&fx.tree, fx.handler, &[fx.handler].into_iter().collect()));
    }

    #[test]
    fn monitor_enter_must_flow_inside() {
        let mut tree = StatTree::new();
        let enter = tree.new_basic_block(None, vec![Insn::monitor_enter("lock")]);
        let body = tree.new_basic_block(None, vec![Insn::plain("x")]);
        tree.add_edge(Edge::regular(enter, body));
        tree.build_monitor_flags(enter);

        let both: BTreeSet<StatId> = [enter, body].into_iter().collect();
        let alone: BTreeSet<StatId> = [enter].into_iter().collect();
        assert!(check_monitor_completeness(&tree, &both));
        assert!(!check_monitor_completeness(&tree, &alone));
    }
}
