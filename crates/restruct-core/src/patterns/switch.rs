use log::trace;

use crate::error::StructurizeError;
use crate::exceptions::check_statement_exceptions;
use crate::graph::InsnKind;
use crate::model::{Edge, EdgeKind, EdgeMask, LastBasic, StatId, StatKind, StatTree, SwitchShape};

use super::{choice_cluster, ShapeMatcher};

/// A basic block ending in a multi-way dispatch whose targets form a choice
/// cluster.
pub struct SwitchMatcher;

impl ShapeMatcher for SwitchMatcher {
    fn name(&self) -> &'static str {
        "switch"
    }

    fn detect(&self, tree: &mut StatTree, head: StatId) -> Result<Option<StatId>, StructurizeError> {
        let stat = tree.stat(head);
        if !stat.is_basic_block() || stat.last_basic != LastBasic::Switch {
            return Ok(None);
        }
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

        let default_edge = tree.first_direct_succ(head);
        let mut children = vec![head];
        children.extend(
            tree.successors(head, EdgeMask::REGULAR)
                .into_iter()
                .filter(|&s| Some(s) != choice.post),
        );
        trace!("switch at {head} over {} arm(s)", children.len() - 1);
        let shape = SwitchShape {
            default_edge,
            ..SwitchShape::default()
        };
        Ok(Some(tree.new_compound(StatKind::Switch(shape), head, children, choice.post)))
    }

    fn after_collapse(&self, tree: &mut StatTree, stat: StatId) -> Result<(), StructurizeError> {
        sort_edges_and_nodes(tree, stat)
    }
}

/// Build the case table of a collapsed switch.
///
/// Cases are ordered by the lowest successor index reaching them, with the
/// default sorted last. A case entered from another case is moved right
/// behind it so the fallthrough survives. Targets outside the switch get an
/// empty case block that jumps there.
pub fn sort_edges_and_nodes(tree: &mut StatTree, stat: StatId) -> Result<(), StructurizeError> {
    let first = tree.first_of(stat);
    let succs = tree.succ_edges(first, EdgeMask::DIRECT_ALL);
    let count = succs.len();
    let rank = |e| {
        let pos = succs.iter().position(|&s| s == e).unwrap_or(count);
        if pos == 0 {
            count
        } else {
            pos
        }
    };

    let values = match tree.stat(first).exprents().and_then(|i| i.last()).map(|i| &i.kind) {
        Some(InsnKind::Switch { values }) => values.clone(),
        _ => return Err(StructurizeError::inconsistent(stat, "switch head does not end in a switch")),
    };

    let mut nodes: Vec<Option<StatId>> = Vec::new();
    let mut edges: Vec<Vec<usize>> = Vec::new();
    for &case in tree.children(stat).iter().skip(1) {
        let mut ranks: Vec<usize> = tree
            .pred_edges(case, EdgeMask::REGULAR)
            .into_iter()
            .filter(|&e| tree.edge(e).source == first)
            .map(rank)
            .collect();
        ranks.sort_unstable();
        nodes.push(Some(case));
        edges.push(ranks);
    }

    // Jumps out of the switch, grouped by destination and kind.
    let mut exits = tree.succ_edges(first, EdgeMask::BREAK | EdgeMask::CONTINUE);
    loop {
        let Some(&sample) = exits.first() else {
            break;
        };
        let (dest, kind) = (tree.edge(sample).dest, tree.edge(sample).kind);
        let (same, rest): (Vec<_>, Vec<_>) = exits
            .into_iter()
            .partition(|&e| tree.edge(e).dest == dest && tree.edge(e).kind == kind);
        let mut ranks: Vec<usize> = same.into_iter().map(rank).collect();
        ranks.sort_unstable();
        nodes.push(None);
        edges.push(ranks);
        exits = rest;
    }

    let key = |r: &Vec<usize>| r.first().copied().unwrap_or(usize::MAX);
    for i in 0..edges.len().saturating_sub(1) {
        for j in (i + 1..edges.len()).rev() {
            if key(&edges[j - 1]) > key(&edges[j]) {
                edges.swap(j - 1, j);
                nodes.swap(j - 1, j);
            }
        }
    }

    // Keep each case right after the case falling into it.
    let mut index = 0;
    while index < nodes.len() {
        let Some(case) = nodes[index] else {
            index += 1;
            continue;
        };
        let pred = tree
            .predecessors(case, EdgeMask::REGULAR)
            .into_iter()
            .find(|&p| p != first);
        let target = pred.and_then(|p| {
            (0..nodes.len()).find(|&j| j + 1 != index && nodes[j] == Some(p))
        });
        match target {
            Some(j) if j > index => {
                nodes.insert(j + 1, Some(case));
                edges.insert(j + 1, edges[index].clone());
                nodes.remove(index);
                edges.remove(index);
            }
            Some(j) => {
                nodes.insert(j + 1, Some(case));
                edges.insert(j + 1, edges[index].clone());
                nodes.remove(index + 1);
                edges.remove(index + 1);
                index += 1;
            }
            None => index += 1,
        }
    }

    let mut case_edges = Vec::with_capacity(edges.len());
    let mut case_values = Vec::with_capacity(edges.len());
    for ranks in &edges {
        let mut list = Vec::with_capacity(ranks.len());
        let mut vals = Vec::with_capacity(ranks.len());
        for &r in ranks {
            let idx = if r == count { 0 } else { r };
            let Some(&edge) = succs.get(idx) else {
                return Err(StructurizeError::inconsistent(stat, "switch case edge out of range"));
            };
            list.push(edge);
            vals.push(if idx == 0 { None } else { values.get(idx - 1).copied() });
        }
        case_edges.push(list);
        case_values.push(vals);
    }

    let mut cases = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.into_iter().enumerate() {
        let case = match node {
            Some(case) => case,
            None => {
                let Some(&sample) = case_edges[i].first() else {
                    return Err(StructurizeError::inconsistent(stat, "switch exit group without edges"));
                };
                let (kind, dest, closure) = {
                    let e = tree.edge(sample);
                    (e.kind, e.dest, e.closure)
                };
                let block = tree.new_basic_block(None, Vec::new());
                tree.add_edge(Edge::new(kind, block, dest, closure));
                for &e in &case_edges[i] {
                    tree.set_edge_kind(e, EdgeKind::Regular);
                    tree.set_closure(e, None);
                    tree.redirect_dest(e, block);
                }
                tree.stat_mut(stat).stats.push(block);
                tree.stat_mut(block).parent = Some(stat);
                block
            }
        };
        cases.push(case);
    }

    let default_edge = succs.first().copied();
    if let StatKind::Switch(shape) = &mut tree.stat_mut(stat).kind {
        shape.default_edge = default_edge;
        shape.cases = cases;
        shape.case_edges = case_edges;
        shape.case_values = case_values;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Insn;
    use crate::patterns::test_util::{flat, plain};

    #[test]
    fn cases_follow_successor_order_with_default_last() {
        // switch k { default -> 1, 1 -> 2, 2 -> 3 }, all arms -> 4
        let (mut tree, container, s) = flat(
            vec![
                vec![Insn::switch("k", vec![1, 2])],
                plain("d"),
                plain("one"),
                plain("two"),
                plain("after"),
            ],
            &[(0, 1), (0, 2), (0, 3), (1, 4), (2, 4), (3, 4)],
        );
        let sw = SwitchMatcher
            .detect(&mut tree, s[0])
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("Expected a switch"));
        tree.collapse_nodes_to_statement(container, sw);
        SwitchMatcher
            .after_collapse(&mut tree, sw)
            .unwrap_or_else(|e| panic!("{e}"));

        match tree.kind(sw) {
            StatKind::Switch(shape) => {
                assert_eq!(shape.cases, vec![s[2], s[3], s[1]]);
                assert_eq!(shape.case_values, vec![vec![Some(1)], vec![Some(2)], vec![None]]);
            }
            other => panic!("Expected Switch, got {other:?}"),
        }
        assert_eq!(tree.successors(sw, EdgeMask::REGULAR), vec![s[4]]);
    }

    #[test]
    fn jump_straight_to_post_gets_empty_case() {
        // default -> 3 (the post), 7 -> 1, 8 -> 2, both arms -> 3
        let (mut tree, container, s) = flat(
            vec![
                vec![Insn::switch("k", vec![7, 8])],
                plain("seven"),
                plain("eight"),
                plain("after"),
            ],
            &[(0, 3), (0, 1), (0, 2), (1, 3), (2, 3)],
        );
        let sw = SwitchMatcher
            .detect(&mut tree, s[0])
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("Expected a switch"));
        tree.collapse_nodes_to_statement(container, sw);
        SwitchMatcher
            .after_collapse(&mut tree, sw)
            .unwrap_or_else(|e| panic!("{e}"));

        let StatKind::Switch(shape) = tree.kind(sw).clone() else {
            panic!("Expected Switch, got {:?}", tree.kind(sw));
        };
        assert_eq!(&shape.cases[..2], &[s[1], s[2]]);
        let empty = shape.cases[2];
        assert!(tree.stat(empty).is_empty_block());
        assert_eq!(tree.successors(empty, EdgeMask::BREAK), vec![s[3]]);
        assert_eq!(shape.case_values, vec![vec![Some(7)], vec![Some(8)], vec![None]]);
        assert_eq!(tree.parent(empty), Some(sw));
        assert_eq!(tree.successors(s[0], EdgeMask::REGULAR), vec![empty, s[1], s[2]]);
    }
}
