use crate::error::StructurizeError;
use crate::exceptions::check_statement_exceptions;
use crate::model::{EdgeKind, EdgeMask, LastBasic, StatId, StatKind, StatTree};

use super::ShapeMatcher;

/// Two nodes where the first falls into the second and nothing else does.
pub struct SequenceMatcher;

impl ShapeMatcher for SequenceMatcher {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn detect(&self, tree: &mut StatTree, head: StatId) -> Result<Option<StatId>, StructurizeError> {
        if tree.stat(head).last_basic != LastBasic::General {
            return Ok(None);
        }
        let Some(edge) = tree.first_direct_succ(head).map(|e| tree.edge(e)) else {
            return Ok(None);
        };
        if edge.kind != EdgeKind::Regular {
            return Ok(None);
        }
        let tail = edge.dest;
        let tail_stat = tree.stat(tail);
        if tail == head
            || tree.pred_edges(tail, EdgeMask::REGULAR).len() != 1
            || tail_stat.monitor_enter
            || tail_stat.last_basic != LastBasic::General
        {
            return Ok(None);
        }
        if !check_statement_exceptions(tree, &[head, tail]) {
            return Ok(None);
        }

        let post = tree
            .first_direct_succ(tail)
            .map(|e| tree.edge(e))
            .filter(|e| e.kind == EdgeKind::Regular && e.dest != head)
            .map(|e| e.dest);
        Ok(Some(tree.new_compound(StatKind::Sequence, head, vec![head, tail], post)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_util::{cond, flat, plain};

    #[test]
    fn chain_collapses_pairwise() {
        let (mut tree, container, s) = flat(vec![plain("a"), plain("b"), plain("c")], &[(0, 1), (1, 2)]);
        let seq = SequenceMatcher
            .detect(&mut tree, s[0])
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("Expected a sequence"));
        tree.collapse_nodes_to_statement(container, seq);

        assert_eq!(tree.children(seq), &[s[0], s[1]]);
        assert_eq!(tree.stat(seq).post, Some(s[2]));
        assert_eq!(tree.successors(seq, EdgeMask::REGULAR), vec![s[2]]);
        assert_eq!(tree.successors(s[1], EdgeMask::BREAK), vec![s[2]]);
    }

    #[test]
    fn join_point_is_not_absorbed() {
        // 0 -> 2, 1 -> 2: 2 has two entries
        let (mut tree, _, s) = flat(vec![plain("a"), plain("b"), plain("c")], &[(0, 2), (1, 2)]);
        assert!(SequenceMatcher
            .detect(&mut tree, s[0])
            .unwrap_or_else(|e| panic!("{e}"))
            .is_none());
    }

    #[test]
    fn conditional_tail_is_not_absorbed() {
        let (mut tree, _, s) = flat(vec![plain("a"), cond("c"), plain("d")], &[(0, 1), (1, 2)]);
        assert!(SequenceMatcher
            .detect(&mut tree, s[0])
            .unwrap_or_else(|e| panic!("{e}"))
            .is_none());
    }
}
