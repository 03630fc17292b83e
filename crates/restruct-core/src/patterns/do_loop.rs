use log::trace;

use crate::error::StructurizeError;
use crate::model::{EdgeKind, LastBasic, LoopKind, StatId, StatKind, StatTree};

use super::ShapeMatcher;

/// An infinite loop around a single node: either a regular self edge, or a
/// node with no regular exit that continues to its own basic head.
pub struct DoLoopMatcher;

impl ShapeMatcher for DoLoopMatcher {
    fn name(&self) -> &'static str {
        "loop"
    }

    fn detect(&self, tree: &mut StatTree, head: StatId) -> Result<Option<StatId>, StructurizeError> {
        let stat = tree.stat(head);
        if stat.last_basic != LastBasic::General || stat.monitor_enter {
            return Ok(None);
        }
        let edge = tree.first_direct_succ(head).map(|e| tree.edge(e));

        let self_edge = edge.is_some_and(|e| e.kind == EdgeKind::Regular && e.dest == head);
        let continues_to_self = !matches!(stat.kind, StatKind::Loop { .. })
            && edge.is_none_or(|e| e.kind != EdgeKind::Regular)
            && stat.continue_set.contains(&tree.basic_head(head));

        if !(self_edge || continues_to_self) {
            return Ok(None);
        }
        trace!("loop around {head}");
        let looped = tree.new_compound(
            StatKind::Loop {
                kind: LoopKind::Infinite,
            },
            head,
            vec![head],
            None,
        );
        Ok(Some(looped))
    }
}
