use std::collections::BTreeSet;

use log::trace;

use crate::error::StructurizeError;
use crate::exceptions::check_statement_exceptions;
use crate::model::{EdgeKind, EdgeMask, LastBasic, StatId, StatKind, StatTree};

use super::ShapeMatcher;

/// Handlers of `head` that nothing but `head` enters.
fn unique_handlers(tree: &StatTree, head: StatId) -> BTreeSet<StatId> {
    tree.successors(head, EdgeMask::EXCEPTION)
        .into_iter()
        .filter(|&h| {
            tree.pred_edges(h, EdgeMask::EXCEPTION).len() == 1
                && tree
                    .pred_edges(h, EdgeMask::ALL)
                    .iter()
                    .all(|&e| tree.edge(e).source == head)
        })
        .collect()
}

/// The regular continuation of `stat`, if its first direct edge is one.
fn regular_next(tree: &StatTree, stat: StatId) -> Option<StatId> {
    tree.first_direct_succ(stat)
        .map(|e| tree.edge(e))
        .filter(|e| e.kind == EdgeKind::Regular)
        .map(|e| e.dest)
}

/// A protected node with typed handlers that all continue at the same place.
pub struct CatchMatcher;

impl ShapeMatcher for CatchMatcher {
    fn name(&self) -> &'static str {
        "try-catch"
    }

    fn detect(&self, tree: &mut StatTree, head: StatId) -> Result<Option<StatId>, StructurizeError> {
        if tree.stat(head).last_basic != LastBasic::General {
            return Ok(None);
        }
        let mut handlers = unique_handlers(tree, head);
        if handlers.is_empty() {
            return Ok(None);
        }

        // Either nothing flows on to `next`, or at least two statements do.
        let mut next = regular_next(tree, head);
        let mut next_count = if next.is_some() { 2 } else { 0 };

        for e in tree.succ_edges(head, EdgeMask::EXCEPTION) {
            let edge = tree.edge(e);
            let handler = edge.dest;
            let mut ok = edge.exceptions.is_some() && handlers.contains(&handler);
            if ok {
                if tree.stat(handler).last_basic != LastBasic::General {
                    ok = false;
                } else if let Some(after) = regular_next(tree, handler) {
                    match next {
                        None => next = Some(after),
                        Some(n) if n != after => ok = false,
                        Some(_) => {}
                    }
                    if ok {
                        next_count += 1;
                    }
                }
            }
            if !ok {
                handlers.remove(&handler);
            }
        }
        if next_count == 1 || handlers.is_empty() {
            return Ok(None);
        }

        let mut group = vec![head];
        let mut types = Vec::new();
        for e in tree.succ_edges(head, EdgeMask::EXCEPTION) {
            let edge = tree.edge(e);
            if handlers.contains(&edge.dest) && !group.contains(&edge.dest) {
                group.push(edge.dest);
                types.push(edge.exceptions.clone().unwrap_or_default());
            }
        }
        if group.iter().any(|&s| tree.stat(s).monitor_enter) || !check_statement_exceptions(tree, &group) {
            return Ok(None);
        }

        trace!("try at {head} with {} handler(s)", group.len() - 1);
        let stat = tree.new_compound(
            StatKind::TryCatch {
                exception_types: types,
            },
            head,
            group,
            next,
        );
        Ok(Some(stat))
    }
}

/// A protected node with a single untyped handler that does not flow on.
pub struct CatchAllMatcher;

impl ShapeMatcher for CatchAllMatcher {
    fn name(&self) -> &'static str {
        "catch-all"
    }

    fn detect(&self, tree: &mut StatTree, head: StatId) -> Result<Option<StatId>, StructurizeError> {
        if tree.stat(head).last_basic != LastBasic::General {
            return Ok(None);
        }
        let handlers = unique_handlers(tree, head);
        if handlers.len() != 1 {
            return Ok(None);
        }

        for e in tree.succ_edges(head, EdgeMask::EXCEPTION) {
            let edge = tree.edge(e);
            let handler = edge.dest;
            if edge.exceptions.is_some()
                || tree.stat(handler).last_basic != LastBasic::General
                || !handlers.contains(&handler)
            {
                continue;
            }
            if regular_next(tree, handler).is_some() {
                continue;
            }
            if tree.stat(head).monitor_enter || tree.stat(handler).monitor_enter {
                return Ok(None);
            }
            if !check_statement_exceptions(tree, &[head, handler]) {
                continue;
            }
            let post = regular_next(tree, head);
            trace!("catch-all at {head}, handler {handler}");
            let stat = tree.new_compound(
                StatKind::CatchAll {
                    handler,
                    is_finally: false,
                },
                head,
                vec![head, handler],
                post,
            );
            return Ok(Some(stat));
        }
        Ok(None)
    }
}
