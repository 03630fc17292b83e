//! Region detection.
//!
//! A container is reduced by alternating two scans until one statement is
//! left: the local pattern scan collapses shapes recognized by the
//! [`ShapeMatcher`]s, and the region scan collapses single-entry regions
//! bounded by a postdominator into a nested [`StatKind::Region`] that is then
//! structured recursively. When neither makes progress the container is
//! checked for irreducible flow and, within budget, a node is split.

use std::collections::{BTreeSet, VecDeque};

use log::{debug, trace, warn};

use crate::error::StructurizeError;
use crate::exceptions::{check_monitor_completeness, check_region};
use crate::irreducible::{IrreducibilityHandler, NodeSplitter};
use crate::model::{EdgeMask, LoopKind, StatId, StatKind, StatTree};
use crate::order::{post_reverse_post_order, SiblingGraph};
use crate::patterns::{default_matchers, ShapeMatcher};
use crate::postdom::{
    calc_postdominators, rpo_rank, sort_posts, DominanceFilteredPostdominance, ExtPostdomCache,
    ExtendedPostdominance,
};

/// Default number of node splits tried before a container is given up on.
pub const DEFAULT_SPLIT_BUDGET: usize = 5;

/// Drives the collapse of a statement tree into nested statements.
pub struct RegionDetector {
    matchers: Vec<Box<dyn ShapeMatcher>>,
    ext_postdom: Box<dyn ExtendedPostdominance + Send + Sync>,
    irreducible: Box<dyn IrreducibilityHandler>,
    split_budget: usize,
    forced_pass: bool,
}

impl Default for RegionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SPLIT_BUDGET)
    }
}

/// Splits still allowed for the whole run.
struct SplitAllowance {
    left: usize,
}

impl RegionDetector {
    pub fn new(split_budget: usize) -> Self {
        Self {
            matchers: default_matchers(),
            ext_postdom: Box::new(DominanceFilteredPostdominance),
            irreducible: Box::new(NodeSplitter),
            split_budget,
            forced_pass: true,
        }
    }

    pub fn with_matchers(mut self, matchers: Vec<Box<dyn ShapeMatcher>>) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn with_extended_postdominance(
        mut self,
        ext_postdom: Box<dyn ExtendedPostdominance + Send + Sync>,
    ) -> Self {
        self.ext_postdom = ext_postdom;
        self
    }

    pub fn with_irreducibility_handler(mut self, handler: Box<dyn IrreducibilityHandler>) -> Self {
        self.irreducible = handler;
        self
    }

    /// Whether the region scan may fall back to extended postdominance.
    pub fn with_forced_pass(mut self, enabled: bool) -> Self {
        self.forced_pass = enabled;
        self
    }

    /// Collapse the region under the root into a single statement.
    ///
    /// On success the root's only child is the structured body. Fails with
    /// [`StructurizeError::StructuringFailure`] when some container cannot
    /// be reduced within the split budget.
    pub fn run(&self, tree: &mut StatTree) -> Result<(), StructurizeError> {
        let root = tree.root();
        let body = tree.first_of(root);
        if body == root || !matches!(tree.kind(body), StatKind::Region { .. }) {
            return Ok(());
        }

        let leaves = tree.children(body).len().max(1);
        let mut allowance = SplitAllowance {
            left: self.split_budget.saturating_mul(leaves),
        };
        let mut cache = ExtPostdomCache::default();
        if !self.process(tree, body, &mut cache, &mut allowance)? {
            warn!("{body}: region detection made no progress");
            return Err(StructurizeError::failure(body, "region detection made no progress"));
        }
        let inner = splice_resolved(tree, root, body);
        debug!("structured body is {inner} ({})", tree.kind(inner).name());
        Ok(())
    }

    /// Reduce `container` to a single child. Returns `false` when no further
    /// progress is possible.
    fn process(
        &self,
        tree: &mut StatTree,
        container: StatId,
        cache: &mut ExtPostdomCache,
        allowance: &mut SplitAllowance,
    ) -> Result<bool, StructurizeError> {
        let mut refreshed = cache.is_empty();
        let passes: &[bool] = if self.forced_pass { &[false, true] } else { &[false] };

        for mapstage in 0..2 {
            let mut reducibility = 0;
            while reducibility <= self.split_budget {
                if reducibility > 0 {
                    if self.irreducible.is_irreducible(tree, container) {
                        if allowance.left == 0 {
                            return Err(StructurizeError::failure(container, "node split limit reached"));
                        }
                        if !self.irreducible.split(tree, container) {
                            return Err(StructurizeError::failure(
                                container,
                                "irreducible flow and no node can be split",
                            ));
                        }
                        allowance.left -= 1;
                        cache.invalidate();
                        refreshed = true;
                    } else {
                        if mapstage == 1 || refreshed {
                            return Err(StructurizeError::failure(
                                container,
                                "flow is reducible but cannot be decomposed",
                            ));
                        }
                        break;
                    }
                }

                for &forced in passes {
                    loop {
                        if self.find_simple_statements(tree, container, cache)? {
                            reducibility = 0;
                        }
                        if matches!(tree.kind(container), StatKind::Region { resolved: true }) {
                            return Ok(true);
                        }

                        let Some(region) = self.find_general_statement(tree, container, forced, cache) else {
                            break;
                        };
                        let complete = if tree.first_of(container) == region {
                            self.process(tree, region, cache, allowance)?
                        } else {
                            self.process(tree, region, &mut ExtPostdomCache::default(), allowance)?
                        };
                        if !complete {
                            return Ok(false);
                        }
                        splice_resolved(tree, container, region);
                        cache.invalidate();
                        refreshed = true;
                        reducibility = 0;
                    }
                }
                reducibility += 1;
            }

            if refreshed {
                break;
            }
            cache.invalidate();
        }
        Ok(false)
    }

    /// Collapse recognized shapes until none is left. Returns whether
    /// anything collapsed.
    fn find_simple_statements(
        &self,
        tree: &mut StatTree,
        container: StatId,
        cache: &mut ExtPostdomCache,
    ) -> Result<bool, StructurizeError> {
        let mut success = false;
        'scan: loop {
            for head in post_reverse_post_order(tree, container) {
                for matcher in &self.matchers {
                    let Some(stat) = matcher.detect(tree, head)? else {
                        continue;
                    };
                    let old = tree.children(stat).to_vec();
                    let whole = tree.first_of(stat) == tree.first_of(container)
                        && old.len() == tree.children(container).len();
                    if whole {
                        if let StatKind::Region { resolved } = &mut tree.stat_mut(container).kind {
                            *resolved = true;
                        }
                    }
                    tree.collapse_nodes_to_statement(container, stat);
                    matcher.after_collapse(tree, stat)?;
                    cache.patch_collapse(&old, stat);
                    trace!(
                        "{}: collapsed {} node(s) at {head} into {stat}",
                        matcher.name(),
                        old.len()
                    );
                    success = true;
                    continue 'scan;
                }
            }
            return Ok(success);
        }
    }

    /// Find and collapse one single-entry region bounded by a postdominator
    /// of its head.
    fn find_general_statement(
        &self,
        tree: &mut StatTree,
        container: StatId,
        forced: bool,
        cache: &mut ExtPostdomCache,
    ) -> Option<StatId> {
        if cache.is_empty() {
            cache.refresh(self.ext_postdom.compute(tree, container));
        }

        let candidates: Vec<(StatId, Vec<StatId>)> = if forced {
            let flow = SiblingGraph::new(tree, container, EdgeMask::REGULAR | EdgeMask::EXCEPTION);
            let rank = rpo_rank(&flow);
            post_reverse_post_order(tree, container)
                .into_iter()
                .filter_map(|n| cache.get(n).map(|posts| (n, sort_posts(posts, n, &rank))))
                .collect()
        } else {
            calc_postdominators(tree, container).entries
        };

        let children = tree.children(container).to_vec();
        for (head, posts) in candidates {
            let ext = cache.get(head).cloned();
            if ext.is_none() && posts != [head] {
                continue;
            }
            for &post in &posts {
                if post != head && !ext.as_ref().is_some_and(|s| s.contains(&post)) {
                    continue;
                }
                if !children.contains(&post) {
                    continue;
                }
                let same = post == head;
                let (nodes, preds) = grow_region(tree, head, post, same);

                if !check_region(tree, head, &nodes) {
                    continue;
                }
                if preds.iter().any(|p| !nodes.contains(p)) {
                    continue;
                }
                let self_loop = tree.predecessors(head, EdgeMask::REGULAR).contains(&head);
                if (nodes.len() <= 1 && !self_loop) || nodes.len() >= children.len() {
                    continue;
                }
                if !check_monitor_completeness(tree, &nodes) {
                    continue;
                }

                let mut members = vec![head];
                members.extend(children.iter().copied().filter(|&c| c != head && nodes.contains(&c)));
                let region_post = if same { None } else { Some(post) };
                let region = tree.new_compound(
                    StatKind::Region { resolved: false },
                    head,
                    members,
                    region_post,
                );
                tree.collapse_nodes_to_statement(container, region);
                debug!(
                    "{container}: region {region} headed by {head} over {} node(s), post {region_post:?}{}",
                    nodes.len(),
                    if forced { " (forced)" } else { "" }
                );
                return Some(region);
            }
        }
        None
    }
}

/// Put the only child of a resolved region in the region's place. Flow
/// returning to the region's head turns the child into the body of an
/// infinite loop, unless the child already is a loop.
fn splice_resolved(tree: &mut StatTree, container: StatId, region: StatId) -> StatId {
    let inner = tree.first_of(region);
    let loops = tree
        .pred_edges(region, EdgeMask::CONTINUE)
        .into_iter()
        .any(|e| tree.contains_strict(region, tree.edge(e).source));
    tree.replace_statement(container, region, inner);
    if !loops || matches!(tree.kind(inner), StatKind::Loop { .. }) {
        return inner;
    }

    let body = tree.new_compound(
        StatKind::Loop {
            kind: LoopKind::Infinite,
        },
        inner,
        vec![inner],
        None,
    );
    tree.replace_statement(container, inner, body);
    tree.set_all_parent(body);
    tree.build_continue_set(body);
    tree.build_monitor_flags(body);
    trace!("{region}: wrapped {inner} in loop {body}");
    body
}

/// Nodes reachable from `head` by regular flow without passing `post`, plus
/// the handlers whose protected nodes all lie inside. Also returns the
/// regular predecessors of every non-head member.
fn grow_region(
    tree: &StatTree,
    head: StatId,
    post: StatId,
    same: bool,
) -> (BTreeSet<StatId>, BTreeSet<StatId>) {
    let mut nodes: BTreeSet<StatId> = BTreeSet::new();
    let mut preds: BTreeSet<StatId> = BTreeSet::new();
    let mut handlers: Vec<StatId> = vec![head];

    loop {
        let start = handlers.iter().copied().find(|&h| {
            if nodes.contains(&h) {
                return false;
            }
            if h == head {
                return nodes.is_empty();
            }
            let protected = tree.predecessors(h, EdgeMask::EXCEPTION);
            protected.iter().all(|p| nodes.contains(p))
                && (nodes.len() > protected.len() || nodes.len() == 1)
        });
        let Some(start) = start else {
            break;
        };

        let mut stack = VecDeque::from([start]);
        while let Some(st) = stack.pop_front() {
            if nodes.contains(&st) || (!same && st == post) {
                continue;
            }
            nodes.insert(st);
            if st != head {
                preds.extend(tree.predecessors(st, EdgeMask::REGULAR));
            }
            stack.extend(tree.successors(st, EdgeMask::REGULAR));
            for h in tree.successors(st, EdgeMask::EXCEPTION) {
                if !handlers.contains(&h) {
                    handlers.push(h);
                }
            }
        }
    }
    (nodes, preds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::graph_to_statement;
    use crate::graph::{GraphBuilder, Insn};

    fn no_regions_left(tree: &StatTree) -> bool {
        tree.descendants(tree.root())
            .into_iter()
            .all(|s| !matches!(tree.kind(s), StatKind::Region { .. }))
    }

    #[test]
    fn diamond_reduces_to_sequence_of_if_and_join() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::cond("c")]);
        let b = g.block(vec![Insn::plain("b")]);
        let c = g.block(vec![Insn::plain("c")]);
        let d = g.block(vec![Insn::plain("d")]);
        g.edge(a, b).edge(a, c).edge(b, d).edge(c, d).exit(d);
        let mut tree = graph_to_statement(&g.finish(a)).unwrap_or_else(|e| panic!("{e}"));

        RegionDetector::default()
            .run(&mut tree)
            .unwrap_or_else(|e| panic!("{e}"));

        let body = tree.first_of(tree.root());
        assert_eq!(tree.children(tree.root()), &[body]);
        match tree.kind(body) {
            StatKind::Sequence => {}
            other => panic!("Expected Sequence, got {other:?}"),
        }
        let first = tree.children(body)[0];
        match tree.kind(first) {
            StatKind::If(shape) => assert!(shape.has_else()),
            other => panic!("Expected If, got {other:?}"),
        }
        assert!(no_regions_left(&tree));
    }

    #[test]
    fn self_loop_becomes_loop() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::plain("a")]);
        let b = g.block(vec![Insn::cond("c")]);
        g.edge(a, b).edge(b, a).exit(b);
        let mut tree = graph_to_statement(&g.finish(a)).unwrap_or_else(|e| panic!("{e}"));

        RegionDetector::default()
            .run(&mut tree)
            .unwrap_or_else(|e| panic!("{e}"));

        let body = tree.first_of(tree.root());
        assert!(matches!(tree.kind(body), StatKind::Loop { .. }));
        assert!(no_regions_left(&tree));
    }

    fn irreducible_graph() -> StatTree {
        // a -> {b, c}, b -> c, c -> b, b -> exit
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::cond("p")]);
        let b = g.block(vec![Insn::cond("q")]);
        let c = g.block(vec![Insn::plain("c")]);
        g.edge(a, b).edge(a, c).edge(b, c).exit(b).edge(c, b);
        graph_to_statement(&g.finish(a)).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn irreducible_without_budget_is_a_failure() {
        let mut tree = irreducible_graph();
        match RegionDetector::new(0).run(&mut tree) {
            Err(StructurizeError::StructuringFailure { .. }) => {}
            other => panic!("Expected StructuringFailure, got {other:?}"),
        }
    }

    #[test]
    fn irreducible_with_budget_is_split_and_reduced() {
        let mut tree = irreducible_graph();
        RegionDetector::default()
            .run(&mut tree)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(no_regions_left(&tree));
        assert_eq!(tree.children(tree.root()).len(), 1);
    }

    #[test]
    fn single_block_is_left_alone() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::ret(None)]);
        g.exit(a);
        let mut tree = graph_to_statement(&g.finish(a)).unwrap_or_else(|e| panic!("{e}"));
        let before = tree.first_of(tree.root());
        RegionDetector::default()
            .run(&mut tree)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tree.first_of(tree.root()), before);
    }
}
