//! Orderings and strongly connected components over a container's children.
//!
//! Only edges between siblings count; jumps to ancestors and the dummy exit
//! are invisible at this level.

use std::collections::{HashMap, HashSet};

use crate::model::{EdgeMask, StatId, StatTree};

/// The children of one container as a plain digraph.
#[derive(Debug, Clone)]
pub struct SiblingGraph {
    pub nodes: Vec<StatId>,
    pub first: StatId,
    pub succs: HashMap<StatId, Vec<StatId>>,
    pub preds: HashMap<StatId, Vec<StatId>>,
}

impl SiblingGraph {
    pub fn new(tree: &StatTree, container: StatId, mask: EdgeMask) -> Self {
        let nodes = tree.children(container).to_vec();
        let members: HashSet<StatId> = nodes.iter().copied().collect();
        let mut succs: HashMap<StatId, Vec<StatId>> = HashMap::new();
        let mut preds: HashMap<StatId, Vec<StatId>> = HashMap::new();
        for &n in &nodes {
            succs.entry(n).or_default();
            preds.entry(n).or_default();
        }
        for &n in &nodes {
            for s in tree.successors(n, mask) {
                if members.contains(&s) {
                    succs.entry(n).or_default().push(s);
                }
            }
            for p in tree.predecessors(n, mask) {
                if members.contains(&p) {
                    preds.entry(n).or_default().push(p);
                }
            }
        }
        Self {
            nodes,
            first: tree.first_of(container),
            succs,
            preds,
        }
    }

    /// Build from explicit adjacency; used for derived graphs.
    pub fn from_succs(nodes: Vec<StatId>, first: StatId, succs: HashMap<StatId, Vec<StatId>>) -> Self {
        let mut preds: HashMap<StatId, Vec<StatId>> = nodes.iter().map(|&n| (n, Vec::new())).collect();
        for &n in &nodes {
            for &s in succs.get(&n).map(Vec::as_slice).unwrap_or_default() {
                let list = preds.entry(s).or_default();
                if !list.contains(&n) {
                    list.push(n);
                }
            }
        }
        Self {
            nodes,
            first,
            succs,
            preds,
        }
    }

    pub fn succs_of(&self, n: StatId) -> &[StatId] {
        self.succs.get(&n).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn preds_of(&self, n: StatId) -> &[StatId] {
        self.preds.get(&n).map(Vec::as_slice).unwrap_or_default()
    }

    /// Tarjan's algorithm, iterative. Components come out sinks first; each
    /// component lists its nodes in pop order.
    pub fn components(&self) -> Vec<Vec<StatId>> {
        let mut index: HashMap<StatId, usize> = HashMap::new();
        let mut lowlink: HashMap<StatId, usize> = HashMap::new();
        let mut on_stack: HashSet<StatId> = HashSet::new();
        let mut stack: Vec<StatId> = Vec::new();
        let mut out = Vec::new();
        let mut counter = 0;

        let mut roots = vec![self.first];
        roots.extend(self.nodes.iter().copied().filter(|&n| n != self.first));

        for root in roots {
            if index.contains_key(&root) || !self.succs.contains_key(&root) {
                continue;
            }
            // (node, next successor position)
            let mut work: Vec<(StatId, usize)> = vec![(root, 0)];
            index.insert(root, counter);
            lowlink.insert(root, counter);
            counter += 1;
            stack.push(root);
            on_stack.insert(root);

            while let Some(&mut (node, ref mut pos)) = work.last_mut() {
                let succs = self.succs_of(node);
                if *pos < succs.len() {
                    let succ = succs[*pos];
                    *pos += 1;
                    if !index.contains_key(&succ) {
                        index.insert(succ, counter);
                        lowlink.insert(succ, counter);
                        counter += 1;
                        stack.push(succ);
                        on_stack.insert(succ);
                        work.push((succ, 0));
                    } else if on_stack.contains(&succ) {
                        let low = lowlink[&node].min(index[&succ]);
                        lowlink.insert(node, low);
                    }
                    continue;
                }
                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    let low = lowlink[&parent].min(lowlink[&node]);
                    lowlink.insert(parent, low);
                }
                if lowlink[&node] == index[&node] {
                    let mut component = Vec::new();
                    while let Some(top) = stack.pop() {
                        on_stack.remove(&top);
                        component.push(top);
                        if top == node {
                            break;
                        }
                    }
                    out.push(component);
                }
            }
        }
        out
    }

    /// A component no edge leaves.
    pub fn is_exit_component(&self, component: &[StatId]) -> bool {
        component
            .iter()
            .all(|&n| self.succs_of(n).iter().all(|s| component.contains(s)))
    }

    /// One representative per exit component.
    pub fn exit_reps(&self, components: &[Vec<StatId>]) -> Vec<StatId> {
        components
            .iter()
            .filter(|c| self.is_exit_component(c))
            .filter_map(|c| c.first().copied())
            .collect()
    }

    /// Forward depth-first reverse postorder from the entry. Nodes the entry
    /// cannot reach are appended afterwards in child order.
    pub fn reverse_post_order(&self) -> Vec<StatId> {
        let mut visited: HashSet<StatId> = HashSet::new();
        let mut post = Vec::new();
        let mut roots = vec![self.first];
        roots.extend(self.nodes.iter().copied());
        for root in roots {
            if visited.contains(&root) || !self.succs.contains_key(&root) {
                continue;
            }
            visited.insert(root);
            let mut work: Vec<(StatId, usize)> = vec![(root, 0)];
            while let Some(&mut (node, ref mut pos)) = work.last_mut() {
                let succs = self.succs_of(node);
                if *pos < succs.len() {
                    let succ = succs[*pos];
                    *pos += 1;
                    if visited.insert(succ) {
                        work.push((succ, 0));
                    }
                } else {
                    post.push(node);
                    work.pop();
                }
            }
        }
        post.reverse();
        post
    }

    /// Postorder of the reversed graph, walked backward from `exits`. Exits
    /// come first and the entry last, so inner shapes are seen before the
    /// shapes enclosing them.
    pub fn post_reverse_post_order(&self, exits: &[StatId]) -> Vec<StatId> {
        let mut visited: HashSet<StatId> = HashSet::new();
        let mut out = Vec::new();
        for &exit in exits {
            if !visited.insert(exit) {
                continue;
            }
            let mut work: Vec<(StatId, usize)> = vec![(exit, 0)];
            while let Some(&mut (node, ref mut pos)) = work.last_mut() {
                let preds = self.preds_of(node);
                if *pos < preds.len() {
                    let pred = preds[*pos];
                    *pos += 1;
                    if visited.insert(pred) {
                        work.push((pred, 0));
                    }
                } else {
                    out.push(node);
                    work.pop();
                }
            }
        }
        out.reverse();
        out
    }
}

/// Scan order for pattern detection inside `container`: exits first,
/// following regular and exception edges backward.
pub fn post_reverse_post_order(tree: &StatTree, container: StatId) -> Vec<StatId> {
    let regular = SiblingGraph::new(tree, container, EdgeMask::REGULAR);
    let exits = regular.exit_reps(&regular.components());
    let flow = SiblingGraph::new(tree, container, EdgeMask::REGULAR | EdgeMask::EXCEPTION);
    let mut order = flow.post_reverse_post_order(&exits);
    if order.len() != flow.nodes.len() {
        log::warn!(
            "{container}: {} of {} children unreachable from exit components",
            flow.nodes.len() - order.len(),
            flow.nodes.len()
        );
        for &n in &flow.nodes {
            if !order.contains(&n) {
                order.push(n);
            }
        }
    }
    order
}

/// Forward reverse postorder over regular and exception edges.
pub fn reverse_post_order(tree: &StatTree, container: StatId) -> Vec<StatId> {
    SiblingGraph::new(tree, container, EdgeMask::REGULAR | EdgeMask::EXCEPTION).reverse_post_order()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    fn ids(n: usize) -> Vec<StatId> {
        (0..n).map(StatId::new).collect()
    }

    fn graph(n: usize, edges: &[(usize, usize)]) -> SiblingGraph {
        let nodes = ids(n);
        let mut succs: HashMap<StatId, Vec<StatId>> = nodes.iter().map(|&s| (s, Vec::new())).collect();
        for &(a, b) in edges {
            succs.entry(StatId::new(a)).or_default().push(StatId::new(b));
        }
        SiblingGraph::from_succs(nodes.clone(), nodes[0], succs)
    }

    #[test]
    fn components_find_cycles() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let g = graph(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let comps = g.components();
        assert_eq!(comps.len(), 3);
        let cycle = comps.iter().find(|c| c.len() == 2).cloned().unwrap_or_default();
        assert!(cycle.contains(&StatId::new(1)) && cycle.contains(&StatId::new(2)));
        // sinks first
        assert_eq!(comps[0], vec![StatId::new(3)]);
        assert_eq!(g.exit_reps(&comps), vec![StatId::new(3)]);
    }

    #[test]
    fn reverse_post_order_puts_entry_first() {
        // diamond 0 -> {1, 2} -> 3
        let g = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let rpo = g.reverse_post_order();
        assert_eq!(rpo[0], StatId::new(0));
        assert_eq!(rpo[3], StatId::new(3));
    }

    #[test]
    fn post_reverse_post_order_puts_exits_first() {
        let g = graph(3, &[(0, 1), (1, 2)]);
        let order = g.post_reverse_post_order(&[StatId::new(2)]);
        assert_eq!(order, vec![StatId::new(2), StatId::new(1), StatId::new(0)]);
    }

    #[test]
    fn cycle_without_exit_is_its_own_exit_component() {
        let g = graph(3, &[(0, 1), (1, 2), (2, 1)]);
        let comps = g.components();
        let reps = g.exit_reps(&comps);
        assert_eq!(reps.len(), 1);
        assert!(reps[0] == StatId::new(1) || reps[0] == StatId::new(2));
    }
}
