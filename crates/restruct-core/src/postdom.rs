//! Postdominance over a container's children.
//!
//! The strict table is an iterative dataflow over regular edges, seeded from
//! the exit components. The extended map is produced by an
//! [`ExtendedPostdominance`] implementation and cached across collapses by
//! [`ExtPostdomCache`], which is patched in place instead of recomputed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

use crate::model::{EdgeMask, StatId, StatTree};
use crate::order::SiblingGraph;

// -------------------------------------------------------------------------
// Strict postdominators
// -------------------------------------------------------------------------

/// Postdominator lists for every child of a container.
///
/// Entries follow the post-reverse-postorder scan; each list is sorted by
/// reverse-postorder rank with the node itself moved last unless it is the
/// only entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostdomTable {
    pub entries: Vec<(StatId, Vec<StatId>)>,
}

impl PostdomTable {
    pub fn get(&self, node: StatId) -> Option<&[StatId]> {
        self.entries
            .iter()
            .find(|(n, _)| *n == node)
            .map(|(_, posts)| posts.as_slice())
    }
}

/// Solve `post(n) = {n} ∪ ⋂ post(succ)` to a fixpoint.
///
/// Exit components start at their own member set, everything else at the
/// full node set. `order` decides visiting order only; the result does not
/// depend on it.
pub fn solve_postdominators(
    graph: &SiblingGraph,
    components: &[Vec<StatId>],
    order: &[StatId],
) -> HashMap<StatId, BTreeSet<StatId>> {
    let all: BTreeSet<StatId> = graph.nodes.iter().copied().collect();
    let mut sets: HashMap<StatId, BTreeSet<StatId>> = HashMap::new();
    for component in components {
        let init: BTreeSet<StatId> = if graph.is_exit_component(component) {
            component.iter().copied().collect()
        } else {
            all.clone()
        };
        for &n in component {
            sets.insert(n, init.clone());
        }
    }

    let mut pending: BTreeSet<StatId> = all.clone();
    while !pending.is_empty() {
        for &node in order {
            if !pending.remove(&node) {
                continue;
            }
            let mut doms: Option<BTreeSet<StatId>> = None;
            for succ in graph.succs_of(node) {
                let succ_set = sets.get(succ).cloned().unwrap_or_default();
                doms = Some(match doms {
                    None => succ_set,
                    Some(acc) => acc.intersection(&succ_set).copied().collect(),
                });
            }
            let mut doms = doms.unwrap_or_default();
            doms.insert(node);
            if sets.get(&node) != Some(&doms) {
                sets.insert(node, doms);
                pending.extend(graph.preds_of(node).iter().copied());
            }
        }
        // Nodes outside `order` would never be revisited.
        pending.retain(|n| order.contains(n));
    }
    sets
}

fn rank_sorted(set: &BTreeSet<StatId>, node: StatId, rank: &HashMap<StatId, usize>) -> Vec<StatId> {
    let mut posts: Vec<StatId> = set.iter().copied().collect();
    posts.sort_by_key(|p| rank.get(p).copied().unwrap_or(usize::MAX));
    if posts.len() > 1 && posts[0] == node {
        let own = posts.remove(0);
        posts.push(own);
    }
    posts
}

/// Exact postdominators of every child of `container`, over regular edges.
pub fn calc_postdominators(tree: &StatTree, container: StatId) -> PostdomTable {
    let regular = SiblingGraph::new(tree, container, EdgeMask::REGULAR);
    let components = regular.components();
    let exits = regular.exit_reps(&components);
    let flow = SiblingGraph::new(tree, container, EdgeMask::REGULAR | EdgeMask::EXCEPTION);
    let order = flow.post_reverse_post_order(&exits);

    let sets = solve_postdominators(&regular, &components, &order);
    let rank = rpo_rank(&flow);

    let entries = order
        .iter()
        .map(|&n| {
            let set = sets.get(&n).cloned().unwrap_or_default();
            (n, rank_sorted(&set, n, &rank))
        })
        .collect();
    PostdomTable { entries }
}

pub(crate) fn rpo_rank(flow: &SiblingGraph) -> HashMap<StatId, usize> {
    flow.reverse_post_order()
        .into_iter()
        .enumerate()
        .map(|(i, n)| (n, i))
        .collect()
}

/// Sort an extended postdominator set the same way as the strict table.
pub(crate) fn sort_posts(set: &BTreeSet<StatId>, node: StatId, rank: &HashMap<StatId, usize>) -> Vec<StatId> {
    rank_sorted(set, node, rank)
}

// -------------------------------------------------------------------------
// Dominators (Lengauer-Tarjan)
// -------------------------------------------------------------------------

fn lt_compress(v: usize, ancestor: &mut [usize], label: &mut [usize], semi: &[usize]) {
    let mut path = Vec::new();
    let mut u = v;
    while ancestor[u] != usize::MAX && ancestor[ancestor[u]] != usize::MAX {
        path.push(u);
        u = ancestor[u];
    }
    for &node in path.iter().rev() {
        let a = ancestor[node];
        if semi[label[a]] < semi[label[node]] {
            label[node] = label[a];
        }
        ancestor[node] = ancestor[a];
    }
}

fn lt_eval(v: usize, ancestor: &mut [usize], label: &mut [usize], semi: &[usize]) -> usize {
    if ancestor[v] == usize::MAX {
        return v;
    }
    lt_compress(v, ancestor, label, semi);
    label[v]
}

/// Immediate dominators of every node reachable from `entry`. The entry maps
/// to itself.
pub fn compute_dominators<N: Copy + Eq + Hash>(
    entry: N,
    preds: &HashMap<N, Vec<N>>,
    succs: &HashMap<N, Vec<N>>,
) -> HashMap<N, N> {
    let mut dfnum: HashMap<N, usize> = HashMap::new();
    let mut vertex: Vec<N> = Vec::new();
    let mut dfs_parent: Vec<usize> = Vec::new();

    let mut stack: Vec<(N, usize)> = vec![(entry, usize::MAX)];
    while let Some((node, parent_df)) = stack.pop() {
        if dfnum.contains_key(&node) {
            continue;
        }
        let df = vertex.len();
        dfnum.insert(node, df);
        vertex.push(node);
        dfs_parent.push(parent_df);
        if let Some(s) = succs.get(&node) {
            for &succ in s.iter().rev() {
                if !dfnum.contains_key(&succ) {
                    stack.push((succ, df));
                }
            }
        }
    }

    let n = vertex.len();
    let mut result = HashMap::with_capacity(n);
    result.insert(entry, entry);
    if n <= 1 {
        return result;
    }

    let mut semi: Vec<usize> = (0..n).collect();
    let mut idom_idx: Vec<usize> = vec![0; n];
    let mut ancestor: Vec<usize> = vec![usize::MAX; n];
    let mut label: Vec<usize> = (0..n).collect();
    let mut bucket: Vec<Vec<usize>> = vec![Vec::new(); n];

    for i in (1..n).rev() {
        let w = vertex[i];
        let p = dfs_parent[i];
        if let Some(w_preds) = preds.get(&w) {
            for v in w_preds {
                if let Some(&v_df) = dfnum.get(v) {
                    let u = lt_eval(v_df, &mut ancestor, &mut label, &semi);
                    if semi[u] < semi[i] {
                        semi[i] = semi[u];
                    }
                }
            }
        }
        bucket[semi[i]].push(i);
        ancestor[i] = p;
        for v in std::mem::take(&mut bucket[p]) {
            let u = lt_eval(v, &mut ancestor, &mut label, &semi);
            idom_idx[v] = if semi[u] < semi[v] { u } else { p };
        }
    }

    for i in 1..n {
        if idom_idx[i] != semi[i] {
            idom_idx[i] = idom_idx[idom_idx[i]];
        }
    }

    for i in 1..n {
        result.insert(vertex[i], vertex[idom_idx[i]]);
    }
    result
}

/// `a` dominates `b` under the immediate-dominator map `idom`.
pub fn dominates<N: Copy + Eq + Hash>(a: N, b: N, idom: &HashMap<N, N>) -> bool {
    let mut cur = b;
    loop {
        if cur == a {
            return true;
        }
        match idom.get(&cur) {
            Some(&parent) if parent != cur => cur = parent,
            _ => return false,
        }
    }
}

// -------------------------------------------------------------------------
// Extended postdominance
// -------------------------------------------------------------------------

/// Candidate exits per node, beyond exact postdominance. Nodes without
/// candidates are absent from the map.
pub type ExtPostdomMap = BTreeMap<StatId, BTreeSet<StatId>>;

/// Supplies the relaxed postdominance used by the forced region scan.
pub trait ExtendedPostdominance {
    fn compute(&self, tree: &StatTree, container: StatId) -> ExtPostdomMap;
}

/// Postdominators over regular edges with every loop back edge re-pointed at
/// the exits of its loop, keeping only candidates the node dominates.
///
/// Re-pointing back edges lets the exit of a loop count as a postdominator
/// of the nodes inside it even though the loop may run forever, while the
/// loop body still flows somewhere instead of becoming an exit itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DominanceFilteredPostdominance;

impl ExtendedPostdominance for DominanceFilteredPostdominance {
    fn compute(&self, tree: &StatTree, container: StatId) -> ExtPostdomMap {
        let flow = SiblingGraph::new(tree, container, EdgeMask::REGULAR | EdgeMask::EXCEPTION);
        let idom = compute_dominators(flow.first, &flow.preds, &flow.succs);
        let regular = SiblingGraph::new(tree, container, EdgeMask::REGULAR);

        let is_back_edge = |n: StatId, s: StatId| idom.contains_key(&n) && dominates(s, n, &idom);
        let forward: HashMap<StatId, Vec<StatId>> = regular
            .nodes
            .iter()
            .map(|&n| {
                let succs = regular
                    .succs_of(n)
                    .iter()
                    .copied()
                    .filter(|&s| !is_back_edge(n, s))
                    .collect();
                (n, succs)
            })
            .collect();

        let mut rerouted = forward.clone();
        for &n in &regular.nodes {
            for &header in regular.succs_of(n) {
                if !is_back_edge(n, header) {
                    continue;
                }
                let body = natural_loop(&regular, n, header);
                let succs = rerouted.entry(n).or_default();
                for exit in loop_exits(&forward, &body) {
                    if !succs.contains(&exit) {
                        succs.push(exit);
                    }
                }
            }
        }
        let forward = rerouted;
        let acyclic = SiblingGraph::from_succs(regular.nodes.clone(), regular.first, forward);
        let components = acyclic.components();
        let exits = acyclic.exit_reps(&components);
        let order = acyclic.post_reverse_post_order(&exits);
        let sets = solve_postdominators(&acyclic, &components, &order);

        let mut map = ExtPostdomMap::new();
        for &n in &acyclic.nodes {
            let Some(set) = sets.get(&n) else { continue };
            let filtered: BTreeSet<StatId> = set
                .iter()
                .copied()
                .filter(|&p| p != n && idom.contains_key(&p) && dominates(n, p, &idom))
                .collect();
            if !filtered.is_empty() {
                map.insert(n, filtered);
            }
        }
        map
    }
}

/// Nodes of the loop closed by the back edge `source -> header`: the header
/// plus everything reaching `source` without passing through it.
fn natural_loop(graph: &SiblingGraph, source: StatId, header: StatId) -> BTreeSet<StatId> {
    let mut body: BTreeSet<StatId> = [header].into_iter().collect();
    let mut stack = vec![source];
    while let Some(n) = stack.pop() {
        if body.insert(n) {
            stack.extend(graph.preds_of(n).iter().copied());
        }
    }
    body
}

/// Forward successors of loop members that lie outside the loop, in first
/// seen order.
fn loop_exits(forward: &HashMap<StatId, Vec<StatId>>, body: &BTreeSet<StatId>) -> Vec<StatId> {
    let mut exits = Vec::new();
    for n in body {
        for &s in forward.get(n).map(Vec::as_slice).unwrap_or_default() {
            if !body.contains(&s) && !exits.contains(&s) {
                exits.push(s);
            }
        }
    }
    exits
}

/// Extended postdominance for one container, kept valid across collapses.
///
/// `version` increases on every refresh, patch, and invalidation so callers
/// can tell a stale snapshot from the live one.
#[derive(Debug, Clone, Default)]
pub struct ExtPostdomCache {
    map: Option<ExtPostdomMap>,
    version: u64,
}

impl ExtPostdomCache {
    pub fn is_empty(&self) -> bool {
        self.map.as_ref().is_none_or(|m| m.is_empty())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn refresh(&mut self, map: ExtPostdomMap) {
        self.map = Some(map);
        self.version += 1;
    }

    pub fn invalidate(&mut self) {
        self.map = None;
        self.version += 1;
    }

    pub fn get(&self, node: StatId) -> Option<&BTreeSet<StatId>> {
        self.map.as_ref().and_then(|m| m.get(&node))
    }

    /// Re-map after `old` nodes were collapsed into `new`: the collapsed keys
    /// merge into one entry and references to any of them become `new`.
    pub fn patch_collapse(&mut self, old: &[StatId], new: StatId) {
        let Some(map) = self.map.as_mut() else { return };
        if map.is_empty() {
            return;
        }
        let keys: Vec<StatId> = map.keys().copied().collect();
        for key in keys {
            let Some(mut set) = map.remove(&key) else { continue };
            let before = set.len();
            set.retain(|s| !old.contains(s));
            if old.contains(&key) {
                map.entry(new).or_default().extend(set);
            } else {
                if set.len() < before {
                    set.insert(new);
                }
                map.insert(key, set);
            }
        }
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::patterns::test_util::{cond, flat, plain};

    fn sid(i: usize) -> StatId {
        StatId::new(i)
    }

    #[test]
    fn dominators_of_diamond() {
        // 0 -> {1, 2} -> 3
        let succs: HashMap<usize, Vec<usize>> =
            [(0, vec![1, 2]), (1, vec![3]), (2, vec![3]), (3, vec![])].into_iter().collect();
        let mut preds: HashMap<usize, Vec<usize>> = HashMap::new();
        for (&n, ss) in &succs {
            for &s in ss {
                preds.entry(s).or_default().push(n);
            }
        }
        let idom = compute_dominators(0, &preds, &succs);
        assert_eq!(idom[&3], 0);
        assert_eq!(idom[&1], 0);
        assert!(dominates(0, 3, &idom));
        assert!(!dominates(1, 3, &idom));
    }

    #[test]
    fn solve_on_chain_and_branch() {
        // 0 -> {1, 2}, 1 -> 3, 2 -> 3
        let nodes: Vec<StatId> = (0..4).map(sid).collect();
        let succs: HashMap<StatId, Vec<StatId>> = [
            (sid(0), vec![sid(1), sid(2)]),
            (sid(1), vec![sid(3)]),
            (sid(2), vec![sid(3)]),
            (sid(3), vec![]),
        ]
        .into_iter()
        .collect();
        let g = SiblingGraph::from_succs(nodes, sid(0), succs);
        let comps = g.components();
        let order = g.post_reverse_post_order(&g.exit_reps(&comps));
        let sets = solve_postdominators(&g, &comps, &order);

        let expect = |v: &[usize]| v.iter().map(|&i| sid(i)).collect::<BTreeSet<_>>();
        assert_eq!(sets[&sid(0)], expect(&[0, 3]));
        assert_eq!(sets[&sid(1)], expect(&[1, 3]));
        assert_eq!(sets[&sid(3)], expect(&[3]));
    }

    #[test]
    fn solution_ignores_visiting_order() {
        let nodes: Vec<StatId> = (0..5).map(sid).collect();
        let succs: HashMap<StatId, Vec<StatId>> = [
            (sid(0), vec![sid(1), sid(2)]),
            (sid(1), vec![sid(3)]),
            (sid(2), vec![sid(3), sid(1)]),
            (sid(3), vec![sid(4)]),
            (sid(4), vec![]),
        ]
        .into_iter()
        .collect();
        let g = SiblingGraph::from_succs(nodes.clone(), sid(0), succs);
        let comps = g.components();
        let order = g.post_reverse_post_order(&g.exit_reps(&comps));
        let mut reversed = order.clone();
        reversed.reverse();
        assert_eq!(
            solve_postdominators(&g, &comps, &order),
            solve_postdominators(&g, &comps, &reversed)
        );
    }

    fn set(ids: &[StatId]) -> BTreeSet<StatId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn loop_exit_postdominates_header_behind_preheader() {
        // pre -> h -> {body, tail}, body -> h
        let (tree, container, l) = flat(
            vec![plain("pre"), cond("h"), plain("body"), plain("tail")],
            &[(0, 1), (1, 2), (1, 3), (2, 1)],
        );
        let map = DominanceFilteredPostdominance.compute(&tree, container);

        assert_eq!(map.get(&l[1]), Some(&set(&[l[3]])));
        assert_eq!(map.get(&l[0]), Some(&set(&[l[1], l[3]])));
        assert!(map.get(&l[2]).is_none());
        assert!(map.get(&l[3]).is_none());
    }

    #[test]
    fn nested_loops_postdominated_by_their_own_exits() {
        // o -> {i, tail}, i -> {x, ie}, x -> i, ie -> o
        let (tree, container, l) = flat(
            vec![cond("o"), cond("i"), plain("x"), plain("ie"), plain("tail")],
            &[(0, 1), (1, 2), (2, 1), (1, 3), (3, 0), (0, 4)],
        );
        let map = DominanceFilteredPostdominance.compute(&tree, container);

        assert_eq!(map.get(&l[1]), Some(&set(&[l[3]])));
        assert_eq!(map.get(&l[0]), Some(&set(&[l[4]])));
        assert!(map.get(&l[2]).is_none());
        assert!(map.get(&l[3]).is_none());
    }

    #[test]
    fn extended_posts_sort_in_flow_order() {
        // leaf 0 -> leaf 2 -> leaf 1, so id order disagrees with flow order
        let (tree, container, l) = flat(
            vec![plain("a"), plain("c"), plain("b")],
            &[(0, 2), (2, 1)],
        );
        let map = DominanceFilteredPostdominance.compute(&tree, container);
        let posts = &map[&l[0]];
        assert_eq!(posts.iter().copied().collect::<Vec<_>>(), vec![l[1], l[2]]);

        let flow = SiblingGraph::new(&tree, container, EdgeMask::REGULAR | EdgeMask::EXCEPTION);
        let rank = rpo_rank(&flow);
        assert_eq!(sort_posts(posts, l[0], &rank), vec![l[2], l[1]]);

        let with_self: BTreeSet<StatId> = [l[0], l[1], l[2]].into_iter().collect();
        assert_eq!(sort_posts(&with_self, l[0], &rank), vec![l[2], l[1], l[0]]);
    }

    #[test]
    fn cache_patch_merges_collapsed_keys() {
        let mut cache = ExtPostdomCache::default();
        let mut map = ExtPostdomMap::new();
        map.insert(sid(0), [sid(1), sid(3)].into_iter().collect());
        map.insert(sid(1), [sid(3)].into_iter().collect());
        map.insert(sid(2), [sid(3)].into_iter().collect());
        cache.refresh(map);
        let before = cache.version();

        cache.patch_collapse(&[sid(1), sid(2)], sid(9));

        assert!(cache.version() > before);
        assert_eq!(cache.get(sid(0)), Some(&[sid(3), sid(9)].into_iter().collect()));
        assert_eq!(cache.get(sid(9)), Some(&[sid(3)].into_iter().collect()));
        assert!(cache.get(sid(1)).is_none());
        assert!(cache.get(sid(2)).is_none());

        cache.invalidate();
        assert!(cache.is_empty());
    }
}
