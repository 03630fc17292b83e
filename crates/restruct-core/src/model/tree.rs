use std::collections::BTreeSet;

use crate::entity::PrimaryMap;
use crate::graph::{Insn, InsnKind};

use super::{Edge, EdgeId, EdgeKind, EdgeMask, LastBasic, LoopKind, Stat, StatId, StatKind};

/// Arena owning every statement and edge of one method body.
///
/// Detached statements and edges stay in the arenas; only the links from
/// live statements decide what belongs to the tree.
#[derive(Debug, Clone)]
pub struct StatTree {
    stats: PrimaryMap<StatId, Stat>,
    edges: PrimaryMap<EdgeId, Edge>,
    root: StatId,
    dummy_exit: StatId,
}

impl Default for StatTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StatTree {
    /// An empty tree: a `Root` with no child and its dummy exit.
    pub fn new() -> Self {
        let mut stats = PrimaryMap::new();
        let dummy_exit = stats.push(Stat::new(StatKind::DummyExit));
        let root = stats.push(Stat::new(StatKind::Root { dummy_exit }));
        Self {
            stats,
            edges: PrimaryMap::new(),
            root,
            dummy_exit,
        }
    }

    pub fn root(&self) -> StatId {
        self.root
    }

    pub fn dummy_exit(&self) -> StatId {
        self.dummy_exit
    }

    pub fn stat(&self, id: StatId) -> &Stat {
        &self.stats[id]
    }

    pub(crate) fn stat_mut(&mut self, id: StatId) -> &mut Stat {
        &mut self.stats[id]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id]
    }

    pub fn kind(&self, id: StatId) -> &StatKind {
        &self.stats[id].kind
    }

    pub fn children(&self, id: StatId) -> &[StatId] {
        &self.stats[id].stats
    }

    pub fn parent(&self, id: StatId) -> Option<StatId> {
        self.stats[id].parent
    }

    /// The entry child of a compound statement, or the statement itself for
    /// leaves.
    pub fn first_of(&self, id: StatId) -> StatId {
        self.stats[id].first.unwrap_or(id)
    }

    /// Edges this statement closes, in the order they were attached.
    pub fn labels(&self, id: StatId) -> &[EdgeId] {
        &self.stats[id].labels
    }

    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    pub fn new_basic_block(&mut self, block: Option<u32>, insns: Vec<Insn>) -> StatId {
        self.stats.push(Stat::new(StatKind::BasicBlock { block, insns }))
    }

    /// A compound statement over `children`. Parents are assigned when the
    /// statement is collapsed into its container.
    pub fn new_compound(
        &mut self,
        kind: StatKind,
        first: StatId,
        children: Vec<StatId>,
        post: Option<StatId>,
    ) -> StatId {
        let mut stat = Stat::new(kind);
        stat.first = Some(first);
        stat.stats = children;
        stat.post = post;
        self.stats.push(stat)
    }

    /// Replace a leaf's instructions and refresh the flags derived from them.
    pub(crate) fn set_insns(&mut self, id: StatId, new: Vec<Insn>) {
        let stat = &mut self.stats[id];
        if let StatKind::BasicBlock { insns, .. } = &mut stat.kind {
            stat.last_basic = LastBasic::of_insns(&new);
            *insns = new;
        }
        self.build_monitor_flags(id);
    }

    pub fn set_all_parent(&mut self, id: StatId) {
        for child in self.stats[id].stats.clone() {
            self.stats[child].parent = Some(id);
        }
    }

    // ---------------------------------------------------------------------
    // Edge queries
    // ---------------------------------------------------------------------

    pub fn succ_edges(&self, id: StatId, mask: EdgeMask) -> Vec<EdgeId> {
        self.stats[id]
            .succs
            .iter()
            .copied()
            .filter(|&e| mask.contains(self.edges[e].kind))
            .collect()
    }

    pub fn pred_edges(&self, id: StatId, mask: EdgeMask) -> Vec<EdgeId> {
        self.stats[id]
            .preds
            .iter()
            .copied()
            .filter(|&e| mask.contains(self.edges[e].kind))
            .collect()
    }

    /// Distinct destinations of matching outgoing edges, in edge order.
    pub fn successors(&self, id: StatId, mask: EdgeMask) -> Vec<StatId> {
        let mut out = Vec::new();
        for e in self.succ_edges(id, mask) {
            let dest = self.edges[e].dest;
            if !out.contains(&dest) {
                out.push(dest);
            }
        }
        out
    }

    /// Distinct sources of matching incoming edges, in edge order.
    pub fn predecessors(&self, id: StatId, mask: EdgeMask) -> Vec<StatId> {
        let mut out = Vec::new();
        for e in self.pred_edges(id, mask) {
            let source = self.edges[e].source;
            if !out.contains(&source) {
                out.push(source);
            }
        }
        out
    }

    /// First non-exception outgoing edge.
    pub fn first_direct_succ(&self, id: StatId) -> Option<EdgeId> {
        self.stats[id]
            .succs
            .iter()
            .copied()
            .find(|&e| self.edges[e].kind != EdgeKind::Exception)
    }

    // ---------------------------------------------------------------------
    // Edge mutation
    // ---------------------------------------------------------------------

    pub fn add_edge(&mut self, edge: Edge) -> EdgeId {
        let (source, dest, closure) = (edge.source, edge.dest, edge.closure);
        let id = self.edges.push(edge);
        self.stats[source].succs.push(id);
        self.stats[dest].preds.push(id);
        if let Some(closure) = closure {
            self.stats[closure].labels.push(id);
        }
        id
    }

    /// Detach an edge from its source, destination, and closure.
    pub fn remove_edge(&mut self, id: EdgeId) {
        let Edge {
            source,
            dest,
            closure,
            ..
        } = self.edges[id];
        self.stats[source].succs.retain(|&e| e != id);
        self.stats[dest].preds.retain(|&e| e != id);
        if let Some(closure) = closure {
            self.stats[closure].labels.retain(|&e| e != id);
        }
    }

    pub fn redirect_dest(&mut self, id: EdgeId, dest: StatId) {
        let old = self.edges[id].dest;
        if old == dest {
            return;
        }
        self.stats[old].preds.retain(|&e| e != id);
        self.edges[id].dest = dest;
        self.stats[dest].preds.push(id);
    }

    pub fn redirect_source(&mut self, id: EdgeId, source: StatId) {
        let old = self.edges[id].source;
        if old == source {
            return;
        }
        self.stats[old].succs.retain(|&e| e != id);
        self.edges[id].source = source;
        self.stats[source].succs.push(id);
    }

    pub fn set_edge_kind(&mut self, id: EdgeId, kind: EdgeKind) {
        self.edges[id].kind = kind;
    }

    /// Make `closure` the owner of the edge's label, detaching it from the
    /// previous owner.
    pub fn set_closure(&mut self, id: EdgeId, closure: Option<StatId>) {
        if let Some(old) = self.edges[id].closure {
            self.stats[old].labels.retain(|&e| e != id);
        }
        if let Some(new) = closure {
            self.stats[new].labels.push(id);
        }
        self.edges[id].closure = closure;
    }

    // ---------------------------------------------------------------------
    // Structural queries
    // ---------------------------------------------------------------------

    /// `inner` is a proper descendant of `outer`.
    pub fn contains_strict(&self, outer: StatId, inner: StatId) -> bool {
        self.stats[outer]
            .stats
            .iter()
            .any(|&c| c == inner || self.contains_strict(c, inner))
    }

    pub fn contains(&self, outer: StatId, inner: StatId) -> bool {
        outer == inner || self.contains_strict(outer, inner)
    }

    /// The leaf reached by following `first` links down from `id`.
    pub fn basic_head(&self, id: StatId) -> StatId {
        let mut cur = id;
        while !self.stats[cur].is_basic_block() {
            match self.stats[cur].first {
                Some(first) => cur = first,
                None => break,
            }
        }
        cur
    }

    /// The statement falls through to a successor on its own (leaves,
    /// `if` without `else`, and bounded loops).
    pub fn has_basic_succ_edge(&self, id: StatId) -> bool {
        match &self.stats[id].kind {
            StatKind::BasicBlock { .. } => true,
            StatKind::If(shape) => !shape.has_else(),
            StatKind::Loop { kind } => *kind != LoopKind::Infinite,
            _ => false,
        }
    }

    /// Owns at least one explicit edge that must be printed with a label.
    pub fn is_labeled(&self, id: StatId) -> bool {
        self.stats[id].labels.iter().any(|&e| {
            let edge = &self.edges[e];
            edge.explicit && edge.labeled
        })
    }

    /// Every statement under `id`, parents before children.
    pub fn descendants(&self, id: StatId) -> Vec<StatId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(s) = stack.pop() {
            out.push(s);
            stack.extend(self.stats[s].stats.iter().rev());
        }
        out
    }

    // ---------------------------------------------------------------------
    // Structural mutation
    // ---------------------------------------------------------------------

    /// Splice the children of `stat` out of `container` and put `stat` in
    /// their place, re-routing edges around it.
    pub fn collapse_nodes_to_statement(&mut self, container: StatId, stat: StatId) {
        let head = self.first_of(stat);
        let post = self.stats[stat].post;
        let nodes = self.stats[stat].stats.clone();

        // Flow into the continuation from inside becomes a break.
        if let Some(post) = post {
            for e in self.pred_edges(post, EdgeMask::DIRECT_ALL) {
                if self.contains_strict(stat, self.edges[e].source) {
                    self.set_edge_kind(e, EdgeKind::Break);
                    self.set_closure(e, Some(stat));
                }
            }
        }

        // Flow back into the head from inside becomes a continue.
        for e in self.pred_edges(head, EdgeMask::ALL) {
            if self.edges[e].kind != EdgeKind::Exception
                && self.contains_strict(stat, self.edges[e].source)
            {
                self.set_edge_kind(e, EdgeKind::Continue);
                self.set_closure(e, Some(stat));
            }
            self.redirect_dest(e, stat);
        }

        if self.stats[container].first.is_some_and(|f| nodes.contains(&f)) {
            self.stats[container].first = Some(stat);
        }

        // Handlers protecting every node move up to the new statement.
        let mut shared = self.successors(head, EdgeMask::EXCEPTION);
        for &node in &nodes {
            let handlers = self.successors(node, EdgeMask::EXCEPTION);
            shared.retain(|h| handlers.contains(h));
        }
        if !shared.is_empty() {
            for e in self.succ_edges(head, EdgeMask::EXCEPTION) {
                let handler = self.edges[e].dest;
                if shared.contains(&handler) && !nodes.contains(&handler) {
                    let exceptions = self.edges[e].exceptions.clone();
                    self.add_edge(Edge::exception(stat, handler, exceptions));
                }
            }
            for &node in &nodes {
                for e in self.succ_edges(node, EdgeMask::EXCEPTION) {
                    if shared.contains(&self.edges[e].dest) {
                        self.remove_edge(e);
                    }
                }
            }
        }

        if let Some(post) = post {
            if !self.successors(stat, EdgeMask::EXCEPTION | EdgeMask::REGULAR).contains(&post) {
                self.add_edge(Edge::regular(stat, post));
            }
        }

        let children = &mut self.stats[container].stats;
        children.retain(|s| !nodes.contains(s));
        children.push(stat);
        self.set_all_parent(stat);
        self.stats[stat].parent = Some(container);
        self.build_continue_set(stat);
        self.build_monitor_flags(stat);
    }

    /// Put `new` where `old` was inside `container`, moving every edge and
    /// label that referenced `old`.
    pub fn replace_statement(&mut self, container: StatId, old: StatId, new: StatId) {
        for e in self.pred_edges(old, EdgeMask::ALL) {
            self.redirect_dest(e, new);
        }
        for e in self.succ_edges(old, EdgeMask::ALL) {
            self.redirect_source(e, new);
        }

        if let Some(pos) = self.stats[container].stats.iter().position(|&s| s == old) {
            self.stats[container].stats[pos] = new;
        }
        self.stats[new].parent = Some(container);
        self.stats[new].post = self.stats[old].post;
        if self.stats[container].first == Some(old) {
            self.stats[container].first = Some(new);
        }
        self.replace_in_shape(container, old, new);

        let labels = self.stats[old].labels.clone();
        for &e in labels.iter().rev() {
            if self.edges[e].source != new {
                self.set_closure(e, Some(new));
            } else if self.contains(container, self.edges[e].dest) {
                self.set_closure(e, None);
            } else {
                self.set_closure(e, Some(container));
            }
        }
        self.stats[old].labels.clear();
    }

    fn replace_in_shape(&mut self, container: StatId, old: StatId, new: StatId) {
        let swap = |slot: &mut StatId| {
            if *slot == old {
                *slot = new;
            }
        };
        match &mut self.stats[container].kind {
            StatKind::If(shape) => {
                if let Some(s) = shape.if_stat.as_mut() {
                    swap(s);
                }
                if let Some(s) = shape.else_stat.as_mut() {
                    swap(s);
                }
            }
            StatKind::Switch(shape) => shape.cases.iter_mut().for_each(swap),
            StatKind::CatchAll { handler, .. } => swap(handler),
            StatKind::Synchronized {
                head,
                body,
                handler,
            } => {
                swap(head);
                swap(body);
                swap(handler);
            }
            _ => {}
        }
    }

    /// Drop `child` from `container`'s child list, keeping `first` valid.
    pub fn remove_child(&mut self, container: StatId, child: StatId) {
        let stat = &mut self.stats[container];
        stat.stats.retain(|&s| s != child);
        if stat.first == Some(child) {
            stat.first = stat.stats.first().copied();
        }
    }

    /// Recompute the basic heads that `id` and its children continue to.
    pub fn build_continue_set(&mut self, id: StatId) -> BTreeSet<StatId> {
        let mut set = BTreeSet::new();
        let first = self.stats[id].first;
        for child in self.stats[id].stats.clone() {
            set.extend(self.build_continue_set(child));
            if Some(child) != first {
                set.remove(&self.basic_head(child));
            }
        }
        for e in self.succ_edges(id, EdgeMask::CONTINUE) {
            set.insert(self.basic_head(self.edges[e].dest));
        }
        if matches!(self.stats[id].kind, StatKind::Loop { .. }) {
            if let Some(first) = first {
                set.remove(&self.basic_head(first));
            }
        }
        self.stats[id].continue_set = set.clone();
        set
    }

    pub fn build_monitor_flags(&mut self, id: StatId) {
        for child in self.stats[id].stats.clone() {
            self.build_monitor_flags(child);
        }
        let any_child_exit = self.stats[id]
            .stats
            .iter()
            .any(|&c| self.stats[c].contains_monitor_exit);
        let stat = &mut self.stats[id];
        match &stat.kind {
            StatKind::BasicBlock { insns, .. } => {
                stat.contains_monitor_exit =
                    insns.iter().any(|i| i.kind == InsnKind::MonitorExit);
                stat.monitor_enter = insns
                    .last()
                    .is_some_and(|i| i.kind == InsnKind::MonitorEnter);
            }
            StatKind::Synchronized { .. } | StatKind::Root { .. } | StatKind::Region { .. } => {}
            _ => stat.contains_monitor_exit = any_child_exit,
        }
    }
}
