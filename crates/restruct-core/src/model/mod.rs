//! Statement tree and control edges.
//!
//! Statements and edges live in arenas owned by [`StatTree`]. A statement
//! keeps its children in `stats`, its outgoing and incoming edges in insertion
//! order, and the edges it closes (owns for label scoping) in `labels`.

mod tree;

use std::collections::BTreeSet;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

use crate::define_entity;
use crate::graph::{Insn, InsnKind};

pub use tree::StatTree;

define_entity!(StatId, "stat");
define_entity!(EdgeId, "edge");

static NEXT_SERIAL: AtomicU32 = AtomicU32::new(1);

/// Process-wide statement numbering, used for label names.
pub(crate) fn next_serial() -> u32 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

// -------------------------------------------------------------------------
// Edges
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EdgeKind {
    Regular,
    Exception,
    Break,
    Continue,
    FinallyExit,
}

impl EdgeKind {
    fn bit(self) -> u8 {
        match self {
            EdgeKind::Regular => 1,
            EdgeKind::Exception => 2,
            EdgeKind::Break => 4,
            EdgeKind::Continue => 8,
            EdgeKind::FinallyExit => 16,
        }
    }
}

/// A set of [`EdgeKind`]s used to filter edge queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeMask(u8);

impl EdgeMask {
    pub const REGULAR: Self = Self(1);
    pub const EXCEPTION: Self = Self(2);
    pub const BREAK: Self = Self(4);
    pub const CONTINUE: Self = Self(8);
    pub const FINALLY_EXIT: Self = Self(16);
    /// Every edge that transfers control without an exception.
    pub const DIRECT_ALL: Self = Self(1 | 4 | 8 | 16);
    pub const ALL: Self = Self(31);

    pub fn contains(self, kind: EdgeKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl BitOr for EdgeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<EdgeKind> for EdgeMask {
    fn from(kind: EdgeKind) -> Self {
        Self(kind.bit())
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub kind: EdgeKind,
    pub source: StatId,
    pub dest: StatId,
    /// Statement this jump belongs to for label scoping.
    pub closure: Option<StatId>,
    /// Needs a jump keyword when printed.
    pub explicit: bool,
    /// The keyword needs a label.
    pub labeled: bool,
    /// Guarded types of an exception edge; `None` for catch-all.
    pub exceptions: Option<Vec<String>>,
}

impl Edge {
    pub fn new(kind: EdgeKind, source: StatId, dest: StatId, closure: Option<StatId>) -> Self {
        Self {
            kind,
            source,
            dest,
            closure,
            explicit: true,
            labeled: true,
            exceptions: None,
        }
    }

    pub fn regular(source: StatId, dest: StatId) -> Self {
        Self::new(EdgeKind::Regular, source, dest, None)
    }

    pub fn exception(source: StatId, dest: StatId, exceptions: Option<Vec<String>>) -> Self {
        Self {
            exceptions,
            ..Self::new(EdgeKind::Exception, source, dest, None)
        }
    }
}

// -------------------------------------------------------------------------
// Statements
// -------------------------------------------------------------------------

/// How a statement's last basic block ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LastBasic {
    #[default]
    General,
    If,
    Switch,
}

impl LastBasic {
    pub fn of_insns(insns: &[Insn]) -> Self {
        match insns.last().map(|i| &i.kind) {
            Some(InsnKind::If) => LastBasic::If,
            Some(InsnKind::Switch { .. }) => LastBasic::Switch,
            _ => LastBasic::General,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LoopKind {
    /// `while (true)`; refined by later passes.
    #[default]
    Infinite,
    While,
    DoWhile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IfShape {
    pub if_stat: Option<StatId>,
    pub else_stat: Option<StatId>,
    pub if_edge: Option<EdgeId>,
    pub else_edge: Option<EdgeId>,
    pub negated: bool,
}

impl IfShape {
    pub fn has_else(&self) -> bool {
        self.else_stat.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchShape {
    pub default_edge: Option<EdgeId>,
    pub cases: Vec<StatId>,
    pub case_edges: Vec<Vec<EdgeId>>,
    /// Parallel to `case_edges`; `None` marks the default label.
    pub case_values: Vec<Vec<Option<i64>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatKind {
    BasicBlock {
        /// Source block id; `None` for synthesized leaves.
        block: Option<u32>,
        insns: Vec<Insn>,
    },
    Sequence,
    If(IfShape),
    Loop {
        kind: LoopKind,
    },
    Switch(SwitchShape),
    /// Handlers are `stats[1..]`, with their guarded types in the same order.
    TryCatch {
        exception_types: Vec<Vec<String>>,
    },
    CatchAll {
        handler: StatId,
        is_finally: bool,
    },
    Synchronized {
        head: StatId,
        body: StatId,
        handler: StatId,
    },
    Root {
        dummy_exit: StatId,
    },
    DummyExit,
    /// A collapsed region still awaiting decomposition. `resolved` is set
    /// once it has been reduced to a single child.
    Region {
        resolved: bool,
    },
}

impl StatKind {
    pub fn name(&self) -> &'static str {
        match self {
            StatKind::BasicBlock { .. } => "BasicBlock",
            StatKind::Sequence => "Sequence",
            StatKind::If(_) => "If",
            StatKind::Loop { .. } => "Loop",
            StatKind::Switch(_) => "Switch",
            StatKind::TryCatch { .. } => "TryCatch",
            StatKind::CatchAll { .. } => "CatchAll",
            StatKind::Synchronized { .. } => "Synchronized",
            StatKind::Root { .. } => "Root",
            StatKind::DummyExit => "DummyExit",
            StatKind::Region { .. } => "Region",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stat {
    pub kind: StatKind,
    pub serial: u32,
    pub parent: Option<StatId>,
    pub stats: Vec<StatId>,
    pub first: Option<StatId>,
    /// Continuation chosen by a matcher; consumed by the collapse.
    pub post: Option<StatId>,
    pub last_basic: LastBasic,
    pub continue_set: BTreeSet<StatId>,
    pub monitor_enter: bool,
    pub contains_monitor_exit: bool,
    pub(crate) succs: Vec<EdgeId>,
    pub(crate) preds: Vec<EdgeId>,
    pub(crate) labels: Vec<EdgeId>,
}

impl Stat {
    pub fn new(kind: StatKind) -> Self {
        let last_basic = match &kind {
            StatKind::BasicBlock { insns, .. } => LastBasic::of_insns(insns),
            _ => LastBasic::General,
        };
        Self {
            kind,
            serial: next_serial(),
            parent: None,
            stats: Vec::new(),
            first: None,
            post: None,
            last_basic,
            continue_set: BTreeSet::new(),
            monitor_enter: false,
            contains_monitor_exit: false,
            succs: Vec::new(),
            preds: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Instruction list of a leaf; `None` for compound statements.
    pub fn exprents(&self) -> Option<&[Insn]> {
        match &self.kind {
            StatKind::BasicBlock { insns, .. } => Some(insns),
            _ => None,
        }
    }

    pub fn is_basic_block(&self) -> bool {
        matches!(self.kind, StatKind::BasicBlock { .. })
    }

    /// A leaf with no instructions.
    pub fn is_empty_block(&self) -> bool {
        self.exprents().is_some_and(|e| e.is_empty())
    }
}
