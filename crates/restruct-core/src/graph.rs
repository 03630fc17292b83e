//! Input block graph.
//!
//! This is the contract with whatever decodes bytecode into basic blocks.
//! Instructions are opaque text plus a small kind tag; the structurizer only
//! cares whether a block ends in a conditional, a switch, or an exit, and
//! whether it touches a monitor.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Id used by [`GraphBuilder`] for the merged return block.
pub const RETURN_BLOCK: u32 = u32::MAX;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph has no blocks")]
    Empty,
    #[error("first block {0} is not in the graph")]
    MissingFirst(u32),
    #[error("block id {0} is used twice")]
    DuplicateBlock(u32),
    #[error("block {block} names unknown successor {succ}")]
    UnknownSuccessor { block: u32, succ: u32 },
    #[error("block {block} has exception successor {handler} without a covering range")]
    MissingRange { block: u32, handler: u32 },
}

/// What an instruction means for control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsnKind {
    #[default]
    Plain,
    /// Two-way conditional. The owning block has `succs = [fallthrough, target]`.
    If,
    /// Multi-way dispatch. `succs[0]` is the default, `succs[i + 1]` matches `values[i]`.
    Switch { values: Vec<i64> },
    Return {
        #[serde(default)]
        has_value: bool,
    },
    Throw,
    MonitorEnter,
    MonitorExit,
}

/// One pre-decoded instruction or expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insn {
    pub text: String,
    #[serde(default)]
    pub kind: InsnKind,
}

impl Insn {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: InsnKind::Plain,
        }
    }

    pub fn cond(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: InsnKind::If,
        }
    }

    pub fn switch(text: impl Into<String>, values: Vec<i64>) -> Self {
        Self {
            text: text.into(),
            kind: InsnKind::Switch { values },
        }
    }

    pub fn ret(value: Option<&str>) -> Self {
        match value {
            Some(v) => Self {
                text: format!("return {v}"),
                kind: InsnKind::Return { has_value: true },
            },
            None => Self {
                text: "return".into(),
                kind: InsnKind::Return { has_value: false },
            },
        }
    }

    pub fn throw(value: impl Into<String>) -> Self {
        Self {
            text: format!("throw {}", value.into()),
            kind: InsnKind::Throw,
        }
    }

    pub fn monitor_enter(lock: impl Into<String>) -> Self {
        Self {
            text: lock.into(),
            kind: InsnKind::MonitorEnter,
        }
    }

    pub fn monitor_exit(lock: impl Into<String>) -> Self {
        Self {
            text: format!("monitorexit({})", lock.into()),
            kind: InsnKind::MonitorExit,
        }
    }

    /// `return` or `throw`.
    pub fn is_exit(&self) -> bool {
        matches!(self.kind, InsnKind::Return { .. } | InsnKind::Throw)
    }

    pub fn is_void_return(&self) -> bool {
        matches!(self.kind, InsnKind::Return { has_value: false })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: u32,
    #[serde(default)]
    pub insns: Vec<Insn>,
    #[serde(default)]
    pub succs: Vec<u32>,
    #[serde(default)]
    pub exc_succs: Vec<u32>,
}

/// A protected range and the handler guarding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRange {
    pub handler: u32,
    pub protected: Vec<u32>,
    /// Guarded exception type names; `None` catches everything.
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub circular: bool,
}

impl ExceptionRange {
    /// A range whose handler lies inside the code it protects.
    pub fn is_circular(&self) -> bool {
        self.circular || self.protected.contains(&self.handler)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGraph {
    pub blocks: Vec<Block>,
    pub first: u32,
    /// Merged normal-return block. Not listed in `blocks`.
    pub last: u32,
    /// Blocks whose outgoing edges leave a `finally` handler.
    #[serde(default)]
    pub finally_exits: BTreeSet<u32>,
    #[serde(default)]
    pub ranges: Vec<ExceptionRange>,
}

impl BlockGraph {
    pub fn block(&self, id: u32) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// The range through which `source` reaches `handler`.
    pub fn range(&self, handler: u32, source: u32) -> Option<&ExceptionRange> {
        self.ranges
            .iter()
            .find(|r| r.handler == handler && r.protected.contains(&source))
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if self.blocks.is_empty() {
            return Err(GraphError::Empty);
        }
        let mut ids = HashSet::new();
        for block in &self.blocks {
            if !ids.insert(block.id) {
                return Err(GraphError::DuplicateBlock(block.id));
            }
        }
        if !ids.contains(&self.first) {
            return Err(GraphError::MissingFirst(self.first));
        }
        for block in &self.blocks {
            for &succ in &block.succs {
                if succ != self.last && !ids.contains(&succ) {
                    return Err(GraphError::UnknownSuccessor {
                        block: block.id,
                        succ,
                    });
                }
            }
            for &handler in &block.exc_succs {
                if !ids.contains(&handler) {
                    return Err(GraphError::UnknownSuccessor {
                        block: block.id,
                        succ: handler,
                    });
                }
                if self.range(handler, block.id).is_none() {
                    return Err(GraphError::MissingRange {
                        block: block.id,
                        handler,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Incremental construction of a [`BlockGraph`].
///
/// Blocks are numbered from zero in creation order. Edges to
/// [`GraphBuilder::exit`] target [`RETURN_BLOCK`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    blocks: Vec<Block>,
    ranges: Vec<ExceptionRange>,
    finally_exits: BTreeSet<u32>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&mut self, insns: Vec<Insn>) -> u32 {
        let id = self.blocks.len() as u32;
        self.blocks.push(Block {
            id,
            insns,
            succs: Vec::new(),
            exc_succs: Vec::new(),
        });
        id
    }

    pub fn edge(&mut self, from: u32, to: u32) -> &mut Self {
        self.blocks[from as usize].succs.push(to);
        self
    }

    /// Flow from `from` into the merged return block.
    pub fn exit(&mut self, from: u32) -> &mut Self {
        self.edge(from, RETURN_BLOCK)
    }

    /// Protect `protected` with `handler`. `types = None` is a catch-all.
    pub fn handler(&mut self, handler: u32, protected: &[u32], types: Option<&[&str]>) -> &mut Self {
        for &block in protected {
            self.blocks[block as usize].exc_succs.push(handler);
        }
        self.ranges.push(ExceptionRange {
            handler,
            protected: protected.to_vec(),
            types: types.map(|t| t.iter().map(|s| s.to_string()).collect()),
            circular: false,
        });
        self
    }

    pub fn finally_exit(&mut self, block: u32) -> &mut Self {
        self.finally_exits.insert(block);
        self
    }

    pub fn finish(self, first: u32) -> BlockGraph {
        BlockGraph {
            blocks: self.blocks,
            first,
            last: RETURN_BLOCK,
            finally_exits: self.finally_exits,
            ranges: self.ranges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_numbers_blocks_in_order() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![Insn::plain("x = 1")]);
        let b = g.block(vec![Insn::ret(None)]);
        g.edge(a, b).exit(b);
        let graph = g.finish(a);

        assert_eq!((a, b), (0, 1));
        assert_eq!(graph.block(b).map(|blk| blk.succs.clone()), Some(vec![RETURN_BLOCK]));
        assert_eq!(graph.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_unknown_successor() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![]);
        g.edge(a, 7);
        let graph = g.finish(a);
        assert_eq!(
            graph.validate(),
            Err(GraphError::UnknownSuccessor { block: 0, succ: 7 })
        );
    }

    #[test]
    fn validate_rejects_missing_first() {
        let mut g = GraphBuilder::new();
        g.block(vec![]);
        let graph = g.finish(3);
        assert_eq!(graph.validate(), Err(GraphError::MissingFirst(3)));
    }

    #[test]
    fn range_lookup_and_circularity() {
        let mut g = GraphBuilder::new();
        let a = g.block(vec![]);
        let h = g.block(vec![Insn::throw("e")]);
        g.handler(h, &[a], Some(&["java/io/IOException"]));
        let mut graph = g.finish(a);

        let range = graph.range(h, a).cloned();
        assert_eq!(
            range.as_ref().and_then(|r| r.types.clone()),
            Some(vec!["java/io/IOException".to_string()])
        );
        assert!(!range.as_ref().is_some_and(|r| r.is_circular()));

        graph.ranges[0].protected.push(h);
        assert!(graph.ranges[0].is_circular());
    }

    #[test]
    fn graph_roundtrips_through_json() {
        let json = r#"{
            "blocks": [
                {"id": 0, "insns": [{"text": "c", "kind": "if"}], "succs": [1, 2]},
                {"id": 1, "insns": [{"text": "return", "kind": {"return": {}}}], "succs": [9]},
                {"id": 2, "insns": [{"text": "s", "kind": {"switch": {"values": [1, 2]}}}], "succs": [9]}
            ],
            "first": 0,
            "last": 9
        }"#;
        let graph: BlockGraph = serde_json::from_str(json).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(graph.blocks.len(), 3);
        assert!(graph.blocks[1].insns[0].is_void_return());
        assert_eq!(
            graph.blocks[2].insns[0].kind,
            InsnKind::Switch { values: vec![1, 2] }
        );
        assert_eq!(graph.validate(), Ok(()));
    }
}
