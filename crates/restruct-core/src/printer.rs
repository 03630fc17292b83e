//! Pseudo-source rendering and JSON summaries of a finished tree.

use std::fmt::Write;

use serde::Serialize;

use crate::graph::Insn;
use crate::model::{EdgeId, EdgeKind, EdgeMask, LoopKind, StatId, StatKind, StatTree};

/// Render the tree as indented Java-like source.
pub fn print_tree(tree: &StatTree) -> String {
    let mut out = String::new();
    print_stat(tree, tree.root(), &mut out, "");
    out
}

fn label_name(tree: &StatTree, stat: StatId) -> String {
    format!("label{}", tree.stat(stat).serial)
}

fn print_stat(tree: &StatTree, stat: StatId, out: &mut String, indent: &str) {
    if tree.is_labeled(stat) {
        let _ = writeln!(out, "{indent}{}:", label_name(tree, stat));
    }
    let inner = format!("{indent}    ");

    match tree.kind(stat) {
        StatKind::Root { .. } => {
            if let Some(body) = tree.stat(stat).first {
                print_stat(tree, body, out, indent);
            }
            return;
        }
        StatKind::DummyExit => return,
        StatKind::BasicBlock { insns, .. } => print_insns(insns, out, indent),
        StatKind::Sequence => {
            for &child in tree.children(stat) {
                print_stat(tree, child, out, indent);
            }
        }
        StatKind::If(shape) => {
            let head = tree.first_of(stat);
            let cond = print_head(tree, head, out, indent);
            let cond = if shape.negated {
                format!("!({cond})")
            } else {
                cond
            };
            let _ = writeln!(out, "{indent}if ({cond}) {{");
            match (shape.if_stat, shape.if_edge) {
                (Some(then), _) => print_stat(tree, then, out, &inner),
                (None, Some(edge)) => print_jump(tree, edge, out, &inner),
                (None, None) => {}
            }
            if let Some(else_stat) = shape.else_stat {
                let _ = writeln!(out, "{indent}}} else {{");
                print_stat(tree, else_stat, out, &inner);
            }
            let _ = writeln!(out, "{indent}}}");
        }
        StatKind::Loop { kind } => {
            let _ = match kind {
                LoopKind::Infinite | LoopKind::While => writeln!(out, "{indent}while (true) {{"),
                LoopKind::DoWhile => writeln!(out, "{indent}do {{"),
            };
            print_stat(tree, tree.first_of(stat), out, &inner);
            let _ = match kind {
                LoopKind::DoWhile => writeln!(out, "{indent}}} while (true);"),
                _ => writeln!(out, "{indent}}}"),
            };
        }
        StatKind::Switch(shape) => {
            let head = tree.first_of(stat);
            let selector = print_head(tree, head, out, indent);
            let _ = writeln!(out, "{indent}switch ({selector}) {{");
            let body = format!("{inner}    ");
            for (i, &case) in shape.cases.iter().enumerate() {
                for value in shape.case_values.get(i).into_iter().flatten() {
                    let _ = match value {
                        Some(v) => writeln!(out, "{inner}case {v}:"),
                        None => writeln!(out, "{inner}default:"),
                    };
                }
                print_stat(tree, case, out, &body);
            }
            let _ = writeln!(out, "{indent}}}");
        }
        StatKind::TryCatch { exception_types } => {
            let _ = writeln!(out, "{indent}try {{");
            print_stat(tree, tree.first_of(stat), out, &inner);
            for (handler, types) in tree.children(stat).iter().skip(1).zip(exception_types) {
                let _ = writeln!(out, "{indent}}} catch ({}) {{", types.join(" | "));
                print_stat(tree, *handler, out, &inner);
            }
            let _ = writeln!(out, "{indent}}}");
        }
        StatKind::CatchAll {
            handler,
            is_finally,
        } => {
            let _ = writeln!(out, "{indent}try {{");
            print_stat(tree, tree.first_of(stat), out, &inner);
            if *is_finally {
                let _ = writeln!(out, "{indent}}} finally {{");
            } else {
                let _ = writeln!(out, "{indent}}} catch (*) {{");
            }
            print_stat(tree, *handler, out, &inner);
            let _ = writeln!(out, "{indent}}}");
        }
        StatKind::Synchronized { head, body, .. } => {
            let lock = print_head(tree, *head, out, indent);
            let _ = writeln!(out, "{indent}synchronized ({lock}) {{");
            print_stat(tree, *body, out, &inner);
            let _ = writeln!(out, "{indent}}}");
        }
        StatKind::Region { .. } => {
            let _ = writeln!(out, "{indent}region {{");
            for &child in tree.children(stat) {
                print_stat(tree, child, out, &inner);
            }
            let _ = writeln!(out, "{indent}}}");
        }
    }

    for e in tree.succ_edges(stat, EdgeMask::BREAK | EdgeMask::CONTINUE) {
        print_jump(tree, e, out, indent);
    }
}

fn print_insns(insns: &[Insn], out: &mut String, indent: &str) {
    for insn in insns {
        let _ = writeln!(out, "{indent}{};", insn.text);
    }
}

/// Print all but the last instruction of a statement head and return the
/// last one's text, which the caller uses as a condition, selector, or lock.
fn print_head(tree: &StatTree, head: StatId, out: &mut String, indent: &str) -> String {
    match tree.stat(head).exprents().and_then(<[_]>::split_last) {
        Some((last, rest)) => {
            print_insns(rest, out, indent);
            last.text.clone()
        }
        None => String::new(),
    }
}

fn print_jump(tree: &StatTree, e: EdgeId, out: &mut String, indent: &str) {
    let edge = tree.edge(e);
    if !edge.explicit {
        return;
    }
    let keyword = match edge.kind {
        EdgeKind::Break if edge.dest == tree.dummy_exit() => {
            let ends_in_exit = tree
                .stat(edge.source)
                .exprents()
                .and_then(<[_]>::last)
                .is_some_and(Insn::is_exit);
            if !ends_in_exit {
                let _ = writeln!(out, "{indent}return;");
            }
            return;
        }
        EdgeKind::Break => "break",
        EdgeKind::Continue => "continue",
        _ => return,
    };
    match edge.closure.filter(|_| edge.labeled) {
        Some(closure) => {
            let _ = writeln!(out, "{indent}{keyword} {};", label_name(tree, closure));
        }
        None => {
            let _ = writeln!(out, "{indent}{keyword};");
        }
    }
}

// -------------------------------------------------------------------------
// Summary
// -------------------------------------------------------------------------

/// Serializable view of a statement and everything under it.
#[derive(Debug, Clone, Serialize)]
pub struct TreeSummary {
    pub kind: &'static str,
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub insns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jumps: Vec<JumpSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JumpSummary {
    pub kind: EdgeKind,
    pub target: u32,
    pub explicit: bool,
    pub labeled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closure: Option<u32>,
}

impl TreeSummary {
    pub fn of(tree: &StatTree) -> Self {
        Self::of_stat(tree, tree.root())
    }

    pub fn of_stat(tree: &StatTree, stat: StatId) -> Self {
        let s = tree.stat(stat);
        let (block, insns) = match &s.kind {
            StatKind::BasicBlock { block, insns } => {
                (*block, insns.iter().map(|i| i.text.clone()).collect())
            }
            _ => (None, Vec::new()),
        };
        let jumps = tree
            .succ_edges(stat, EdgeMask::DIRECT_ALL)
            .into_iter()
            .map(|e| {
                let edge = tree.edge(e);
                JumpSummary {
                    kind: edge.kind,
                    target: tree.stat(edge.dest).serial,
                    explicit: edge.explicit,
                    labeled: edge.labeled,
                    closure: edge.closure.map(|c| tree.stat(c).serial),
                }
            })
            .collect();
        Self {
            kind: s.kind.name(),
            id: s.serial,
            block,
            insns,
            jumps,
            children: s.stats.iter().map(|&c| Self::of_stat(tree, c)).collect(),
        }
    }

    /// Number of statements in the summary, this one included.
    pub fn stat_count(&self) -> usize {
        1 + self.children.iter().map(TreeSummary::stat_count).sum::<usize>()
    }

    /// Whether any placeholder region survived.
    pub fn has_region(&self) -> bool {
        self.kind == "Region" || self.children.iter().any(TreeSummary::has_region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, IfShape};

    fn attach(tree: &mut StatTree, body: StatId) {
        let root = tree.root();
        let stat = tree.stat_mut(root);
        stat.stats = vec![body];
        stat.first = Some(body);
        tree.stat_mut(body).parent = Some(root);
    }

    #[test]
    fn prints_if_else_with_indentation() {
        let mut tree = StatTree::new();
        let head = tree.new_basic_block(Some(0), vec![Insn::plain("x = 1"), Insn::cond("x > 0")]);
        let then = tree.new_basic_block(Some(1), vec![Insn::plain("a()")]);
        let other = tree.new_basic_block(Some(2), vec![Insn::plain("b()")]);
        let shape = IfShape {
            if_stat: Some(then),
            else_stat: Some(other),
            ..IfShape::default()
        };
        let ifs = tree.new_compound(StatKind::If(shape), head, vec![head, then, other], None);
        tree.set_all_parent(ifs);
        attach(&mut tree, ifs);

        assert_eq!(
            print_tree(&tree),
            "x = 1;\nif (x > 0) {\n    a();\n} else {\n    b();\n}\n"
        );
    }

    #[test]
    fn labeled_break_names_its_closure() {
        let mut tree = StatTree::new();
        let body = tree.new_basic_block(Some(0), vec![Insn::plain("tick()")]);
        let looped = tree.new_compound(
            StatKind::Loop {
                kind: LoopKind::Infinite,
            },
            body,
            vec![body],
            None,
        );
        tree.set_all_parent(looped);
        let after = tree.new_basic_block(Some(1), vec![Insn::plain("done()")]);
        let seq = tree.new_compound(StatKind::Sequence, looped, vec![looped, after], None);
        tree.set_all_parent(seq);
        tree.add_edge(Edge::new(EdgeKind::Break, body, after, Some(looped)));
        attach(&mut tree, seq);

        let label = label_name(&tree, looped);
        assert_eq!(
            print_tree(&tree),
            format!("{label}:\nwhile (true) {{\n    tick();\n    break {label};\n}}\ndone();\n")
        );
    }

    #[test]
    fn implicit_jumps_are_silent() {
        let mut tree = StatTree::new();
        let exit = tree.dummy_exit();
        let a = tree.new_basic_block(Some(0), vec![Insn::plain("a()")]);
        let e = tree.add_edge(Edge::new(EdgeKind::Break, a, exit, None));
        tree.edge_mut(e).explicit = false;
        attach(&mut tree, a);

        assert_eq!(print_tree(&tree), "a();\n");
    }

    #[test]
    fn summary_counts_statements() {
        let mut tree = StatTree::new();
        let a = tree.new_basic_block(Some(0), vec![Insn::plain("a()")]);
        attach(&mut tree, a);

        let summary = TreeSummary::of(&tree);
        assert_eq!(summary.kind, "Root");
        assert_eq!(summary.stat_count(), 2);
        assert!(!summary.has_region());
        assert_eq!(summary.children[0].insns, vec!["a()".to_string()]);
    }
}
