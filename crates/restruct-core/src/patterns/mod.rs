//! Shape matchers for the local pattern scan.
//!
//! Each matcher looks at one candidate head inside a container and, when the
//! shape fits, builds the compound statement around it. The statement is not
//! yet spliced in; the detector does that with
//! [`StatTree::collapse_nodes_to_statement`] and then calls
//! [`ShapeMatcher::after_collapse`].

mod catch;
mod do_loop;
mod if_stat;
mod sequence;
mod switch;

use crate::error::StructurizeError;
use crate::model::{EdgeMask, LastBasic, StatId, StatTree};

pub use catch::{CatchAllMatcher, CatchMatcher};
pub use do_loop::DoLoopMatcher;
pub use if_stat::IfMatcher;
pub use sequence::SequenceMatcher;
pub use switch::SwitchMatcher;

/// A recognizer for one statement shape.
pub trait ShapeMatcher: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Build the compound statement headed by `head`, or `None` when the
    /// shape does not fit. May move edges onto the new statement; must leave
    /// the tree untouched when returning `None`.
    fn detect(&self, tree: &mut StatTree, head: StatId) -> Result<Option<StatId>, StructurizeError>;

    /// Fix-ups that need the statement's final edges.
    fn after_collapse(&self, _tree: &mut StatTree, _stat: StatId) -> Result<(), StructurizeError> {
        Ok(())
    }
}

/// The matchers in scan order: loop, switch, if, sequence, try/catch,
/// catch-all. Synchronized blocks are recognized later as catch-alls.
pub fn default_matchers() -> Vec<Box<dyn ShapeMatcher>> {
    vec![
        Box::new(DoLoopMatcher),
        Box::new(SwitchMatcher),
        Box::new(IfMatcher),
        Box::new(SequenceMatcher),
        Box::new(CatchMatcher),
        Box::new(CatchAllMatcher),
    ]
}

/// The targets of a multi-way head that can be nested under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// Where the arms converge, if anywhere inside the container.
    pub post: Option<StatId>,
    /// Arms in successor order, excluding `post`.
    pub members: Vec<StatId>,
}

fn regular_preds_except(tree: &StatTree, stat: StatId, head: StatId) -> Vec<StatId> {
    let mut preds = tree.predecessors(stat, EdgeMask::REGULAR);
    preds.retain(|&p| p != head);
    preds
}

/// Find the cluster of regular targets of `head` that can become its arms.
///
/// Each arm is entered from `head` or from exactly one other arm, has at
/// most one regular successor, and flows either to another arm or to one
/// shared post node. The first target breaking these rules becomes the post;
/// a second one rejects the head.
pub fn choice_cluster(tree: &StatTree, head: StatId) -> Option<Choice> {
    let targets = tree.successors(head, EdgeMask::REGULAR);
    if targets.contains(&head) {
        return None;
    }

    let mut post: Option<StatId> = None;
    loop {
        let dests: Vec<StatId> = targets.iter().copied().filter(|&t| Some(t) != post).collect();
        let mut members: Vec<StatId> = Vec::new();
        let mut repeat = false;

        for &stat in &dests {
            if tree.stat(stat).last_basic != LastBasic::General {
                if post.is_none() {
                    post = Some(stat);
                    repeat = true;
                    break;
                }
                return None;
            }

            let preds = regular_preds_except(tree, stat, head);
            if preds.contains(&stat) {
                return None;
            }
            if preds.len() > 1 || !preds.iter().all(|p| dests.contains(p)) {
                if post.is_none() {
                    post = Some(stat);
                    repeat = true;
                    break;
                }
                return None;
            } else if let Some(&first) = preds.first() {
                // follow single-entry chains already accepted; reaching
                // `stat` again means the arms form a cycle
                let mut pred = first;
                while members.contains(&pred) {
                    match regular_preds_except(tree, pred, head).first() {
                        Some(&next) => {
                            pred = next;
                            if pred == stat {
                                return None;
                            }
                        }
                        None => break,
                    }
                }
            }

            let succ_edges = tree.succ_edges(stat, EdgeMask::REGULAR);
            if succ_edges.len() > 1 {
                let succs = tree.successors(stat, EdgeMask::REGULAR);
                if succs.iter().any(|s| dests.contains(s)) {
                    return None;
                }
                if post.is_none() {
                    post = Some(stat);
                    repeat = true;
                    break;
                }
                return None;
            } else if let [edge] = succ_edges.as_slice() {
                let dest = tree.edge(*edge).dest;
                if dest == head {
                    return None;
                }
                if Some(dest) != post && !dests.contains(&dest) {
                    if post.is_some() {
                        return None;
                    }
                    if tree.predecessors(dest, EdgeMask::REGULAR).len() > 1 {
                        post = Some(dest);
                        repeat = true;
                        break;
                    }
                    return None;
                }
            }
            members.push(stat);
        }

        if !repeat {
            return Some(Choice { post, members });
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::{cond, flat, plain};
    use super::*;

    #[test]
    fn diamond_converges_on_post() {
        // 0 -> {1, 2} -> 3
        let (tree, _, s) = flat(
            vec![cond("c"), plain("b"), plain("c"), plain("d")],
            &[(0, 1), (0, 2), (1, 3), (2, 3)],
        );
        let choice = choice_cluster(&tree, s[0]).unwrap_or_else(|| panic!("Expected a choice"));
        assert_eq!(choice.post, Some(s[3]));
        assert_eq!(choice.members, vec![s[1], s[2]]);
    }

    #[test]
    fn fallthrough_between_arms_keeps_both() {
        // 0 -> {1, 2}, 1 -> 2: arm 1 falls into arm 2
        let (tree, _, s) = flat(
            vec![cond("c"), plain("b"), plain("d")],
            &[(0, 1), (0, 2), (1, 2)],
        );
        let choice = choice_cluster(&tree, s[0]).unwrap_or_else(|| panic!("Expected a choice"));
        assert_eq!(choice.post, None);
        assert_eq!(choice.members, vec![s[1], s[2]]);
    }

    #[test]
    fn arm_escaping_to_private_node_is_rejected() {
        // x -> 2 as well as 0 -> {1, 2}
        let (tree, _, s) = flat(
            vec![cond("c"), plain("b"), plain("d"), plain("x")],
            &[(0, 1), (0, 2), (3, 2), (1, 3)],
        );
        let choice = choice_cluster(&tree, s[0]);
        // arm 1 escapes to a node nothing else enters
        assert_eq!(choice, None);
    }

    #[test]
    fn two_escaping_arms_are_rejected() {
        // 0 -> {1, 2}, 1 -> 3, 2 -> 4, 3 and 4 entered elsewhere too
        let (tree, _, s) = flat(
            vec![plain("x"), cond("c"), plain("b"), plain("d"), plain("e"), plain("f")],
            &[(0, 1), (1, 2), (1, 5), (2, 3), (5, 4), (0, 3), (0, 4)],
        );
        assert_eq!(choice_cluster(&tree, s[1]), None);
    }
}
