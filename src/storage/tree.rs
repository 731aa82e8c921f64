//! Trace tree reconstruction
//!
//! Traces are stored flat, linked only by `parent_id`. Walking them has to
//! tolerate corrupt data: a transaction may (directly or through a chain)
//! name one of its own descendants as parent. The walk keeps, for every
//! pending node, the set of ids on its path from the root and refuses to
//! descend into an id already on that path.

use std::collections::{HashMap, HashSet};

use super::schema::TransactionRow;
use crate::wire::{TransactionInfo, TransactionTree};

/// Index of transactions by parent id
pub struct ChildIndex<'a> {
    by_parent: HashMap<&'a str, Vec<&'a TransactionRow>>,
}

impl<'a> ChildIndex<'a> {
    pub fn new(rows: &'a [TransactionRow]) -> Self {
        let mut by_parent: HashMap<&str, Vec<&TransactionRow>> = HashMap::new();
        for row in rows {
            if !row.parent_id.is_empty() {
                by_parent.entry(row.parent_id.as_str()).or_default().push(row);
            }
        }
        for children in by_parent.values_mut() {
            children.sort_by(|a, b| {
                a.start_time
                    .cmp(&b.start_time)
                    .then_with(|| a.transaction_id.cmp(&b.transaction_id))
            });
        }
        Self { by_parent }
    }

    pub fn children(&self, id: &str) -> &[&'a TransactionRow] {
        self.by_parent.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Every descendant of `root_id`, in depth-first pre-order.
///
/// `rows` should hold the transactions of one application. A node reachable
/// through several distinct paths is reported once per path.
pub fn collect_descendants<'a>(root_id: &'a str, rows: &'a [TransactionRow]) -> Vec<TransactionRow> {
    let index = ChildIndex::new(rows);
    let mut out = Vec::new();

    // Ids on the path from the root to the top of the stack
    let mut path: HashSet<&str> = HashSet::from([root_id]);
    // (node id, index of the next child to visit)
    let mut stack: Vec<(&str, usize)> = vec![(root_id, 0)];

    while let Some(frame) = stack.last_mut() {
        let (id, next) = *frame;
        let Some(&child) = index.children(id).get(next) else {
            path.remove(id);
            stack.pop();
            continue;
        };
        frame.1 += 1;

        let child_id = child.transaction_id.as_str();
        if !path.insert(child_id) {
            continue;
        }
        out.push(child.clone());
        stack.push((child_id, 0));
    }

    out
}

struct Frame<'a> {
    node: &'a TransactionRow,
    next: usize,
    children: Vec<TransactionTree>,
}

/// Build the nested tree rooted at `root`, cutting cycles the same way.
///
/// Nodes are assembled bottom-up as their frames leave the stack, so the
/// depth of the trace never turns into call depth.
pub fn build_tree<'a>(
    root: &'a TransactionRow,
    rows: &'a [TransactionRow],
    convert: &impl Fn(&TransactionRow) -> TransactionInfo,
) -> TransactionTree {
    let index = ChildIndex::new(rows);
    let mut path: HashSet<&str> = HashSet::from([root.transaction_id.as_str()]);
    let mut stack = vec![Frame {
        node: root,
        next: 0,
        children: Vec::new(),
    }];
    let mut finished = None;

    while let Some(frame) = stack.last_mut() {
        let node = frame.node;
        if let Some(&child) = index.children(&node.transaction_id).get(frame.next) {
            frame.next += 1;
            if path.insert(child.transaction_id.as_str()) {
                stack.push(Frame {
                    node: child,
                    next: 0,
                    children: Vec::new(),
                });
            }
            continue;
        }

        let Some(done) = stack.pop() else { break };
        path.remove(done.node.transaction_id.as_str());
        let tree = TransactionTree {
            transaction: convert(done.node),
            children: done.children,
        };
        match stack.last_mut() {
            Some(parent) => parent.children.push(tree),
            None => finished = Some(tree),
        }
    }

    finished.unwrap_or_else(|| TransactionTree {
        transaction: convert(root),
        children: Vec::new(),
    })
}
