//! Decode trace tree
//!
//! The reader reports every field it consumes through the [`Trace`] trait.
//! [`TreeBuilder`] turns those reports into a [`TreeNode`] tree whose leaves
//! carry the exact bit range of each field; [`NoTrace`] drops them.

use crate::Error;
use serde::Serialize;
use std::fmt;

/// Half-open range of absolute bit offsets into the decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BitRange {
    /// First bit of the range
    pub start: u64,
    /// One past the last bit of the range
    pub end: u64,
}

impl BitRange {
    /// Creates a range; `end` is clamped to be at least `start`.
    pub fn new(start: u64, end: u64) -> Self {
        BitRange {
            start,
            end: end.max(start),
        }
    }

    /// Number of bits covered.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true for a zero-width range.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Smallest range covering both.
    pub fn union(self, other: BitRange) -> BitRange {
        BitRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for BitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

/// One node of the decode tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    /// Field name and decoded value, or a block/record description
    pub label: String,
    /// Bits the node covers; inferred from the children when not explicit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<BitRange>,
    /// Child nodes in stream order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Creates a node without a range or children.
    pub fn new(label: impl Into<String>) -> Self {
        TreeNode {
            label: label.into(),
            range: None,
            children: Vec::new(),
        }
    }

    /// Creates a leaf covering `range`.
    pub fn leaf(label: impl Into<String>, range: BitRange) -> Self {
        TreeNode {
            label: label.into(),
            range: Some(range),
            children: Vec::new(),
        }
    }

    /// Hull of the children's ranges.
    pub fn children_range(&self) -> Option<BitRange> {
        self.children
            .iter()
            .filter_map(|child| child.range)
            .reduce(BitRange::union)
    }

    /// Iterates over this node and all descendants, depth first.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Returns the first node (depth first) whose label starts with `prefix`.
    pub fn find(&self, prefix: &str) -> Option<&TreeNode> {
        self.walk().find(|node| node.label.starts_with(prefix))
    }

    /// Returns the direct children whose label starts with `prefix`.
    pub fn children_labelled<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a TreeNode> + 'a {
        self.children
            .iter()
            .filter(move |child| child.label.starts_with(prefix))
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.label, indent = depth * 2)?;
        if let Some(range) = self.range {
            write!(f, " {range}")?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Depth-first iterator returned by [`TreeNode::walk`].
pub struct Walk<'a> {
    stack: Vec<&'a TreeNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Receiver of decode progress.
///
/// Labels are passed as [`fmt::Arguments`] so a receiver that ignores them
/// never formats anything.
pub trait Trace {
    /// Opens a child of the current node and makes it current.
    fn push(&mut self, label: fmt::Arguments<'_>);

    /// Closes the current node.
    fn pop(&mut self);

    /// Appends a closed child covering `start..end` (absolute bits).
    fn leaf(&mut self, start: u64, end: u64, label: fmt::Arguments<'_>);

    /// Replaces the label of the current node.
    fn relabel(&mut self, label: fmt::Arguments<'_>);

    /// Replaces the label of the most recently closed child of the current
    /// node, if there is one.
    fn relabel_last(&mut self, label: fmt::Arguments<'_>);
}

/// A [`Trace`] that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrace;

impl Trace for NoTrace {
    fn push(&mut self, _label: fmt::Arguments<'_>) {}
    fn pop(&mut self) {}
    fn leaf(&mut self, _start: u64, _end: u64, _label: fmt::Arguments<'_>) {}
    fn relabel(&mut self, _label: fmt::Arguments<'_>) {}
    fn relabel_last(&mut self, _label: fmt::Arguments<'_>) {}
}

/// Builds a [`TreeNode`] tree from [`Trace`] calls.
///
/// The builder keeps a stack of open nodes under a root. Closing a node that
/// has no explicit range gives it the hull of its children's ranges.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    stack: Vec<TreeNode>,
}

impl TreeBuilder {
    /// Creates a builder whose root carries `label`.
    pub fn new(label: impl Into<String>) -> Self {
        TreeBuilder {
            stack: vec![TreeNode::new(label)],
        }
    }

    /// Number of open nodes below the root.
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    fn top(&mut self) -> &mut TreeNode {
        // The root is never popped.
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn close_top(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        if let Some(mut node) = self.stack.pop() {
            if node.range.is_none() {
                node.range = node.children_range();
            }
            self.top().children.push(node);
        }
    }

    /// Closes every open node and returns the root.
    pub fn finish(mut self) -> TreeNode {
        while self.stack.len() > 1 {
            self.close_top();
        }
        let mut root = self.stack.pop().unwrap_or_else(|| TreeNode::new(""));
        if root.range.is_none() {
            root.range = root.children_range();
        }
        root
    }

    /// Records `error` at the point of failure and closes the tree.
    ///
    /// The innermost open node receives an `error:` leaf and every node that
    /// was still open is marked `[incomplete]`.
    pub fn fail(mut self, error: &Error) -> TreeNode {
        self.top()
            .children
            .push(TreeNode::new(format!("error: {} ({})", error, error.kind())));
        for node in self.stack.iter_mut().skip(1) {
            node.label.push_str(" [incomplete]");
        }
        self.finish()
    }
}

impl Trace for TreeBuilder {
    fn push(&mut self, label: fmt::Arguments<'_>) {
        self.stack.push(TreeNode::new(label.to_string()));
    }

    fn pop(&mut self) {
        self.close_top();
    }

    fn leaf(&mut self, start: u64, end: u64, label: fmt::Arguments<'_>) {
        let node = TreeNode::leaf(label.to_string(), BitRange::new(start, end));
        self.top().children.push(node);
    }

    fn relabel(&mut self, label: fmt::Arguments<'_>) {
        self.top().label = label.to_string();
    }

    fn relabel_last(&mut self, label: fmt::Arguments<'_>) {
        if let Some(child) = self.top().children.last_mut() {
            child.label = label.to_string();
        }
    }
}
