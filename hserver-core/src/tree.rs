// Path segment tree
//
// Nodes live in an arena and refer to each other by `NodeId`. Parent links
// are plain indices, so ancestor walks never fight the borrow checker.

use crate::handler::BoxedHandler;
use crate::params_tree::Pattern;
use crate::stage::Stage;
use crate::verb::Verb;
use std::collections::HashMap;
use std::fmt;

/// Handle to a node inside a [`PathTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Parameter patterns of a node, per verb, in registration order.
pub type ParamMap = HashMap<Verb, Vec<Pattern>>;

/// Handlers of a node, per stage and verb, in registration order.
pub type StageMap = HashMap<Stage, HashMap<Verb, Vec<BoxedHandler>>>;

/// A single path segment with its annotations.
#[derive(Debug, Default)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    params: Option<ParamMap>,
    stages: Option<StageMap>,
}

impl Node {
    fn new(name: &str, parent: NodeId) -> Self {
        Self {
            name: name.to_string(),
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether any parameter pattern was ever recorded on this node.
    pub fn has_params(&self) -> bool {
        self.params.is_some()
    }

    /// Patterns recorded for exactly `verb`.
    pub fn patterns(&self, verb: &str) -> &[Pattern] {
        self.params
            .as_ref()
            .and_then(|params| params.get(verb))
            .map_or(&[], Vec::as_slice)
    }

    /// Handlers registered for exactly `stage` and `verb`.
    pub fn handlers(&self, stage: Stage, verb: &str) -> &[BoxedHandler] {
        self.stages
            .as_ref()
            .and_then(|stages| stages.get(&stage))
            .and_then(|verbs| verbs.get(verb))
            .map_or(&[], Vec::as_slice)
    }
}

/// Split a path into its non-empty segments.
///
/// `a/b`, `/a/b` and `//a/b/` all yield `["a", "b"]`.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Tree keyed by `/`-separated path segments.
///
/// The root always exists and has an empty name. Children keep insertion
/// order.
#[derive(Debug)]
pub struct PathTree {
    nodes: Vec<Node>,
}

impl PathTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    /// The root node, named `""`.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Look up a node by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was issued by another tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Children of `id` in insertion order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the root exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// The child of `parent` named `name`, if any.
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child.0].name == name)
    }

    pub(crate) fn child_or_make(&mut self, parent: NodeId, name: &str) -> NodeId {
        if let Some(child) = self.child(parent, name) {
            return child;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, parent));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Fetch the node for `path`, creating any missing segment.
    pub fn find_or_make(&mut self, path: &str) -> NodeId {
        segments(path).fold(self.root(), |current, name| {
            self.child_or_make(current, name)
        })
    }

    /// The node for `path`, if every segment exists.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        segments(path).try_fold(self.root(), |current, name| self.child(current, name))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// Nodes from the root down to the node for `path`, inclusive.
    ///
    /// Empty when any segment is missing.
    pub fn path(&self, path: &str) -> Vec<NodeId> {
        let mut nodes = vec![self.root()];
        for name in segments(path) {
            let Some(current) = nodes.last().copied() else {
                break;
            };
            match self.child(current, name) {
                Some(child) => nodes.push(child),
                None => return Vec::new(),
            }
        }
        nodes
    }

    /// Nodes from the root down to `id`, inclusive.
    pub fn ancestry(&self, id: NodeId) -> Vec<NodeId> {
        let mut nodes = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            nodes.push(parent);
            current = parent;
        }
        nodes.reverse();
        nodes
    }

    pub(crate) fn push_pattern(&mut self, id: NodeId, verb: Verb, pattern: Pattern) {
        self.nodes[id.0]
            .params
            .get_or_insert_with(HashMap::new)
            .entry(verb)
            .or_default()
            .push(pattern);
    }

    pub(crate) fn push_handler(
        &mut self,
        id: NodeId,
        stage: Stage,
        verb: Verb,
        handler: BoxedHandler,
    ) {
        self.nodes[id.0]
            .stages
            .get_or_insert_with(HashMap::new)
            .entry(stage)
            .or_default()
            .entry(verb)
            .or_default()
            .push(handler);
    }

    /// Graft `other` into this tree so that its root becomes the node at `at`.
    ///
    /// Nodes that already exist are merged: the grafted patterns and handlers
    /// are appended after the existing ones.
    pub fn mount(&mut self, mut other: PathTree, at: &str) {
        let target = self.find_or_make(at);
        let source = other.root();
        self.graft(target, &mut other, source);
    }

    fn graft(&mut self, target: NodeId, other: &mut PathTree, source: NodeId) {
        let node = &mut other.nodes[source.0];
        let params = node.params.take();
        let stages = node.stages.take();
        let children = std::mem::take(&mut node.children);

        for (verb, patterns) in params.into_iter().flatten() {
            for pattern in patterns {
                self.push_pattern(target, verb.clone(), pattern);
            }
        }
        for (stage, verbs) in stages.into_iter().flatten() {
            for (verb, handlers) in verbs {
                for handler in handlers {
                    self.push_handler(target, stage, verb.clone(), handler);
                }
            }
        }

        for child in children {
            let name = std::mem::take(&mut other.nodes[child.0].name);
            let next = self.child_or_make(target, &name);
            self.graft(next, other, child);
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        for &child in &self.nodes[id.0].children {
            writeln!(f, "{:indent$}{}", "", self.nodes[child.0].name, indent = depth * 2)?;
            self.render(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}

/// One line per node, children indented by two spaces below their parent.
impl fmt::Display for PathTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "/")?;
        self.render(f, self.root(), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::sync_handler;

    #[test]
    fn test_find_or_make_is_idempotent() {
        let mut tree = PathTree::new();
        let a = tree.find_or_make("/a/b/c");
        let b = tree.find_or_make("a/b/c");
        let c = tree.find_or_make("//a/b/c/");

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.find_or_make("/"), tree.root());
    }

    #[test]
    fn test_path_walk() {
        let mut tree = PathTree::new();
        let c = tree.find_or_make("/a/b/c");

        let nodes = tree.path("/a/b/c");
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[0], tree.root());
        assert_eq!(nodes[3], c);
        assert_eq!(tree.ancestry(c), nodes);

        assert_eq!(tree.path("/"), vec![tree.root()]);
        assert!(tree.path("/a/x").is_empty());
        assert!(tree.exists("/a/b"));
        assert!(!tree.exists("/a/b/c/d"));
    }

    #[test]
    fn test_names_and_parents() {
        let mut tree = PathTree::new();
        let b = tree.find_or_make("/a/b");
        let a = tree.find("/a").unwrap();

        assert_eq!(tree.node(b).name(), "b");
        assert_eq!(tree.node(b).parent(), Some(a));
        assert_eq!(tree.node(tree.root()).parent(), None);
        assert_eq!(tree.children(a), &[b]);
    }

    #[test]
    fn test_display() {
        let mut tree = PathTree::new();
        tree.find_or_make("/a/b");
        tree.find_or_make("/a/c");
        tree.find_or_make("/d");

        assert_eq!(tree.to_string(), "/\n  a\n    b\n    c\n  d\n");
        assert_eq!(PathTree::new().to_string(), "/\n");
    }

    #[test]
    fn test_mount_merges_annotations() {
        let first = sync_handler(|_| Ok(None));
        let second = sync_handler(|_| Ok(None));

        let mut parent = PathTree::new();
        let node = parent.find_or_make("/a/b");
        parent.push_handler(node, Stage::Accept, Verb::any(), first.clone());

        let mut child = PathTree::new();
        let root = child.root();
        child.push_handler(root, Stage::Accept, Verb::any(), second.clone());
        child.find_or_make("/c");

        parent.mount(child, "/a/b");

        let handlers = parent.node(node).handlers(Stage::Accept, "*");
        assert_eq!(handlers.len(), 2);
        assert!(handlers[0].ptr_eq(&first));
        assert!(handlers[1].ptr_eq(&second));
        assert!(parent.exists("/a/b/c"));
        assert_eq!(parent.to_string(), "/\n  a\n    b\n      c\n");
    }

    #[test]
    fn test_mount_at_root_merges_children() {
        let mut parent = PathTree::new();
        parent.find_or_make("/a/x");

        let mut child = PathTree::new();
        child.find_or_make("/a/y");
        child.find_or_make("/b");

        parent.mount(child, "/");
        assert_eq!(parent.to_string(), "/\n  a\n    x\n    y\n  b\n");
    }
}
