use std::collections::BTreeMap;

use crate::config::KeyMode;
use crate::value::StateValue;

/// Leaves below a branch, keyed by their path relative to it.
///
/// `get("home")` over `home/devices/1` yields `{"devices/1": ..}`.
pub type Branch = BTreeMap<String, StateValue>;

/// Segment-keyed tree holding the store's values.
///
/// In hierarchical mode a key such as `home/devices/1` is split on `/` and
/// every segment but the last becomes a branch. Writing a leaf where a branch
/// lives replaces the whole branch; writing below an existing leaf turns that
/// leaf into a branch. In flat mode every key is a single segment.
///
/// Reading a branch yields its leaves as a [`Branch`] container.
///
/// # Examples
///
/// ```ignore
/// let mut trie = StateTrie::new(KeyMode::Hierarchical);
/// trie.insert("a/b", StateValue::new(1u32));
/// trie.insert("a/b/c", StateValue::new(2u32)); // "a/b" is now a branch
/// assert!(trie.get("a/b").unwrap().is::<Branch>());
/// ```
pub struct StateTrie {
    mode: KeyMode,
    root: BTreeMap<String, Node>,
}

enum Node {
    Leaf(StateValue),
    Branch(BTreeMap<String, Node>),
}

impl StateTrie {
    pub fn new(mode: KeyMode) -> Self {
        Self {
            mode,
            root: BTreeMap::new(),
        }
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// Store `value` at `key`, returning the leaf previously stored there.
    ///
    /// A branch that gets overwritten is not reported as a previous value.
    pub fn insert(&mut self, key: &str, value: StateValue) -> Option<StateValue> {
        let segments = self.mode.segments(key);
        let (last, parents) = segments.split_last()?;

        let mut level = &mut self.root;
        for segment in parents {
            let node = level
                .entry(segment.to_string())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));
            level = into_branch(node);
        }

        match level.insert(last.to_string(), Node::Leaf(value)) {
            Some(Node::Leaf(previous)) => Some(previous),
            _ => None,
        }
    }

    /// Read the value at `key`.
    ///
    /// A branch reads as a fresh [`Branch`] of its leaves. Only a missing
    /// path yields `None`.
    pub fn get(&self, key: &str) -> Option<StateValue> {
        match self.node(key)? {
            Node::Leaf(value) => Some(value.clone()),
            Node::Branch(children) => {
                let branch: Branch = leaves(children).into_iter().collect();
                Some(StateValue::new(branch))
            }
        }
    }

    /// Whether a value or a branch exists at `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.node(key).is_some()
    }

    /// All leaves strictly below `prefix`, ordered by path.
    ///
    /// Does NOT include `prefix` itself. In flat mode this is a string
    /// prefix match on `{prefix}/`.
    pub fn scan(&self, prefix: &str) -> Vec<(String, StateValue)> {
        let mut results = Vec::new();
        match self.mode {
            KeyMode::Flat => {
                let scan_prefix = format!("{}/", prefix);
                for (key, node) in self.root.range(scan_prefix.clone()..) {
                    if !key.starts_with(&scan_prefix) {
                        break;
                    }
                    if let Node::Leaf(value) = node {
                        results.push((key.clone(), value.clone()));
                    }
                }
            }
            KeyMode::Hierarchical => {
                if let Some(Node::Branch(children)) = self.node(prefix) {
                    collect_leaves(prefix, children, &mut results);
                }
            }
        }
        results
    }

    /// Every leaf in the tree with its full path.
    pub fn snapshot(&self) -> Vec<(String, StateValue)> {
        leaves(&self.root)
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        fn count(level: &BTreeMap<String, Node>) -> usize {
            level
                .values()
                .map(|node| match node {
                    Node::Leaf(_) => 1,
                    Node::Branch(children) => count(children),
                })
                .sum()
        }
        count(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.root.clear();
    }

    fn node(&self, key: &str) -> Option<&Node> {
        let segments = self.mode.segments(key);
        let (last, parents) = segments.split_last()?;

        let mut level = &self.root;
        for segment in parents {
            match level.get(*segment)? {
                Node::Branch(children) => level = children,
                Node::Leaf(_) => return None,
            }
        }
        level.get(*last)
    }
}

/// Turn `node` into a branch (dropping a leaf if needed) and return its children.
fn into_branch(node: &mut Node) -> &mut BTreeMap<String, Node> {
    if matches!(node, Node::Leaf(_)) {
        *node = Node::Branch(BTreeMap::new());
    }
    match node {
        Node::Branch(children) => children,
        Node::Leaf(_) => unreachable!("leaf replaced by branch above"),
    }
}

/// Leaves of `level` with paths relative to it.
fn leaves(level: &BTreeMap<String, Node>) -> Vec<(String, StateValue)> {
    let mut results = Vec::new();
    for (segment, node) in level {
        match node {
            Node::Leaf(value) => results.push((segment.clone(), value.clone())),
            Node::Branch(children) => collect_leaves(segment, children, &mut results),
        }
    }
    results
}

fn collect_leaves(
    path: &str,
    level: &BTreeMap<String, Node>,
    results: &mut Vec<(String, StateValue)>,
) {
    for (segment, node) in level {
        let child = format!("{}/{}", path, segment);
        match node {
            Node::Leaf(value) => results.push((child, value.clone())),
            Node::Branch(children) => collect_leaves(&child, children, results),
        }
    }
}
